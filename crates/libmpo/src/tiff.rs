// https://www.itu.int/itudoc/itu-t/com16/tiff-fx/docs/tiff6.pdf

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::MpfError;

/// Size of one IFD entry: tag (2), field type (2), count (4), value or offset (4).
pub const TIFF_TAG_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// `II*\0` (little-endian)
    LittleEndian,
    /// `MM\0*` (big-endian)
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum TiffFieldType {
    BYTE = 1,
    ASCII = 2,
    SHORT = 3,
    LONG = 4,
    RATIONAL = 5,
    SBYTE = 6,
    UNDEFINED = 7,
    SSHORT = 8,
    SLONG = 9,
    SRATIONAL = 10,
    FLOAT = 11,
    DOUBLE = 12,
}

/// One fixed-size IFD entry, decoded structurally.
///
/// The tag id is not checked here; callers match it against what they expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffTag {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    /// The trailing four bytes as stored in the buffer.
    pub raw_value: [u8; 4],
    /// The trailing four bytes read in the buffer's byte order.
    pub value_or_offset: u32,
}

/// How the trailing four bytes of a [`TiffTag`] are to be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffTagValue {
    /// A byte-sized array of at most four elements, stored in place.
    Inline([u8; 4]),
    /// A scalar value, or an offset to data stored elsewhere.
    ValueOrOffset(u32),
}

impl Endianness {
    /// `II*\0` read as a big-endian `u32`.
    pub const LITTLE_ENDIAN_MARKER: u32 = 0x4949_2A00;
    /// `MM\0*` read as a big-endian `u32`.
    pub const BIG_ENDIAN_MARKER: u32 = 0x4D4D_002A;

    pub fn from_marker(marker: u32) -> Option<Self> {
        match marker {
            Self::LITTLE_ENDIAN_MARKER => Some(Endianness::LittleEndian),
            Self::BIG_ENDIAN_MARKER => Some(Endianness::BigEndian),
            _ => None,
        }
    }

    pub fn read_u16(self, buf: &[u8], offset: usize) -> Result<u16, MpfError> {
        let bytes = take::<2>(buf, offset)?;
        match self {
            Endianness::LittleEndian => Ok(u16::from_le_bytes(bytes)),
            Endianness::BigEndian => Ok(u16::from_be_bytes(bytes)),
        }
    }

    pub fn read_u32(self, buf: &[u8], offset: usize) -> Result<u32, MpfError> {
        let bytes = take::<4>(buf, offset)?;
        match self {
            Endianness::LittleEndian => Ok(u32::from_le_bytes(bytes)),
            Endianness::BigEndian => Ok(u32::from_be_bytes(bytes)),
        }
    }
}

/// Reads the fixed-position fields that precede the byte order marker.
pub fn read_u32_be(buf: &[u8], offset: usize) -> Result<u32, MpfError> {
    Endianness::BigEndian.read_u32(buf, offset)
}

impl TiffTag {
    /// Decodes the 12-byte entry at `offset`.
    pub fn decode(buf: &[u8], offset: usize, endianness: Endianness) -> Result<Self, MpfError> {
        // The whole record must be present before any field is taken from it.
        let record = take::<TIFF_TAG_SIZE>(buf, offset)?;

        let tag = endianness.read_u16(&record, 0)?;
        let field_type = endianness.read_u16(&record, 2)?;
        let count = endianness.read_u32(&record, 4)?;
        let raw_value = take::<4>(&record, 8)?;
        let value_or_offset = endianness.read_u32(&record, 8)?;

        Ok(TiffTag {
            tag,
            field_type,
            count,
            raw_value,
            value_or_offset,
        })
    }

    pub fn field_type(&self) -> Option<TiffFieldType> {
        TiffFieldType::from_u16(self.field_type)
    }

    pub fn value(&self) -> TiffTagValue {
        let inline = self.field_type()
            .map(|field_type| field_type.size() == 1 && self.count <= 4)
            .unwrap_or(false);

        if inline {
            TiffTagValue::Inline(self.raw_value)
        } else {
            TiffTagValue::ValueOrOffset(self.value_or_offset)
        }
    }
}

impl TiffFieldType {
    fn size(&self) -> usize {
        match self {
            TiffFieldType::BYTE => 1,
            TiffFieldType::ASCII => 1,
            TiffFieldType::SHORT => 2,
            TiffFieldType::LONG => 4,
            TiffFieldType::RATIONAL => 8,
            TiffFieldType::SBYTE => 1,
            TiffFieldType::UNDEFINED => 1,
            TiffFieldType::SSHORT => 2,
            TiffFieldType::SLONG => 4,
            TiffFieldType::SRATIONAL => 8,
            TiffFieldType::FLOAT => 4,
            TiffFieldType::DOUBLE => 8,
        }
    }
}

fn take<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], MpfError> {
    buf.get(offset..)
        .and_then(|rest| rest.get(..N))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(MpfError::TruncatedBuffer {
            offset,
            needed: N,
            available: buf.len().saturating_sub(offset),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_u32_in_both_byte_orders() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(Endianness::LittleEndian.read_u32(&bytes, 0), Ok(0x04030201));
        assert_eq!(Endianness::BigEndian.read_u32(&bytes, 0), Ok(0x01020304));
        assert_eq!(Endianness::BigEndian.read_u32(&bytes, 1), Ok(0x02030405));
        assert_eq!(read_u32_be(&bytes, 0), Ok(0x01020304));
    }

    #[test]
    fn reads_u16_in_both_byte_orders() {
        let bytes = [0xB0, 0x01];
        assert_eq!(Endianness::LittleEndian.read_u16(&bytes, 0), Ok(0x01B0));
        assert_eq!(Endianness::BigEndian.read_u16(&bytes, 0), Ok(0xB001));
    }

    #[test]
    fn short_reads_are_truncated_buffer() {
        let bytes = [0x01, 0x02, 0x03];
        assert_eq!(
            read_u32_be(&bytes, 0),
            Err(MpfError::TruncatedBuffer { offset: 0, needed: 4, available: 3 }),
        );
        assert_eq!(
            Endianness::LittleEndian.read_u32(&bytes, 10),
            Err(MpfError::TruncatedBuffer { offset: 10, needed: 4, available: 0 }),
        );
        assert_eq!(
            Endianness::LittleEndian.read_u32(&bytes, usize::MAX),
            Err(MpfError::TruncatedBuffer { offset: usize::MAX, needed: 4, available: 0 }),
        );
    }

    #[test]
    fn byte_order_markers() {
        assert_eq!(Endianness::from_marker(0x4949_2A00), Some(Endianness::LittleEndian));
        assert_eq!(Endianness::from_marker(0x4D4D_002A), Some(Endianness::BigEndian));
        assert_eq!(Endianness::from_marker(0x4D4D_2A00), None);
    }

    #[test]
    fn decodes_inline_undefined_array() {
        // Version tag, little-endian: 0xB000, UNDEFINED, count 4, "0100".
        let record = [0x00, 0xB0, 0x07, 0x00, 0x04, 0x00, 0x00, 0x00, b'0', b'1', b'0', b'0'];
        let tag = TiffTag::decode(&record, 0, Endianness::LittleEndian).unwrap();

        assert_eq!(tag.tag, 0xB000);
        assert_eq!(tag.field_type(), Some(TiffFieldType::UNDEFINED));
        assert_eq!(tag.count, 4);
        assert_eq!(tag.value(), TiffTagValue::Inline(*b"0100"));
    }

    #[test]
    fn decodes_long_value() {
        // Image count tag, big-endian: 0xB001, LONG, count 1, value 2.
        let record = [0xB0, 0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02];
        let tag = TiffTag::decode(&record, 0, Endianness::BigEndian).unwrap();

        assert_eq!(tag.tag, 0xB001);
        assert_eq!(tag.field_type(), Some(TiffFieldType::LONG));
        assert_eq!(tag.value(), TiffTagValue::ValueOrOffset(2));
    }

    #[test]
    fn large_byte_arrays_are_offsets() {
        // MP entry tag, big-endian: 0xB002, UNDEFINED, count 32, offset 50.
        let record = [0xB0, 0x02, 0x00, 0x07, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x32];
        let tag = TiffTag::decode(&record, 0, Endianness::BigEndian).unwrap();

        assert_eq!(tag.count, 32);
        assert_eq!(tag.value(), TiffTagValue::ValueOrOffset(50));
    }

    #[test]
    fn unknown_field_types_are_not_inline() {
        let record = [0x00, 0xB0, 0x63, 0x00, 0x01, 0x00, 0x00, 0x00, 0x2A, 0x00, 0x00, 0x00];
        let tag = TiffTag::decode(&record, 0, Endianness::LittleEndian).unwrap();

        assert_eq!(tag.field_type(), None);
        assert_eq!(tag.value(), TiffTagValue::ValueOrOffset(42));
    }

    #[test]
    fn tag_needs_twelve_bytes() {
        let record = [0u8; 16];
        assert!(TiffTag::decode(&record, 4, Endianness::BigEndian).is_ok());
        assert_eq!(
            TiffTag::decode(&record, 5, Endianness::BigEndian),
            Err(MpfError::TruncatedBuffer { offset: 5, needed: 12, available: 11 }),
        );
    }
}
