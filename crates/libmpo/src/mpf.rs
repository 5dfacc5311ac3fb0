// https://web.archive.org/web/20160405200235/http://cipa.jp/std/documents/e/DC-007_E.pdf

use log::{trace, warn};

use crate::error::MpfError;
use crate::tiff::{self, Endianness, TiffTag, TiffTagValue, TIFF_TAG_SIZE};

/// `MPF\0` read as a big-endian `u32`.
pub const MPF_MAGIC: u32 = 0x4D50_4600;

/// Low 24 bits of the individual image attribute of a disparity image.
pub const DISPARITY_IMAGE: u32 = 0x02_0002;

/// Length of the MPF identifier; the TIFF header, and so the origin, follows it.
pub const MPF_MAGIC_LEN: usize = 4;

pub const MP_ENTRY_SIZE: usize = 16;

const TAG_MP_FORMAT_VERSION: u16 = 0xB000;
const TAG_NUMBER_OF_IMAGES: u16 = 0xB001;
const TAG_MP_ENTRY: u16 = 0xB002;
const TAG_IMAGE_UID_LIST: u16 = 0xB003;
const TAG_TOTAL_FRAMES: u16 = 0xB004;

const INDEX_IFD_OFFSET: u32 = 8;
const STEREO_IMAGE_COUNT: u32 = 2;

/// With only the three mandatory tags, the MP entry table starts 50 bytes past the origin:
/// the 8-byte header, a 2-byte count, three 12-byte tags and the 4-byte next IFD offset.
/// Anything further out means the optional tags sit in between.
const OPTIONAL_FIELDS_THRESHOLD: u32 = 50;

/// The MP Index IFD of the first individual image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpfIndexIfd {
    pub endianness: Endianness,
    pub tag_count: u16,
    /// Expected to be `"0100"`.
    pub version: [u8; 4],
    pub number_of_images: u32,
    /// Offset of the MP entry table, relative to the origin.
    pub mp_entry_offset: u32,
    /// Declared byte length of the MP entry table.
    pub mp_entry_size: u32,
    pub image_uid_list: Option<[u8; 4]>,
    pub total_frames: Option<u32>,
    pub next_ifd_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpfMpEntry {
    pub individual_image_attribute: u32,
    pub individual_image_size: u32,
    /// Relative to the origin. Zero for the first individual image, which starts the file.
    pub individual_image_data_offset: u32,
    pub dependent_image_1_entry_number: u16,
    pub dependent_image_2_entry_number: u16,
}

/// The MP entries of a stereo pair together with the absolute file position of the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpfEntryTable {
    origin: u64,
    mp_entries: Vec<MpfMpEntry>,
}

/// Represents the Multi-Picture Format (MPF) information extracted from an APP2 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpfInfo {
    index_ifd: MpfIndexIfd,
    entry_table: MpfEntryTable,
}

impl MpfMpEntry {
    /// The image type code, without the flag bits.
    pub fn image_type(&self) -> u32 {
        self.individual_image_attribute & 0x00FF_FFFF
    }

    pub fn flags(&self) -> u8 {
        (self.individual_image_attribute >> 24) as u8
    }

    pub fn is_disparity_image(&self) -> bool {
        self.image_type() == DISPARITY_IMAGE
    }
}

impl MpfEntryTable {
    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn mp_entries(&self) -> &[MpfMpEntry] {
        &self.mp_entries
    }

    pub fn len(&self) -> usize {
        self.mp_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mp_entries.is_empty()
    }

    /// Absolute file position of the individual image at `index`.
    pub fn absolute_offset(&self, index: usize) -> Option<u64> {
        let entry = self.mp_entries.get(index)?;
        if index == 0 && entry.individual_image_data_offset == 0 {
            Some(0)
        } else {
            Some(self.origin + entry.individual_image_data_offset as u64)
        }
    }

    /// `(absolute offset, size)` of every individual image, in entry order.
    pub fn image_ranges(&self) -> Vec<(u64, u64)> {
        (0..self.mp_entries.len())
            .filter_map(|index| {
                let offset = self.absolute_offset(index)?;
                Some((offset, self.mp_entries[index].individual_image_size as u64))
            })
            .collect()
    }
}

impl MpfInfo {
    /// * `mpf_bytes` - The APP2 payload, starting with `MPF\0`.
    /// * `origin` - Absolute file position of the byte following `MPF\0`. See [`origin_offset`].
    pub fn new_from_bytes(mpf_bytes: &[u8], origin: u64) -> Result<Self, MpfError> {
        let (index_ifd, entry_table) = parse(mpf_bytes, origin)?;
        Ok(Self {
            index_ifd,
            entry_table,
        })
    }

    pub fn index_ifd(&self) -> &MpfIndexIfd {
        &self.index_ifd
    }

    pub fn entry_table(&self) -> &MpfEntryTable {
        &self.entry_table
    }

    pub fn mp_entries(&self) -> &[MpfMpEntry] {
        self.entry_table.mp_entries()
    }
}

/// Absolute file position of the MPF origin.
///
/// * `stream_position` - Position of the underlying stream once the whole payload has been
///   consumed.
/// * `bytes_in_buffer` - Bytes read from the stream but not yet consumed by the marker reader.
/// * `payload_length` - Length of the APP2 payload, i.e. the segment length minus 2.
pub fn origin_offset(stream_position: u64, bytes_in_buffer: u64, payload_length: u64) -> u64 {
    stream_position
        .saturating_sub(bytes_in_buffer)
        .saturating_sub(payload_length)
        + MPF_MAGIC_LEN as u64
}

/// Parses an APP2 payload into its MP Index IFD and MP entry table.
///
/// Offsets in [`MpfError::TruncatedBuffer`] are relative to the start of `payload`.
pub fn parse(payload: &[u8], origin: u64) -> Result<(MpfIndexIfd, MpfEntryTable), MpfError> {
    let magic = tiff::read_u32_be(payload, 0)?;
    if magic != MPF_MAGIC {
        return Err(MpfError::MagicNotFound(magic));
    }

    let byte_order_marker = tiff::read_u32_be(payload, MPF_MAGIC_LEN)?;
    let endianness = Endianness::from_marker(byte_order_marker)
        .ok_or(MpfError::UnrecognizedByteOrder(byte_order_marker))?;

    let index_ifd_offset = endianness.read_u32(payload, MPF_MAGIC_LEN + 4)?;
    if index_ifd_offset != INDEX_IFD_OFFSET {
        return Err(MpfError::UnsupportedIfdOffset(index_ifd_offset));
    }

    let mut pos = MPF_MAGIC_LEN + INDEX_IFD_OFFSET as usize;

    let tag_count = endianness.read_u16(payload, pos)?;
    pos += 2;

    let version_tag = read_expected_tag(payload, &mut pos, endianness, TAG_MP_FORMAT_VERSION)?;
    let number_of_images_tag =
        read_expected_tag(payload, &mut pos, endianness, TAG_NUMBER_OF_IMAGES)?;
    let mp_entry_tag = read_expected_tag(payload, &mut pos, endianness, TAG_MP_ENTRY)?;

    let version = match version_tag.value() {
        TiffTagValue::Inline(bytes) => bytes,
        TiffTagValue::ValueOrOffset(_) => {
            warn!(
                "MP format version is not stored in place (type {}, count {})",
                version_tag.field_type, version_tag.count
            );
            version_tag.raw_value
        }
    };
    trace!("MP format version: {}", String::from_utf8_lossy(&version));
    if &version != b"0100" {
        warn!(
            "Unexpected MP format version {:?}, expected \"0100\"",
            String::from_utf8_lossy(&version)
        );
    }

    let number_of_images = number_of_images_tag.value_or_offset;
    trace!("Number of images: {}", number_of_images);

    if number_of_images != STEREO_IMAGE_COUNT {
        return Err(MpfError::UnsupportedImageCount(number_of_images));
    }

    let mp_entry_offset = mp_entry_tag.value_or_offset;
    let mp_entry_size = mp_entry_tag.count;
    if mp_entry_size as usize != MP_ENTRY_SIZE * number_of_images as usize {
        warn!("MP entry tag declares {} bytes for {} images", mp_entry_size, number_of_images);
    }

    let (image_uid_list, total_frames) = if mp_entry_offset > OPTIONAL_FIELDS_THRESHOLD {
        let image_uid_list_tag =
            read_optional_tag(payload, &mut pos, endianness, TAG_IMAGE_UID_LIST)?;
        let total_frames_tag =
            read_optional_tag(payload, &mut pos, endianness, TAG_TOTAL_FRAMES)?;
        (Some(image_uid_list_tag.raw_value), Some(total_frames_tag.value_or_offset))
    } else {
        (None, None)
    };

    let next_ifd_offset = endianness.read_u32(payload, pos)?;

    let index_ifd = MpfIndexIfd {
        endianness,
        tag_count,
        version,
        number_of_images,
        mp_entry_offset,
        mp_entry_size,
        image_uid_list,
        total_frames,
        next_ifd_offset,
    };

    let entry_table = build_entry_table(
        &payload[MPF_MAGIC_LEN..],
        endianness,
        mp_entry_offset,
        number_of_images,
        origin,
    )?;

    Ok((index_ifd, entry_table))
}

/// Reads `count` MP entries starting at `mp_entry_offset`.
///
/// * `base` - The payload starting at the origin; `mp_entry_offset` and the offsets in
///   [`MpfError::TruncatedBuffer`] are relative to it.
///
/// Fails on the first entry that is not a disparity image; no partial table is returned.
pub fn build_entry_table(
    base: &[u8],
    endianness: Endianness,
    mp_entry_offset: u32,
    count: u32,
    origin: u64,
) -> Result<MpfEntryTable, MpfError> {
    let mut mp_entries: Vec<MpfMpEntry> =
        Vec::with_capacity(count.min(STEREO_IMAGE_COUNT) as usize);

    for i in 0..count as usize {
        let pos = (mp_entry_offset as usize).saturating_add(i * MP_ENTRY_SIZE);

        let entry = MpfMpEntry {
            individual_image_attribute: endianness.read_u32(base, pos)?,
            individual_image_size: endianness.read_u32(base, pos.saturating_add(4))?,
            individual_image_data_offset: endianness.read_u32(base, pos.saturating_add(8))?,
            dependent_image_1_entry_number: endianness.read_u16(base, pos.saturating_add(12))?,
            dependent_image_2_entry_number: endianness.read_u16(base, pos.saturating_add(14))?,
        };

        trace!("MP entry {}: attribute 0x{:08X}", i, entry.individual_image_attribute);
        trace!("MP entry {}: offset {}", i, entry.individual_image_data_offset);
        trace!("MP entry {}: size {}", i, entry.individual_image_size);

        if !entry.is_disparity_image() {
            return Err(MpfError::NotADisparityImage(i));
        }

        mp_entries.push(entry);
    }

    Ok(MpfEntryTable {
        origin,
        mp_entries,
    })
}

fn read_expected_tag(
    payload: &[u8],
    pos: &mut usize,
    endianness: Endianness,
    expected: u16,
) -> Result<TiffTag, MpfError> {
    let tag = TiffTag::decode(payload, *pos, endianness)?;
    *pos += TIFF_TAG_SIZE;

    if tag.tag != expected {
        return Err(MpfError::UnexpectedTag {
            expected,
            found: tag.tag,
        });
    }
    Ok(tag)
}

fn read_optional_tag(
    payload: &[u8],
    pos: &mut usize,
    endianness: Endianness,
    expected: u16,
) -> Result<TiffTag, MpfError> {
    let tag = TiffTag::decode(payload, *pos, endianness)?;
    *pos += TIFF_TAG_SIZE;

    if tag.tag != expected {
        warn!("Expected optional MPF tag 0x{:04X}, found 0x{:04X}", expected, tag.tag);
    }
    Ok(tag)
}
