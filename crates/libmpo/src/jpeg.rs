use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace};
use zune_jpeg::ImageInfo as JpegImageInfo;
use zune_jpeg::zune_core::colorspace::ColorSpace as JpegColorSpace;

use crate::error::{MpoError, Result};
use crate::marker::{self, JpegSource, JpegSourceConfig, MarkerDispatcher};
use crate::mpf::{MpfEntryTable, MpfInfo};

/// One JPEG stream, decoded by the JPEG codec.
#[derive(Clone)]
pub struct DecodedJpeg {
    jpeg_info: JpegImageInfo,
    jpeg_color_space: JpegColorSpace,
    pixels: Vec<u8>,
}

impl DecodedJpeg {
    pub fn new_from_bytes(jpeg_bytes: &[u8]) -> Result<Self> {
        use zune_jpeg::JpegDecoder;
        use zune_jpeg::zune_core::bytestream::ZCursor;

        let mut jpeg_decoder = JpegDecoder::new(ZCursor::new(jpeg_bytes));
        jpeg_decoder.decode_headers()
            .map_err(|e| MpoError::Jpeg(format!("Failed to decode JPEG headers: {}", e)))
            ?;

        let jpeg_info = jpeg_decoder.info()
            .ok_or_else(|| MpoError::Jpeg("Failed to get JPEG image info".to_string()))
            ?;

        let jpeg_color_space = jpeg_decoder.output_colorspace()
            .ok_or_else(|| MpoError::Jpeg("Failed to get JPEG output ColorSpace".to_string()))
            ?;
        trace!("Output color space: {:?}", jpeg_color_space);

        let pixels = jpeg_decoder.decode()
            .map_err(|e| MpoError::Jpeg(format!("Failed to decode JPEG image: {}", e)))
            ?;
        trace!(
            "Decoded JPEG: {}x{} with {} bytes",
            jpeg_info.width, jpeg_info.height, pixels.len()
        );

        Ok(Self {
            jpeg_info,
            jpeg_color_space,
            pixels,
        })
    }

    pub fn extent(&self) -> (usize, usize) {
        (self.jpeg_info.width as usize, self.jpeg_info.height as usize)
    }

    pub fn color_space(&self) -> JpegColorSpace {
        self.jpeg_color_space
    }

    /// Row-major, interleaved in [`Self::color_space`].
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// A Multi-Picture Object file: the primary JPEG's header has been read, and the
/// individual images it indexes can be sliced out and decoded one by one.
pub struct MpoFile<R> {
    reader: R,
    mpf_info: Option<MpfInfo>,
}

impl<R: Read + Seek> MpoFile<R> {
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with_config(reader, JpegSourceConfig::default())
    }

    /// Reads the primary image's header from the start of `reader`, collecting its MPF information.
    /// Missing or malformed MPF information is not an error; see [`Self::mpf_info`].
    pub fn open_with_config(mut reader: R, config: JpegSourceConfig) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;

        let mut source = JpegSource::with_config(reader, config);
        let mut dispatcher = MarkerDispatcher::new();
        marker::read_header(&mut source, &mut dispatcher)?;

        let mpf_info = dispatcher.into_mpf_info();
        match &mpf_info {
            Some(mpf_info) => debug!("MPO with {} images", mpf_info.mp_entries().len()),
            None => debug!("No MPF information; plain JPEG"),
        }

        Ok(Self {
            reader: source.into_inner(),
            mpf_info,
        })
    }

    pub fn mpf_info(&self) -> Option<&MpfInfo> {
        self.mpf_info.as_ref()
    }

    pub fn entry_table(&self) -> Result<&MpfEntryTable> {
        self.mpf_info
            .as_ref()
            .map(|mpf_info| mpf_info.entry_table())
            .ok_or(MpoError::NoMultiPictureInfo)
    }

    /// `(absolute offset, size)` of every individual image.
    pub fn image_ranges(&self) -> Result<Vec<(u64, u64)>> {
        Ok(self.entry_table()?.image_ranges())
    }

    /// Reads the bytes of the individual image at `index`, a complete JPEG stream.
    pub fn read_image_bytes(&mut self, index: usize) -> Result<Vec<u8>> {
        let (offset, size) = {
            let entry_table = self.entry_table()?;
            entry_table.image_ranges()
                .get(index)
                .copied()
                .ok_or(MpoError::ImageIndexOutOfRange {
                    index,
                    count: entry_table.len(),
                })?
        };
        trace!("Image #{}: {} bytes at {}", index, size, offset);

        self.reader.seek(SeekFrom::Start(offset))?;

        // The declared size comes from the file; grow only as far as the stream actually goes.
        let mut bytes = Vec::new();
        (&mut self.reader).take(size).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != size {
            return Err(MpoError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "Image #{} declares {} bytes at {}, only {} available",
                    index, size, offset, bytes.len()
                ),
            )));
        }
        Ok(bytes)
    }

    pub fn decode_image(&mut self, index: usize) -> Result<DecodedJpeg> {
        let bytes = self.read_image_bytes(index)?;
        DecodedJpeg::new_from_bytes(&bytes)
    }

    /// Decodes the stream starting at the beginning of the file, regardless of MPF information.
    pub fn decode_primary(&mut self) -> Result<DecodedJpeg> {
        self.reader.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        DecodedJpeg::new_from_bytes(&bytes)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::mpf::testing::MpfPayloadBuilder;
    use crate::tiff::Endianness;

    struct SyntheticMpo {
        bytes: Vec<u8>,
        origin: u64,
        first_len: usize,
        second: Vec<u8>,
    }

    /// A primary image whose header carries an APP1, an ICC APP2 and an MPF APP2 segment,
    /// followed by a second, tiny stream.
    fn synthetic_mpo(endianness: Endianness) -> SyntheticMpo {
        let mut head = vec![0xFF, 0xD8];
        head.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x0C]);
        head.extend_from_slice(&[0xAA; 10]);
        let icc = b"ICC_PROFILE\0\x01\x01\x00\x00";
        head.extend_from_slice(&[0xFF, 0xE2]);
        head.extend_from_slice(&((icc.len() + 2) as u16).to_be_bytes());
        head.extend_from_slice(icc);

        let tail = [0xFF, 0xDA, 0x00, 0x02, 0x12, 0x34, 0x56, 0xFF, 0xD9];
        let second = b"\xFF\xD8second\xFF\xD9".to_vec();

        let mut builder = MpfPayloadBuilder::stereo(endianness);
        let payload_len = builder.build().len();

        // Marker and length, then `MPF\0`.
        let origin = head.len() + 4 + 4;
        let first_len = head.len() + 4 + payload_len + tail.len();

        builder.mp_entries[0].individual_image_size = first_len as u32;
        builder.mp_entries[0].individual_image_data_offset = 0;
        builder.mp_entries[1].individual_image_size = second.len() as u32;
        builder.mp_entries[1].individual_image_data_offset = (first_len - origin) as u32;
        let payload = builder.build();

        let mut bytes = head;
        bytes.extend_from_slice(&[0xFF, 0xE2]);
        bytes.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&tail);
        bytes.extend_from_slice(&second);

        SyntheticMpo {
            bytes,
            origin: origin as u64,
            first_len,
            second,
        }
    }

    #[test]
    fn slices_both_images() {
        for endianness in [Endianness::LittleEndian, Endianness::BigEndian] {
            for capacity in [2, 11, 4096] {
                let mpo = synthetic_mpo(endianness);
                let config = JpegSourceConfig::default().with_buffer_capacity(capacity);
                let mut file =
                    MpoFile::open_with_config(Cursor::new(mpo.bytes.clone()), config).unwrap();

                let entry_table = file.entry_table().unwrap();
                assert_eq!(entry_table.origin(), mpo.origin);
                assert_eq!(
                    file.image_ranges().unwrap(),
                    vec![
                        (0, mpo.first_len as u64),
                        (mpo.first_len as u64, mpo.second.len() as u64),
                    ],
                );

                assert_eq!(file.read_image_bytes(0).unwrap(), &mpo.bytes[..mpo.first_len]);
                assert_eq!(file.read_image_bytes(1).unwrap(), mpo.second);
            }
        }
    }

    #[test]
    fn out_of_range_index() {
        let mpo = synthetic_mpo(Endianness::BigEndian);
        let mut file = MpoFile::open(Cursor::new(mpo.bytes)).unwrap();
        assert!(matches!(
            file.read_image_bytes(2),
            Err(MpoError::ImageIndexOutOfRange { index: 2, count: 2 }),
        ));
        assert!(matches!(
            file.decode_image(5),
            Err(MpoError::ImageIndexOutOfRange { index: 5, count: 2 }),
        ));
    }

    #[test]
    fn plain_jpeg_has_no_mpf_info() {
        let bytes = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46, 0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9,
        ];
        let mut file = MpoFile::open(Cursor::new(bytes)).unwrap();

        assert!(file.mpf_info().is_none());
        assert!(matches!(file.image_ranges(), Err(MpoError::NoMultiPictureInfo)));
        assert!(matches!(file.read_image_bytes(0), Err(MpoError::NoMultiPictureInfo)));
    }

    #[test]
    fn malformed_mpf_does_not_fail_the_session() {
        let mut mpo = synthetic_mpo(Endianness::LittleEndian);
        // Corrupt the low byte of the second entry's attribute, stored first in little-endian.
        let pos = mpo.origin as usize + 50 + 16;
        mpo.bytes[pos] = 0x01;

        let file = MpoFile::open(Cursor::new(mpo.bytes)).unwrap();
        assert!(file.mpf_info().is_none());
    }

    #[test]
    fn oversized_image_is_cut_short_by_the_stream() {
        let mut mpo = synthetic_mpo(Endianness::BigEndian);
        // Size field of the second entry.
        let pos = mpo.origin as usize + 50 + 16 + 4;
        mpo.bytes[pos..pos + 4].copy_from_slice(&u32::MAX.to_be_bytes());

        let mut file = MpoFile::open(Cursor::new(mpo.bytes)).unwrap();
        assert_eq!(
            file.image_ranges().unwrap()[1],
            (mpo.first_len as u64, u32::MAX as u64),
        );
        assert!(matches!(
            file.read_image_bytes(1),
            Err(MpoError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof,
        ));

        // The first image is unaffected.
        assert_eq!(file.read_image_bytes(0).unwrap().len(), mpo.first_len);
    }

    #[test]
    fn stream_ending_inside_the_segment_is_a_host_error() {
        let mpo = synthetic_mpo(Endianness::BigEndian);
        let truncated = mpo.bytes[..mpo.origin as usize + 20].to_vec();

        assert!(matches!(
            MpoFile::open(Cursor::new(truncated)),
            Err(MpoError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof,
        ));
    }

    #[test]
    fn rejects_non_jpeg() {
        assert!(matches!(
            MpoFile::open(Cursor::new(b"GIF89a".to_vec())),
            Err(MpoError::NotAJpeg(0x4749)),
        ));
    }
}
