//! Multi-Picture Object (MPO) support: reads the Multi-Picture Format (MPF) index
//! carried in the APP2 segment of the primary JPEG and uses it to slice out and decode
//! the individual images, e.g. both views of a stereo pair.
//!
//! See _CIPA DC-007-2009 Multi-Picture Format_.

mod error;
mod jpeg;
mod marker;
mod mpf;
mod tiff;

pub use error::{MpfError, MpoError, Result};
pub use jpeg::{DecodedJpeg, MpoFile};
pub use marker::{read_header, JpegSource, JpegSourceConfig, MarkerDispatcher, JPEG_SOI};
pub use mpf::{
    build_entry_table, origin_offset, parse, MpfEntryTable, MpfIndexIfd, MpfInfo, MpfMpEntry,
    DISPARITY_IMAGE, MPF_MAGIC, MPF_MAGIC_LEN, MP_ENTRY_SIZE,
};
pub use tiff::{read_u32_be, Endianness, TiffFieldType, TiffTag, TiffTagValue, TIFF_TAG_SIZE};
