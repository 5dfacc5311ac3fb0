use derive_more::{Display, Error, From};

/// Errors raised while decoding the MPF payload of one APP2 segment.
///
/// Every variant is local to a single parse attempt.
/// [`MarkerDispatcher`](crate::marker::MarkerDispatcher) logs and drops them, so they never
/// abort the decode of the primary JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum MpfError {
    /// A fixed-size read ran past the end of the buffer.
    #[display("Truncated buffer: need {needed} bytes at offset {offset}, {available} available")]
    TruncatedBuffer {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The payload does not start with `MPF\0`.
    #[display("MPF magic not found: got 0x{_0:08X}")]
    MagicNotFound(#[error(not(source))] u32),

    /// The TIFF header is neither `II*\0` nor `MM\0*`.
    #[display("Unrecognized byte order marker: 0x{_0:08X}")]
    UnrecognizedByteOrder(#[error(not(source))] u32),

    /// The Index IFD does not immediately follow the TIFF header.
    #[display("Unsupported Index IFD offset: expected 8, got {_0}")]
    UnsupportedIfdOffset(#[error(not(source))] u32),

    /// A mandatory tag is not where the fixed layout expects it.
    #[display("Unexpected tag: expected 0x{expected:04X}, found 0x{found:04X}")]
    UnexpectedTag {
        expected: u16,
        found: u16,
    },

    /// Only stereo pairs are handled.
    #[display("Unsupported image count: expected 2, got {_0}")]
    UnsupportedImageCount(#[error(not(source))] u32),

    /// The MP entry at this index is not a disparity image.
    #[display("MP entry {_0} is not a disparity image")]
    NotADisparityImage(#[error(not(source))] usize),
}

/// Errors surfaced to the host working with an MPO file.
#[derive(Debug, Display, Error, From)]
pub enum MpoError {
    #[display("I/O error: {_0}")]
    #[from]
    Io(#[error(source)] std::io::Error),

    /// The underlying JPEG codec failed.
    #[display("JPEG error: {_0}")]
    Jpeg(#[error(not(source))] String),

    /// The stream does not start with SOI.
    #[display("Not a JPEG: expected SOI (0xFFD8), got 0x{_0:04X}")]
    NotAJpeg(#[error(not(source))] u16),

    /// No usable MPF metadata was found in the primary image's header.
    #[display("No Multi-Picture Format information available")]
    NoMultiPictureInfo,

    #[display("Image index {index} out of range for {count} images")]
    ImageIndexOutOfRange {
        index: usize,
        count: usize,
    },
}

pub type Result<T, E = MpoError> = std::result::Result<T, E>;
