use std::io::{self, Read, Seek};

use log::{debug, trace, warn};

use crate::error::{MpfError, MpoError};
use crate::mpf::{self, MpfInfo};

/// Start Of Image, read as a big-endian `u16`.
pub const JPEG_SOI: u16 = 0xFFD8;

const MARKER_TEM: u8 = 0x01;
const MARKER_RST0: u8 = 0xD0;
const MARKER_RST7: u8 = 0xD7;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_APP2: u8 = 0xE2;

/// Size of the input buffer libjpeg's stdio source uses.
const DEFAULT_BUFFER_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct JpegSourceConfig {
    buffer_capacity: usize,
}

impl Default for JpegSourceConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl JpegSourceConfig {
    /// Capacities below 1 are raised to 1.
    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity.max(1);
        self
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

/// A buffered byte source over a seekable stream.
///
/// Bytes are pulled from the underlying stream one buffer at a time, so the stream's
/// position runs ahead of what has been consumed by [`Self::bytes_in_buffer`] bytes.
pub struct JpegSource<R> {
    reader: R,
    buffer: Box<[u8]>,
    next_input_byte: usize,
    bytes_in_buffer: usize,
}

impl<R: Read + Seek> JpegSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, JpegSourceConfig::default())
    }

    pub fn with_config(reader: R, config: JpegSourceConfig) -> Self {
        Self {
            reader,
            buffer: vec![0; config.buffer_capacity()].into_boxed_slice(),
            next_input_byte: 0,
            bytes_in_buffer: 0,
        }
    }

    pub fn bytes_in_buffer(&self) -> usize {
        self.bytes_in_buffer
    }

    /// Position of the underlying stream, which includes the buffered bytes.
    pub fn stream_position(&mut self) -> io::Result<u64> {
        self.reader.stream_position()
    }

    /// Replaces the buffer content with the next chunk of the stream.
    /// Returns `false` at the end of the stream.
    pub fn fill_buffer(&mut self) -> io::Result<bool> {
        let read = loop {
            match self.reader.read(&mut self.buffer) {
                Ok(read) => break read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        self.next_input_byte = 0;
        self.bytes_in_buffer = read;
        Ok(read > 0)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        if self.bytes_in_buffer == 0 && !self.fill_buffer()? {
            return Err(unexpected_eof());
        }

        let byte = self.buffer[self.next_input_byte];
        self.next_input_byte += 1;
        self.bytes_in_buffer -= 1;
        Ok(byte)
    }

    pub fn read_u16_be(&mut self) -> io::Result<u16> {
        let high = self.read_u8()?;
        let low = self.read_u8()?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Copies into `dest` chunk by chunk, refilling the buffer as often as needed.
    /// Returns the number of bytes copied, which is less than `dest.len()` only at the end
    /// of the stream.
    pub fn copy_to(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        while copied < dest.len() {
            if self.bytes_in_buffer == 0 && !self.fill_buffer()? {
                break;
            }

            let chunk = self.bytes_in_buffer.min(dest.len() - copied);
            dest[copied..copied + chunk]
                .copy_from_slice(&self.buffer[self.next_input_byte..self.next_input_byte + chunk]);

            copied += chunk;
            self.next_input_byte += chunk;
            self.bytes_in_buffer -= chunk;
        }
        Ok(copied)
    }

    pub fn skip(&mut self, count: usize) -> io::Result<()> {
        let mut remaining = count;
        while remaining > 0 {
            if self.bytes_in_buffer == 0 && !self.fill_buffer()? {
                return Err(unexpected_eof());
            }

            let chunk = self.bytes_in_buffer.min(remaining);
            remaining -= chunk;
            self.next_input_byte += chunk;
            self.bytes_in_buffer -= chunk;
        }
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Collects MPF information from the APP2 segments of one decode session.
#[derive(Debug, Default)]
pub struct MarkerDispatcher {
    mpf_info: Option<MpfInfo>,
}

impl MarkerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mpf_info(&self) -> Option<&MpfInfo> {
        self.mpf_info.as_ref()
    }

    pub fn into_mpf_info(self) -> Option<MpfInfo> {
        self.mpf_info
    }

    /// * `source` - Must be positioned right after an APP2 marker.
    ///
    /// The whole segment is consumed whether or not it holds valid MPF information.
    /// Parse failures are logged and dropped; only errors of the underlying stream are returned.
    pub fn on_app2<R: Read + Seek>(&mut self, source: &mut JpegSource<R>) -> io::Result<()> {
        let length = source.read_u16_be()?;
        let payload_length = (length as usize).saturating_sub(2);

        let mut payload = vec![0u8; payload_length];
        let copied = source.copy_to(&mut payload)?;
        if copied < payload_length {
            let e = MpfError::TruncatedBuffer {
                offset: 0,
                needed: payload_length,
                available: copied,
            };
            warn!("Failed to read APP2 segment: {}", e);
            return Ok(());
        }

        let stream_position = source.stream_position()?;
        let origin = mpf::origin_offset(
            stream_position,
            source.bytes_in_buffer() as u64,
            payload_length as u64,
        );

        self.handle_payload(&payload, origin);
        Ok(())
    }

    fn handle_payload(&mut self, payload: &[u8], origin: u64) {
        match MpfInfo::new_from_bytes(payload, origin) {
            Ok(mpf_info) => {
                if self.mpf_info.is_some() {
                    warn!("Ignoring an additional MPF segment");
                    return;
                }
                debug!(
                    "Found MPF information with {} entries, origin at {}",
                    mpf_info.mp_entries().len(),
                    origin
                );
                self.mpf_info = Some(mpf_info);
            }
            Err(MpfError::MagicNotFound(magic)) => {
                // Other APP2 users, e.g. ICC profiles.
                debug!("Skipping APP2 segment without MPF magic (0x{:08X})", magic);
            }
            Err(e @ MpfError::TruncatedBuffer { .. })
            | Err(e @ MpfError::UnrecognizedByteOrder(_))
            | Err(e @ MpfError::UnsupportedIfdOffset(_))
            | Err(e @ MpfError::UnexpectedTag { .. })
            | Err(e @ MpfError::UnsupportedImageCount(_))
            | Err(e @ MpfError::NotADisparityImage(_)) => {
                warn!("Failed to parse MPF segment: {}", e);
            }
        }
    }
}

/// Walks the marker segments from SOI up to the first SOS (or EOI), handing APP2 segments
/// to `dispatcher`.
pub fn read_header<R: Read + Seek>(
    source: &mut JpegSource<R>,
    dispatcher: &mut MarkerDispatcher,
) -> Result<(), MpoError> {
    let soi = source.read_u16_be()?;
    if soi != JPEG_SOI {
        return Err(MpoError::NotAJpeg(soi));
    }

    loop {
        let marker = next_marker(source)?;
        trace!("Marker 0xFF{:02X}", marker);

        match marker {
            MARKER_APP2 => dispatcher.on_app2(source)?,
            MARKER_SOS | MARKER_EOI => return Ok(()),
            MARKER_TEM | MARKER_RST0..=MARKER_RST7 => {}
            _ => {
                let length = source.read_u16_be()?;
                source.skip((length as usize).saturating_sub(2))?;
            }
        }
    }
}

fn next_marker<R: Read + Seek>(source: &mut JpegSource<R>) -> io::Result<u8> {
    let mut discarded = 0usize;
    loop {
        let mut byte = source.read_u8()?;
        if byte != 0xFF {
            discarded += 1;
            continue;
        }

        // Any number of fill bytes may precede the marker code.
        while byte == 0xFF {
            byte = source.read_u8()?;
        }

        if byte != 0 {
            if discarded > 0 {
                warn!(
                    "Corrupt JPEG data: {} extraneous bytes before marker 0x{:02X}",
                    discarded, byte
                );
            }
            return Ok(byte);
        }
        discarded += 2;
    }
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of JPEG stream")
}
