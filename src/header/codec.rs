//! Binary layout of the frame header.
//!
//! ```text
//! offset  size  field
//!      0     4  version
//!      4     4  payload type
//!      8     8  timestamp (ns)
//!     16     4  pixel format code
//!     20     4  size x
//!     24     4  size y
//!     28     4  offset x
//!     32     4  offset y
//!     36     4  padding x
//!     40     4  padding y
//!     44     4  metadata length (n)
//!     48     n  metadata
//!      -     -  zero pad to a 4-byte boundary
//!      A     4  image buffer length, A = align4(48 + n)
//! ```
//!
//! The pixel payload is not part of the header. It travels as a second
//! buffer segment immediately after it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current protocol version.
pub const HEADER_VERSION: i32 = 0;

/// Payload type for raw image frames.
pub const PAYLOAD_TYPE_IMAGE: i32 = 0;

/// Byte offset of the timestamp field.
pub const TIMESTAMP_OFFSET: usize = 8;

/// Byte offset of the metadata length field.
pub const METADATA_LENGTH_OFFSET: usize = 44;

/// Byte offset of the first metadata byte.
pub const METADATA_OFFSET: usize = 48;

/// Errors produced while encoding or decoding a header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The output buffer cannot hold the encoded header.
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },
    /// The input ends before the header does.
    #[error("truncated header: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },
    /// The metadata length field is negative.
    #[error("negative metadata length: {0}")]
    NegativeMetadataLength(i32),
    /// The metadata does not fit an `i32` length.
    #[error("metadata too long: {0} bytes")]
    MetadataTooLong(usize),
}

/// Byte order used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    #[inline]
    fn put_i32(self, buf: &mut [u8], offset: usize, value: i32) {
        let bytes = match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        buf[offset..offset + 4].copy_from_slice(&bytes);
    }

    #[inline]
    pub(crate) fn put_i64(self, buf: &mut [u8], offset: usize, value: i64) {
        let bytes = match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        buf[offset..offset + 8].copy_from_slice(&bytes);
    }

    #[inline]
    fn get_i32(self, buf: &[u8], offset: usize) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[offset..offset + 4]);
        match self {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        }
    }

    #[inline]
    fn get_i64(self, buf: &[u8], offset: usize) -> i64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[offset..offset + 8]);
        match self {
            ByteOrder::Little => i64::from_le_bytes(bytes),
            ByteOrder::Big => i64::from_be_bytes(bytes),
        }
    }
}

/// Pixel format code carried in the header.
///
/// Codes follow the GenICam pixel format naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,
    /// 16-bit monochrome.
    Mono16,
    /// A code this crate does not name, carried through unchanged.
    Other(i32),
}

impl PixelFormat {
    /// PFNC code for `Mono8`.
    pub const MONO8_CODE: i32 = 0x0108_0001;
    /// PFNC code for `Mono16`.
    pub const MONO16_CODE: i32 = 0x0110_0007;

    /// Returns the wire code.
    pub fn code(self) -> i32 {
        match self {
            PixelFormat::Mono8 => Self::MONO8_CODE,
            PixelFormat::Mono16 => Self::MONO16_CODE,
            PixelFormat::Other(code) => code,
        }
    }

    /// Maps a wire code back to a format.
    pub fn from_code(code: i32) -> Self {
        match code {
            Self::MONO8_CODE => PixelFormat::Mono8,
            Self::MONO16_CODE => PixelFormat::Mono16,
            other => PixelFormat::Other(other),
        }
    }

    /// Bytes per pixel, if known.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Mono8 => Some(1),
            PixelFormat::Mono16 => Some(2),
            PixelFormat::Other(_) => None,
        }
    }
}

/// Rounds `n` up to the next multiple of 4.
#[inline]
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Byte offset of the image buffer length field for a given metadata length.
#[inline]
pub const fn image_length_offset(metadata_len: usize) -> usize {
    align4(METADATA_OFFSET + metadata_len)
}

/// Descriptive header sent in front of every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version.
    pub version: i32,
    /// Kind of payload that follows.
    pub payload_type: i32,
    /// Wall-clock capture time, nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
    /// Pixel format of the payload.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub size_x: i32,
    /// Frame height in pixels.
    pub size_y: i32,
    /// ROI origin column on the sensor.
    pub offset_x: i32,
    /// ROI origin row on the sensor.
    pub offset_y: i32,
    /// Reserved.
    pub padding_x: i32,
    /// Reserved.
    pub padding_y: i32,
    /// Opaque metadata bytes.
    pub metadata: Vec<u8>,
    /// Payload size in bytes.
    pub image_buffer_length: i32,
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            version: HEADER_VERSION,
            payload_type: PAYLOAD_TYPE_IMAGE,
            timestamp_ns: 0,
            format: PixelFormat::Mono16,
            size_x: 0,
            size_y: 0,
            offset_x: 0,
            offset_y: 0,
            padding_x: 0,
            padding_y: 0,
            metadata: Vec::new(),
            image_buffer_length: 0,
        }
    }
}

impl FrameHeader {
    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        image_length_offset(self.metadata.len()) + 4
    }

    /// Encodes into `buf`, returning the number of bytes written.
    pub fn encode_into(&self, buf: &mut [u8], order: ByteOrder) -> Result<usize, CodecError> {
        let metadata_len = i32::try_from(self.metadata.len())
            .map_err(|_| CodecError::MetadataTooLong(self.metadata.len()))?;
        let need = self.encoded_len();
        if buf.len() < need {
            return Err(CodecError::BufferTooSmall {
                need,
                have: buf.len(),
            });
        }

        order.put_i32(buf, 0, self.version);
        order.put_i32(buf, 4, self.payload_type);
        order.put_i64(buf, TIMESTAMP_OFFSET, self.timestamp_ns);
        order.put_i32(buf, 16, self.format.code());
        order.put_i32(buf, 20, self.size_x);
        order.put_i32(buf, 24, self.size_y);
        order.put_i32(buf, 28, self.offset_x);
        order.put_i32(buf, 32, self.offset_y);
        order.put_i32(buf, 36, self.padding_x);
        order.put_i32(buf, 40, self.padding_y);
        order.put_i32(buf, METADATA_LENGTH_OFFSET, metadata_len);

        let metadata_end = METADATA_OFFSET + self.metadata.len();
        buf[METADATA_OFFSET..metadata_end].copy_from_slice(&self.metadata);

        let length_offset = image_length_offset(self.metadata.len());
        buf[metadata_end..length_offset].fill(0);
        order.put_i32(buf, length_offset, self.image_buffer_length);

        Ok(need)
    }

    /// Encodes into a freshly allocated buffer.
    pub fn encode(&self, order: ByteOrder) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.encode_into(&mut buf, order)?;
        Ok(buf)
    }

    /// Decodes a header from the front of `buf`.
    ///
    /// Returns the header and the number of bytes it occupied, so the
    /// caller can find the payload that follows.
    pub fn decode(buf: &[u8], order: ByteOrder) -> Result<(Self, usize), CodecError> {
        if buf.len() < METADATA_OFFSET {
            return Err(CodecError::Truncated {
                need: METADATA_OFFSET,
                have: buf.len(),
            });
        }

        let metadata_len = order.get_i32(buf, METADATA_LENGTH_OFFSET);
        if metadata_len < 0 {
            return Err(CodecError::NegativeMetadataLength(metadata_len));
        }
        let metadata_len = metadata_len as usize;
        let length_offset = image_length_offset(metadata_len);
        let need = length_offset + 4;
        if buf.len() < need {
            return Err(CodecError::Truncated {
                need,
                have: buf.len(),
            });
        }

        let header = FrameHeader {
            version: order.get_i32(buf, 0),
            payload_type: order.get_i32(buf, 4),
            timestamp_ns: order.get_i64(buf, TIMESTAMP_OFFSET),
            format: PixelFormat::from_code(order.get_i32(buf, 16)),
            size_x: order.get_i32(buf, 20),
            size_y: order.get_i32(buf, 24),
            offset_x: order.get_i32(buf, 28),
            offset_y: order.get_i32(buf, 32),
            padding_x: order.get_i32(buf, 36),
            padding_y: order.get_i32(buf, 40),
            metadata: buf[METADATA_OFFSET..METADATA_OFFSET + metadata_len].to_vec(),
            image_buffer_length: order.get_i32(buf, length_offset),
        };

        Ok((header, need))
    }
}
