//! Frame header codec.
//!
//! Every published frame is preceded by a fixed binary header that
//! describes the pixel payload: format, dimensions, ROI origin and the
//! payload length. The codec only frames metadata around an opaque
//! payload; it never looks at pixel data.

mod buffer;
mod codec;

pub use buffer::HeaderBuffer;
pub use codec::{
    align4, image_length_offset, ByteOrder, CodecError, FrameHeader, PixelFormat, HEADER_VERSION,
    METADATA_OFFSET, PAYLOAD_TYPE_IMAGE, TIMESTAMP_OFFSET,
};
