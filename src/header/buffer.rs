//! Long-lived encoded header reused across frames.

use super::codec::{ByteOrder, CodecError, FrameHeader, TIMESTAMP_OFFSET};

/// The encoded form of a [`FrameHeader`], allocated once.
///
/// Every field except the timestamp is frozen at construction. The
/// timestamp is patched in place for each frame, so the hot path never
/// re-encodes or allocates.
pub struct HeaderBuffer {
    bytes: Vec<u8>,
    order: ByteOrder,
}

impl HeaderBuffer {
    /// Encodes `header` once into a buffer of exactly its encoded size.
    pub fn new(header: &FrameHeader, order: ByteOrder) -> Result<Self, CodecError> {
        Ok(Self {
            bytes: header.encode(order)?,
            order,
        })
    }

    /// Overwrites the timestamp field.
    #[inline]
    pub fn set_timestamp(&mut self, timestamp_ns: i64) {
        self.order.put_i64(&mut self.bytes, TIMESTAMP_OFFSET, timestamp_ns);
    }

    /// Returns the encoded bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the byte order the header was encoded with.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Returns the encoded length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for HeaderBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderBuffer")
            .field("bytes", &self.bytes.len())
            .field("order", &self.order)
            .finish()
    }
}
