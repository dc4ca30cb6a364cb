//! Binary chunk frames for byte streams.
//!
//! Layout: 16-byte stream id (UUID, big-endian bytes), 8-byte sequence
//! number (u64, big-endian), then the chunk payload. The payload may be
//! empty only for the final flush of a zero-length range.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Fixed header size: stream id + sequence number.
pub const CHUNK_HEADER_LEN: usize = 16 + 8;

/// A decoded stream chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub stream_id: Uuid,
    pub seq: u64,
    pub bytes: Bytes,
}

/// Errors decoding a binary chunk frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkFrameError {
    #[error("chunk frame too short: {0} bytes, need at least {CHUNK_HEADER_LEN}")]
    TooShort(usize),
}

impl ChunkFrame {
    pub fn new(stream_id: Uuid, seq: u64, bytes: Bytes) -> Self {
        Self {
            stream_id,
            seq,
            bytes,
        }
    }

    /// Encode into a single binary WebSocket frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + self.bytes.len());
        buf.put_slice(self.stream_id.as_bytes());
        buf.put_u64(self.seq);
        buf.put_slice(&self.bytes);
        buf.freeze()
    }

    /// Decode a binary WebSocket frame.
    pub fn decode(mut frame: Bytes) -> Result<Self, ChunkFrameError> {
        if frame.len() < CHUNK_HEADER_LEN {
            return Err(ChunkFrameError::TooShort(frame.len()));
        }
        let mut id_bytes = [0u8; 16];
        frame.copy_to_slice(&mut id_bytes);
        let stream_id = Uuid::from_bytes(id_bytes);
        let seq = frame.get_u64();
        Ok(Self {
            stream_id,
            seq,
            bytes: frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let frame = ChunkFrame::new(Uuid::new_v4(), 42, Bytes::from_static(b"hello world"));
        let decoded = ChunkFrame::decode(frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_payload_allowed() {
        let frame = ChunkFrame::new(Uuid::nil(), 0, Bytes::new());
        let decoded = ChunkFrame::decode(frame.encode()).unwrap();
        assert_eq!(decoded.seq, 0);
        assert!(decoded.bytes.is_empty());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let err = ChunkFrame::decode(Bytes::from_static(&[0u8; 10])).unwrap_err();
        assert_eq!(err, ChunkFrameError::TooShort(10));
    }
}
