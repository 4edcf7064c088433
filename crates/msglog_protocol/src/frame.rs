//! TCP framing: `[i32 length][payload]`.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload a decoder accepts by default.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Prefixes `payload` with its length.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_i32_le(payload.len() as i32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits a byte stream into frame payloads.
///
/// Bytes are pushed in as they arrive from the socket; complete payloads
/// are popped with [`FrameDecoder::next_frame`].
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    /// Creates a decoder rejecting payloads above `max_frame` bytes.
    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete payload, if one has fully arrived.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] if the header announces a
    /// negative size or one above the limit. The stream cannot be resynced
    /// after that and the connection should be dropped.
    pub fn next_frame(&mut self) -> ProtocolResult<Option<Bytes>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let len = i32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let size = usize::try_from(len).ok().filter(|s| *s <= self.max_frame).ok_or(
            ProtocolError::FrameTooLarge {
                size: i64::from(len),
                max: self.max_frame,
            },
        )?;
        if self.buf.len() < FRAME_HEADER_SIZE + size {
            self.buf.reserve(FRAME_HEADER_SIZE + size - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(self.buf.split_to(size).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let frame = encode_frame(b"hello");
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame[..3]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&frame[3..7]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&frame[7..]);
        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut decoder = FrameDecoder::with_max_frame(8);
        decoder.extend(&encode_frame(&[0u8; 9]));
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::FrameTooLarge { size: 9, max: 8 })
        ));
    }

    #[test]
    fn negative_length_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(-1i32).to_le_bytes());
        assert!(decoder.next_frame().is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_chunking_preserves_frames(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
            chunk in 1usize..16,
        ) {
            let wire: Vec<u8> = payloads.iter().flat_map(|p| encode_frame(p).to_vec()).collect();
            let mut decoder = FrameDecoder::new();
            let mut out = Vec::new();
            for piece in wire.chunks(chunk) {
                decoder.extend(piece);
                while let Some(frame) = decoder.next_frame().unwrap() {
                    out.push(frame.to_vec());
                }
            }
            prop_assert_eq!(out, payloads);
        }
    }
}
