//! Framing: newline-delimited JSON, one message per frame.
//!
//! Compact JSON never contains a raw newline (control characters inside
//! strings are escaped, payloads are base64), so `\n` is a safe delimiter.

use crate::protocol::Message;

const DELIMITER: u8 = b'\n';
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Encode a message into a single frame: compact JSON plus the trailing delimiter.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let mut out = serde_json::to_vec(msg).map_err(FrameEncodeError::Encode)?;
    if out.len() > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    out.push(DELIMITER);
    Ok(out)
}

/// Error encoding a message into a frame (serialization or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Incremental frame decoder over an unbounded incoming byte buffer.
///
/// Feed raw reads with [`extend`](Self::extend); drain complete messages with
/// [`next_frame`](Self::next_frame). Bytes after the last delimiter are
/// retained for the next read. Empty and whitespace-only frames are skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes to the buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if any. `Ok(None)` means the buffer
    /// holds only a partial frame; call again after more bytes arrive.
    /// A decode error is fatal for the connection that fed this buffer.
    pub fn next_frame(&mut self) -> Result<Option<Message>, FrameDecodeError> {
        loop {
            let Some(idx) = self.buf.iter().position(|&b| b == DELIMITER) else {
                if self.buf.len() > MAX_FRAME_LEN {
                    return Err(FrameDecodeError::TooLarge);
                }
                return Ok(None);
            };
            let frame: Vec<u8> = self.buf.drain(..=idx).collect();
            let line = &frame[..frame.len() - 1];
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            let msg = serde_json::from_slice(line).map_err(FrameDecodeError::Decode)?;
            return Ok(Some(msg));
        }
    }
}

/// Error decoding a frame (size limit or malformed JSON).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PeerId;

    fn sample_request() -> Message {
        Message::RequestFile {
            file_name: "a.bin".into(),
            requester_id: PeerId::new("requester"),
        }
    }

    fn sample_block(payload: Vec<u8>) -> Message {
        Message::SendBlock {
            file_name: "a.bin".into(),
            block_name: "a.bin.block0".into(),
            block_index: 0,
            total_blocks: 1,
            payload,
            sender_id: PeerId::new("sender"),
            requester_id: PeerId::new("requester"),
        }
    }

    #[test]
    fn roundtrip_request() {
        let frame = encode_frame(&sample_request()).unwrap();
        assert_eq!(*frame.last().unwrap(), b'\n');
        let mut dec = FrameDecoder::new();
        dec.extend(&frame);
        let msg = dec.next_frame().unwrap().unwrap();
        match msg {
            Message::RequestFile {
                file_name,
                requester_id,
            } => {
                assert_eq!(file_name, "a.bin");
                assert_eq!(requester_id.as_str(), "requester");
            }
            _ => panic!("expected RequestFile"),
        }
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn binary_payload_survives_framing() {
        // Every byte value, including the delimiter itself.
        let payload: Vec<u8> = (0u8..=255).collect();
        let frame = encode_frame(&sample_block(payload.clone())).unwrap();
        // The raw payload bytes must not leak into the frame unencoded.
        assert_eq!(frame.iter().filter(|&&b| b == b'\n').count(), 1);
        let mut dec = FrameDecoder::new();
        dec.extend(&frame);
        match dec.next_frame().unwrap().unwrap() {
            Message::SendBlock { payload: got, .. } => assert_eq!(got, payload),
            _ => panic!("expected SendBlock"),
        }
    }

    #[test]
    fn partial_then_complete() {
        let frame = encode_frame(&sample_request()).unwrap();
        let mut dec = FrameDecoder::new();
        dec.extend(&frame[..frame.len() / 2]);
        assert!(dec.next_frame().unwrap().is_none());
        dec.extend(&frame[frame.len() / 2..]);
        assert!(dec.next_frame().unwrap().is_some());
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let fa = encode_frame(&sample_request()).unwrap();
        let fb = encode_frame(&sample_block(vec![1, 2, 3])).unwrap();
        let mut buf = fa.clone();
        buf.extend_from_slice(&fb);
        // Trailing partial frame retained for the next read.
        buf.extend_from_slice(&fa[..3]);
        let mut dec = FrameDecoder::new();
        dec.extend(&buf);
        assert!(matches!(
            dec.next_frame().unwrap().unwrap(),
            Message::RequestFile { .. }
        ));
        assert!(matches!(
            dec.next_frame().unwrap().unwrap(),
            Message::SendBlock { .. }
        ));
        assert!(dec.next_frame().unwrap().is_none());
        dec.extend(&fa[3..]);
        assert!(matches!(
            dec.next_frame().unwrap().unwrap(),
            Message::RequestFile { .. }
        ));
    }

    #[test]
    fn blank_frames_skipped() {
        let frame = encode_frame(&sample_request()).unwrap();
        let mut dec = FrameDecoder::new();
        dec.extend(b"\n  \t\n");
        dec.extend(&frame);
        assert!(dec.next_frame().unwrap().is_some());
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn malformed_frame_is_fatal() {
        let mut dec = FrameDecoder::new();
        dec.extend(b"{\"type\":\"no_such_message\"}\n");
        assert!(matches!(
            dec.next_frame(),
            Err(FrameDecodeError::Decode(_))
        ));
    }
}
