//! WebSocket upgrade: RFC 6455 handshake, frame codec, and a
//! mutex-guarded broadcast registry for live connections.

pub mod registry;

use base64::Engine;
use sha1::{Digest, Sha1};

const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value from the client's
/// `Sec-WebSocket-Key`, per RFC 6455 section 1.3.
pub fn accept_token(sec_websocket_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sec_websocket_key);
    hasher.update(HANDSHAKE_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Builds the raw bytes of the 101 handshake response.
pub fn handshake_response(sec_websocket_key: &[u8]) -> Vec<u8> {
    let accept = accept_token(sec_websocket_key);
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn as_byte(&self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            payload: payload.into(),
        }
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Binary,
            payload: payload.into(),
        }
    }

    pub fn close(code: u16) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Close,
            payload: code.to_be_bytes().to_vec(),
        }
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Pong,
            payload: payload.into(),
        }
    }

    pub fn close_code(&self) -> u16 {
        if self.payload.len() >= 2 {
            u16::from_be_bytes([self.payload[0], self.payload[1]])
        } else {
            1000
        }
    }

    /// Encodes this frame unmasked, as every server→client frame must be
    /// per RFC 6455.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 10);
        out.push((self.fin as u8) << 7 | self.opcode.as_byte());

        let len = self.payload.len();
        if len < 126 {
            out.push(len as u8);
        } else if len <= u16::MAX as usize {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        out.extend_from_slice(&self.payload);
        out
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("client frame must be masked")]
    Unmasked,
}

/// Decodes one frame from the front of `buf`. A client frame MUST be
/// masked; an unmasked client frame is rejected. Returns `Ok(None)` when
/// `buf` does not yet hold a complete frame.
pub fn decode_masked(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_byte(buf[0] & 0x0F).ok_or(FrameError::UnknownOpcode(buf[0] & 0x0F))?;
    let masked = buf[1] & 0x80 != 0;
    if !masked {
        return Err(FrameError::Unmasked);
    }

    let base_len = (buf[1] & 0x7F) as usize;
    let mut cursor = 2usize;

    let payload_len = match base_len {
        126 => {
            if buf.len() < cursor + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]) as usize;
            cursor += 2;
            len
        }
        127 => {
            if buf.len() < cursor + 8 {
                return Ok(None);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[cursor..cursor + 8]);
            cursor += 8;
            u64::from_be_bytes(bytes) as usize
        }
        n => n,
    };

    if buf.len() < cursor + 4 {
        return Ok(None);
    }
    let mask = [buf[cursor], buf[cursor + 1], buf[cursor + 2], buf[cursor + 3]];
    cursor += 4;

    if buf.len() < cursor + payload_len {
        return Ok(None);
    }
    let mut payload = buf[cursor..cursor + payload_len].to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
    cursor += payload_len;

    Ok(Some((Frame { fin, opcode, payload }, cursor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_token_matches_rfc6455_example() {
        // RFC 6455 section 1.3's worked example.
        let token = accept_token(b"dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(token, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    fn mask_payload(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect()
    }

    fn masked_frame_bytes(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let mut out = vec![0x80 | opcode.as_byte()];
        let len = payload.len();
        if len < 126 {
            out.push(0x80 | len as u8);
        } else {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        out.extend_from_slice(&mask);
        out.extend_from_slice(&mask_payload(payload, mask));
        out
    }

    #[test]
    fn decodes_small_masked_text_frame() {
        let raw = masked_frame_bytes(Opcode::Text, b"hello", [1, 2, 3, 4]);
        let (frame, consumed) = decode_masked(&raw).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"hello");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn decodes_extended_16_bit_length() {
        let payload = vec![b'x'; 200];
        let raw = masked_frame_bytes(Opcode::Binary, &payload, [9, 9, 9, 9]);
        let (frame, consumed) = decode_masked(&raw).unwrap().unwrap();
        assert_eq!(frame.payload, payload);
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn unmasked_client_frame_is_rejected() {
        let mut raw = vec![0x80 | Opcode::Text.as_byte(), 5];
        raw.extend_from_slice(b"hello");
        assert_eq!(decode_masked(&raw), Err(FrameError::Unmasked));
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let raw = masked_frame_bytes(Opcode::Text, b"hello", [1, 2, 3, 4]);
        assert!(decode_masked(&raw[..raw.len() - 2]).unwrap().is_none());
    }

    #[test]
    fn encode_is_unmasked() {
        let frame = Frame::text("hi");
        let encoded = frame.encode();
        assert_eq!(encoded[1] & 0x80, 0, "server frames must not set the mask bit");
        assert_eq!(&encoded[2..], b"hi");
    }

    #[test]
    fn close_frame_round_trips_the_code() {
        let frame = Frame::close(1000);
        assert_eq!(frame.close_code(), 1000);
    }
}
