//! Wire framing for the query protocol.
//!
//! Both directions use the same frame format:
//!
//! ```text
//! [token: u64 LE][length: u32 LE][payload bytes ...]
//! ```
//!
//! Payloads are UTF-8 JSON. Query payloads are a 2- or 3-element array
//! `[query_type, term?, options?]`.

use crate::error::{DriverError, DriverResult};

/// Legacy protocol version magic (pre-SCRAM).
pub const VERSION_V0_4: u32 = 0x400C_2D20;

/// Current protocol version magic (SCRAM-SHA-256).
pub const VERSION_V1_0: u32 = 0x34C2_BDC3;

/// Wire serialization selector sent during the legacy handshake.
pub const PROTOCOL_JSON: u32 = 0x7E69_70C7;

/// Size of the frame header: 8-byte token plus 4-byte payload length.
pub const FRAME_HEADER_LEN: usize = 12;

/// Hard cap on a single payload, matching what servers will accept.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// Query type codes, the first element of every query payload array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
    Stop = 3,
    NoreplyWait = 4,
    ServerInfo = 5,
}

impl QueryType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Build the payload for a query that carries no term, e.g. `[2]` for
/// CONTINUE or `[3]` for STOP.
pub fn control_payload(query_type: QueryType) -> Vec<u8> {
    format!("[{}]", query_type.code()).into_bytes()
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub token: u64,
    pub payload_len: u32,
}

/// Encode a complete frame: header plus payload, ready for the socket.
pub fn encode_frame(token: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&token.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode the 12-byte frame header.
pub fn decode_frame_header(bytes: &[u8]) -> DriverResult<FrameHeader> {
    if bytes.len() != FRAME_HEADER_LEN {
        return Err(DriverError::Protocol(format!(
            "frame header must be {} bytes, got {}",
            FRAME_HEADER_LEN,
            bytes.len()
        )));
    }
    let token = u64::from_le_bytes(bytes[..8].try_into().unwrap());
    let payload_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    Ok(FrameHeader { token, payload_len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(0x0102_0304_0506_0708, b"[1,1]");
        // Token little-endian, then length little-endian, then payload.
        assert_eq!(&frame[..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&frame[8..12], &[5, 0, 0, 0]);
        assert_eq!(&frame[12..], b"[1,1]");
    }

    #[test]
    fn test_frame_round_trip() {
        for token in [0u64, 1, 0x5ADFACE, u64::MAX / 2, u64::MAX] {
            let payload = format!("[1,{}]", token % 97).into_bytes();
            let frame = encode_frame(token, &payload);
            let header = decode_frame_header(&frame[..FRAME_HEADER_LEN]).unwrap();
            assert_eq!(header.token, token);
            assert_eq!(header.payload_len as usize, payload.len());
            assert_eq!(&frame[FRAME_HEADER_LEN..], &payload[..]);
        }
    }

    #[test]
    fn test_le_codecs() {
        for value in [0u64, 1, 0x5ADFACE, u64::MAX] {
            assert_eq!(u64::from_le_bytes(value.to_le_bytes()), value);
        }
        for value in [0u32, 1, 0x400C_2D20, u32::MAX] {
            assert_eq!(u32::from_le_bytes(value.to_le_bytes()), value);
        }
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(decode_frame_header(&[0u8; 11]).is_err());
        assert!(decode_frame_header(&[0u8; 13]).is_err());
    }

    #[test]
    fn test_control_payloads() {
        assert_eq!(control_payload(QueryType::Continue), b"[2]");
        assert_eq!(control_payload(QueryType::Stop), b"[3]");
        assert_eq!(control_payload(QueryType::NoreplyWait), b"[4]");
        assert_eq!(control_payload(QueryType::ServerInfo), b"[5]");
    }
}
