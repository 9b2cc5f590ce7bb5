//! Wire format constants and length-prefix encoding.
//!
//! Every message on the socket is framed as:
//! ```text
//! ┌──────────┬──────────────────────────────┐
//! │ Length N │ Payload                      │
//! │ 4 bytes  │ N bytes                      │
//! │ int32 BE │ header record + body record  │
//! └──────────┴──────────────────────────────┘
//! ```
//!
//! Requests carry a `RequestHeader {xid, type}`; replies carry a
//! `ReplyHeader {xid, zxid, err}`. The connect handshake has no header.

use crate::error::{Result, ZkError};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload (4 MiB plus 1 KiB of record overhead).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024 + 1024;

/// Protocol version sent in the connect request.
pub const PROTOCOL_VERSION: i32 = 0;

/// Operation codes carried in `RequestHeader::op_type`.
pub mod op {
    pub const NOTIFICATION: i32 = 0;
    pub const CREATE: i32 = 1;
    pub const DELETE: i32 = 2;
    pub const EXISTS: i32 = 3;
    pub const GET_DATA: i32 = 4;
    pub const SET_DATA: i32 = 5;
    pub const GET_ACL: i32 = 6;
    pub const SET_ACL: i32 = 7;
    pub const GET_CHILDREN: i32 = 8;
    pub const SYNC: i32 = 9;
    pub const PING: i32 = 11;
    pub const GET_CHILDREN2: i32 = 12;
    pub const AUTH: i32 = 100;
    pub const SET_WATCHES: i32 = 101;
    pub const CREATE_SESSION: i32 = -10;
    pub const CLOSE_SESSION: i32 = -11;
    pub const ERROR: i32 = -1;
}

/// Reserved xids. Every value `<= 0` is outside the request id space.
pub mod xid {
    pub const NOTIFICATION: i32 = -1;
    pub const PING: i32 = -2;
    pub const AUTH: i32 = -4;
    pub const SET_WATCHES: i32 = -8;

    /// First xid handed out for ordinary requests.
    pub const FIRST: i32 = 1;

    /// True if `xid` is one of the reserved sentinels.
    #[inline]
    pub fn is_reserved(xid: i32) -> bool {
        xid <= 0
    }
}

/// Encode a payload length as a 4-byte big-endian prefix.
#[inline]
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len = i32::try_from(len)
        .map_err(|_| ZkError::Protocol(format!("Frame length {} exceeds i32", len)))?;
    Ok(len.to_be_bytes())
}

/// Decode a 4-byte big-endian length prefix and check it against `max`.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length(buf: &[u8], max: usize) -> Option<Result<usize>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    let raw = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    Some(validate_length(raw, max))
}

/// Validate a declared frame length.
pub fn validate_length(raw: i32, max: usize) -> Result<usize> {
    if raw < 0 {
        return Err(ZkError::Protocol(format!("Negative frame length {}", raw)));
    }
    let len = raw as usize;
    if len > max {
        return Err(ZkError::Protocol(format!(
            "Frame length {} exceeds maximum {}",
            len, max
        )));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_is_big_endian() {
        let bytes = encode_length(0x0102_0304).unwrap();
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(decode_length(&[0, 0, 1], DEFAULT_MAX_FRAME_SIZE).is_none());
    }

    #[test]
    fn test_decode_roundtrip() {
        let bytes = encode_length(10_000).unwrap();
        let len = decode_length(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(len, 10_000);
    }

    #[test]
    fn test_length_over_max_rejected() {
        let bytes = encode_length(1_000).unwrap();
        let err = decode_length(&bytes, 100).unwrap().unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_negative_length_rejected() {
        let err = validate_length(-5, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ZkError::Protocol(_)));
    }

    #[test]
    fn test_reserved_xids() {
        assert!(xid::is_reserved(xid::NOTIFICATION));
        assert!(xid::is_reserved(xid::PING));
        assert!(xid::is_reserved(xid::AUTH));
        assert!(xid::is_reserved(xid::SET_WATCHES));
        assert!(!xid::is_reserved(xid::FIRST));
    }
}
