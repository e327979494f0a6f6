//! Packet framing and payload decoding.

use bytes::{Buf, BufMut, Bytes};
use http::StatusCode;

use crate::error::WasError;
use crate::protocol::Command;

/// Size of the fixed packet header.
pub const HEADER_SIZE: usize = 4;

/// The fixed header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub length: u16,
    pub command: u16,
}

impl PacketHeader {
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16_le(self.length);
        dst.put_u16_le(self.command);
    }

    /// Parse a header from the front of `src` without consuming it.
    pub fn peek(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        let mut src = &src[..HEADER_SIZE];
        Some(Self {
            length: src.get_u16_le(),
            command: src.get_u16_le(),
        })
    }

    /// Header plus payload.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// One decoded control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: Command,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// `LENGTH` and `PREMATURE` carry exactly one u64.
    pub fn parse_u64(&self) -> Result<u64, WasError> {
        let mut payload = &self.payload[..];
        if payload.len() != 8 {
            return Err(WasError::protocol(format!(
                "malformed {} packet",
                self.command
            )));
        }
        Ok(payload.get_u64_le())
    }

    pub fn parse_u32(&self) -> Result<u32, WasError> {
        let mut payload = &self.payload[..];
        if payload.len() != 4 {
            return Err(WasError::protocol(format!(
                "malformed {} packet",
                self.command
            )));
        }
        Ok(payload.get_u32_le())
    }

    /// `STATUS` is a u32, older peers send a u16.
    pub fn parse_status(&self) -> Result<StatusCode, WasError> {
        let mut payload = &self.payload[..];
        let code = match payload.len() {
            4 => payload.get_u32_le(),
            2 => u32::from(payload.get_u16_le()),
            _ => return Err(WasError::protocol("malformed STATUS")),
        };

        u16::try_from(code)
            .ok()
            .filter(|code| (100..=599).contains(code))
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| WasError::protocol("malformed STATUS"))
    }

    /// UTF-8 text payloads (URI, SCRIPT_NAME, ...).
    pub fn parse_text(&self) -> Result<&str, WasError> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| WasError::protocol(format!("malformed {} packet", self.command)))
    }

    /// `key=value` payloads, split on the first `=`.
    pub fn parse_pair(&self) -> Result<(&str, &str), WasError> {
        let malformed = || WasError::protocol(format!("malformed {} packet", self.command));

        let text = std::str::from_utf8(&self.payload).map_err(|_| malformed())?;
        match text.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key, value)),
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        PacketHeader {
            length: 0x0102,
            command: Command::Length.code(),
        }
        .encode(&mut buf);
        assert_eq!(&buf[..], &[0x02, 0x01, 12, 0]);

        let header = PacketHeader::peek(&buf).unwrap();
        assert_eq!(header.length, 0x0102);
        assert_eq!(header.frame_len(), 4 + 0x0102);
        assert!(PacketHeader::peek(&buf[..3]).is_none());
    }

    #[test]
    fn parse_length() {
        let packet = Packet::new(Command::Length, 6u64.to_le_bytes().to_vec());
        assert_eq!(packet.parse_u64().unwrap(), 6);

        let short = Packet::new(Command::Length, vec![1, 2, 3]);
        assert_eq!(
            short.parse_u64().unwrap_err().to_string(),
            "WAS protocol error: malformed LENGTH packet"
        );
    }

    #[test]
    fn parse_status_widths() {
        let wide = Packet::new(Command::Status, 204u32.to_le_bytes().to_vec());
        assert_eq!(wide.parse_status().unwrap(), StatusCode::NO_CONTENT);

        let narrow = Packet::new(Command::Status, 404u16.to_le_bytes().to_vec());
        assert_eq!(narrow.parse_status().unwrap(), StatusCode::NOT_FOUND);

        let bogus = Packet::new(Command::Status, 42u32.to_le_bytes().to_vec());
        assert!(bogus.parse_status().is_err());
    }

    #[test]
    fn parse_pair_splits_on_first_equals() {
        let packet = Packet::new(Command::Header, &b"x-query=a=b"[..]);
        assert_eq!(packet.parse_pair().unwrap(), ("x-query", "a=b"));

        let empty_value = Packet::new(Command::Header, &b"x-empty="[..]);
        assert_eq!(empty_value.parse_pair().unwrap(), ("x-empty", ""));
    }

    #[test]
    fn parse_pair_rejects_missing_separator() {
        let packet = Packet::new(Command::Header, &b"no-separator"[..]);
        assert_eq!(
            packet.parse_pair().unwrap_err().to_string(),
            "WAS protocol error: malformed HEADER packet"
        );

        let empty_key = Packet::new(Command::Parameter, &b"=value"[..]);
        assert!(empty_key.parse_pair().is_err());
    }
}
