//! Wire primitives: the 8-byte header and 32-bit aligned argument slots.
//!
//! ```text
//! [object_id:4][opcode:2][size:2][arguments:size-8]
//! ```
//! All integers use host byte order, as on a local Unix socket.  Strings and
//! arrays are a u32 length followed by the bytes, zero-padded to 4 bytes.

use crate::error::{Result, WireError};

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest message the 16-bit size field can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Rounds `len` up to the next multiple of 4.
pub const fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Header prepended to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub object_id: u32,
    pub opcode: u16,
    /// Total message size including this header.
    pub size: u16,
}

impl MessageHeader {
    /// Reads a header from the start of `bytes` without consuming anything.
    ///
    /// Returns `Ok(None)` while fewer than [`HEADER_SIZE`] bytes are available.
    ///
    /// # Errors
    ///
    /// [`WireError::InvalidMessage`] if the size field is below the header
    /// size or not a multiple of 4.
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        let object_id = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let opcode = u16::from_ne_bytes([bytes[4], bytes[5]]);
        let size = u16::from_ne_bytes([bytes[6], bytes[7]]);
        if usize::from(size) < HEADER_SIZE || size % 4 != 0 {
            return Err(WireError::InvalidMessage(format!(
                "object {object_id} opcode {opcode}: bad message size {size}"
            )));
        }
        Ok(Some(Self {
            object_id,
            opcode,
            size,
        }))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.object_id.to_ne_bytes());
        out.extend_from_slice(&self.opcode.to_ne_bytes());
        out.extend_from_slice(&self.size.to_ne_bytes());
    }

    /// Number of payload bytes following the header.
    pub fn body_len(&self) -> usize {
        usize::from(self.size) - HEADER_SIZE
    }
}

/// Appends argument slots to a message body.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    /// Writes a string including its NUL terminator; `None` is length 0.
    pub fn put_string(&mut self, value: Option<&str>) {
        match value {
            None => self.put_u32(0),
            Some(s) => {
                let len = s.len() + 1;
                self.put_u32(len as u32);
                self.buf.extend_from_slice(s.as_bytes());
                self.buf.push(0);
                self.pad(len);
            }
        }
    }

    /// Writes an array; `None` is length 0.
    pub fn put_array(&mut self, value: Option<&[u8]>) {
        let bytes = value.unwrap_or_default();
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        self.pad(bytes.len());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn pad(&mut self, len: usize) {
        let padding = padded_len(len) - len;
        self.buf.extend(std::iter::repeat(0u8).take(padding));
    }
}

/// Reads argument slots from a message body.
#[derive(Debug)]
pub struct WireCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// # Errors
    ///
    /// [`WireError::TruncatedMessage`] if fewer than 4 bytes remain.
    pub fn take_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// # Errors
    ///
    /// [`WireError::TruncatedMessage`] if fewer than 4 bytes remain.
    pub fn take_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a string slot; length 0 is the null string.
    ///
    /// # Errors
    ///
    /// [`WireError::TruncatedMessage`] for a short body,
    /// [`WireError::InvalidMessage`] for a missing terminator, an embedded
    /// NUL or invalid UTF-8.
    pub fn take_string(&mut self) -> Result<Option<String>> {
        let len = self.take_u32()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let raw = self.take(padded_len(len))?;
        let content = &raw[..len];
        let (last, text) = content
            .split_last()
            .ok_or_else(|| WireError::InvalidMessage("empty string slot".into()))?;
        if *last != 0 {
            return Err(WireError::InvalidMessage("string is not NUL-terminated".into()));
        }
        if text.contains(&0) {
            return Err(WireError::InvalidMessage("string contains an embedded NUL".into()));
        }
        let s = std::str::from_utf8(text)
            .map_err(|e| WireError::InvalidMessage(format!("invalid UTF-8 in string: {e}")))?;
        Ok(Some(s.to_string()))
    }

    /// Reads an array slot.
    ///
    /// # Errors
    ///
    /// [`WireError::TruncatedMessage`] for a short body.
    pub fn take_array(&mut self) -> Result<Vec<u8>> {
        let len = self.take_u32()? as usize;
        let raw = self.take(padded_len(len))?;
        Ok(raw[..len].to_vec())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError::TruncatedMessage {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
    }

    #[test]
    fn test_header_write_then_parse() {
        let header = MessageHeader {
            object_id: 3,
            opcode: 1,
            size: 8,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(MessageHeader::parse(&buf).expect("valid"), Some(header));
    }

    #[test]
    fn test_header_parse_short_input_needs_more() {
        assert_eq!(MessageHeader::parse(&[0u8; 7]).expect("no error"), None);
    }

    #[test]
    fn test_header_parse_rejects_small_or_unaligned_size() {
        for bad in [4u16, 10] {
            let mut buf = Vec::new();
            buf.extend_from_slice(&1u32.to_ne_bytes());
            buf.extend_from_slice(&0u16.to_ne_bytes());
            buf.extend_from_slice(&bad.to_ne_bytes());
            assert!(matches!(
                MessageHeader::parse(&buf),
                Err(WireError::InvalidMessage(_))
            ));
        }
    }

    #[test]
    fn test_string_includes_terminator_and_padding() {
        let mut w = WireWriter::new();
        w.put_string(Some("abc"));
        let bytes = w.into_inner();
        // len(4) + "abc\0"
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &4u32.to_ne_bytes());
        assert_eq!(&bytes[4..], b"abc\0");

        let mut w = WireWriter::new();
        w.put_string(Some("abcd"));
        // len(4) + "abcd\0" padded to 8
        assert_eq!(w.len(), 12);
    }

    #[test]
    fn test_null_string_is_zero_length() {
        let mut w = WireWriter::new();
        w.put_string(None);
        let bytes = w.into_inner();
        assert_eq!(bytes, 0u32.to_ne_bytes());
        let mut c = WireCursor::new(&bytes);
        assert_eq!(c.take_string().expect("decode"), None);
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let mut w = WireWriter::new();
        w.put_string(Some(""));
        let bytes = w.into_inner();
        let mut c = WireCursor::new(&bytes);
        assert_eq!(c.take_string().expect("decode"), Some(String::new()));
    }

    #[test]
    fn test_unterminated_string_is_invalid() {
        let mut bytes = 4u32.to_ne_bytes().to_vec();
        bytes.extend_from_slice(b"abcd");
        let mut c = WireCursor::new(&bytes);
        assert!(matches!(c.take_string(), Err(WireError::InvalidMessage(_))));
    }

    #[test]
    fn test_short_read_is_truncated_not_silent() {
        let mut w = WireWriter::new();
        w.put_array(Some(&[1, 2, 3, 4, 5]));
        let bytes = w.into_inner();
        let mut c = WireCursor::new(&bytes[..8]);
        assert!(matches!(
            c.take_array(),
            Err(WireError::TruncatedMessage {
                needed: 12,
                available: 8
            })
        ));
    }
}
