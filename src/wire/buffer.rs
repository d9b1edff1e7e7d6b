//! Bounded growing byte buffer with typed little-endian append primitives.
//!
//! Replaces the `malloc` + offset arithmetic the original implementation used
//! to build request/response bodies by hand.

use byteorder::{LittleEndian, WriteBytesExt};

/// Accumulates a message body; [`MessageBuilder::finish`] prefixes the final
/// 8-byte size header (header length included) and returns the complete frame.
pub struct MessageBuilder {
    data: Vec<u8>,
}

impl MessageBuilder {
    /// Starts a new builder, reserving the 8-byte size header up front.
    pub fn new() -> Self {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(&[0u8; 8]);
        Self { data }
    }

    /// Appends the 2-byte opcode/status word following the size header.
    pub fn tag(&mut self, value: u16) -> &mut Self {
        self.u16(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.data.write_u16::<LittleEndian>(value).expect("writing to a Vec never fails");
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.data.write_u32::<LittleEndian>(value).expect("writing to a Vec never fails");
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.data.write_u64::<LittleEndian>(value).expect("writing to a Vec never fails");
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.data.write_i64::<LittleEndian>(value).expect("writing to a Vec never fails");
        self
    }

    /// Appends a NUL-terminated string (the NUL is included in the byte count
    /// the caller already wrote as `path_len`/`name_len`).
    pub fn cstr(&mut self, value: &str) -> &mut Self {
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self
    }

    /// Appends a `u16` length prefix followed by a NUL-terminated string.
    pub fn prefixed_cstr(&mut self, value: &str) -> &mut Self {
        let len = (value.len() + 1) as u16;
        self.u16(len);
        self.cstr(value)
    }

    /// Appends raw bytes with no length prefix.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Finalizes the message, writing the total size (including the header)
    /// into the first 8 bytes, and returns the framed bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let total = self.data.len() as u64;
        (&mut self.data[0..8]).write_u64::<LittleEndian>(total).expect("writing to a slice never fails");
        self.data
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_prefixes_total_size_including_header() {
        let mut b = MessageBuilder::new();
        b.tag(10);
        b.u32(42);
        let frame = b.finish();
        let total = u64::from_le_bytes(frame[0..8].try_into().unwrap());
        assert_eq!(total, frame.len() as u64);
        assert_eq!(total, 8 + 2 + 4);
    }

    #[test]
    fn prefixed_cstr_includes_trailing_nul_in_length() {
        let mut b = MessageBuilder::new();
        b.prefixed_cstr("abc");
        let frame = b.finish();
        let len = u16::from_le_bytes(frame[8..10].try_into().unwrap());
        assert_eq!(len, 4);
        assert_eq!(&frame[10..14], b"abc\0");
    }
}
