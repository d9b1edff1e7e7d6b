//! Symmetric cursor reader over a decoded message body.

use super::{Error, Result};

/// Reads typed little-endian values sequentially out of a message body,
/// mirroring [`super::MessageBuilder`]'s append order.
pub struct MessageCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Malformed("unexpected end of message body"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads `len` bytes as a NUL-terminated string, dropping the trailing NUL.
    pub fn cstr(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        let without_nul = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        String::from_utf8(without_nul.to_vec()).map_err(|_| Error::Malformed("invalid utf-8 in path"))
    }

    /// Reads a `u16` length prefix followed by that many bytes as a
    /// NUL-terminated string.
    pub fn prefixed_cstr(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        self.cstr(len)
    }

    pub fn remaining_bytes(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub fn take_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::super::MessageBuilder;
    use super::*;

    #[test]
    fn round_trips_prefixed_cstr() {
        let mut b = MessageBuilder::new();
        b.prefixed_cstr("/a/b");
        let frame = b.finish();
        let mut cur = MessageCursor::new(&frame[super::super::HEADER_LEN..]);
        assert_eq!(cur.prefixed_cstr().unwrap(), "/a/b");
        assert!(cur.is_empty());
    }
}
