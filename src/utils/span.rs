//! A bounds-checked cursor over an immutable byte slice.
//!
//! `ByteSpan` is the only surface through which the manifest parsers touch
//! their input: every read advances the cursor and is validated against the
//! end of the slice with checked arithmetic, so no caller ever indexes the
//! buffer directly.

use std::io::Cursor;

use winstructs::guid::Guid;

use crate::err::{Result, WevtError};
use crate::utils::bytes;

#[derive(Debug, Clone)]
pub(crate) struct ByteSpan<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteSpan<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() > isize::MAX as usize {
            return Err(WevtError::InvalidArgument {
                what: "input size exceeds maximum",
            });
        }
        Ok(ByteSpan { data, offset: 0 })
    }

    pub(crate) fn at(data: &'a [u8], offset: usize, what: &'static str) -> Result<Self> {
        let mut span = ByteSpan::new(data)?;
        span.seek(offset, what)?;
        Ok(span)
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub(crate) fn seek(&mut self, offset: usize, what: &'static str) -> Result<()> {
        if offset > self.data.len() {
            return Err(WevtError::out_of_bounds(what, offset));
        }
        self.offset = offset;
        Ok(())
    }

    pub(crate) fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        let value = bytes::read_u8_r(self.data, self.offset, what)?;
        self.offset += 1;
        Ok(value)
    }

    pub(crate) fn read_u16(&mut self, what: &'static str) -> Result<u16> {
        let value = bytes::read_u16_le_r(self.data, self.offset, what)?;
        self.offset += 2;
        Ok(value)
    }

    pub(crate) fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let value = bytes::read_u32_le_r(self.data, self.offset, what)?;
        self.offset += 4;
        Ok(value)
    }

    pub(crate) fn read_u64(&mut self, what: &'static str) -> Result<u64> {
        let value = bytes::read_u64_le_r(self.data, self.offset, what)?;
        self.offset += 8;
        Ok(value)
    }

    pub(crate) fn read_slice(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        let slice = bytes::slice_r(self.data, self.offset, len, what)?;
        self.offset += len;
        Ok(slice)
    }

    /// Read four bytes and compare them against an expected signature.
    pub(crate) fn expect_signature(&mut self, expected: &[u8; 4]) -> Result<()> {
        let offset = self.offset;
        let found = bytes::read_sig_r(self.data, offset, "signature")?;
        self.offset += 4;
        if found != *expected {
            return Err(WevtError::bad_signature(offset, *expected, found));
        }
        Ok(())
    }

    /// Read a 16-byte little-endian GUID.
    pub(crate) fn read_guid(&mut self, what: &'static str) -> Result<Guid> {
        let raw = bytes::read_array_r::<16>(self.data, self.offset, what)?;
        self.offset += 16;
        let mut cursor = Cursor::new(raw);
        Guid::from_reader(&mut cursor).map_err(|_| WevtError::out_of_bounds(what, self.offset - 16))
    }

    /// Require `len` bytes at the current cursor without consuming them.
    pub(crate) fn require(&self, len: usize, what: &'static str) -> Result<()> {
        bytes::slice_r(self.data, self.offset, len, what)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_and_stops_at_end() {
        let data = [0x41u8, 0x42, 0x43, 0x44, 0x01, 0x00];
        let mut span = ByteSpan::new(&data).unwrap();

        span.expect_signature(b"ABCD").unwrap();
        assert_eq!(span.read_u16("value").unwrap(), 1);
        assert_eq!(span.remaining(), 0);
        assert!(span.read_u8("past end").is_err());
    }

    #[test]
    fn signature_mismatch_reports_expected_and_found() {
        let data = *b"WXYZ";
        let mut span = ByteSpan::new(&data).unwrap();
        match span.expect_signature(b"CRIM") {
            Err(WevtError::UnsupportedSignature { expected, found, .. }) => {
                assert_eq!(&expected, b"CRIM");
                assert_eq!(&found, b"WXYZ");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn seek_rejects_out_of_bounds() {
        let data = [0u8; 4];
        let mut span = ByteSpan::new(&data).unwrap();
        assert!(span.seek(5, "seek").is_err());
        assert!(span.seek(4, "seek").is_ok());
    }
}
