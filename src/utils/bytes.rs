//! Byte-slice utilities for bounds-oriented parsing.
//!
//! Two layers:
//! - **Option layer** (`read_*`): zero-cost helpers returning `Option<T>`,
//!   for callers that map failures to their own error context.
//! - **Result layer** (`*_r`): wrappers that map `None` to
//!   [`WevtError::TruncatedInput`] with a `what` label.
//!
//! All numeric reads are little-endian; offsets are relative to the slice
//! passed in. Offset arithmetic is checked before any comparison so that
//! `offset + len` can never wrap.

use crate::err::WevtError;

/// Read `N` raw bytes at `offset`.
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    let bytes: [u8; N] = buf.get(offset..end)?.try_into().ok()?;
    Some(bytes)
}

pub(crate) fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Read a 4-byte signature at `offset`.
pub(crate) fn read_sig(buf: &[u8], offset: usize) -> Option<[u8; 4]> {
    read_array::<4>(buf, offset)
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(read_array::<2>(buf, offset)?))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(read_array::<4>(buf, offset)?))
}

pub(crate) fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(read_array::<8>(buf, offset)?))
}

/// Read a 4-byte tag at `offset` as a big-endian integer, so that the ASCII
/// letters compare in natural reading order (`CHAN` == 0x4348414e).
pub(crate) fn read_u32_be(buf: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_be_bytes(read_array::<4>(buf, offset)?))
}

#[inline]
fn truncated(what: &'static str, offset: usize, need: usize, len: usize) -> WevtError {
    WevtError::TruncatedInput {
        what,
        offset: offset as u64,
        need,
        have: len.saturating_sub(offset),
    }
}

pub(crate) fn slice_r<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], WevtError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| truncated(what, offset, len, buf.len()))?;
    buf.get(offset..end)
        .ok_or_else(|| truncated(what, offset, len, buf.len()))
}

pub(crate) fn read_array_r<const N: usize>(
    buf: &[u8],
    offset: usize,
    what: &'static str,
) -> Result<[u8; N], WevtError> {
    read_array::<N>(buf, offset).ok_or_else(|| truncated(what, offset, N, buf.len()))
}

pub(crate) fn read_u8_r(buf: &[u8], offset: usize, what: &'static str) -> Result<u8, WevtError> {
    read_u8(buf, offset).ok_or_else(|| truncated(what, offset, 1, buf.len()))
}

pub(crate) fn read_u16_le_r(buf: &[u8], offset: usize, what: &'static str) -> Result<u16, WevtError> {
    read_u16_le(buf, offset).ok_or_else(|| truncated(what, offset, 2, buf.len()))
}

pub(crate) fn read_u32_le_r(buf: &[u8], offset: usize, what: &'static str) -> Result<u32, WevtError> {
    read_u32_le(buf, offset).ok_or_else(|| truncated(what, offset, 4, buf.len()))
}

pub(crate) fn read_u64_le_r(buf: &[u8], offset: usize, what: &'static str) -> Result<u64, WevtError> {
    read_u64_le(buf, offset).ok_or_else(|| truncated(what, offset, 8, buf.len()))
}

pub(crate) fn read_sig_r(buf: &[u8], offset: usize, what: &'static str) -> Result<[u8; 4], WevtError> {
    read_sig(buf, offset).ok_or_else(|| truncated(what, offset, 4, buf.len()))
}

/// Convert a file-format `u32` offset to `usize`, rejecting offsets past the
/// end of the buffer.
pub(crate) fn offset_to_usize(offset: u32, len: usize, what: &'static str) -> Result<usize, WevtError> {
    let off = usize::try_from(offset).map_err(|_| WevtError::ValueOutOfBounds {
        what,
        offset: u64::from(offset),
    })?;
    if off > len {
        return Err(WevtError::ValueOutOfBounds {
            what,
            offset: u64::from(offset),
        });
    }
    Ok(off)
}

/// Compute `offset + size` with overflow and end-of-buffer checks.
pub(crate) fn checked_end(
    len: usize,
    offset: usize,
    size: usize,
    what: &'static str,
) -> Result<usize, WevtError> {
    let end = offset
        .checked_add(size)
        .ok_or(WevtError::ValueOutOfBounds {
            what,
            offset: offset as u64,
        })?;
    if end > len {
        return Err(WevtError::ValueOutOfBounds {
            what,
            offset: offset as u64,
        });
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let buf = [0x01u8, 0x02, 0x03, 0x04];

        assert_eq!(read_u16_le(&buf, 0), Some(0x0201));
        assert_eq!(read_u32_le(&buf, 0), Some(0x04030201));
        assert_eq!(read_u32_be(&buf, 0), Some(0x01020304));
        assert_eq!(read_u32_le(&buf, 1), None);
        assert_eq!(read_u64_le(&buf, 0), None);
        assert_eq!(read_u8(&buf, 4), None);
    }

    #[test]
    fn offset_arithmetic_cannot_wrap() {
        let buf = [0u8; 8];
        assert!(slice_r(&buf, usize::MAX, 2, "wrap").is_err());
        assert!(checked_end(8, usize::MAX, 2, "wrap").is_err());
        assert_eq!(read_array::<4>(&buf, usize::MAX - 1), None);
    }

    #[test]
    fn result_layer_reports_need_and_have() {
        let buf = [0u8; 3];
        match read_u32_le_r(&buf, 1, "test value") {
            Err(WevtError::TruncatedInput { need, have, .. }) => {
                assert_eq!(need, 4);
                assert_eq!(have, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
