//! UTF-16 little-endian string helpers.

use crate::err::{Result, WevtError};
use crate::utils::bytes;

/// Decode UTF-16LE bytes up to the first NUL code unit (or the end of the
/// slice). Unpaired surrogates are replaced rather than rejected; on-disk
/// name strings in real manifests are occasionally malformed and the decoded
/// text is presentation-only.
pub(crate) fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a string as UTF-16LE bytes, without a terminator.
pub(crate) fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Read a size-prefixed UTF-16LE string block: `{u32 block_size, chars}`
/// where `block_size` includes its own four bytes.
pub(crate) fn read_sized_utf16_string(
    buf: &[u8],
    offset: u32,
    what: &'static str,
) -> Result<String> {
    let off = bytes::offset_to_usize(offset, buf.len(), what)?;
    let size = bytes::read_u32_le_r(buf, off, what)?;
    if size < 4 {
        return Err(WevtError::out_of_bounds(what, off));
    }
    let size = usize::try_from(size).map_err(|_| WevtError::out_of_bounds(what, off))?;
    let data = bytes::slice_r(buf, off, size, what)?;
    Ok(decode_utf16le(&data[4..]))
}
