//! `MAPS` section subparser.
//!
//! Maps are not contiguous: the 16-byte header is followed by a vector of
//! `count - 1` offsets to the later maps, and the first map sits right after
//! that vector. Map internals are intentionally left opaque; only the
//! four-byte map signature is peeked and the raw bytes up to the next map
//! boundary are captured.

use log::trace;

use crate::err::{Result, WevtError};
use crate::utils::bytes;
use crate::utils::span::ByteSpan;

use super::types::MapDefinition;

const MAPS_HEADER_SIZE: usize = 16;

pub(super) fn read_maps<'a>(data: &'a [u8], offset: u32) -> Result<Vec<MapDefinition<'a>>> {
    let offset_usize = bytes::offset_to_usize(offset, data.len(), "MAPS offset")?;
    let mut span = ByteSpan::at(data, offset_usize, "MAPS offset")?;
    span.require(MAPS_HEADER_SIZE, "MAPS header")?;

    span.expect_signature(b"MAPS")?;
    let size = span.read_u32("MAPS.size")?;
    let count = span.read_u32("MAPS.count")?;
    let first_map_offset = span.read_u32("MAPS.first_map_offset")?;

    trace!("MAPS at offset {offset}: size {size} count {count}");

    let end = if size == 0 {
        data.len()
    } else {
        if (size as usize) < MAPS_HEADER_SIZE {
            return Err(WevtError::out_of_bounds("MAPS.size", offset_usize + 4));
        }
        let size = usize::try_from(size).map_err(|_| WevtError::out_of_bounds("MAPS.size", offset_usize + 4))?;
        bytes::checked_end(data.len(), offset_usize, size, "MAPS.size")?
    };

    let count = usize::try_from(count).map_err(|_| WevtError::out_of_bounds("MAPS.count", offset_usize + 8))?;
    if count == 0 {
        return Ok(Vec::new());
    }

    // Offsets of the second and later maps.
    let vector_bytes = (count - 1)
        .checked_mul(4)
        .ok_or(WevtError::out_of_bounds("MAPS.count", offset_usize + 8))?;
    if span.offset() + vector_bytes > end {
        return Err(WevtError::out_of_bounds("MAPS offset vector", span.offset()));
    }

    let mut map_offsets = Vec::with_capacity(count);
    let implied_first = u32::try_from(span.offset() + vector_bytes).unwrap_or(u32::MAX);
    map_offsets.push(if first_map_offset == 0 {
        implied_first
    } else {
        first_map_offset
    });
    for _ in 1..count {
        map_offsets.push(span.read_u32("MAPS.map_offset")?);
    }

    // Map boundaries follow file order, not offset-vector order.
    map_offsets.sort_unstable();
    map_offsets.dedup();

    let mut maps = Vec::with_capacity(map_offsets.len());
    for (index, &map_offset) in map_offsets.iter().enumerate() {
        let map_off = bytes::offset_to_usize(map_offset, data.len(), "MAPS map offset")?;
        let signature = bytes::read_sig(data, map_off)
            .ok_or(WevtError::out_of_bounds("MAPS map signature", map_off))?;

        let next = map_offsets
            .get(index + 1)
            .map(|&o| o as usize)
            .unwrap_or(end)
            .min(end);
        if next < map_off {
            return Err(WevtError::out_of_bounds("MAPS map boundary", map_off));
        }

        maps.push(MapDefinition {
            signature,
            offset: map_offset,
            data: &data[map_off..next],
        });
    }

    Ok(maps)
}
