//! `TTBL` template table and `TEMP` template definition parsing.
//!
//! Templates are packed back to back, unaligned; each one declares its own
//! total size in the 40-byte `TEMP` header and the cursor advances by that
//! amount. The template body (binary XML fragment plus the trailing item
//! descriptors and names) is captured as a raw slice; it is evaluated on
//! demand by the binary XML document reader, not at manifest-parse time.

use log::trace;

use crate::err::{Result, WevtError};
use crate::utils::bytes;
use crate::utils::span::ByteSpan;

use super::types::TemplateDefinition;

const TTBL_HEADER_SIZE: usize = 12;
pub(crate) const TEMP_HEADER_SIZE: usize = 40;

pub(super) fn read_template_table<'a>(
    data: &'a [u8],
    offset: u32,
) -> Result<Vec<TemplateDefinition<'a>>> {
    let offset_usize = bytes::offset_to_usize(offset, data.len(), "TTBL offset")?;
    let mut span = ByteSpan::at(data, offset_usize, "TTBL offset")?;
    span.require(TTBL_HEADER_SIZE, "TTBL header")?;

    span.expect_signature(b"TTBL")?;
    let size = span.read_u32("TTBL.size")?;
    let count = span.read_u32("TTBL.count")?;

    trace!("TTBL at offset {offset}: size {size} count {count}");

    let end = if size == 0 {
        data.len()
    } else {
        if (size as usize) < TTBL_HEADER_SIZE {
            return Err(WevtError::out_of_bounds("TTBL.size", offset_usize + 4));
        }
        let size = usize::try_from(size).map_err(|_| WevtError::out_of_bounds("TTBL.size", offset_usize + 4))?;
        bytes::checked_end(data.len(), offset_usize, size, "TTBL.size")?
    };

    let count = usize::try_from(count).map_err(|_| WevtError::out_of_bounds("TTBL.count", offset_usize + 8))?;

    let mut templates = Vec::with_capacity(count);
    let mut cursor = offset_usize + TTBL_HEADER_SIZE;

    for _ in 0..count {
        let template = read_template(data, cursor, end, true)?;
        cursor = bytes::checked_end(end, cursor, template.size as usize, "TEMP.size")?;
        templates.push(template);
    }

    Ok(templates)
}

impl<'a> TemplateDefinition<'a> {
    /// Parse a standalone (unmanaged) template definition at `offset`.
    pub fn read_data(data: &'a [u8], offset: u32) -> Result<TemplateDefinition<'a>> {
        let offset_usize = bytes::offset_to_usize(offset, data.len(), "TEMP offset")?;
        read_template(data, offset_usize, data.len(), false)
    }
}

fn read_template<'a>(
    data: &'a [u8],
    offset: usize,
    end: usize,
    is_managed: bool,
) -> Result<TemplateDefinition<'a>> {
    if offset + TEMP_HEADER_SIZE > end {
        return Err(WevtError::TruncatedInput {
            what: "TEMP header",
            offset: offset as u64,
            need: TEMP_HEADER_SIZE,
            have: end.saturating_sub(offset),
        });
    }
    let mut span = ByteSpan::at(data, offset, "TEMP offset")?;

    span.expect_signature(b"TEMP")?;
    let size = span.read_u32("TEMP.size")?;
    let descriptor_count = span.read_u32("TEMP.number_of_descriptors")?;
    let name_count = span.read_u32("TEMP.number_of_names")?;
    let items_offset = span.read_u32("TEMP.items_offset")?;
    let event_type = span.read_u32("TEMP.event_type")?;
    let guid = span.read_guid("TEMP.guid")?;

    if (size as usize) < TEMP_HEADER_SIZE {
        return Err(WevtError::out_of_bounds("TEMP.size", offset + 4));
    }
    let size_usize = usize::try_from(size).map_err(|_| WevtError::out_of_bounds("TEMP.size", offset + 4))?;
    let template_end = bytes::checked_end(end, offset, size_usize, "TEMP.size")?;
    let template_data = &data[offset..template_end];

    trace!("TEMP at offset {offset}: size {size} guid {guid}");

    // The binary XML fragment runs from the end of the header up to the item
    // descriptors. An items offset of zero (or one pointing at or past the
    // end of the template) means the whole body is binary XML.
    let binxml_end = if items_offset == 0 {
        size_usize
    } else {
        let items_abs = usize::try_from(items_offset)
            .map_err(|_| WevtError::out_of_bounds("TEMP.items_offset", offset + 16))?;
        if items_abs < offset {
            return Err(WevtError::out_of_bounds("TEMP.items_offset", offset + 16));
        }
        (items_abs - offset).min(size_usize)
    };
    let binxml = if binxml_end > TEMP_HEADER_SIZE {
        &template_data[TEMP_HEADER_SIZE..binxml_end]
    } else {
        &template_data[..0]
    };

    Ok(TemplateDefinition {
        offset: offset as u32,
        size,
        descriptor_count,
        name_count,
        items_offset,
        event_type,
        guid,
        data: template_data,
        binxml,
        is_managed,
    })
}
