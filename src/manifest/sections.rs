//! Fixed-shape section subparsers: `CHAN`, `EVNT`, `KEYW`, `LEVL`, `OPCO`
//! and `TASK`.
//!
//! All six share the same skeleton: a section header `{signature, size,
//! count}` (EVNT carries an extra u32), then `count` fixed-size records.
//! The declared section size doubles as a byte budget: every record
//! decrements it and running out before the last record is an error. A
//! declared size of zero leaves the budget empty, so a zero-size section
//! can only be empty.

use log::trace;

use crate::err::{Result, WevtError};
use crate::utils::span::ByteSpan;
use crate::utils::utf16::read_sized_utf16_string;

use super::types::*;

const CHAN_RECORD_SIZE: usize = 16;
const EVNT_RECORD_SIZE: usize = 48;
const KEYW_RECORD_SIZE: usize = 16;
const LEVL_RECORD_SIZE: usize = 12;
const OPCO_RECORD_SIZE: usize = 12;
const TASK_RECORD_SIZE: usize = 28;

/// Section header bookkeeping shared by all fixed-shape sections.
struct Section<'a> {
    span: ByteSpan<'a>,
    count: usize,
    /// Byte budget for records, from the declared section size.
    remaining: usize,
}

fn read_section<'a>(
    data: &'a [u8],
    offset: u32,
    signature: &[u8; 4],
    header_size: usize,
    record_size: usize,
    what: &'static str,
) -> Result<(Section<'a>, u32)> {
    let offset_usize = crate::utils::bytes::offset_to_usize(offset, data.len(), what)?;
    let mut span = ByteSpan::at(data, offset_usize, what)?;
    span.require(header_size, what)?;

    span.expect_signature(signature)?;
    let size = span.read_u32(what)?;
    let count = span.read_u32(what)?;
    let mut extra = 0;
    if header_size == 16 {
        extra = span.read_u32(what)?;
    }

    trace!(
        "{} at offset {offset}: size {size} count {count}",
        String::from_utf8_lossy(signature)
    );

    let count = usize::try_from(count).map_err(|_| WevtError::out_of_bounds(what, offset_usize + 8))?;
    let record_bytes = count
        .checked_mul(record_size)
        .ok_or(WevtError::out_of_bounds(what, offset_usize + 8))?;
    span.require(record_bytes, what)?;

    let remaining = if size == 0 {
        0
    } else {
        let size = usize::try_from(size).map_err(|_| WevtError::out_of_bounds(what, offset_usize + 4))?;
        if size < header_size || size >= data.len() {
            return Err(WevtError::out_of_bounds(what, offset_usize + 4));
        }
        size - header_size
    };

    Ok((
        Section {
            span,
            count,
            remaining,
        },
        extra,
    ))
}

impl Section<'_> {
    /// Charge one record against the section byte budget.
    fn consume_record(&mut self, record_size: usize, what: &'static str) -> Result<()> {
        if self.remaining < record_size {
            return Err(WevtError::out_of_bounds(what, self.span.offset()));
        }
        self.remaining -= record_size;
        Ok(())
    }
}

fn message_identifier(raw: u32) -> Option<u32> {
    if raw == 0xffff_ffff { None } else { Some(raw) }
}

fn read_name(data: &[u8], data_offset: u32, what: &'static str) -> Result<Option<String>> {
    if data_offset == 0 {
        return Ok(None);
    }
    Ok(Some(read_sized_utf16_string(data, data_offset, what)?))
}

pub(super) fn read_channels(data: &[u8], offset: u32) -> Result<Vec<ChannelDefinition>> {
    let (mut section, _) = read_section(data, offset, b"CHAN", 12, CHAN_RECORD_SIZE, "CHAN section")?;

    let mut channels = Vec::with_capacity(section.count);
    for _ in 0..section.count {
        section.consume_record(CHAN_RECORD_SIZE, "CHAN record")?;
        let identifier = section.span.read_u32("CHAN.identifier")?;
        let name_offset = section.span.read_u32("CHAN.name_offset")?;
        let unknown = section.span.read_u32("CHAN.unknown")?;
        let message_identifier = message_identifier(section.span.read_u32("CHAN.message_identifier")?);
        let name = read_name(data, name_offset, "CHAN name")?;

        channels.push(ChannelDefinition {
            identifier,
            name_offset,
            unknown,
            message_identifier,
            name,
        });
    }
    Ok(channels)
}

pub(super) fn read_events(data: &[u8], offset: u32) -> Result<Vec<EventDefinition>> {
    let (mut section, _unknown1) =
        read_section(data, offset, b"EVNT", 16, EVNT_RECORD_SIZE, "EVNT section")?;

    let mut events = Vec::with_capacity(section.count);
    for _ in 0..section.count {
        section.consume_record(EVNT_RECORD_SIZE, "EVNT record")?;
        let identifier = section.span.read_u16("EVNT.event.identifier")?;
        let mut detail = [0u8; 6];
        detail.copy_from_slice(section.span.read_slice(6, "EVNT.event.detail")?);
        let keywords = section.span.read_u64("EVNT.event.keywords")?;
        let message_identifier = section.span.read_u32("EVNT.event.message_identifier")?;
        let template_offset = section.span.read_u32("EVNT.event.template_offset")?;
        let opcode_offset = section.span.read_u32("EVNT.event.opcode_offset")?;
        let level_offset = section.span.read_u32("EVNT.event.level_offset")?;
        let task_offset = section.span.read_u32("EVNT.event.task_offset")?;
        let unknown_count = section.span.read_u32("EVNT.event.unknown_count")?;
        let unknown_offset = section.span.read_u32("EVNT.event.unknown_offset")?;
        let flags = section.span.read_u32("EVNT.event.flags")?;

        events.push(EventDefinition {
            identifier,
            detail: EventDetail(detail),
            keywords,
            message_identifier,
            template_offset: (template_offset != 0).then_some(template_offset),
            opcode_offset: (opcode_offset != 0).then_some(opcode_offset),
            level_offset: (level_offset != 0).then_some(level_offset),
            task_offset: (task_offset != 0).then_some(task_offset),
            unknown_count,
            unknown_offset,
            flags,
        });
    }
    Ok(events)
}

pub(super) fn read_keywords(data: &[u8], offset: u32) -> Result<Vec<KeywordDefinition>> {
    let (mut section, _) = read_section(data, offset, b"KEYW", 12, KEYW_RECORD_SIZE, "KEYW section")?;

    let mut keywords = Vec::with_capacity(section.count);
    for _ in 0..section.count {
        section.consume_record(KEYW_RECORD_SIZE, "KEYW record")?;
        let identifier = section.span.read_u64("KEYW.identifier")?;
        let message_identifier = message_identifier(section.span.read_u32("KEYW.message_identifier")?);
        let data_offset = section.span.read_u32("KEYW.data_offset")?;
        let name = read_name(data, data_offset, "KEYW name")?;

        keywords.push(KeywordDefinition {
            identifier,
            message_identifier,
            data_offset,
            name,
        });
    }
    Ok(keywords)
}

pub(super) fn read_levels(data: &[u8], offset: u32) -> Result<Vec<LevelDefinition>> {
    let (mut section, _) = read_section(data, offset, b"LEVL", 12, LEVL_RECORD_SIZE, "LEVL section")?;

    let mut levels = Vec::with_capacity(section.count);
    for _ in 0..section.count {
        section.consume_record(LEVL_RECORD_SIZE, "LEVL record")?;
        let identifier = section.span.read_u32("LEVL.identifier")?;
        let message_identifier = message_identifier(section.span.read_u32("LEVL.message_identifier")?);
        let data_offset = section.span.read_u32("LEVL.data_offset")?;
        let name = read_name(data, data_offset, "LEVL name")?;

        levels.push(LevelDefinition {
            identifier,
            message_identifier,
            data_offset,
            name,
        });
    }
    Ok(levels)
}

pub(super) fn read_opcodes(data: &[u8], offset: u32) -> Result<Vec<OpcodeDefinition>> {
    let (mut section, _) = read_section(data, offset, b"OPCO", 12, OPCO_RECORD_SIZE, "OPCO section")?;

    let mut opcodes = Vec::with_capacity(section.count);
    for _ in 0..section.count {
        section.consume_record(OPCO_RECORD_SIZE, "OPCO record")?;
        let identifier = section.span.read_u32("OPCO.identifier")?;
        let message_identifier = message_identifier(section.span.read_u32("OPCO.message_identifier")?);
        let data_offset = section.span.read_u32("OPCO.data_offset")?;
        let name = read_name(data, data_offset, "OPCO name")?;

        opcodes.push(OpcodeDefinition {
            identifier,
            message_identifier,
            data_offset,
            name,
        });
    }
    Ok(opcodes)
}

pub(super) fn read_tasks(data: &[u8], offset: u32) -> Result<Vec<TaskDefinition>> {
    let (mut section, _) = read_section(data, offset, b"TASK", 12, TASK_RECORD_SIZE, "TASK section")?;

    let mut tasks = Vec::with_capacity(section.count);
    for _ in 0..section.count {
        section.consume_record(TASK_RECORD_SIZE, "TASK record")?;
        let identifier = section.span.read_u32("TASK.identifier")?;
        let message_identifier = message_identifier(section.span.read_u32("TASK.message_identifier")?);
        let mui_identifier = section.span.read_guid("TASK.mui_identifier")?;
        let data_offset = section.span.read_u32("TASK.data_offset")?;
        let name = read_name(data, data_offset, "TASK name")?;

        tasks.push(TaskDefinition {
            identifier,
            message_identifier,
            mui_identifier,
            data_offset,
            name,
        });
    }
    Ok(tasks)
}
