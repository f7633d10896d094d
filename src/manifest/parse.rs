use log::{debug, trace};
use winstructs::guid::Guid;

use crate::err::{Result, WevtError};
use crate::utils::bytes;
use crate::utils::span::ByteSpan;

use super::types::*;
use super::{maps, sections, template};

const CRIM_HEADER_SIZE: usize = 16;
const PROVIDER_ENTRY_SIZE: usize = 20;
const WEVT_HEADER_SIZE: usize = 20;

impl<'a> Manifest<'a> {
    /// Parse a CRIM manifest blob (the payload of a `WEVT_TEMPLATE`
    /// resource).
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut span = ByteSpan::new(data)?;

        span.expect_signature(b"CRIM")?;
        let size = span.read_u32("CRIM.size")?;
        let major_version = span.read_u16("CRIM.major_version")?;
        let minor_version = span.read_u16("CRIM.minor_version")?;
        let provider_count = span.read_u32("CRIM.provider_count")?;

        let header = CrimHeader {
            size,
            major_version,
            minor_version,
            provider_count,
        };

        if (size as usize) < CRIM_HEADER_SIZE {
            return Err(WevtError::out_of_bounds("CRIM.size", 4));
        }
        let size = bytes::offset_to_usize(size, data.len(), "CRIM.size")?;
        let data = &data[..size];

        debug!(
            "CRIM: size {} version {}.{} providers {}",
            size, major_version, minor_version, provider_count
        );

        let provider_count = usize::try_from(provider_count)
            .map_err(|_| WevtError::out_of_bounds("CRIM.provider_count", 12))?;

        // The whole descriptor table must fit before the per-entry loop runs.
        let table_size = provider_count
            .checked_mul(PROVIDER_ENTRY_SIZE)
            .ok_or(WevtError::out_of_bounds("CRIM.provider_count", 12))?;
        bytes::checked_end(data.len(), CRIM_HEADER_SIZE, table_size, "CRIM provider table")?;

        let mut providers = Vec::with_capacity(provider_count);
        let mut span = ByteSpan::at(data, CRIM_HEADER_SIZE, "CRIM provider table")?;

        for index in 0..provider_count {
            let guid = span.read_guid("CRIM.provider.guid")?;
            let offset = span.read_u32("CRIM.provider.offset")?;

            trace!("provider {index}: {guid} at offset {offset}");

            let mut provider = Provider::read_data(guid, data, offset)?;
            provider.read_elements()?;
            providers.push(provider);
        }

        Ok(Manifest {
            data,
            header,
            providers,
        })
    }
}

impl<'a> Provider<'a> {
    /// Read a `WEVT` provider header and its descriptor table.
    ///
    /// Section contents are not parsed here; call the `read_*` methods (or
    /// [`Provider::read_elements`] for all of them in file order).
    pub fn read_data(guid: Guid, data: &'a [u8], offset: u32) -> Result<Provider<'a>> {
        let offset_usize = bytes::offset_to_usize(offset, data.len(), "WEVT offset")?;
        let mut span = ByteSpan::at(data, offset_usize, "WEVT offset")?;
        span.require(WEVT_HEADER_SIZE, "WEVT header")?;

        span.expect_signature(b"WEVT")?;
        let size = span.read_u32("WEVT.size")?;
        let message_identifier_raw = span.read_u32("WEVT.message_identifier")?;
        let descriptor_count = span.read_u32("WEVT.number_of_descriptors")?;
        let unknown2_count = span.read_u32("WEVT.number_of_unknown2")?;

        let message_identifier = if message_identifier_raw == 0xffff_ffff {
            None
        } else {
            Some(message_identifier_raw)
        };

        let descriptor_count_usize = usize::try_from(descriptor_count)
            .map_err(|_| WevtError::out_of_bounds("WEVT.number_of_descriptors", offset_usize + 12))?;
        let descriptor_bytes = descriptor_count_usize
            .checked_mul(8)
            .ok_or(WevtError::out_of_bounds("WEVT.number_of_descriptors", offset_usize + 12))?;
        span.require(descriptor_bytes, "WEVT descriptor table")?;

        let mut provider = Provider {
            data,
            guid,
            offset,
            size,
            message_identifier,
            descriptors: Vec::with_capacity(descriptor_count_usize),
            unknown2: Vec::new(),
            channels_offset: 0,
            events_offset: 0,
            keywords_offset: 0,
            levels_offset: 0,
            maps_offset: 0,
            opcodes_offset: 0,
            tasks_offset: 0,
            templates_offset: 0,
            channels: Vec::new(),
            events: Vec::new(),
            keywords: Vec::new(),
            levels: Vec::new(),
            maps: Vec::new(),
            opcodes: Vec::new(),
            tasks: Vec::new(),
            templates: Vec::new(),
        };

        for _ in 0..descriptor_count_usize {
            let element_offset = span.read_u32("WEVT.descriptor.offset")?;
            let unknown = span.read_u32("WEVT.descriptor.unknown")?;
            provider.dispatch_descriptor(element_offset, unknown)?;
        }

        let unknown2_count_usize = usize::try_from(unknown2_count)
            .map_err(|_| WevtError::out_of_bounds("WEVT.number_of_unknown2", offset_usize + 16))?;
        let unknown2_bytes = unknown2_count_usize
            .checked_mul(4)
            .ok_or(WevtError::out_of_bounds("WEVT.number_of_unknown2", offset_usize + 16))?;
        span.require(unknown2_bytes, "WEVT unknown2 table")?;

        provider.unknown2.reserve(unknown2_count_usize);
        for _ in 0..unknown2_count_usize {
            provider.unknown2.push(span.read_u32("WEVT.unknown2")?);
        }

        Ok(provider)
    }

    /// Peek the big-endian tag at a descriptor offset and record it in the
    /// matching section slot. Unknown tags are ignored; the descriptor table
    /// is forward-extensible.
    fn dispatch_descriptor(&mut self, element_offset: u32, unknown: u32) -> Result<()> {
        let offset = bytes::offset_to_usize(element_offset, self.data.len(), "WEVT descriptor offset")?;
        let tag = bytes::read_u32_be(self.data, offset)
            .ok_or(WevtError::out_of_bounds("WEVT descriptor offset", offset))?;
        let signature = tag.to_be_bytes();

        trace!(
            "descriptor {:?} at offset {element_offset}",
            String::from_utf8_lossy(&signature)
        );

        match tag {
            // CHAN
            0x4348_414e => self.channels_offset = element_offset,
            // EVNT
            0x4556_4e54 => self.events_offset = element_offset,
            // KEYW
            0x4b45_5957 => self.keywords_offset = element_offset,
            // LEVL
            0x4c45_564c => self.levels_offset = element_offset,
            // MAPS
            0x4d41_5053 => self.maps_offset = element_offset,
            // OPCO
            0x4f50_434f => self.opcodes_offset = element_offset,
            // TASK
            0x5441_534b => self.tasks_offset = element_offset,
            // TTBL
            0x5454_424c => self.templates_offset = element_offset,
            _ => {}
        }

        self.descriptors.push(ProviderElementDescriptor {
            offset: element_offset,
            unknown,
            signature,
        });
        Ok(())
    }

    /// Parse every recorded section, in file order. A failing section leaves
    /// its sequence empty and aborts the remaining sections.
    pub fn read_elements(&mut self) -> Result<()> {
        self.read_channels()?;
        self.read_events()?;
        self.read_keywords()?;
        self.read_levels()?;
        self.read_maps()?;
        self.read_opcodes()?;
        self.read_tasks()?;
        self.read_templates()?;
        Ok(())
    }

    pub fn read_channels(&mut self) -> Result<()> {
        self.channels.clear();
        if self.channels_offset != 0 {
            self.channels = sections::read_channels(self.data, self.channels_offset)?;
        }
        Ok(())
    }

    pub fn read_events(&mut self) -> Result<()> {
        self.events.clear();
        if self.events_offset != 0 {
            self.events = sections::read_events(self.data, self.events_offset)?;
        }
        Ok(())
    }

    pub fn read_keywords(&mut self) -> Result<()> {
        self.keywords.clear();
        if self.keywords_offset != 0 {
            self.keywords = sections::read_keywords(self.data, self.keywords_offset)?;
        }
        Ok(())
    }

    pub fn read_levels(&mut self) -> Result<()> {
        self.levels.clear();
        if self.levels_offset != 0 {
            self.levels = sections::read_levels(self.data, self.levels_offset)?;
        }
        Ok(())
    }

    pub fn read_maps(&mut self) -> Result<()> {
        self.maps.clear();
        if self.maps_offset != 0 {
            self.maps = maps::read_maps(self.data, self.maps_offset)?;
        }
        Ok(())
    }

    pub fn read_opcodes(&mut self) -> Result<()> {
        self.opcodes.clear();
        if self.opcodes_offset != 0 {
            self.opcodes = sections::read_opcodes(self.data, self.opcodes_offset)?;
        }
        Ok(())
    }

    pub fn read_tasks(&mut self) -> Result<()> {
        self.tasks.clear();
        if self.tasks_offset != 0 {
            self.tasks = sections::read_tasks(self.data, self.tasks_offset)?;
        }
        Ok(())
    }

    pub fn read_templates(&mut self) -> Result<()> {
        self.templates.clear();
        if self.templates_offset != 0 {
            self.templates = template::read_template_table(self.data, self.templates_offset)?;
        }
        Ok(())
    }
}
