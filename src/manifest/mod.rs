//! WEVT_TEMPLATE instrumentation manifest parsing.
//!
//! A manifest is a `CRIM` container holding one or more `WEVT` providers;
//! each provider carries up to eight typed sub-tables (`CHAN`, `EVNT`,
//! `KEYW`, `LEVL`, `MAPS`, `OPCO`, `TASK`, `TTBL`) reached through a
//! descriptor table at the provider header. All offsets in the container are
//! relative to the start of the CRIM blob.
//!
//! [`Manifest::parse`] is the entry point; [`Provider`] supports staged
//! parsing (`read_data` followed by the per-section `read_*` methods) for
//! callers holding a bare provider blob.

mod maps;
mod parse;
mod sections;
mod template;
mod types;

pub use types::{
    ChannelDefinition, CrimHeader, EventDefinition, EventDetail, KeywordDefinition,
    LevelDefinition, Manifest, MapDefinition, OpcodeDefinition, Provider,
    ProviderElementDescriptor, TaskDefinition, TemplateDefinition,
};
