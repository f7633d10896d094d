//! Parsers for the two binary formats produced by the Windows event tracing
//! subsystem:
//!
//! - the `WEVT_TEMPLATE` instrumentation manifest (a `CRIM` blob embedded in
//!   PE resource sections), parsed into a [`manifest::Manifest`] object graph
//!   of providers, channels, events, keywords, levels, maps, opcodes, tasks
//!   and templates;
//! - the binary XML substream used for event record bodies and template
//!   definitions, evaluated by [`binxml::XmlDocument`] into an
//!   [`binxml::XmlTag`] tree and rendered back to textual XML.
//!
//! Both parsers operate on whole byte slices, trust nothing in the input, and
//! report failures as [`WevtError`] values. Parsing performs no I/O and keeps
//! no global state; independent inputs can be parsed concurrently.
//!
//! ```no_run
//! use wevt::manifest::Manifest;
//!
//! # fn example(resource_data: &[u8]) -> wevt::Result<()> {
//! let manifest = Manifest::parse(resource_data)?;
//! for provider in &manifest.providers {
//!     println!("{}: {} events", provider.guid, provider.number_of_events());
//! }
//! # Ok(())
//! # }
//! ```

pub mod binxml;
pub mod manifest;

mod err;
mod utils;

pub use err::{Result, WevtError};
