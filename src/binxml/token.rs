//! Single-byte binary XML token classification.

use crate::err::{Result, WevtError};

/// Flag bit indicating the token is followed by additional data (an
/// attribute list for elements, further values for attributes).
pub const BINXML_TOKEN_FLAG_HAS_MORE_DATA: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinXmlTokenKind {
    EndOfFile,
    OpenStartElement,
    CloseStartElement,
    CloseEmptyElement,
    EndElement,
    Value,
    Attribute,
    CDataSection,
    CharacterReference,
    EntityReference,
    PiTarget,
    PiData,
    TemplateInstance,
    NormalSubstitution,
    OptionalSubstitution,
    FragmentHeader,
}

/// A classified token byte. Classification never looks past the byte
/// itself; header and payload layout are the evaluator's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinXmlToken {
    pub raw: u8,
    pub kind: BinXmlTokenKind,
}

impl BinXmlToken {
    /// Classify the byte at `offset`.
    pub fn read(data: &[u8], offset: usize) -> Result<BinXmlToken> {
        let raw = *data.get(offset).ok_or(WevtError::TruncatedInput {
            what: "binary XML token",
            offset: offset as u64,
            need: 1,
            have: 0,
        })?;

        use BinXmlTokenKind::*;
        let kind = match raw {
            0x00 => EndOfFile,
            0x01 | 0x41 => OpenStartElement,
            0x02 | 0x42 => CloseStartElement,
            0x03 => CloseEmptyElement,
            0x04 => EndElement,
            0x05 | 0x45 => Value,
            0x06 | 0x46 => Attribute,
            0x07 | 0x47 => CDataSection,
            0x08 | 0x48 => CharacterReference,
            0x09 => EntityReference,
            0x0a | 0x4a => PiTarget,
            0x0b | 0x4b => PiData,
            0x0c => TemplateInstance,
            0x0d => NormalSubstitution,
            0x0e => OptionalSubstitution,
            0x0f => FragmentHeader,
            _ => {
                return Err(WevtError::UnsupportedToken {
                    token: raw,
                    offset: offset as u64,
                });
            }
        };

        Ok(BinXmlToken { raw, kind })
    }

    pub fn has_more_data(&self) -> bool {
        self.raw & BINXML_TOKEN_FLAG_HAS_MORE_DATA != 0
    }
}
