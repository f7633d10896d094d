//! Binary XML token classification, document evaluation and rendering.
//!
//! The substream is a tokenized XML encoding: one leading byte per token
//! (low six bits type, bit 0x40 "has more data"), with template instances
//! whose leaf values are substituted from a parallel value array at
//! evaluation time. [`XmlDocument::read_with_template_values`] interprets a
//! fragment into an [`XmlTag`] tree which renders deterministically to
//! UTF-8 or UTF-16 text.

mod document;
mod tag;
mod template_value;
mod token;
mod value;

pub use document::{
    ELEMENT_RECURSION_DEPTH, TEMPLATE_INSTANCE_RECURSION_DEPTH,
    TEMPLATE_VALUE_ARRAY_RECURSION_DEPTH, XmlDocument, XmlDocumentFlags,
};
pub use tag::{XmlTag, XmlTagFlags, XmlTagKind};
pub use template_value::TemplateValue;
pub use token::{BINXML_TOKEN_FLAG_HAS_MORE_DATA, BinXmlToken, BinXmlTokenKind};
pub use value::{BINXML_VALUE_TYPE_ARRAY, BinXmlValueType, XmlValue, XmlValueType};
