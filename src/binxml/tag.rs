//! The in-memory XML tag tree and its textual rendering.

use bitflags::bitflags;

use crate::binxml::value::XmlValue;
use crate::utils::utf16::decode_utf16le;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XmlTagFlags: u8 {
        /// At least one of this tag's values came from a template value
        /// substitution.
        const IS_TEMPLATE_DEFINITION = 0x01;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XmlTagKind {
    #[default]
    Element,
    CData,
    Pi,
}

/// One node of an evaluated binary XML document: a name, ordered value
/// fragments, attributes and child elements.
///
/// Attributes are tags themselves (name plus values, no children), matching
/// the on-disk encoding. Rendering never mutates the tree.
#[derive(Debug, Clone, Default)]
pub struct XmlTag {
    kind: XmlTagKind,
    /// UTF-16LE name bytes as stored, terminator included.
    name_data: Vec<u8>,
    values: Vec<XmlValue>,
    attributes: Vec<XmlTag>,
    elements: Vec<XmlTag>,
    flags: XmlTagFlags,
}

impl XmlTag {
    pub(crate) fn new() -> Self {
        XmlTag::default()
    }

    pub fn kind(&self) -> XmlTagKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: XmlTagKind) {
        self.kind = kind;
    }

    pub fn flags(&self) -> XmlTagFlags {
        self.flags
    }

    pub(crate) fn set_flags(&mut self, flags: XmlTagFlags) {
        self.flags |= flags;
    }

    /// The raw UTF-16LE name bytes, including the NUL terminator.
    pub fn name_data(&self) -> &[u8] {
        &self.name_data
    }

    pub(crate) fn set_name_data(&mut self, data: &[u8]) {
        self.name_data = data.to_vec();
    }

    pub fn name(&self) -> String {
        decode_utf16le(&self.name_data)
    }

    pub fn values(&self) -> &[XmlValue] {
        &self.values
    }

    pub(crate) fn append_value(&mut self, value: XmlValue) {
        self.values.push(value);
    }

    /// All value fragments rendered and concatenated.
    pub fn value_string(&self) -> String {
        let mut out = String::new();
        for value in &self.values {
            out.push_str(&value.to_display_string());
        }
        out
    }

    pub fn number_of_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute_by_index(&self, index: usize) -> Option<&XmlTag> {
        self.attributes.get(index)
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&XmlTag> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    pub(crate) fn append_attribute(&mut self, attribute: XmlTag) {
        self.attributes.push(attribute);
    }

    pub fn number_of_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn element_by_index(&self, index: usize) -> Option<&XmlTag> {
        self.elements.get(index)
    }

    pub fn element_by_name(&self, name: &str) -> Option<&XmlTag> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub fn elements(&self) -> &[XmlTag] {
        &self.elements
    }

    pub(crate) fn append_element(&mut self, element: XmlTag) {
        self.elements.push(element);
    }

    /// Render the subtree as UTF-8 XML text, two-space indented.
    ///
    /// Values are emitted verbatim: entity and character references were
    /// resolved to literal text during evaluation, so no further escaping is
    /// applied.
    pub fn to_utf8_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, 0);
        out
    }

    /// Render the subtree as UTF-16 code units.
    pub fn to_utf16_xml(&self) -> Vec<u16> {
        self.to_utf8_xml().encode_utf16().collect()
    }

    fn write_xml(&self, out: &mut String, level: usize) {
        let indent = "  ".repeat(level);
        match self.kind {
            XmlTagKind::Pi => {
                out.push_str(&indent);
                out.push_str("<?");
                out.push_str(&self.name());
                let data = self.value_string();
                if !data.is_empty() {
                    out.push(' ');
                    out.push_str(&data);
                }
                out.push_str("?>\n");
            }
            XmlTagKind::CData => {
                out.push_str(&indent);
                out.push_str("<![CDATA[");
                out.push_str(&self.value_string());
                out.push_str("]]>\n");
            }
            XmlTagKind::Element => {
                out.push_str(&indent);
                out.push('<');
                out.push_str(&self.name());
                for attribute in &self.attributes {
                    out.push(' ');
                    out.push_str(&attribute.name());
                    out.push_str("=\"");
                    out.push_str(&attribute.value_string());
                    out.push('"');
                }

                let text = self.value_string();
                if self.elements.is_empty() && text.is_empty() {
                    out.push_str("/>\n");
                } else if self.elements.is_empty() {
                    out.push('>');
                    out.push_str(&text);
                    out.push_str("</");
                    out.push_str(&self.name());
                    out.push_str(">\n");
                } else {
                    out.push_str(">\n");
                    if !text.is_empty() {
                        out.push_str(&indent);
                        out.push_str("  ");
                        out.push_str(&text);
                        out.push('\n');
                    }
                    for element in &self.elements {
                        element.write_xml(out, level + 1);
                    }
                    out.push_str(&indent);
                    out.push_str("</");
                    out.push_str(&self.name());
                    out.push_str(">\n");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::value::XmlValue;
    use crate::utils::utf16::encode_utf16le;

    fn named(name: &str) -> XmlTag {
        let mut tag = XmlTag::new();
        let mut data = encode_utf16le(name);
        data.extend_from_slice(&[0, 0]);
        tag.set_name_data(&data);
        tag
    }

    #[test]
    fn empty_element_renders_self_closing() {
        assert_eq!(named("Security").to_utf8_xml(), "<Security/>\n");
    }

    #[test]
    fn attributes_and_children_render_nested() {
        let mut root = named("Event");
        let mut attr = named("xmlns");
        attr.append_value(XmlValue::from_text("urn:example"));
        root.append_attribute(attr);

        let mut child = named("Channel");
        child.append_value(XmlValue::from_text("Application"));
        root.append_element(child);

        assert_eq!(
            root.to_utf8_xml(),
            "<Event xmlns=\"urn:example\">\n  <Channel>Application</Channel>\n</Event>\n"
        );
    }

    #[test]
    fn values_render_unescaped() {
        let mut tag = named("Data");
        tag.append_value(XmlValue::from_text("<&>'\""));
        assert_eq!(tag.to_utf8_xml(), "<Data><&>'\"</Data>\n");
    }

    #[test]
    fn utf16_rendering_matches_utf8() {
        let mut tag = named("Data");
        tag.append_value(XmlValue::from_text("x"));
        let utf8 = tag.to_utf8_xml();
        let utf16 = tag.to_utf16_xml();
        assert_eq!(String::from_utf16(&utf16).unwrap(), utf8);
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut root = named("A");
        root.append_element(named("B"));
        assert_eq!(root.to_utf8_xml(), root.to_utf8_xml());
    }
}
