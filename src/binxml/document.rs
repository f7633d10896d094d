//! The recursive binary XML document evaluator.
//!
//! Reads a tokenized fragment into an [`XmlTag`] tree, resolving template
//! instances by back-substituting leaf values from a parallel value array.
//! Recursion is bounded independently on element nesting, template-instance
//! nesting and per-call template-value-array expansion.
//!
//! Data offsets stored in the stream (names, template definitions) refer to
//! the buffer the fragment was originally embedded in. A fragment carved out
//! of a larger buffer keeps those offsets, so they may point forward of the
//! cursor or outside the slice entirely; in that case the referenced record
//! is found inline at the cursor. Only offsets pointing strictly backward
//! are followed.

use bitflags::bitflags;
use encoding::EncodingRef;
use log::{debug, trace};

use crate::err::{Result, WevtError};
use crate::utils::bytes;

use super::tag::{XmlTag, XmlTagFlags, XmlTagKind};
use super::template_value::TemplateValue;
use super::token::{BinXmlToken, BinXmlTokenKind};
use super::value::{BinXmlValueType, XmlValue, XmlValueType};

bitflags! {
    /// Flags controlling stream layout during evaluation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XmlDocumentFlags: u8 {
        /// Names and template definitions are referenced through absolute
        /// 4-byte data offsets; name records carry a leading unknown word.
        const HAS_DATA_OFFSETS = 0x01;
        /// Elements carry a 2-byte dependency identifier between the type
        /// byte and the size field.
        const HAS_DEPENDENCY_IDENTIFIERS = 0x02;
    }
}

pub const ELEMENT_RECURSION_DEPTH: u32 = 500;
pub const TEMPLATE_INSTANCE_RECURSION_DEPTH: u32 = 10;
pub const TEMPLATE_VALUE_ARRAY_RECURSION_DEPTH: u32 = 256;

/// An evaluated binary XML document.
///
/// The root tag is the first element produced by the top-level fragment;
/// rendering walks the tree without mutating it.
#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    root: Option<XmlTag>,
}

impl XmlDocument {
    /// Read a binary XML document without template values.
    pub fn read(
        data: &[u8],
        offset: usize,
        ansi_codec: EncodingRef,
        flags: XmlDocumentFlags,
    ) -> Result<XmlDocument> {
        Self::read_with_template_values(data, offset, ansi_codec, flags, None)
    }

    /// Read a binary XML document, substituting leaf values from
    /// `template_values` where the stream requests them.
    pub fn read_with_template_values(
        data: &[u8],
        offset: usize,
        ansi_codec: EncodingRef,
        flags: XmlDocumentFlags,
        template_values: Option<&[TemplateValue]>,
    ) -> Result<XmlDocument> {
        if data.len() > isize::MAX as usize {
            return Err(WevtError::InvalidArgument {
                what: "input size exceeds maximum",
            });
        }
        if offset >= data.len() {
            return Err(WevtError::out_of_bounds("binary XML offset", offset));
        }
        if flags.bits() & !XmlDocumentFlags::all().bits() != 0 {
            return Err(WevtError::InvalidArgument {
                what: "unsupported binary XML document flags",
            });
        }

        let reader = DocumentReader {
            data,
            ansi_codec,
            flags,
        };

        let mut root = None;
        let mut offset = offset;

        while offset < data.len() {
            let token = BinXmlToken::read(data, offset)?;
            match token.kind {
                BinXmlTokenKind::EndOfFile => {
                    trace!("end of file token at offset {offset}");
                    break;
                }
                BinXmlTokenKind::FragmentHeader => {
                    offset += reader.read_fragment(
                        offset,
                        template_values,
                        &mut Attach::Root(&mut root),
                        0,
                        0,
                    )?;
                }
                _ => {
                    return Err(WevtError::UnsupportedToken {
                        token: token.raw,
                        offset: offset as u64,
                    });
                }
            }
        }

        Ok(XmlDocument { root })
    }

    /// The document's root tag, if evaluation produced one.
    pub fn root(&self) -> Option<&XmlTag> {
        self.root.as_ref()
    }

    /// Render the document as UTF-8 XML text.
    pub fn to_utf8_xml(&self) -> String {
        self.root.as_ref().map(XmlTag::to_utf8_xml).unwrap_or_default()
    }

    /// Render the document as UTF-16 code units.
    pub fn to_utf16_xml(&self) -> Vec<u16> {
        self.root.as_ref().map(XmlTag::to_utf16_xml).unwrap_or_default()
    }
}

/// Where completed elements are attached: under a parent tag, or as the
/// document root (first element wins, extras are dropped).
enum Attach<'t> {
    Root(&'t mut Option<XmlTag>),
    Under(&'t mut XmlTag),
}

impl Attach<'_> {
    fn push(&mut self, tag: XmlTag) {
        match self {
            Attach::Root(slot) => {
                if slot.is_none() {
                    **slot = Some(tag);
                }
            }
            Attach::Under(parent) => parent.append_element(tag),
        }
    }
}

struct DocumentReader<'a> {
    data: &'a [u8],
    ansi_codec: EncodingRef,
    flags: XmlDocumentFlags,
}

impl<'a> DocumentReader<'a> {
    fn has_data_offsets(&self) -> bool {
        self.flags.contains(XmlDocumentFlags::HAS_DATA_OFFSETS)
    }

    /// Read a fragment header and the single element or template instance
    /// it introduces. Returns the number of bytes consumed.
    fn read_fragment(
        &self,
        offset: usize,
        template_values: Option<&[TemplateValue]>,
        attach: &mut Attach<'_>,
        element_depth: u32,
        template_depth: u32,
    ) -> Result<usize> {
        bytes::slice_r(self.data, offset, 4, "fragment header")?;
        trace!(
            "fragment header at {offset}: version {}.{} flags 0x{:02x}",
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3]
        );
        let mut consumed = 4;

        let token = BinXmlToken::read(self.data, offset + consumed)?;
        match token.kind {
            BinXmlTokenKind::OpenStartElement => {
                consumed += self.read_element(
                    offset + consumed,
                    template_values,
                    attach,
                    element_depth + 1,
                    template_depth,
                )?;
            }
            BinXmlTokenKind::TemplateInstance => {
                consumed += self.read_template_instance(
                    offset + consumed,
                    attach,
                    element_depth,
                    template_depth + 1,
                )?;
            }
            _ => {
                return Err(WevtError::UnsupportedToken {
                    token: token.raw,
                    offset: (offset + consumed) as u64,
                });
            }
        }

        Ok(consumed)
    }

    /// Read an element token. Array-typed substitutions re-evaluate the
    /// element once per remaining array entry, producing sibling tags; the
    /// returned size covers one pass over the element bytes.
    fn read_element(
        &self,
        offset: usize,
        template_values: Option<&[TemplateValue]>,
        attach: &mut Attach<'_>,
        element_depth: u32,
        template_depth: u32,
    ) -> Result<usize> {
        if element_depth > ELEMENT_RECURSION_DEPTH {
            return Err(WevtError::RecursionLimitExceeded {
                what: "element",
                limit: ELEMENT_RECURSION_DEPTH,
            });
        }

        let token = BinXmlToken::read(self.data, offset)?;
        let mut template_value_offset = 0usize;
        let mut array_depth = 0u32;
        let mut consumed = 0usize;

        loop {
            if array_depth > TEMPLATE_VALUE_ARRAY_RECURSION_DEPTH {
                return Err(WevtError::RecursionLimitExceeded {
                    what: "template value array",
                    limit: TEMPLATE_VALUE_ARRAY_RECURSION_DEPTH,
                });
            }

            // The dependency identifier is optional; probe both layouts and
            // keep the one whose size fits the remaining buffer.
            let mut size_offset = 1usize;
            let mut element_size =
                bytes::read_u32_le_r(self.data, offset + size_offset, "element size")? as usize;
            let remaining = self.data.len() - offset;
            if remaining > 7 && element_size > remaining - 7 {
                size_offset = 3;
                element_size =
                    bytes::read_u32_le_r(self.data, offset + size_offset, "element size")? as usize;
            }

            trace!("element at {offset}: size {element_size} (size offset {size_offset})");

            let mut cursor = size_offset + 4;
            let mut tag = XmlTag::new();

            // The type, optional dependency identifier and size field are
            // not part of the declared element size.
            let name_offset = if self.has_data_offsets() {
                let value =
                    bytes::read_u32_le_r(self.data, offset + cursor, "element name offset")? as usize;
                cursor += 4;
                element_size = sub_size(element_size, 4, offset + cursor)?;
                value
            } else {
                offset + cursor
            };

            let (name_data, name_consumed) = self.resolve_name(name_offset, offset + cursor)?;
            tag.set_name_data(&name_data);
            cursor += name_consumed;
            element_size = sub_size(element_size, name_consumed, offset + cursor)?;

            if token.has_more_data() {
                let mut attribute_list_size =
                    bytes::read_u32_le_r(self.data, offset + cursor, "attribute list size")? as usize;
                cursor += 4;
                element_size = sub_size(element_size, 4, offset + cursor)?;

                if attribute_list_size > self.data.len() - (offset + cursor) {
                    return Err(WevtError::out_of_bounds("attribute list size", offset + cursor));
                }

                while attribute_list_size > 0 {
                    let attribute_size = self.read_attribute(
                        offset + cursor,
                        template_values,
                        &mut tag,
                        element_depth,
                        template_depth,
                    )?;
                    cursor += attribute_size;
                    element_size = sub_size(element_size, attribute_size, offset + cursor)?;
                    if attribute_list_size < attribute_size {
                        return Err(WevtError::out_of_bounds("attribute list size", offset + cursor));
                    }
                    attribute_list_size -= attribute_size;
                }
            }

            let close_token = BinXmlToken::read(self.data, offset + cursor)?;
            if close_token.kind != BinXmlTokenKind::CloseStartElement
                && close_token.kind != BinXmlTokenKind::CloseEmptyElement
            {
                return Err(WevtError::UnsupportedToken {
                    token: close_token.raw,
                    offset: (offset + cursor) as u64,
                });
            }
            cursor += 1;
            element_size = sub_size(element_size, 1, offset + cursor)?;

            let mut keep = close_token.kind == BinXmlTokenKind::CloseEmptyElement;

            if close_token.kind == BinXmlTokenKind::CloseStartElement {
                keep = true;

                while element_size > 0 {
                    let child = BinXmlToken::read(self.data, offset + cursor)?;
                    let child_size = match child.kind {
                        BinXmlTokenKind::OpenStartElement => self.read_element(
                            offset + cursor,
                            template_values,
                            &mut Attach::Under(&mut tag),
                            element_depth + 1,
                            template_depth,
                        )?,
                        BinXmlTokenKind::CloseEmptyElement | BinXmlTokenKind::EndElement => 1,
                        BinXmlTokenKind::CDataSection => {
                            self.reject_pending_array(template_value_offset, offset + cursor)?;
                            self.read_cdata_section(offset + cursor, &mut tag)?
                        }
                        BinXmlTokenKind::PiTarget => {
                            self.reject_pending_array(template_value_offset, offset + cursor)?;
                            self.read_pi_target(offset + cursor, &mut tag)?
                        }
                        BinXmlTokenKind::CharacterReference => {
                            self.reject_pending_array(template_value_offset, offset + cursor)?;
                            self.read_character_reference(offset + cursor, &mut tag)?
                        }
                        BinXmlTokenKind::EntityReference => {
                            self.reject_pending_array(template_value_offset, offset + cursor)?;
                            self.read_entity_reference(offset + cursor, &mut tag)?
                        }
                        BinXmlTokenKind::Value => {
                            self.reject_pending_array(template_value_offset, offset + cursor)?;
                            self.read_value(offset + cursor, &mut tag)?
                        }
                        BinXmlTokenKind::NormalSubstitution
                        | BinXmlTokenKind::OptionalSubstitution => {
                            let (bound, size) = self.read_substitution(
                                offset + cursor,
                                child.kind == BinXmlTokenKind::OptionalSubstitution,
                                template_values,
                                &mut template_value_offset,
                                &mut tag,
                                element_depth,
                                template_depth,
                            )?;
                            keep = bound;
                            size
                        }
                        _ => {
                            return Err(WevtError::UnsupportedToken {
                                token: child.raw,
                                offset: (offset + cursor) as u64,
                            });
                        }
                    };

                    cursor += child_size;
                    element_size = sub_size(element_size, child_size, offset + cursor)?;

                    if child.kind == BinXmlTokenKind::CloseEmptyElement
                        || child.kind == BinXmlTokenKind::EndElement
                    {
                        break;
                    }
                }
            }

            if element_size > 0 {
                return Err(WevtError::out_of_bounds("element size", offset + cursor));
            }
            if keep {
                attach.push(tag);
            }

            consumed = cursor;
            array_depth += 1;

            if template_value_offset == 0 {
                break;
            }
        }

        Ok(consumed)
    }

    /// Read an attribute token: a name followed by exactly one value or
    /// substitution. Array substitutions re-read the attribute block for
    /// each remaining array entry.
    fn read_attribute(
        &self,
        offset: usize,
        template_values: Option<&[TemplateValue]>,
        element: &mut XmlTag,
        element_depth: u32,
        template_depth: u32,
    ) -> Result<usize> {
        let mut template_value_offset = 0usize;
        let mut array_depth = 0u32;
        let mut consumed = 0usize;

        loop {
            if array_depth > TEMPLATE_VALUE_ARRAY_RECURSION_DEPTH {
                return Err(WevtError::RecursionLimitExceeded {
                    what: "template value array",
                    limit: TEMPLATE_VALUE_ARRAY_RECURSION_DEPTH,
                });
            }

            bytes::read_u8_r(self.data, offset, "attribute token")?;
            let mut cursor = 1usize;

            let name_offset = if self.has_data_offsets() {
                let value =
                    bytes::read_u32_le_r(self.data, offset + cursor, "attribute name offset")? as usize;
                cursor += 4;
                value
            } else {
                offset + cursor
            };

            let (name_data, name_consumed) = self.resolve_name(name_offset, offset + cursor)?;
            cursor += name_consumed;

            let mut attribute = XmlTag::new();
            attribute.set_name_data(&name_data);

            let token = BinXmlToken::read(self.data, offset + cursor)?;
            let mut keep = true;
            let value_size = match token.kind {
                BinXmlTokenKind::Value => {
                    self.reject_pending_array(template_value_offset, offset + cursor)?;
                    self.read_value(offset + cursor, &mut attribute)?
                }
                BinXmlTokenKind::NormalSubstitution | BinXmlTokenKind::OptionalSubstitution => {
                    let (bound, size) = self.read_substitution(
                        offset + cursor,
                        token.kind == BinXmlTokenKind::OptionalSubstitution,
                        template_values,
                        &mut template_value_offset,
                        &mut attribute,
                        element_depth,
                        template_depth,
                    )?;
                    keep = bound;
                    size
                }
                _ => {
                    return Err(WevtError::UnsupportedToken {
                        token: token.raw,
                        offset: (offset + cursor) as u64,
                    });
                }
            };
            cursor += value_size;

            if keep {
                element.append_attribute(attribute);
            }

            consumed = cursor;
            array_depth += 1;

            if template_value_offset == 0 {
                break;
            }
        }

        Ok(consumed)
    }

    /// A pending array expansion only continues through substitutions;
    /// any other content token while one is open is malformed.
    fn reject_pending_array(&self, template_value_offset: usize, offset: usize) -> Result<()> {
        if template_value_offset != 0 {
            return Err(WevtError::out_of_bounds("template value offset", offset));
        }
        Ok(())
    }

    /// Read a name record at `stored_offset` if it lies behind the cursor,
    /// otherwise inline at the cursor (see module docs). Returns the
    /// UTF-16LE name bytes and the bytes consumed at the cursor.
    fn resolve_name(&self, stored_offset: usize, cursor: usize) -> Result<(Vec<u8>, usize)> {
        if stored_offset >= cursor {
            self.read_name(cursor)
        } else {
            let (name, _) = self.read_name(stored_offset)?;
            Ok((name, 0))
        }
    }

    /// Read a name record: `{u32 unknown?, u16 hash, u16 n_chars, chars}`.
    fn read_name(&self, offset: usize) -> Result<(Vec<u8>, usize)> {
        let mut cursor = offset;
        if self.has_data_offsets() {
            bytes::slice_r(self.data, cursor, 4, "name record")?;
            cursor += 4;
        }
        let _hash = bytes::read_u16_le_r(self.data, cursor, "name hash")?;
        let number_of_characters = bytes::read_u16_le_r(self.data, cursor + 2, "name size")?;
        cursor += 4;

        if number_of_characters == 0 {
            return Err(WevtError::out_of_bounds("name size", cursor - 2));
        }
        let byte_size = (usize::from(number_of_characters) + 1) * 2;
        let name = bytes::slice_r(self.data, cursor, byte_size, "name characters")?;
        cursor += byte_size;

        Ok((name.to_vec(), cursor - offset))
    }

    /// Read a `Value` token: `{type, value_type, u16 n_chars}` + payload.
    /// Only UTF-16 strings appear as direct values.
    fn read_value(&self, offset: usize, tag: &mut XmlTag) -> Result<usize> {
        bytes::slice_r(self.data, offset, 4, "value token")?;
        let value_type = self.data[offset + 1];
        if value_type != 0x01 {
            return Err(WevtError::UnsupportedValueType {
                value_type,
                offset: (offset + 1) as u64,
            });
        }
        let size = usize::from(bytes::read_u16_le_r(self.data, offset + 2, "value size")?) * 2;
        let payload = bytes::slice_r(self.data, offset + 4, size, "value data")?;

        tag.append_value(XmlValue::new(XmlValueType::StringUtf16, payload, self.ansi_codec));
        Ok(4 + size)
    }

    /// Read a CDATA section: the containing element becomes a CDATA tag.
    fn read_cdata_section(&self, offset: usize, tag: &mut XmlTag) -> Result<usize> {
        bytes::slice_r(self.data, offset, 3, "CDATA section")?;
        let size = usize::from(bytes::read_u16_le_r(self.data, offset + 1, "CDATA size")?) * 2;
        let payload = bytes::slice_r(self.data, offset + 3, size, "CDATA data")?;

        tag.set_kind(XmlTagKind::CData);
        tag.append_value(XmlValue::new(XmlValueType::StringUtf16, payload, self.ansi_codec));
        Ok(3 + size)
    }

    /// Read a character reference: a 16-bit codepoint kept as `&#hex;` text.
    fn read_character_reference(&self, offset: usize, tag: &mut XmlTag) -> Result<usize> {
        bytes::slice_r(self.data, offset, 3, "character reference")?;
        let codepoint = bytes::read_u16_le_r(self.data, offset + 1, "character value")?;
        tag.append_value(XmlValue::from_text(&format!("&#{codepoint:x};")));
        Ok(3)
    }

    /// Read an entity reference and append its resolved character.
    fn read_entity_reference(&self, offset: usize, tag: &mut XmlTag) -> Result<usize> {
        let mut cursor = 1usize;
        let name_offset = if self.has_data_offsets() {
            let value = bytes::read_u32_le_r(self.data, offset + cursor, "entity name offset")? as usize;
            cursor += 4;
            value
        } else {
            offset + cursor
        };
        let (name_data, name_consumed) = self.resolve_name(name_offset, offset + cursor)?;
        cursor += name_consumed;

        let name = crate::utils::utf16::decode_utf16le(&name_data);
        let resolved = match name.as_str() {
            "gt" => ">",
            "lt" => "<",
            "amp" => "&",
            "apos" => "'",
            "quot" => "\"",
            _ => return Err(WevtError::UnsupportedEntity { name }),
        };
        tag.append_value(XmlValue::from_text(resolved));
        Ok(cursor)
    }

    /// Read a processing instruction target and its data token; the PI tag
    /// is appended to the containing element.
    fn read_pi_target(&self, offset: usize, parent: &mut XmlTag) -> Result<usize> {
        let mut cursor = 1usize;
        let name_offset = if self.has_data_offsets() {
            let value = bytes::read_u32_le_r(self.data, offset + cursor, "PI name offset")? as usize;
            cursor += 4;
            value
        } else {
            offset + cursor
        };
        let (name_data, name_consumed) = self.resolve_name(name_offset, offset + cursor)?;
        cursor += name_consumed;

        let mut pi = XmlTag::new();
        pi.set_kind(XmlTagKind::Pi);
        pi.set_name_data(&name_data);

        let token = BinXmlToken::read(self.data, offset + cursor)?;
        if token.kind != BinXmlTokenKind::PiData {
            return Err(WevtError::UnsupportedToken {
                token: token.raw,
                offset: (offset + cursor) as u64,
            });
        }
        bytes::slice_r(self.data, offset + cursor, 3, "PI data")?;
        let size = usize::from(bytes::read_u16_le_r(self.data, offset + cursor + 1, "PI data size")?) * 2;
        let payload = bytes::slice_r(self.data, offset + cursor + 3, size, "PI data characters")?;
        pi.append_value(XmlValue::new(XmlValueType::StringUtf16, payload, self.ansi_codec));
        cursor += 3 + size;

        parent.append_element(pi);
        Ok(cursor)
    }

    /// Read a substitution token and bind the referenced template value.
    /// Returns whether the surrounding tag should be kept, and the token
    /// size (always 4).
    #[allow(clippy::too_many_arguments)]
    fn read_substitution(
        &self,
        offset: usize,
        optional: bool,
        template_values: Option<&[TemplateValue]>,
        template_value_offset: &mut usize,
        tag: &mut XmlTag,
        element_depth: u32,
        template_depth: u32,
    ) -> Result<(bool, usize)> {
        bytes::slice_r(self.data, offset, 4, "substitution token")?;
        let index = bytes::read_u16_le_r(self.data, offset + 1, "substitution index")?;
        let declared_type = self.data[offset + 3];

        trace!(
            "{} substitution at {offset}: index {index} type 0x{declared_type:02x}",
            if optional { "optional" } else { "normal" }
        );

        let bound = self.substitute_template_value(
            template_values,
            index,
            declared_type,
            template_value_offset,
            tag,
            element_depth,
            template_depth,
        )?;

        if !bound && !optional {
            // A normal substitution always binds; a null value yields an
            // empty one.
            tag.append_value(XmlValue::from_text(""));
            return Ok((true, 4));
        }
        Ok((bound, 4))
    }

    /// Bind one template value into `tag`. Returns false for a null value
    /// ("no substitution").
    #[allow(clippy::too_many_arguments)]
    fn substitute_template_value(
        &self,
        template_values: Option<&[TemplateValue]>,
        index: u16,
        _declared_type: u8,
        template_value_offset: &mut usize,
        tag: &mut XmlTag,
        element_depth: u32,
        template_depth: u32,
    ) -> Result<bool> {
        let value = template_values
            .and_then(|values| values.get(usize::from(index)))
            .copied()
            .ok_or(WevtError::out_of_bounds("template value index", usize::from(index)))?;

        let (base, is_array) =
            BinXmlValueType::from_u8(value.value_type).ok_or(WevtError::UnsupportedValueType {
                value_type: value.value_type,
                offset: value.offset as u64,
            })?;

        if base == BinXmlValueType::Null {
            *template_value_offset = 0;
            return Ok(false);
        }

        let value_size = usize::from(value.size);
        bytes::slice_r(self.data, value.offset, value_size, "template value data")?;

        if base == BinXmlValueType::BinaryXml {
            let token = BinXmlToken::read(self.data, value.offset)?;
            match token.kind {
                BinXmlTokenKind::OpenStartElement => {
                    self.read_element(
                        value.offset,
                        template_values,
                        &mut Attach::Under(tag),
                        element_depth + 1,
                        template_depth,
                    )?;
                }
                BinXmlTokenKind::FragmentHeader => {
                    self.read_fragment(
                        value.offset,
                        None,
                        &mut Attach::Under(tag),
                        element_depth,
                        template_depth,
                    )?;
                }
                BinXmlTokenKind::TemplateInstance => {
                    self.read_template_instance(
                        value.offset,
                        &mut Attach::Under(tag),
                        element_depth,
                        template_depth + 1,
                    )?;
                }
                _ => {
                    return Err(WevtError::UnsupportedToken {
                        token: token.raw,
                        offset: value.offset as u64,
                    });
                }
            }
            tag.set_flags(XmlTagFlags::IS_TEMPLATE_DEFINITION);
            *template_value_offset = 0;
            return Ok(true);
        }

        let render_type = self.render_type(base, value_size, value.offset)?;
        let element_size = base.element_size();

        if is_array {
            let mut array_offset = *template_value_offset;
            if value_size > 0 {
                if array_offset >= value_size {
                    return Err(WevtError::out_of_bounds("template value offset", value.offset));
                }
                let remaining = &self.data[value.offset + array_offset..value.offset + value_size];

                match base {
                    BinXmlValueType::StringUtf16 => {
                        // One NUL-terminated string per pass.
                        let mut end = 0;
                        while end + 1 < remaining.len()
                            && (remaining[end] != 0 || remaining[end + 1] != 0)
                        {
                            end += 2;
                        }
                        tag.append_value(XmlValue::new(
                            render_type,
                            &remaining[..end],
                            self.ansi_codec,
                        ));
                        array_offset += (end + 2).min(remaining.len());
                    }
                    BinXmlValueType::StringByteStream => {
                        let end = remaining
                            .iter()
                            .position(|&b| b == 0)
                            .unwrap_or(remaining.len());
                        tag.append_value(XmlValue::new(
                            render_type,
                            &remaining[..end],
                            self.ansi_codec,
                        ));
                        array_offset += (end + 1).min(remaining.len());
                    }
                    _ => {
                        let size = element_size.ok_or(WevtError::UnsupportedValueType {
                            value_type: value.value_type,
                            offset: value.offset as u64,
                        })?;
                        if size > remaining.len() {
                            return Err(WevtError::out_of_bounds(
                                "template value array element",
                                value.offset,
                            ));
                        }
                        tag.append_value(XmlValue::new(render_type, &remaining[..size], self.ansi_codec));
                        array_offset += size;
                    }
                }
            }
            if array_offset == value_size {
                array_offset = 0;
            }
            *template_value_offset = array_offset;
        } else {
            if let Some(size) = element_size
                && size != value_size
            {
                return Err(WevtError::out_of_bounds("template value size", value.offset));
            }
            if base == BinXmlValueType::StringUtf16 && value_size % 2 != 0 {
                return Err(WevtError::out_of_bounds("template value size", value.offset));
            }
            let payload = &self.data[value.offset..value.offset + value_size];
            tag.append_value(XmlValue::new(render_type, payload, self.ansi_codec));
            *template_value_offset = 0;
        }

        tag.set_flags(XmlTagFlags::IS_TEMPLATE_DEFINITION);
        Ok(true)
    }

    /// Map a wire value type to its formatting type. `Size` widths come from
    /// the declared value size.
    fn render_type(
        &self,
        base: BinXmlValueType,
        value_size: usize,
        offset: usize,
    ) -> Result<XmlValueType> {
        use BinXmlValueType as W;
        use XmlValueType as R;
        Ok(match base {
            // Null and BinaryXml never reach value formatting.
            W::Null | W::BinaryXml => {
                return Err(WevtError::UnsupportedValueType {
                    value_type: 0x00,
                    offset: offset as u64,
                });
            }
            W::StringUtf16 => R::StringUtf16,
            W::StringByteStream => R::StringByteStream,
            W::Int8 => R::Int8,
            W::UInt8 => R::UInt8,
            W::Int16 => R::Int16,
            W::UInt16 => R::UInt16,
            W::Int32 => R::Int32,
            W::UInt32 => R::UInt32,
            W::Int64 => R::Int64,
            W::UInt64 => R::UInt64,
            W::HexInt32 => R::HexInt32,
            W::HexInt64 => R::HexInt64,
            W::Float32 => R::Float32,
            W::Float64 => R::Float64,
            W::Boolean => R::Boolean,
            W::BinaryData => R::BinaryData,
            W::Guid => R::Guid,
            W::Filetime => R::Filetime,
            W::Systemtime => R::Systemtime,
            W::NtSecurityIdentifier => R::Sid,
            W::Size => match value_size {
                4 => R::UInt32,
                8 => R::UInt64,
                _ => {
                    return Err(WevtError::UnsupportedValueType {
                        value_type: 0x10,
                        offset: offset as u64,
                    });
                }
            },
        })
    }

    /// Read a template instance: header, values block and definition scope.
    fn read_template_instance(
        &self,
        offset: usize,
        attach: &mut Attach<'_>,
        element_depth: u32,
        template_depth: u32,
    ) -> Result<usize> {
        if template_depth > TEMPLATE_INSTANCE_RECURSION_DEPTH {
            return Err(WevtError::RecursionLimitExceeded {
                what: "template instance",
                limit: TEMPLATE_INSTANCE_RECURSION_DEPTH,
            });
        }

        bytes::slice_r(self.data, offset, 10, "template instance header")?;
        let definition_offset =
            bytes::read_u32_le_r(self.data, offset + 6, "template definition offset")? as usize;

        let cursor = offset + 10;
        let mut consumed = 10usize;

        debug!("template instance at {offset}: definition offset {definition_offset}");

        // A definition behind the cursor is shared storage: the values block
        // sits at the cursor and the walk seeks back. Otherwise the
        // definition is inline and the values follow it.
        let (definition_body, values, values_size, inline) = if definition_offset < cursor {
            bytes::slice_r(self.data, definition_offset, 24, "template definition header")?;
            let (values, values_size) = self.read_template_instance_values(cursor)?;
            (definition_offset + 24, values, values_size, false)
        } else {
            bytes::slice_r(self.data, cursor, 24, "template definition header")?;
            let definition_size =
                bytes::read_u32_le_r(self.data, cursor + 20, "template definition size")? as usize;
            let values_offset =
                bytes::checked_end(self.data.len(), cursor, 24 + definition_size, "template definition size")?;
            let (values, values_size) = self.read_template_instance_values(values_offset)?;
            (cursor + 24, values, values_size, true)
        };
        consumed += values_size;

        let mut body = definition_body;
        let token = BinXmlToken::read(self.data, body)?;
        if token.kind != BinXmlTokenKind::FragmentHeader {
            return Err(WevtError::UnsupportedToken {
                token: token.raw,
                offset: body as u64,
            });
        }
        bytes::slice_r(self.data, body, 4, "fragment header")?;
        body += 4;

        body += self.read_element(body, Some(&values), attach, element_depth + 1, template_depth)?;

        let end_token = BinXmlToken::read(self.data, body)?;
        if end_token.kind != BinXmlTokenKind::EndOfFile {
            return Err(WevtError::UnsupportedToken {
                token: end_token.raw,
                offset: body as u64,
            });
        }
        body += 1;

        if inline {
            consumed += body - cursor;
        }
        Ok(consumed)
    }

    /// Read a values descriptor block: `{u32 count}` then `count` four-byte
    /// `{u16 size, u8 type, u8 unknown}` entries, then the packed value
    /// bytes. A zero-size value keeps offset 0 ("no data").
    fn read_template_instance_values(&self, offset: usize) -> Result<(Vec<TemplateValue>, usize)> {
        let count = bytes::read_u32_le_r(self.data, offset, "number of template values")? as usize;
        let mut cursor = offset + 4;

        let descriptor_bytes = count
            .checked_mul(4)
            .ok_or(WevtError::out_of_bounds("number of template values", offset))?;
        bytes::slice_r(self.data, cursor, descriptor_bytes, "template value descriptors")?;

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let size = bytes::read_u16_le_r(self.data, cursor, "template value size")?;
            let value_type = self.data[cursor + 2];
            values.push(TemplateValue::new(value_type, size));
            cursor += 4;
        }

        for value in &mut values {
            if value.size == 0 {
                continue;
            }
            bytes::slice_r(self.data, cursor, usize::from(value.size), "template value data")?;
            value.offset = cursor;
            cursor += usize::from(value.size);
        }

        trace!("{count} template values, {} bytes", cursor - offset);
        Ok((values, cursor - offset))
    }
}

/// Charge `amount` bytes against a declared element size; underflow is a
/// hard error.
fn sub_size(element_size: usize, amount: usize, offset: usize) -> Result<usize> {
    element_size
        .checked_sub(amount)
        .ok_or(WevtError::out_of_bounds("element size", offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding::all::WINDOWS_1252;

    const FRAGMENT_HEADER: [u8; 4] = [0x0f, 0x01, 0x01, 0x00];

    fn name_record(name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut out = vec![0u8, 0u8];
        out.extend_from_slice(&(units.len() as u16).to_le_bytes());
        for unit in &units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0]);
        out
    }

    fn element(name: &str, children: &[u8]) -> Vec<u8> {
        let name_rec = name_record(name);
        let mut out = vec![0x01];
        if children.is_empty() {
            out.extend_from_slice(&((name_rec.len() + 1) as u32).to_le_bytes());
            out.extend_from_slice(&name_rec);
            out.push(0x03);
        } else {
            out.extend_from_slice(&((name_rec.len() + 1 + children.len() + 1) as u32).to_le_bytes());
            out.extend_from_slice(&name_rec);
            out.push(0x02);
            out.extend_from_slice(children);
            out.push(0x04);
        }
        out
    }

    /// Wrap a body in a fragment with a trailing end-of-file token. The zero
    /// padding keeps the element size probe from mistaking sizes near the
    /// end of the buffer for dependency-identifier layouts.
    fn document(body: &[u8]) -> Vec<u8> {
        let mut out = FRAGMENT_HEADER.to_vec();
        out.extend_from_slice(body);
        out.push(0x00);
        out.extend_from_slice(&[0u8; 16]);
        out
    }

    fn substitution(optional: bool, index: u16, value_type: u8) -> Vec<u8> {
        let mut out = vec![if optional { 0x0e } else { 0x0d }];
        out.extend_from_slice(&index.to_le_bytes());
        out.push(value_type);
        out
    }

    /// A template instance with an inline definition and the given values.
    /// The stored definition offset points past the buffer, which resolves
    /// to "inline at the cursor" like carved real-world fragments.
    fn template_instance(definition_element: &[u8], values: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut definition_body = FRAGMENT_HEADER.to_vec();
        definition_body.extend_from_slice(definition_element);
        definition_body.push(0x00);

        let mut out = vec![0x0c, 0x01];
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&(definition_body.len() as u32).to_le_bytes());
        out.extend_from_slice(&definition_body);

        out.extend_from_slice(&(values.len() as u32).to_le_bytes());
        for (value_type, data) in values {
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.push(*value_type);
            out.push(0);
        }
        for (_, data) in values {
            out.extend_from_slice(data);
        }
        out
    }

    fn read(data: &[u8]) -> Result<XmlDocument> {
        XmlDocument::read(data, 0, WINDOWS_1252, XmlDocumentFlags::empty())
    }

    #[test]
    fn plain_element_round_trips() {
        let mut value_token = vec![0x05, 0x01];
        value_token.extend_from_slice(&2u16.to_le_bytes());
        value_token.extend_from_slice(&crate::utils::utf16::encode_utf16le("hi"));

        let doc = document(&element("Data", &value_token));
        let parsed = read(&doc).unwrap();
        let root = parsed.root().unwrap();
        assert_eq!(root.name(), "Data");
        assert_eq!(root.value_string(), "hi");
        assert_eq!(parsed.to_utf8_xml(), "<Data>hi</Data>\n");
    }

    #[test]
    fn entity_references_resolve_to_literal_characters() {
        let mut children = Vec::new();
        for entity in ["gt", "lt", "amp", "apos", "quot"] {
            children.push(0x09);
            children.extend_from_slice(&name_record(entity));
        }
        let doc = document(&element("e", &children));
        let parsed = read(&doc).unwrap();
        assert_eq!(parsed.root().unwrap().value_string(), "><&'\"");
        assert_eq!(parsed.to_utf8_xml(), "<e>><&'\"</e>\n");
    }

    #[test]
    fn unknown_entity_name_is_fatal() {
        let mut children = vec![0x09];
        children.extend_from_slice(&name_record("nbsp"));
        let doc = document(&element("e", &children));
        assert!(matches!(
            read(&doc),
            Err(WevtError::UnsupportedEntity { name }) if name == "nbsp"
        ));
    }

    #[test]
    fn character_reference_renders_as_hex_reference() {
        let mut children = vec![0x08];
        children.extend_from_slice(&0x3cu16.to_le_bytes());
        let doc = document(&element("c", &children));
        let parsed = read(&doc).unwrap();
        assert_eq!(parsed.root().unwrap().value_string(), "&#3c;");
    }

    #[test]
    fn cdata_retypes_the_element() {
        let mut children = vec![0x07];
        children.extend_from_slice(&4u16.to_le_bytes());
        children.extend_from_slice(&crate::utils::utf16::encode_utf16le("meta"));
        let doc = document(&element("d", &children));
        let parsed = read(&doc).unwrap();
        let root = parsed.root().unwrap();
        assert_eq!(root.kind(), crate::binxml::XmlTagKind::CData);
        assert_eq!(parsed.to_utf8_xml(), "<![CDATA[meta]]>\n");
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let doc = document(&element("x", &[]));
        let flags = XmlDocumentFlags::from_bits_retain(0x80);
        assert!(matches!(
            XmlDocument::read(&doc, 0, WINDOWS_1252, flags),
            Err(WevtError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn stray_token_inside_element_is_unsupported() {
        let doc = document(&element("x", &[0x99]));
        assert!(matches!(
            read(&doc),
            Err(WevtError::UnsupportedToken { token: 0x99, .. })
        ));
    }

    #[test]
    fn element_nesting_is_bounded() {
        let mut body = element("x", &[]);
        for _ in 0..(ELEMENT_RECURSION_DEPTH + 1) {
            body = element("x", &body);
        }
        assert!(matches!(
            read(&document(&body)),
            Err(WevtError::RecursionLimitExceeded { what: "element", .. })
        ));

        let mut shallow = element("x", &[]);
        for _ in 0..10 {
            shallow = element("x", &shallow);
        }
        assert!(read(&document(&shallow)).is_ok());
    }

    #[test]
    fn normal_substitution_binds_null_as_empty() {
        let definition = element("d", &substitution(false, 0, 0x08));
        let doc = document(&template_instance(&definition, &[(0x00, Vec::new())]));
        let parsed = read(&doc).unwrap();
        let root = parsed.root().unwrap();
        assert_eq!(root.name(), "d");
        assert_eq!(root.value_string(), "");
    }

    #[test]
    fn optional_substitution_discards_null_tags() {
        let definition = element("d", &substitution(true, 0, 0x08));
        let doc = document(&template_instance(&definition, &[(0x00, Vec::new())]));
        let parsed = read(&doc).unwrap();
        assert!(parsed.root().is_none());
    }

    #[test]
    fn scalar_substitution_binds_typed_value() {
        let definition = element("d", &substitution(true, 0, 0x08));
        let doc = document(&template_instance(
            &definition,
            &[(0x08, 1234u32.to_le_bytes().to_vec())],
        ));
        let parsed = read(&doc).unwrap();
        let root = parsed.root().unwrap();
        assert_eq!(root.value_string(), "1234");
        assert!(root.flags().contains(XmlTagFlags::IS_TEMPLATE_DEFINITION));
    }

    #[test]
    fn scalar_substitution_size_mismatch_is_rejected() {
        let definition = element("d", &substitution(false, 0, 0x08));
        let doc = document(&template_instance(&definition, &[(0x08, vec![1, 2])]));
        assert!(matches!(
            read(&doc),
            Err(WevtError::ValueOutOfBounds { .. })
        ));
    }

    #[test]
    fn array_substitution_expands_into_siblings() {
        // One u8 is consumed per pass; three bytes make three sibling tags.
        let inner = element("d", &substitution(true, 0, 0x84));
        let definition = element("w", &inner);
        let doc = document(&template_instance(&definition, &[(0x84, vec![1, 2, 3])]));
        let parsed = read(&doc).unwrap();
        let root = parsed.root().unwrap();
        assert_eq!(root.number_of_elements(), 3);
        let rendered: Vec<String> = root
            .elements()
            .iter()
            .map(|e| e.value_string())
            .collect();
        assert_eq!(rendered, ["1", "2", "3"]);
    }

    #[test]
    fn string_array_substitution_splits_on_terminators() {
        let mut data = crate::utils::utf16::encode_utf16le("one");
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&crate::utils::utf16::encode_utf16le("two"));
        data.extend_from_slice(&[0, 0]);

        let inner = element("s", &substitution(true, 0, 0x81));
        let definition = element("w", &inner);
        let doc = document(&template_instance(&definition, &[(0x81, data)]));
        let parsed = read(&doc).unwrap();
        let root = parsed.root().unwrap();
        let rendered: Vec<String> = root
            .elements()
            .iter()
            .map(|e| e.value_string())
            .collect();
        assert_eq!(rendered, ["one", "two"]);
    }

    #[test]
    fn array_expansion_is_bounded() {
        let count = TEMPLATE_VALUE_ARRAY_RECURSION_DEPTH as usize + 10;
        let inner = element("d", &substitution(true, 0, 0x84));
        let definition = element("w", &inner);
        let doc = document(&template_instance(&definition, &[(0x84, vec![0; count])]));
        assert!(matches!(
            read(&doc),
            Err(WevtError::RecursionLimitExceeded {
                what: "template value array",
                ..
            })
        ));
    }

    #[test]
    fn template_instance_nesting_is_bounded() {
        fn nested(depth: u32) -> Vec<u8> {
            if depth == 0 {
                return element("leaf", &[]);
            }
            let definition = element("n", &substitution(true, 0, 0x21));
            let inner = nested(depth - 1);
            template_instance(&definition, &[(0x21, inner)])
        }

        let doc = document(&nested(TEMPLATE_INSTANCE_RECURSION_DEPTH + 2));
        assert!(matches!(
            read(&doc),
            Err(WevtError::RecursionLimitExceeded {
                what: "template instance",
                ..
            })
        ));

        let shallow = document(&nested(3));
        let parsed = read(&shallow).unwrap();
        // The leaf element survives the nested binary XML substitutions.
        let mut tag = parsed.root().unwrap();
        while tag.number_of_elements() > 0 {
            tag = tag.element_by_index(0).unwrap();
        }
        assert_eq!(tag.name(), "leaf");
    }

    #[test]
    fn substitution_index_out_of_range_is_rejected() {
        let definition = element("d", &substitution(false, 7, 0x08));
        let doc = document(&template_instance(&definition, &[(0x00, Vec::new())]));
        assert!(matches!(
            read(&doc),
            Err(WevtError::ValueOutOfBounds { .. })
        ));
    }
}
