//! Binary XML value types and textual value formatting.
//!
//! Wire types ([`BinXmlValueType`]) classify template value descriptors and
//! `Value` token payloads. A substituted value is stored in the tag tree as
//! an [`XmlValue`]: a formatting type plus the raw little-endian bytes, with
//! the textual rendering produced lazily at output time.

use std::fmt;
use std::io::Cursor;

use encoding::{DecoderTrap, EncodingRef};
use winstructs::guid::Guid;

use crate::utils::utf16::decode_utf16le;

/// High bit of a value type byte: the value holds consecutive elements of
/// the base type, consumed one per substitution pass.
pub const BINXML_VALUE_TYPE_ARRAY: u8 = 0x80;

/// Base value types of the binary XML substream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinXmlValueType {
    Null,
    StringUtf16,
    StringByteStream,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Boolean,
    BinaryData,
    Guid,
    Size,
    Filetime,
    Systemtime,
    NtSecurityIdentifier,
    HexInt32,
    HexInt64,
    BinaryXml,
}

impl BinXmlValueType {
    /// Classify a raw value type byte, splitting off the array bit.
    pub fn from_u8(raw: u8) -> Option<(BinXmlValueType, bool)> {
        use BinXmlValueType::*;
        let is_array = raw & BINXML_VALUE_TYPE_ARRAY != 0;
        let base = match raw & 0x7f {
            0x00 => Null,
            0x01 => StringUtf16,
            0x02 => StringByteStream,
            0x03 => Int8,
            0x04 => UInt8,
            0x05 => Int16,
            0x06 => UInt16,
            0x07 => Int32,
            0x08 => UInt32,
            0x09 => Int64,
            0x0a => UInt64,
            0x0b => Float32,
            0x0c => Float64,
            0x0d => Boolean,
            0x0e => BinaryData,
            0x0f => Guid,
            0x10 => Size,
            0x11 => Filetime,
            0x12 => Systemtime,
            0x13 => NtSecurityIdentifier,
            0x14 => HexInt32,
            0x15 => HexInt64,
            0x21 => BinaryXml,
            _ => return None,
        };
        Some((base, is_array))
    }

    /// Fixed per-element byte width, where one exists. Strings, binary data,
    /// SIDs and `Size` have data-dependent widths.
    pub fn element_size(&self) -> Option<usize> {
        use BinXmlValueType::*;
        match self {
            Int8 | UInt8 => Some(1),
            Int16 | UInt16 => Some(2),
            Int32 | UInt32 | HexInt32 | Float32 | Boolean => Some(4),
            Int64 | UInt64 | HexInt64 | Float64 | Filetime => Some(8),
            Guid | Systemtime => Some(16),
            _ => None,
        }
    }
}

/// Formatting type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlValueType {
    StringUtf16,
    StringByteStream,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    HexInt32,
    HexInt64,
    Float32,
    Float64,
    Boolean,
    BinaryData,
    Guid,
    Filetime,
    Systemtime,
    Sid,
}

/// A typed value fragment attached to an [`crate::binxml::XmlTag`].
///
/// The raw bytes are kept verbatim; [`XmlValue::to_display_string`] renders
/// them on demand.
#[derive(Clone)]
pub struct XmlValue {
    pub value_type: XmlValueType,
    data: Vec<u8>,
    codec: EncodingRef,
}

impl fmt::Debug for XmlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlValue")
            .field("value_type", &self.value_type)
            .field("data", &self.data)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl XmlValue {
    pub fn new(value_type: XmlValueType, data: &[u8], codec: EncodingRef) -> Self {
        XmlValue {
            value_type,
            data: data.to_vec(),
            codec,
        }
    }

    /// A UTF-16 text value from an already-decoded string (entity and
    /// character references).
    pub(crate) fn from_text(text: &str) -> Self {
        XmlValue {
            value_type: XmlValueType::StringUtf16,
            data: crate::utils::utf16::encode_utf16le(text),
            codec: encoding::all::WINDOWS_1252,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Render the value as text. Malformed payloads (wrong width for the
    /// type) render as an empty string rather than failing: widths are
    /// validated at substitution time, rendering is presentation-only.
    pub fn to_display_string(&self) -> String {
        use XmlValueType::*;
        let d = &self.data;
        match self.value_type {
            StringUtf16 => decode_utf16le(d),
            StringByteStream => {
                let end = d.iter().position(|&b| b == 0).unwrap_or(d.len());
                self.codec
                    .decode(&d[..end], DecoderTrap::Replace)
                    .unwrap_or_default()
            }
            Int8 => le_bytes::<1>(d).map(|b| (b[0] as i8).to_string()).unwrap_or_default(),
            UInt8 => le_bytes::<1>(d).map(|b| b[0].to_string()).unwrap_or_default(),
            Int16 => le_bytes::<2>(d).map(|b| i16::from_le_bytes(b).to_string()).unwrap_or_default(),
            UInt16 => le_bytes::<2>(d).map(|b| u16::from_le_bytes(b).to_string()).unwrap_or_default(),
            Int32 => le_bytes::<4>(d).map(|b| i32::from_le_bytes(b).to_string()).unwrap_or_default(),
            UInt32 => le_bytes::<4>(d).map(|b| u32::from_le_bytes(b).to_string()).unwrap_or_default(),
            Int64 => le_bytes::<8>(d).map(|b| i64::from_le_bytes(b).to_string()).unwrap_or_default(),
            UInt64 => le_bytes::<8>(d).map(|b| u64::from_le_bytes(b).to_string()).unwrap_or_default(),
            HexInt32 => le_bytes::<4>(d)
                .map(|b| format!("0x{:x}", u32::from_le_bytes(b)))
                .unwrap_or_default(),
            HexInt64 => le_bytes::<8>(d)
                .map(|b| format!("0x{:x}", u64::from_le_bytes(b)))
                .unwrap_or_default(),
            Float32 => le_bytes::<4>(d).map(|b| f32::from_le_bytes(b).to_string()).unwrap_or_default(),
            Float64 => le_bytes::<8>(d).map(|b| f64::from_le_bytes(b).to_string()).unwrap_or_default(),
            Boolean => le_bytes::<4>(d)
                .map(|b| {
                    if u32::from_le_bytes(b) != 0 { "true" } else { "false" }.to_string()
                })
                .unwrap_or_default(),
            BinaryData => {
                let mut out = String::with_capacity(d.len() * 2);
                for byte in d {
                    out.push_str(&format!("{byte:02X}"));
                }
                out
            }
            Guid => le_bytes::<16>(d)
                .and_then(|b| {
                    let mut cursor = Cursor::new(b);
                    winstructs::guid::Guid::from_reader(&mut cursor).ok()
                })
                .map(format_guid)
                .unwrap_or_default(),
            Filetime => le_bytes::<8>(d)
                .map(|b| format_filetime(u64::from_le_bytes(b)))
                .unwrap_or_default(),
            Systemtime => le_bytes::<16>(d).map(format_systemtime).unwrap_or_default(),
            Sid => {
                let mut cursor = Cursor::new(d.as_slice());
                winstructs::security::Sid::from_reader(&mut cursor)
                    .map(|sid| sid.to_string())
                    .unwrap_or_default()
            }
        }
    }
}

fn le_bytes<const N: usize>(data: &[u8]) -> Option<[u8; N]> {
    data.get(..N)?.try_into().ok()
}

fn format_guid(guid: Guid) -> String {
    format!("{{{guid}}}")
}

/// FILETIME ticks between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_EPOCH: i128 = 116_444_736_000_000_000;

fn format_filetime(filetime: u64) -> String {
    let nanoseconds = (filetime as i128 - FILETIME_UNIX_EPOCH) * 100;
    match jiff::Timestamp::from_nanosecond(nanoseconds) {
        Ok(timestamp) => {
            let utc = timestamp.to_zoned(jiff::tz::TimeZone::UTC);
            format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
                utc.year(),
                utc.month(),
                utc.day(),
                utc.hour(),
                utc.minute(),
                utc.second(),
                utc.subsec_nanosecond()
            )
        }
        Err(_) => String::new(),
    }
}

fn format_systemtime(bytes: [u8; 16]) -> String {
    let field = |index: usize| u16::from_le_bytes([bytes[index], bytes[index + 1]]);
    let year = field(0);
    let month = field(2);
    // bytes 4..6 hold the day of week; redundant with the date.
    let day = field(6);
    let hour = field(8);
    let minute = field(10);
    let second = field(12);
    let milliseconds = field(14);
    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{milliseconds:03}Z"
    )
}
