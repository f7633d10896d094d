use thiserror::Error;

pub type Result<T> = std::result::Result<T, WevtError>;

/// Errors reported by the manifest parser and the binary XML evaluator.
///
/// Every variant carries enough context (a `what` label and the offending
/// offset) to locate the failure inside the input buffer.
#[derive(Debug, Error)]
pub enum WevtError {
    #[error("invalid argument: {what}")]
    InvalidArgument { what: &'static str },

    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    TruncatedInput {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("offset, size or count for {what} at offset {offset} is out of bounds")]
    ValueOutOfBounds { what: &'static str, offset: u64 },

    #[error("invalid signature at offset {offset}: expected {expected:?}, found {found:?}")]
    UnsupportedSignature {
        offset: u64,
        expected: [u8; 4],
        found: [u8; 4],
    },

    #[error("offset {offset}: invalid byte 0x{token:02x} as binary XML token")]
    UnsupportedToken { token: u8, offset: u64 },

    #[error("offset {offset}: invalid byte 0x{value_type:02x} as binary XML value type")]
    UnsupportedValueType { value_type: u8, offset: u64 },

    #[error("unsupported entity reference `{name}`")]
    UnsupportedEntity { name: String },

    #[error("{what} recursion depth exceeds {limit}")]
    RecursionLimitExceeded { what: &'static str, limit: u32 },
}

impl WevtError {
    pub(crate) fn out_of_bounds(what: &'static str, offset: usize) -> Self {
        WevtError::ValueOutOfBounds {
            what,
            offset: offset as u64,
        }
    }

    pub(crate) fn bad_signature(offset: usize, expected: [u8; 4], found: [u8; 4]) -> Self {
        WevtError::UnsupportedSignature {
            offset: offset as u64,
            expected,
            found,
        }
    }
}
