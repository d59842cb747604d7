//! Error types for the encoding model and the table decoder.

use thiserror::Error;

/// Error raised while parsing encoding text or building descriptors.
///
/// Matching never produces one of these: a mismatch is a plain `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Malformed input text.
    #[error("{message}: {input:?}")]
    Format { message: String, input: String },

    /// Request incompatible with the current state of a value.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Index or field value outside its valid domain.
    #[error("{name} out of range: {value}")]
    ArgumentRange { name: &'static str, value: i64 },

    /// A descriptor's cross-field invariant was violated at construction.
    #[error("inconsistent encoding: {0}")]
    ConstructionInvariant(&'static str),
}

impl EncodingError {
    /// Creates a new Format error.
    pub fn format(message: impl Into<String>, input: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
            input: input.into(),
        }
    }

    /// Creates a new InvalidOperation error.
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation(reason.into())
    }

    /// Creates a new ArgumentRange error.
    pub fn argument_range(name: &'static str, value: impl Into<i64>) -> Self {
        Self::ArgumentRange {
            name,
            value: value.into(),
        }
    }

    /// Returns true for errors caused by malformed text.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }
}

/// Result alias for encoding model operations.
pub type Result<T> = std::result::Result<T, EncodingError>;

/// Error raised by [`OpcodeTable::decode`](crate::table::OpcodeTable::decode).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Instruction was truncated (not enough bytes).
    #[error("truncated instruction: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// No table entry matched the decoded bytes.
    #[error("no matching opcode for {bytes:02x?}")]
    NoMatch { bytes: Vec<u8> },

    /// Several entries matched but disagree on the instruction length.
    #[error("ambiguous match between {candidates:?}")]
    Ambiguous { candidates: Vec<String> },

    /// Instruction exceeds the 15 byte architectural limit.
    #[error("instruction too long: {length} bytes")]
    TooLong { length: usize },

    /// A prefix byte sequence could not be decoded.
    #[error("invalid prefix at offset {offset}: {reason}")]
    InvalidPrefix { offset: usize, reason: String },
}

impl DecodeError {
    /// Creates a new Truncated error.
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }

    /// Creates a new InvalidPrefix error.
    pub fn invalid_prefix(offset: usize, reason: impl Into<String>) -> Self {
        Self::InvalidPrefix {
            offset,
            reason: reason.into(),
        }
    }
}

/// A row of an `insns.dat` text that failed to parse or compile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {error}")]
pub struct RowError {
    /// 1-based line number.
    pub line: usize,
    #[source]
    pub error: EncodingError,
}
