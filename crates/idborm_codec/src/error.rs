//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting serialized data into records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A record was expected but the input was another kind of value.
    #[error("expected an object, found {found}")]
    NotAnObject {
        /// Kind of value that was found instead.
        found: &'static str,
    },

    /// A JSON number could not be represented as an integer or a float.
    #[error("unrepresentable number: {literal}")]
    InvalidNumber {
        /// The literal as it appeared in the input.
        literal: String,
    },

    /// A field name was empty.
    #[error("field names must not be empty")]
    EmptyFieldName,
}

impl CodecError {
    /// Creates a not-an-object error.
    pub fn not_an_object(found: &'static str) -> Self {
        Self::NotAnObject { found }
    }

    /// Creates an invalid number error.
    pub fn invalid_number(literal: impl Into<String>) -> Self {
        Self::InvalidNumber {
            literal: literal.into(),
        }
    }
}
