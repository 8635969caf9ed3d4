//! Protocol-level error types

use thiserror::Error;

/// Result type for protocol parsing and decoding
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing or decoding wire messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Data line without a `<table>,<item_line>` shape
    #[error("Malformed data line: {0:?}")]
    MalformedLine(String),

    /// Table key of a data line is not a positive integer
    #[error("Invalid table key in data line: {0:?}")]
    InvalidTableKey(String),

    /// Item position of an update line is not a positive integer
    #[error("Invalid item position in update line: {0:?}")]
    InvalidPosition(String),

    /// Item position outside the subscription's item list
    #[error("Item position {position} outside 1..={count}")]
    PositionOutOfRange { position: usize, count: usize },

    /// Update carries more field tokens than the subscription schema has
    #[error("Update carries {tokens} field tokens but the schema has {fields}")]
    TooManyTokens { tokens: usize, fields: usize },
}
