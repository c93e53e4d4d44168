use std::io;

use thiserror::Error;

pub type XbaseResult<T> = Result<T, XbaseError>;

/// Error kinds surfaced by the tablefile codecs and the table facade.
///
/// Value-level errors carry the offending column index and name; row-level
/// errors carry the row position. Header and schema errors are fatal for the
/// table.
#[derive(Debug, Error)]
pub enum XbaseError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("malformed schema: {0}")]
    MalformedSchema(String),

    #[error("row frame too short: got {got} bytes, need {need}")]
    ShortRow { got: usize, need: usize },

    #[error("row {position}: {reason}")]
    MalformedRow { position: u32, reason: String },

    #[error("column {index} ({name}): cannot decode slot: {reason}")]
    ValueDecode {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("column {index} ({name}): cannot encode value: {reason}")]
    ValueEncode {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("column {index} ({name}): encoded value exceeds {length} bytes")]
    ValueTooLong {
        index: usize,
        name: String,
        length: usize,
    },

    #[error("position {0} out of range")]
    InvalidPosition(usize),

    #[error("io failure at position {position}: {source}")]
    Io { position: u32, source: io::Error },

    #[error("projection of key {key:?} failed: {cause}")]
    Projection { key: String, cause: String },
}
