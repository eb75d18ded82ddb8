//! Error types for stream operations.

use common::StorageError;

/// Errors surfaced by the stream engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The operation requires an existing stream and none was found.
    NotFound,
    /// The supplied entry id is malformed or the reserved `0-0`.
    InvalidEntryId(String),
    /// The incoming entry id is not greater than the last generated id.
    IdNotMonotonic,
    /// The sequence number for the requested milliseconds is exhausted.
    SeqOverflow,
    /// The stream has exhausted the last possible entry id.
    Overflow,
    /// A range endpoint exclusion conflicts with a sentinel id.
    InvalidRange(String),
    /// Operation preconditions were violated.
    InvalidArguments(String),
    /// The id passed to set-id is smaller than an existing entry's id.
    IdTooSmall,
    /// A stored entry or header failed to decode.
    CorruptEntry(String),
    /// A stored header carries an unknown version tag.
    UnsupportedVersion(u8),
    /// Storage-level failure.
    Storage(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "no such stream"),
            Error::InvalidEntryId(msg) => write!(f, "invalid entry id: {}", msg),
            Error::IdNotMonotonic => write!(
                f,
                "the id specified is equal or smaller than the target stream top item"
            ),
            Error::SeqOverflow => write!(
                f,
                "the sequence number for the requested milliseconds is exhausted"
            ),
            Error::Overflow => write!(f, "the stream has exhausted the last possible entry id"),
            Error::InvalidRange(msg) => write!(f, "invalid range: {}", msg),
            Error::InvalidArguments(msg) => write!(f, "invalid arguments: {}", msg),
            Error::IdTooSmall => write!(
                f,
                "the id is smaller than the id of an existing stream entry"
            ),
            Error::CorruptEntry(msg) => write!(f, "corrupt stream entry: {}", msg),
            Error::UnsupportedVersion(tag) => {
                write!(f, "unsupported stream metadata version: {}", tag)
            }
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, Error>;
