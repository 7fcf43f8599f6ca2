use std::io;

use crate::time::Timestamp;
use crate::AttributeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    // I/O failures. Fatal for the whole store.
    IoError(io::Error),
    ReadError(&'static str, io::Error),
    WriteError(&'static str, io::Error),
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    LockError(io::Error),

    // Format and consistency violations. Fatal.
    InvalidHeader(String),
    Corruption(String),
    ChecksumMismatch,
    TimeOutOfRange {
        time: Timestamp,
        start: Timestamp,
    },

    // Logical misuse by the caller.
    UnknownAttribute(AttributeId),
    DuplicateAttribute(String),
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    TimeOutOfOrder {
        time: Timestamp,
        latest: Timestamp,
    },
    InvalidInterval(String),
    ValueTooLarge {
        size: usize,
        capacity: usize,
    },
    InvalidConfig(String),
    InvalidOperation(String),
    UnknownHistory(usize),
}

impl Error {
    /// Whether the error leaves the store unusable (I/O failure or corruption).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IoError(_)
                | Error::ReadError(..)
                | Error::WriteError(..)
                | Error::Decode(..)
                | Error::Encode(..)
                | Error::LockError(_)
                | Error::InvalidHeader(_)
                | Error::Corruption(_)
                | Error::ChecksumMismatch
                | Error::TimeOutOfRange { .. }
        )
    }

    /// Whether the error was caused by the caller using the API incorrectly.
    pub fn is_misuse(&self) -> bool {
        !self.is_fatal()
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::ReadError(context, err) => write!(f, "Failed to read {}: {}", context, err),
            Error::WriteError(context, err) => write!(f, "Failed to write {}: {}", context, err),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
            Error::InvalidHeader(msg) => write!(f, "Invalid header: {}", msg),
            Error::Corruption(msg) => write!(f, "History tree corruption: {}", msg),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::UnknownAttribute(id) => write!(f, "Unknown attribute id: {}", id),
            Error::DuplicateAttribute(path) => write!(f, "Attribute already exists: {}", path),
            Error::TypeMismatch { expected, actual } => {
                write!(f, "Type mismatch: expected {}, got {}", expected, actual)
            }
            Error::TimeOutOfRange { time, start } => {
                write!(f, "Time {} is before the tree start {}", time, start)
            }
            Error::TimeOutOfOrder { time, latest } => {
                write!(f, "Time {} precedes the latest recorded time {}", time, latest)
            }
            Error::InvalidInterval(msg) => write!(f, "Invalid interval: {}", msg),
            Error::ValueTooLarge { size, capacity } => write!(
                f,
                "Interval of {} bytes cannot fit a node with {} bytes of capacity",
                size, capacity
            ),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            Error::UnknownHistory(index) => write!(f, "No history at index {}", index),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err)
            | Error::ReadError(_, err)
            | Error::WriteError(_, err)
            | Error::Decode(_, err)
            | Error::Encode(_, err)
            | Error::LockError(err) => Some(err),
            _ => None,
        }
    }
}
