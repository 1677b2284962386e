//! Error types for the aggregation engine
//!
//! Two layers of failure are kept apart:
//! - [`Error`] aborts a run (bad configuration, unrecoverable worker faults,
//!   cancellation, I/O while reading the stream)
//! - [`DecodeError`] rejects a single row; it is counted and skipped, never
//!   propagated as an [`Error`]

use std::time::Duration;
use thiserror::Error;

/// Main error type for aggregation runs
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid time window, unreadable input, bad settings)
    ///
    /// Always reported before any row is read.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error outside of a running aggregation
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading the record stream failed mid-run
    #[error("Read error in chunk {chunk}: {source}")]
    Read {
        /// Index of the chunk being read
        chunk: u64,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
        /// Last chunk folded into the aggregate before the failure
        last_merged_chunk: Option<u64>,
    },

    /// A sub-chunk failed on its first attempt and on its retry
    #[error("Worker failure in chunk {chunk}, sub-chunk {sub_chunk}: {message}")]
    WorkerFailure {
        /// Index of the chunk being processed
        chunk: u64,
        /// Index of the failing sub-chunk within the chunk
        sub_chunk: usize,
        /// Fault description captured from the worker
        message: String,
        /// Last chunk folded into the aggregate before the failure
        last_merged_chunk: Option<u64>,
    },

    /// Malformed rows exceeded the configured tolerance
    #[error("Malformed row limit exceeded: {malformed} rows skipped, limit is {limit}")]
    MalformedLimitExceeded {
        /// Malformed rows seen so far
        malformed: u64,
        /// Configured tolerance
        limit: u64,
        /// Last chunk folded into the aggregate before the failure
        last_merged_chunk: Option<u64>,
    },

    /// Run was cancelled between chunks
    #[error("Aggregation cancelled")]
    Cancelled {
        /// Last chunk folded into the aggregate before cancellation
        last_merged_chunk: Option<u64>,
    },

    /// Global wall-clock timeout elapsed at a chunk boundary
    #[error("Aggregation timed out after {elapsed:?}")]
    Timeout {
        /// Elapsed wall-clock time when the timeout was observed
        elapsed: Duration,
        /// Last chunk folded into the aggregate before the timeout
        last_merged_chunk: Option<u64>,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Index of the last chunk merged before a run-time failure
    ///
    /// `None` either when no chunk had been merged yet or when the error is not
    /// a run-time failure.
    pub fn last_merged_chunk(&self) -> Option<u64> {
        match self {
            Error::Read {
                last_merged_chunk, ..
            }
            | Error::WorkerFailure {
                last_merged_chunk, ..
            }
            | Error::MalformedLimitExceeded {
                last_merged_chunk, ..
            }
            | Error::Cancelled { last_merged_chunk }
            | Error::Timeout {
                last_merged_chunk, ..
            } => *last_merged_chunk,
            _ => None,
        }
    }

    /// True for failures detected before processing starts
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Short machine-readable failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::Io(_) => "IoError",
            Error::Read { .. } => "ReadError",
            Error::WorkerFailure { .. } => "WorkerFailure",
            Error::MalformedLimitExceeded { .. } => "MalformedLimitExceeded",
            Error::Cancelled { .. } => "Cancelled",
            Error::Timeout { .. } => "Timeout",
            Error::Serialization(_) => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Reasons a raw row fails to decode into an event
///
/// Every variant is a malformed-record outcome: the row is skipped and
/// counted, and the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Row has fewer fields than the schema needs
    #[error("Too few fields: need {required}, got {actual}")]
    TooFewFields {
        /// Minimum field count required by the schema
        required: usize,
        /// Field count actually present
        actual: usize,
    },

    /// Timestamp field matched none of the registered formats
    #[error("Unrecognized timestamp format: {0:?}")]
    UnrecognizedTimestampFormat(String),

    /// A tracked categorical field is empty
    #[error("Empty value for dimension {dimension}")]
    EmptyField {
        /// Dimension whose column was empty
        dimension: String,
    },
}

impl DecodeError {
    /// True when the row was rejected because of its timestamp
    pub fn is_timestamp_error(&self) -> bool {
        matches!(self, DecodeError::UnrecognizedTimestampFormat(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
