//! Centralized error handling for buslog.
//!
//! Every failure in the pipeline is represented as a [`BuslogError`] and
//! propagated through [`Result`]. The library never panics on a failed
//! operation.
//!
//! ## Error Categories
//!
//! - **Configuration** ([`BuslogError::Config`]): invalid writer options, rejected at open time
//! - **I/O** ([`BuslogError::Io`]): the output file cannot be opened, written, synced or closed
//! - **Compression** ([`BuslogError::Compression`]): the codec failed on a specific container
//! - **Serialization** ([`BuslogError::Serialization`]): a typed payload could not be encoded
//! - **Format** ([`BuslogError::Format`]): the bytes on disk are not a valid log file
//! - **Closed** ([`BuslogError::Closed`]): the file or channel was already closed
//! - **Drain Incomplete** ([`BuslogError::DrainIncomplete`]): close could not drain the pipeline
//! - **Internal** ([`BuslogError::Internal`]): a broken invariant inside the library
//!
//! ## Fatal Errors
//!
//! I/O and compression errors raised by the background threads are fatal for
//! the whole [`LogFile`](crate::LogFile). The first one is recorded and
//! returned by every later operation, including [`LogFile::close`](crate::LogFile::close).
//! That is why the type is `Clone`: the same error is handed to each
//! producer that was blocked at the time of the failure.
//!
//! ```rust
//! use buslog::{BuslogError, LogFile};
//!
//! let err = LogFile::builder().queue_size(0).config().unwrap_err();
//! match err {
//!     BuslogError::Config(msg) => println!("rejected: {msg}"),
//!     other => println!("unexpected: {other}"),
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for buslog operations.
pub type Result<T> = std::result::Result<T, BuslogError>;

/// The master error enum covering all failure domains in buslog.
///
/// I/O errors are wrapped in `Arc` so the type can be cloned cheaply and
/// shared across the pipeline threads.
#[derive(Debug, Clone)]
pub enum BuslogError {
    /// Invalid writer configuration (zero capacity, zero threads, ...).
    Config(String),

    /// Low-level I/O failure (disk full, permissions, missing directory, ...).
    Io(Arc<io::Error>),

    /// The compressor reported a failure for a container.
    ///
    /// When raised by a compression worker this error is fatal for the file:
    /// skipping the container would leave a gap in the container sequence.
    Compression(String),

    /// A typed payload could not be encoded or decoded with bincode.
    Serialization(String),

    /// The file contents do not follow the log layout.
    ///
    /// Raised by the reader, and by append mode when the existing file is
    /// unfinished or was aborted.
    Format(String),

    /// The operation was attempted after the file or channel was closed.
    Closed,

    /// `close()` could not bring the pipeline into the drained state.
    DrainIncomplete {
        /// Containers written to the output stream.
        written: u64,
        /// Containers sealed by the builder.
        sealed: u64,
        /// Containers still parked in the reordering buffer.
        pending: usize,
    },

    /// Logic error inside the library (poisoned lock, duplicate sequence, ...).
    ///
    /// This indicates a bug. Please report it with a reproduction case.
    Internal(String),
}

impl BuslogError {
    /// Returns true for errors that terminate the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Compression(_) | Self::DrainIncomplete { .. } | Self::Internal(_)
        )
    }
}

impl fmt::Display for BuslogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(s) => write!(f, "Configuration Error: {s}"),
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Compression(s) => write!(f, "Compression Error: {s}"),
            Self::Serialization(s) => write!(f, "Serialization Error: {s}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::Closed => write!(f, "Log file is closed"),
            Self::DrainIncomplete {
                written,
                sealed,
                pending,
            } => write!(
                f,
                "Drain Incomplete: {written} of {sealed} containers written, {pending} pending"
            ),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for BuslogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BuslogError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
