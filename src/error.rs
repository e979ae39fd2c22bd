//! Error types for paced streams.

use thiserror::Error;

/// Failure reported by a source supplier while realizing the underlying
/// iterable.
///
/// Realization happens at most once per stream; this error is terminal for
/// the stream instance and is surfaced once through the registered error
/// handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("source realization failed: {0}")]
pub struct SourceError(pub String);

impl SourceError {
    /// Create a source error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that can occur on a paced stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The operation was invoked after the stream was closed.
    ///
    /// Surfaced synchronously by the failing call. Only `close` and
    /// `set_end_handler` remain usable on a closed stream.
    #[error("stream is closed")]
    Closed,

    /// The source supplier failed while realizing the iterable.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Result type for paced stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
