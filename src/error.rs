use std::io;

use thiserror::Error;

use crate::types::TraceId;

/// Result type alias used throughout the profiler.
pub type Result<T> = std::result::Result<T, ProfilerError>;

/// Errors surfaced by the profiler.
///
/// A lookup miss is reported as [`ProfilerError::NotFound`]; hosts are expected
/// to turn it into a 404-style response rather than treat it as a failure.
#[derive(Debug, Error)]
pub enum ProfilerError {
    /// No trace is stored under the requested id (never published or evicted).
    #[error("no such result {0}")]
    NotFound(TraceId),
    /// A caller supplied an argument the profiler cannot use.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Configuration could not be parsed or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Trace document could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The background sweeper could not be controlled.
    #[error("sweeper error: {0}")]
    Worker(String),
}

impl ProfilerError {
    /// Returns true for the lookup-miss outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProfilerError::NotFound(_))
    }
}
