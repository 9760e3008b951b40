//! # Error Types
//!
//! Every fallible operation in the crate returns [`XdrResult`]. The variants
//! follow the four failure classes the pipeline distinguishes:
//!
//! - **Format**: a header literal mismatch, a wrong array length, a short read/write
//! - **Range**: a parsed value outside its domain (coordinates, timestamps, NaN payloads)
//! - **EmptyResult**: a structurally valid operation that produced no usable points
//! - **Configuration**: an unsupported format/mode combination or a bad job setting
//!
//! I/O, NetCDF and serialization errors are wrapped transparently.

use thiserror::Error;

/// Errors that can occur while reading, transforming or writing a dataset
#[derive(Error, Debug)]
pub enum XdrError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Range error: {0}")]
    Range(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for all dataset operations
pub type XdrResult<T> = Result<T, XdrError>;

impl XdrError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn range(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    pub fn empty(msg: impl Into<String>) -> Self {
        Self::EmptyResult(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True when the operation succeeded structurally but yielded no points.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyResult(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Process exit status used by the binary for this class of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EmptyResult(_) => 2,
            Self::Configuration(_) => 3,
            _ => 1,
        }
    }
}

/// Maps a short read or write onto a `Format` error, keeping other I/O failures as-is.
pub(crate) fn truncated(context: &str, error: std::io::Error) -> XdrError {
    if error.kind() == std::io::ErrorKind::UnexpectedEof || error.kind() == std::io::ErrorKind::WriteZero {
        XdrError::format(format!("{}: truncated stream ({})", context, error))
    } else {
        XdrError::Io(error)
    }
}
