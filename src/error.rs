//! Error taxonomy for the pipeline
//!
//! Every stage reports failures through [`PipelineError`]. Which variants are
//! downgraded and which abort the run is decided by the callers: analytics
//! turns a `Query` failure into a report entry, the loader turns a `NotFound`
//! for one entity kind into a zero-count result, everything else propagates.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network failure, timeout or non-2xx response from the upstream API
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// An expected snapshot file is absent
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Unrecognized entity kind or malformed input shape
    #[error("validation error: {0}")]
    Validation(String),

    /// Relational write/read failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed or failing aggregate query
    #[error("query '{name}' failed: {message}")]
    Query { name: String, message: String },

    #[error("unknown stage: {0}. Available: extract, transform, load, analytics")]
    UnknownStage(String),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Columnar snapshot could not be encoded or decoded
    #[error("snapshot error at {}: {message}", path.display())]
    Snapshot { path: PathBuf, message: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn snapshot(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Snapshot {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn storage(err: impl ToString) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn query(name: &str, err: impl ToString) -> Self {
        Self::Query {
            name: name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
