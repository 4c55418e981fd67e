//! Error taxonomy for a cache refresh run.
//!
//! Every stage propagates its failure unchanged to the caller; nothing in the
//! pipeline retries or recovers locally.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Coarse classification used for logging and process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure or non-success status from the remote API
    Fetch,
    /// Response body was not valid JSON or had an unexpected shape
    Decode,
    /// Connect, flush or write against the cache store failed
    Cache,
    /// The run did not finish within its deadline
    Deadline,
    /// A client could not be constructed
    Setup,
}

impl ErrorKind {
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Fetch => 2,
            ErrorKind::Decode => 3,
            ErrorKind::Cache => 4,
            ErrorKind::Deadline => 5,
            ErrorKind::Setup => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Decode => "decode",
            ErrorKind::Cache => "cache",
            ErrorKind::Deadline => "deadline",
            ErrorKind::Setup => "setup",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request could not be completed or returned a non-success status
    #[error("failed to fetch {resource} from {url}: {reason}")]
    Fetch {
        resource: String,
        url: String,
        reason: String,
    },

    /// Body was not valid JSON or did not match the expected shape
    #[error("failed to decode {resource} from {url}: {reason}")]
    Decode {
        resource: String,
        url: String,
        reason: String,
    },

    #[error("failed to connect to cache: {source}")]
    Connect {
        #[source]
        source: StoreError,
    },

    #[error("failed to flush cache: {source}")]
    Flush {
        #[source]
        source: StoreError,
    },

    /// `failed` counts every key that could not be written; `key` is the first
    #[error("failed to write cache key '{key}' ({failed} failed): {source}")]
    Write {
        key: String,
        failed: usize,
        #[source]
        source: StoreError,
    },

    #[error("run exceeded deadline of {}s", .0.as_secs())]
    DeadlineExceeded(Duration),

    #[error("failed to set up {component}: {reason}")]
    Client {
        component: &'static str,
        reason: String,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch { .. } => ErrorKind::Fetch,
            PipelineError::Decode { .. } => ErrorKind::Decode,
            PipelineError::Connect { .. }
            | PipelineError::Flush { .. }
            | PipelineError::Write { .. } => ErrorKind::Cache,
            PipelineError::DeadlineExceeded(_) => ErrorKind::Deadline,
            PipelineError::Client { .. } => ErrorKind::Setup,
        }
    }

    pub(crate) fn fetch(resource: impl Into<String>, url: &str, reason: impl fmt::Display) -> Self {
        PipelineError::Fetch {
            resource: resource.into(),
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(resource: impl Into<String>, url: &str, reason: impl fmt::Display) -> Self {
        PipelineError::Decode {
            resource: resource.into(),
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
