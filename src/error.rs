// src/error.rs
//! Failure taxonomy shared by the pipeline stages.
//!
//! Only `ConfigInvalid` is fatal. Everything else is caught where it happens
//! (adapter, batch) and folded into the run report.

use crate::ingest::types::SourceId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Network, auth or provider-side failure while fetching one source.
    #[error("source {source_id} unavailable: {cause}")]
    SourceUnavailable { source_id: SourceId, cause: String },

    /// A cache entry could not be decoded. Callers treat it as a miss.
    #[error("cache entry {namespace}/{key} is corrupt: {cause}")]
    CacheCorrupt {
        namespace: String,
        key: String,
        cause: String,
    },

    /// Model call failed or no valid record survived the corrective retry.
    #[error("generation failed for batch {batch_index}: {cause}")]
    GenerationFailed { batch_index: usize, cause: String },

    /// Malformed filter or runtime parameter, detected before any fetch.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl PipelineError {
    pub fn source_unavailable(source_id: SourceId, cause: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            source_id,
            cause: cause.to_string(),
        }
    }

    pub fn generation_failed(batch_index: usize, cause: impl std::fmt::Display) -> Self {
        Self::GenerationFailed {
            batch_index,
            cause: cause.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Only configuration errors abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_))
    }
}
