//! Error taxonomy for the core pipeline.
//!
//! Each variant corresponds to one of the error *kinds* the pipeline can
//! surface. `LlmError` and `CacheError` are constructed but, per design,
//! never bubble past the component that produced them — they are logged
//! and absorbed into an empty/zero-candidate result instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaxonFinderError {
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("gazetteer not found at {0} and degraded_mode is disabled")]
    MissingGazetteer(PathBuf),

    #[error("{store} schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        expected: i64,
        found: i64,
        store: &'static str,
    },

    #[error("unable to decode input text: {0}")]
    EncodingError(String),

    #[error("upstream taxon search failed: HTTP {status} — {body}")]
    UpstreamError { status: u16, body: String },

    #[error("LLM request failed: {0}")]
    LlmError(String),

    #[error("cache operation failed: {0}")]
    CacheError(String),
}

pub type Result<T> = std::result::Result<T, TaxonFinderError>;
