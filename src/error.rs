//! Error taxonomy.
//!
//! | Error | Scope | Handling |
//! |-------|-------|----------|
//! | [`ConfigError`] | startup | fatal, surfaced before any query runs |
//! | [`IngestError`] | one document | logged, document skipped |
//! | [`RetrievalError`] | one tool call | reported to the model as tool output |
//! | [`ModelError`] | one query | converted to an apologetic answer |
//!
//! An empty search result is not an error anywhere in the crate.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),
    #[error(
        "index was built with embedding model '{indexed}' but config uses '{configured}'; run `crag rebuild`"
    )]
    ModelMismatch { indexed: String, configured: String },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{path}: missing 'Course Title:' header line")]
    MissingTitle { path: String },
    #[error("{path}: course '{title}' is already defined by {first}")]
    DuplicateTitle {
        path: String,
        title: String,
        first: String,
    },
    #[error("{path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("index error: {0}")]
    Index(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("language model transport error: {0}")]
    Transport(String),
    #[error("language model API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected language model response: {0}")]
    Response(String),
}

/// Top-level error for library entry points.
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
