//! Error taxonomy (spec §7): kinds, not names. Configuration and
//! StoreIntegrity are fatal; ScopeLock and Budget are surfaced to the
//! caller as typed errors rather than panics; LLM transient errors are
//! retried before ever reaching here.

use thiserror::Error;

use crate::store::types::FileKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed JSON in pheromone store file {path}: {source}")]
    StoreIntegrity {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("scope lock held by {holder} on {file_key}, requested by {requester}")]
    ScopeLock {
        file_key: FileKey,
        holder: String,
        requester: String,
    },
    #[error("unknown pheromone namespace {0:?}")]
    UnknownNamespace(String),
    #[error("invalid filter operator {operator:?} on field {field:?}")]
    InvalidFilter { field: String, operator: String },
    #[error("I/O error on pheromone store file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("decay error: {0}")]
    Decay(#[from] crate::decay::DecayError),
}

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("token budget exceeded: used={used}, limit={limit}")]
    BudgetExceeded { used: u64, limit: u64 },
    #[error("scope lock held by {holder} on {file_key}, requested by {requester}")]
    ScopeLock {
        file_key: FileKey,
        holder: String,
        requester: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingSetting(String),
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("invalid config file: {0}")]
    Parse(String),
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),
}
