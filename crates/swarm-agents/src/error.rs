//! Agent-level error taxonomy (SPEC_FULL.md §E4). Only `StoreIntegrity`
//! and `Configuration` kinds bubble up and abort the scheduler loop;
//! transform/test/validate outcomes are always `Ok` payloads carrying a
//! disposition, never an `Err` — matching the reference implementation's
//! dict-shaped returns with a `"retryable"` field.

use thiserror::Error;

use coordination::{ConfigError, GuardrailError, LlmError, StoreError};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Guardrail(#[from] GuardrailError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("discovery failed: {message}")]
    Discover { message: String },
    #[error("transform failed for {file_key}: {message}")]
    Transform { file_key: String, message: String },
    #[error("test evaluation failed for {file_key}: {message}")]
    Test { file_key: String, message: String },
    #[error("validation failed for {file_key}: {message}")]
    Validate { file_key: String, message: String },
    #[error("vcs operation {operation} failed: {message}")]
    Vcs { operation: String, message: String },
    #[error("subprocess {command} failed: {message}")]
    Subprocess { command: String, message: String },
}

impl AgentError {
    /// Whether this error kind is fatal to the scheduler loop (§7:
    /// "the scheduler never swallows unexpected exceptions... integrity
    /// errors abort the run").
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Store(StoreError::StoreIntegrity { .. })
                | AgentError::Config(_)
                | AgentError::Llm(LlmError::Configuration(_))
        )
    }
}
