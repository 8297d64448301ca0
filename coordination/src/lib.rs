//! Stigmergic coordination substrate: the pheromone store, decay
//! functions, guardrails, LLM gateway and metrics collector that back a
//! multi-agent Python 2-to-3 migration swarm. Domain-agnostic — the
//! concrete agents and migration capabilities live in `swarm-agents`.

pub mod config;
pub mod decay;
pub mod error;
pub mod guardrails;
pub mod llm;
pub mod metrics;
pub mod store;

pub use config::Config;
pub use decay::{decay_inhibition, decay_intensity, DecayType};
pub use error::{ConfigError, GuardrailError, StoreError};
pub use guardrails::Guardrails;
pub use llm::{LlmClient, LlmError, LlmResponse};
pub use metrics::MetricsCollector;
pub use store::{MaintainReport, Namespace, PheromoneStore};
