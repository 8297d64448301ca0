//! Scout/Transformer/Tester/Validator agents, their shared capability
//! logic, and the round-robin scheduler that ticks them over a
//! `coordination::PheromoneStore`. Everything here is specific to
//! Python 2 → Python 3 migration; the store, decay, guardrails, LLM
//! gateway and metrics collector it builds on are domain-agnostic and
//! live in `coordination`.

pub mod agent;
pub mod agents;
pub mod capabilities;
pub mod error;
pub mod prompts;
pub mod review;
pub mod scheduler;
pub mod subprocess;
pub mod vcs;

pub use agent::{Agent, AgentContext, SchedulableAgent};
pub use error::AgentError;
pub use scheduler::{Scheduler, SchedulerOutcome, StopReason};
