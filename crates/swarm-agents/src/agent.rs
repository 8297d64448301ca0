//! Agent lifecycle contract (spec §4.5): `perceive -> should_act -> decide
//! -> execute -> deposit`, orchestrated by a default `run()`. Each
//! concrete agent fixes its own `Perception`/`Action`/`Outcome` types,
//! which makes `Agent` itself not object-safe; `SchedulableAgent` is the
//! object-safe facade the scheduler actually holds a `Vec<Box<dyn _>>` of.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use coordination::config::Config;
use coordination::{Guardrails, LlmClient, PheromoneStore};

use crate::error::AgentError;
use crate::subprocess::SubprocessRunner;
use crate::vcs::Vcs;

/// Everything an agent's `run()` needs for one tick. Borrowed, not owned:
/// the scheduler owns the store/gateway/vcs/subprocess runner and lends
/// them for the duration of the call (spec §9, "ownership: scheduler
/// owns the store and gateway; agents borrow them for the duration of
/// `run()`").
pub struct AgentContext<'a> {
    pub store: &'a PheromoneStore,
    pub guardrails: &'a Guardrails,
    pub llm: Option<&'a LlmClient>,
    pub vcs: &'a dyn Vcs,
    pub subprocess: &'a dyn SubprocessRunner,
    pub config: &'a Config,
    pub repo_root: &'a Path,
    pub current_tick: i64,
}

/// The five-operation lifecycle contract every concrete agent implements.
#[async_trait]
pub trait Agent: Send + Sync {
    type Perception: Send;
    type Action: Send;
    type Outcome: Send;

    fn name(&self) -> &'static str;

    /// Snapshot reads from the store. No mutation, no side effects.
    async fn perceive(&self, ctx: &AgentContext<'_>) -> Result<Self::Perception, AgentError>;

    /// Idempotent predicate over the perception. `false` means `run()`
    /// returns `Ok(false)` and nothing is emitted.
    fn should_act(&self, perception: &Self::Perception) -> bool;

    /// Pick one unit of work from the perception.
    fn decide(&self, perception: &Self::Perception) -> Option<Self::Action>;

    /// Perform side effects: file writes, LLM calls, subprocess runs, VCS ops.
    async fn execute(
        &self,
        ctx: &AgentContext<'_>,
        action: Self::Action,
    ) -> Result<Self::Outcome, AgentError>;

    /// Persist all resulting traces.
    async fn deposit(&self, ctx: &AgentContext<'_>, outcome: Self::Outcome) -> Result<(), AgentError>;

    /// Drives the five operations in order. Returns whether the agent
    /// acted this tick (used by the scheduler's idle-cycle tracking).
    async fn run(&self, ctx: &AgentContext<'_>) -> Result<bool, AgentError> {
        let perception = self.perceive(ctx).await?;
        if !self.should_act(&perception) {
            debug!(agent = self.name(), "idle");
            return Ok(false);
        }
        let Some(action) = self.decide(&perception) else {
            debug!(agent = self.name(), "idle");
            return Ok(false);
        };
        let outcome = self.execute(ctx, action).await?;
        self.deposit(ctx, outcome).await?;
        debug!(agent = self.name(), "acted");
        Ok(true)
    }
}

/// Object-safe facade over `Agent::run`, so the scheduler can hold a
/// homogeneous `Vec<Box<dyn SchedulableAgent>>` across four distinct
/// `Agent` implementations with unrelated associated types.
#[async_trait]
pub trait SchedulableAgent: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &AgentContext<'_>) -> Result<bool, AgentError>;
}

#[async_trait]
impl<T> SchedulableAgent for T
where
    T: Agent,
{
    fn name(&self) -> &'static str {
        Agent::name(self)
    }

    async fn run(&self, ctx: &AgentContext<'_>) -> Result<bool, AgentError> {
        Agent::run(self, ctx).await
    }
}
