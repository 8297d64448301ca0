//! Round-robin scheduler (spec §4.6, component C7). Ticks Scout,
//! Transformer, Tester, Validator in fixed order, running maintenance
//! and decay ahead of each tick and evaluating stop conditions after it.
//! Ported from the reference implementation's `orchestrator.py` main loop.

use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, warn};

use coordination::metrics::AgentsActed;
use coordination::store::Namespace;
use coordination::{Config, Guardrails, LlmClient, MetricsCollector, PheromoneStore};

use crate::agent::{AgentContext, SchedulableAgent};
use crate::agents::{ScoutAgent, TesterAgent, TransformerAgent, ValidatorAgent};
use crate::error::AgentError;
use crate::subprocess::SubprocessRunner;
use crate::vcs::Vcs;

/// Why the scheduler stopped ticking (spec §4.6 step 6, evaluated in
/// this order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    AllTerminal,
    BudgetExhausted,
    IdleCycles,
    MaxTicks,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::AllTerminal => "all_terminal",
            StopReason::BudgetExhausted => "budget_exhausted",
            StopReason::IdleCycles => "idle_cycles",
            StopReason::MaxTicks => "max_ticks",
        }
    }
}

pub struct SchedulerOutcome {
    pub stop_reason: StopReason,
    pub ticks_run: u64,
}

/// Owns the store, guardrails, LLM gateway and collaborator adapters for
/// one run, and drives the fixed-order tick loop (spec §9: "ownership:
/// scheduler owns the store and gateway; agents borrow them for the
/// duration of `run()`").
pub struct Scheduler {
    store: PheromoneStore,
    guardrails: Guardrails,
    llm: Option<LlmClient>,
    vcs: Box<dyn Vcs>,
    subprocess: Box<dyn SubprocessRunner>,
    config: Config,
    repo_root: PathBuf,
    metrics: MetricsCollector,
    agents: Vec<Box<dyn SchedulableAgent>>,
    idle_streak: u64,
}

impl Scheduler {
    pub fn new(
        store: PheromoneStore,
        config: Config,
        repo_root: PathBuf,
        llm: Option<LlmClient>,
        vcs: Box<dyn Vcs>,
        subprocess: Box<dyn SubprocessRunner>,
    ) -> Self {
        let guardrails = Guardrails::new(
            config.guardrails.max_tokens_total,
            config.guardrails.max_retry_count,
            config.guardrails.scope_lock_ttl,
        );
        let metrics = MetricsCollector::new(store.audit_log_path(), config.scheduler.idle_cycles_to_stop);
        // Fixed order per spec §2 data flow and §4.6 step 4: Scout, then
        // Transformer, then Tester, then Validator.
        let agents: Vec<Box<dyn SchedulableAgent>> = vec![
            Box::new(ScoutAgent),
            Box::new(TransformerAgent),
            Box::new(TesterAgent),
            Box::new(ValidatorAgent),
        ];

        Self {
            store,
            guardrails,
            llm,
            vcs,
            subprocess,
            config,
            repo_root,
            metrics,
            agents,
            idle_streak: 0,
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn store(&self) -> &PheromoneStore {
        &self.store
    }

    /// Run ticks `0..config.scheduler.max_ticks`, stopping early on any
    /// of the §4.6 stop conditions. Any `Err` from an agent's `run()`
    /// bubbles straight out, terminating the loop after a final metrics
    /// flush attempt by the caller (§7: "the scheduler never swallows
    /// unexpected exceptions from an agent").
    pub async fn run(&mut self) -> Result<SchedulerOutcome, AgentError> {
        let max_ticks = self.config.scheduler.max_ticks;

        for tick in 0..max_ticks {
            let current_tick = tick as i64;
            info!(tick, "scheduler: starting tick");

            let maintain_report = self.store.maintain_status(current_tick, &self.guardrails)?;
            if !maintain_report.ttl_released.is_empty() {
                warn!(tick, released = ?maintain_report.ttl_released, "scheduler: TTL-released zombie locks");
            }
            if !maintain_report.retry_requeued.is_empty() {
                warn!(tick, requeued = ?maintain_report.retry_requeued, "scheduler: requeued retry entries to pending");
            }

            self.store
                .apply_decay(self.config.decay.decay_type, self.config.decay.decay_rate)?;
            self.store
                .apply_decay_inhibition(self.config.decay.inhibition_decay_rate)?;

            let mut agents_acted = AgentsActed::default();
            for agent in &self.agents {
                let ctx = AgentContext {
                    store: &self.store,
                    guardrails: &self.guardrails,
                    llm: self.llm.as_ref(),
                    vcs: self.vcs.as_ref(),
                    subprocess: self.subprocess.as_ref(),
                    config: &self.config,
                    repo_root: &self.repo_root,
                    current_tick,
                };
                let acted = agent.run(&ctx).await?;
                match agent.name() {
                    "scout" => agents_acted.scout = acted,
                    "transformer" => agents_acted.transformer = acted,
                    "tester" => agents_acted.tester = acted,
                    "validator" => agents_acted.validator = acted,
                    other => warn!(agent = other, "scheduler: unrecognized agent name"),
                }
            }

            if agents_acted.any() {
                self.idle_streak = 0;
            } else {
                self.idle_streak += 1;
            }

            let status_entries = self.store.read_all(Namespace::Status)?;
            let total_tokens = self.llm.as_ref().map(|c| c.total_tokens_used()).unwrap_or(0);
            let total_cost_usd = self.llm.as_ref().map(|c| c.total_cost_usd()).unwrap_or(0.0);
            self.metrics
                .record_tick(tick, &agents_acted, &status_entries, total_tokens, total_cost_usd);

            if let Some(reason) = self.evaluate_stop_conditions(&status_entries, total_tokens, total_cost_usd) {
                info!(tick, stop_reason = reason.as_str(), "scheduler: stopping");
                return Ok(SchedulerOutcome {
                    stop_reason: reason,
                    ticks_run: tick + 1,
                });
            }
        }

        info!(max_ticks, "scheduler: exhausted max_ticks");
        Ok(SchedulerOutcome {
            stop_reason: StopReason::MaxTicks,
            ticks_run: max_ticks,
        })
    }

    /// §4.6 step 6, evaluated in order: `all_terminal`,
    /// `budget_exhausted` (tokens, then cost), `idle_cycles`. `max_ticks`
    /// is the loop's own fall-through and isn't checked here.
    fn evaluate_stop_conditions(
        &self,
        status_entries: &serde_json::Map<String, Value>,
        total_tokens: u64,
        total_cost_usd: f64,
    ) -> Option<StopReason> {
        if !status_entries.is_empty() && status_entries.values().all(|v| is_terminal(v)) {
            return Some(StopReason::AllTerminal);
        }

        if total_tokens >= self.config.guardrails.max_tokens_total {
            return Some(StopReason::BudgetExhausted);
        }
        if self.config.llm.max_budget_usd > 0.0 && total_cost_usd >= self.config.llm.max_budget_usd {
            return Some(StopReason::BudgetExhausted);
        }

        if self.idle_streak >= self.config.scheduler.idle_cycles_to_stop {
            return Some(StopReason::IdleCycles);
        }

        None
    }
}

/// `needs_review` is terminal for `all_terminal` purposes (SPEC_FULL.md's
/// resolved Open Question #1).
fn is_terminal(status_entry: &Value) -> bool {
    matches!(
        status_entry.get("status").and_then(Value::as_str),
        Some("validated") | Some("skipped") | Some("needs_review")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::SubprocessRunner;
    use crate::vcs::NullVcs;
    use serde_json::json;
    use tempfile::tempdir;

    struct UnusedSubprocess;
    impl SubprocessRunner for UnusedSubprocess {
        fn run_module_tests(
            &self,
            _repo_root: &std::path::Path,
            _test_file: &str,
            _coverage_target: &str,
        ) -> Result<crate::subprocess::RunOutput, AgentError> {
            unreachable!("not exercised by scheduler stop-condition tests")
        }
        fn byte_compile(&self, _repo_root: &std::path::Path, _file_key: &str) -> Result<crate::subprocess::RunOutput, AgentError> {
            unreachable!()
        }
        fn import_module(&self, _repo_root: &std::path::Path, _module_name: &str) -> Result<crate::subprocess::RunOutput, AgentError> {
            unreachable!()
        }
        fn run_global_suite(&self, _repo_root: &std::path::Path) -> Result<crate::subprocess::RunOutput, AgentError> {
            unreachable!()
        }
    }

    fn scheduler_over(repo_root: PathBuf, store: PheromoneStore, config: Config) -> Scheduler {
        Scheduler::new(store, config, repo_root, None, Box::new(NullVcs), Box::new(UnusedSubprocess))
    }

    #[test]
    fn all_terminal_requires_non_empty_and_every_entry_terminal() {
        let dir = tempdir().unwrap();
        let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
        let config = Config::default();
        let scheduler = scheduler_over(dir.path().to_path_buf(), store, config);

        let mut empty = serde_json::Map::new();
        assert!(scheduler.evaluate_stop_conditions(&empty, 0, 0.0).is_none());

        empty.insert("a.py".into(), json!({"status": "validated"}));
        empty.insert("b.py".into(), json!({"status": "needs_review"}));
        assert_eq!(
            scheduler.evaluate_stop_conditions(&empty, 0, 0.0),
            Some(StopReason::AllTerminal)
        );

        empty.insert("c.py".into(), json!({"status": "pending"}));
        assert!(scheduler.evaluate_stop_conditions(&empty, 0, 0.0).is_none());
    }

    #[test]
    fn token_budget_exhaustion_stops_before_idle_cycles() {
        let dir = tempdir().unwrap();
        let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
        let mut config = Config::default();
        config.guardrails.max_tokens_total = 100;
        let scheduler = scheduler_over(dir.path().to_path_buf(), store, config);

        let status = serde_json::Map::new();
        assert_eq!(
            scheduler.evaluate_stop_conditions(&status, 150, 0.0),
            Some(StopReason::BudgetExhausted)
        );
    }

    #[test]
    fn cost_budget_only_checked_when_positive() {
        let dir = tempdir().unwrap();
        let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
        let mut config = Config::default();
        config.llm.max_budget_usd = 0.0;
        let scheduler = scheduler_over(dir.path().to_path_buf(), store, config);
        let status = serde_json::Map::new();
        assert!(scheduler.evaluate_stop_conditions(&status, 0, 1_000_000.0).is_none());
    }

    #[test]
    fn idle_cycles_trips_after_configured_streak() {
        let dir = tempdir().unwrap();
        let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
        let mut config = Config::default();
        config.scheduler.idle_cycles_to_stop = 2;
        let mut scheduler = scheduler_over(dir.path().to_path_buf(), store, config);
        scheduler.idle_streak = 2;
        let status = serde_json::Map::new();
        assert_eq!(
            scheduler.evaluate_stop_conditions(&status, 0, 0.0),
            Some(StopReason::IdleCycles)
        );
    }
}
