//! Scheduler stop-condition scenario (spec §8 S8): a single legacy file
//! run with no LLM gateway configured drives the Transformer through
//! repeated retryable dispositions until the guardrail retry limit
//! coerces it to `skipped`, at which point `all_terminal` fires.

use std::path::Path;

use coordination::{Config, PheromoneStore};
use serde_json::Value;
use swarm_agents::scheduler::{Scheduler, StopReason};
use swarm_agents::subprocess::{RunOutput, SubprocessRunner};
use swarm_agents::vcs::NullVcs;

struct UnreachableSubprocess;

impl SubprocessRunner for UnreachableSubprocess {
    fn run_module_tests(&self, _repo_root: &Path, _test_file: &str, _coverage_target: &str) -> Result<RunOutput, swarm_agents::AgentError> {
        unreachable!("no file ever reaches `transformed` in this scenario")
    }
    fn byte_compile(&self, _repo_root: &Path, _file_key: &str) -> Result<RunOutput, swarm_agents::AgentError> {
        unreachable!()
    }
    fn import_module(&self, _repo_root: &Path, _module_name: &str) -> Result<RunOutput, swarm_agents::AgentError> {
        unreachable!()
    }
    fn run_global_suite(&self, _repo_root: &Path) -> Result<RunOutput, swarm_agents::AgentError> {
        unreachable!()
    }
}

#[tokio::test]
async fn no_llm_run_exhausts_retries_and_converges_to_all_terminal() {
    let repo = tempfile::tempdir().unwrap();
    std::fs::write(
        repo.path().join("legacy.py"),
        "print \"hi\"\nd = {}\nfor k, v in d.iteritems():\n    print k, v\n",
    )
    .unwrap();

    let mut config = Config::default();
    config.scheduler.max_ticks = 20;
    let max_retry = config.guardrails.max_retry_count;

    let store = PheromoneStore::new(repo.path().join("pheromones")).unwrap();
    let mut scheduler = Scheduler::new(
        store,
        config,
        repo.path().to_path_buf(),
        None,
        Box::new(NullVcs),
        Box::new(UnreachableSubprocess),
    );

    let outcome = scheduler.run().await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::AllTerminal);
    assert!(outcome.ticks_run <= 10, "converged too slowly: {} ticks", outcome.ticks_run);

    let status = scheduler.store().read_all(coordination::store::Namespace::Status).unwrap();
    let entry = status.get("legacy.py").expect("legacy.py should have a status entry");
    assert_eq!(entry.get("status").and_then(Value::as_str), Some("skipped"));
    let retry_count = entry.get("retry_count").and_then(Value::as_u64).unwrap_or(0);
    assert!(
        retry_count > max_retry,
        "retry_count {retry_count} should exceed guardrail max {max_retry} once skipped"
    );
}

#[tokio::test]
async fn empty_repo_is_idle_and_stops_on_idle_cycles() {
    let repo = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.scheduler.max_ticks = 50;
    config.scheduler.idle_cycles_to_stop = 3;

    let store = PheromoneStore::new(repo.path().join("pheromones")).unwrap();
    let mut scheduler = Scheduler::new(
        store,
        config,
        repo.path().to_path_buf(),
        None,
        Box::new(NullVcs),
        Box::new(UnreachableSubprocess),
    );

    let outcome = scheduler.run().await.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::IdleCycles);
    assert_eq!(outcome.ticks_run, 3);
}
