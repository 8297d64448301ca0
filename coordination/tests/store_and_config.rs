//! Crate-level integration scenarios: layered configuration (spec §8 S9
//! analogue for the substrate) and a full write → decay → audit-log
//! round trip through the public `PheromoneStore` API only (no access
//! to its private helpers).

use std::collections::BTreeMap;

use coordination::store::Namespace;
use coordination::{Config, DecayType, Guardrails, PheromoneStore};
use serde_json::{json, Map};

#[test]
fn config_load_layers_defaults_then_yaml_then_env() {
    let dir = tempfile::tempdir().unwrap();
    let yaml_path = dir.path().join("swarm.yaml");
    std::fs::write(
        &yaml_path,
        "guardrails:\n  max_tokens_total: 4242\n  max_retry_count: 7\nscheduler:\n  max_ticks: 9\n",
    )
    .unwrap();

    std::env::set_var("SWARM_MAX_RETRY_COUNT", "2");
    let config = Config::load(Some(&yaml_path)).unwrap();
    std::env::remove_var("SWARM_MAX_RETRY_COUNT");

    // YAML overrides the 100_000 default...
    assert_eq!(config.guardrails.max_tokens_total, 4242);
    assert_eq!(config.scheduler.max_ticks, 9);
    // ...and an env var layered on top overrides the YAML value in turn.
    assert_eq!(config.guardrails.max_retry_count, 2);
}

#[test]
fn config_load_with_no_file_falls_back_to_defaults() {
    let config = Config::load(None).unwrap();
    let defaults = Config::default();
    assert_eq!(config.guardrails.max_tokens_total, defaults.guardrails.max_tokens_total);
    assert_eq!(config.scheduler.max_ticks, defaults.scheduler.max_ticks);
}

#[test]
fn store_write_decay_and_audit_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
    let guardrails = Guardrails::new(100_000, 3, 5);

    let mut task = Map::new();
    task.insert("intensity".into(), json!(0.8));
    task.insert("file_kind".into(), json!("python"));
    store.write(Namespace::Tasks, "a.py", task, "scout", &guardrails).unwrap();

    let mut status = Map::new();
    status.insert("status".into(), json!("pending"));
    store.write(Namespace::Status, "a.py", status, "scout", &guardrails).unwrap();

    let changed = store.apply_decay(DecayType::Exponential, 0.2).unwrap();
    assert_eq!(changed, 1);

    let tasks = store.read_all(Namespace::Tasks).unwrap();
    let intensity = tasks["a.py"]["intensity"].as_f64().unwrap();
    assert!(intensity < 0.8 && intensity > 0.0);

    let audit_log = std::fs::read_to_string(store.audit_log_path()).unwrap();
    let events: Vec<&str> = audit_log.lines().collect();
    // One write each for the task, the status, and the decay update.
    assert_eq!(events.len(), 3);
    for line in &events {
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(parsed.get("timestamp").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty()));
        assert!(parsed.get("agent").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty()));
        assert!(parsed.get("pheromone_type").is_some());
    }

    // A second decay pass with the same rate is a true no-op: bit-identical
    // float result, so no new audit event is appended (spec's I4 invariant
    // doesn't require logging writes that change nothing observable).
    let changed_again = store.apply_decay(DecayType::Exponential, 0.0).unwrap();
    assert_eq!(changed_again, 0);
    let audit_log_after = std::fs::read_to_string(store.audit_log_path()).unwrap();
    assert_eq!(audit_log_after.lines().count(), 3);
}

#[test]
fn scope_lock_blocks_cross_agent_writes_until_released() {
    let dir = tempfile::tempdir().unwrap();
    let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
    let guardrails = Guardrails::new(100_000, 3, 5);

    let mut status = Map::new();
    status.insert("status".into(), json!("in_progress"));
    status.insert("current_tick".into(), json!(0_i64));
    store.write(Namespace::Status, "a.py", status, "transformer", &guardrails).unwrap();

    let mut other = Map::new();
    other.insert("status".into(), json!("transformed"));
    let err = store
        .update(Namespace::Status, "a.py", "tester", other, &guardrails)
        .unwrap_err();
    assert!(matches!(err, coordination::StoreError::ScopeLock { .. }));

    let mut release = Map::new();
    release.insert("status".into(), json!("transformed"));
    store
        .update(Namespace::Status, "a.py", "transformer", release, &guardrails)
        .unwrap();

    let mut extra: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    extra.insert("status".into(), json!("tested"));
    store
        .update(Namespace::Status, "a.py", "tester", extra.into_iter().collect(), &guardrails)
        .unwrap();

    let entry = store.read_one(Namespace::Status, "a.py").unwrap().unwrap();
    assert_eq!(entry.get("status").unwrap(), "tested");
}
