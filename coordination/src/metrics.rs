//! Per-tick metrics aggregation and export. Ported from the reference
//! implementation's `metrics/collector.py` and `metrics/export.py`,
//! extended with the cost-tracking fields `export.py`'s `TICK_FIELDNAMES`
//! already reserves but `collector.py` never populates (spec.md's cost
//! budget stop condition needs them computed, not just declared).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write as _;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

const TERMINAL_STATUSES: [&str; 3] = ["validated", "skipped", "needs_review"];
const MIGRATED_STATUSES: [&str; 8] = [
    "in_progress",
    "transformed",
    "tested",
    "validated",
    "failed",
    "needs_review",
    "retry",
    "skipped",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentsActed {
    pub scout: bool,
    pub transformer: bool,
    pub tester: bool,
    pub validator: bool,
}

impl AgentsActed {
    pub fn any(&self) -> bool {
        self.scout || self.transformer || self.tester || self.validator
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TickRow {
    pub tick: u64,
    pub any_agent_acted: bool,
    pub acted_scout: bool,
    pub acted_transformer: bool,
    pub acted_tester: bool,
    pub acted_validator: bool,
    pub files_total: u64,
    pub files_migrated: u64,
    pub files_validated: u64,
    pub files_failed: u64,
    pub files_needs_review: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_ticks: u64,
    pub tokens_per_file: f64,
    pub cost_per_file_usd: f64,
    pub success_rate: f64,
    pub rollback_rate: f64,
    pub human_escalation_rate: f64,
    pub retry_resolution_rate: f64,
    pub starvation_count: u64,
    pub audit_completeness: f64,
}

const TICK_FIELDNAMES: [&str; 21] = [
    "tick",
    "any_agent_acted",
    "acted_scout",
    "acted_transformer",
    "acted_tester",
    "acted_validator",
    "files_total",
    "files_migrated",
    "files_validated",
    "files_failed",
    "files_needs_review",
    "total_tokens",
    "total_cost_usd",
    "total_ticks",
    "tokens_per_file",
    "cost_per_file_usd",
    "success_rate",
    "rollback_rate",
    "human_escalation_rate",
    "retry_resolution_rate",
    "starvation_count",
    "audit_completeness",
];

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stop_reason: String,
    pub total_ticks: u64,
    pub files_total: u64,
    pub files_validated: u64,
    pub files_failed: u64,
    pub files_needs_review: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub success_rate: f64,
    pub rollback_rate: f64,
    pub human_escalation_rate: f64,
    pub retry_resolution_rate: f64,
    pub starvation_count: u64,
    pub audit_completeness: f64,
}

/// Collects and aggregates per-tick metrics for one run.
pub struct MetricsCollector {
    audit_log_path: std::path::PathBuf,
    starvation_threshold: u64,
    tick_rows: Vec<TickRow>,

    previous_statuses: BTreeMap<String, String>,
    idle_ticks_by_file: BTreeMap<String, u64>,
    files_with_retry: BTreeSet<String>,
    resolved_retry_files: BTreeSet<String>,
}

impl MetricsCollector {
    pub fn new(audit_log_path: impl Into<std::path::PathBuf>, starvation_threshold: u64) -> Self {
        Self {
            audit_log_path: audit_log_path.into(),
            starvation_threshold,
            tick_rows: Vec::new(),
            previous_statuses: BTreeMap::new(),
            idle_ticks_by_file: BTreeMap::new(),
            files_with_retry: BTreeSet::new(),
            resolved_retry_files: BTreeSet::new(),
        }
    }

    pub fn tick_rows(&self) -> &[TickRow] {
        &self.tick_rows
    }

    /// Record one scheduler tick worth of metrics. `status_entries` is the
    /// whole-namespace `status.json` map; `total_tokens`/`total_cost_usd`
    /// are cumulative run totals, not per-tick deltas.
    pub fn record_tick(
        &mut self,
        tick: u64,
        agents_acted: &AgentsActed,
        status_entries: &serde_json::Map<String, Value>,
        total_tokens: u64,
        total_cost_usd: f64,
    ) {
        let normalized_statuses: BTreeMap<String, String> = status_entries
            .iter()
            .map(|(k, v)| {
                let status = v
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("pending")
                    .to_string();
                (k.clone(), status)
            })
            .collect();
        self.update_status_tracking(&normalized_statuses);

        let statuses: Vec<&str> = normalized_statuses.values().map(String::as_str).collect();
        let files_total = statuses.len() as u64;
        let files_migrated = statuses
            .iter()
            .filter(|s| MIGRATED_STATUSES.contains(s))
            .count() as u64;
        let files_validated = statuses.iter().filter(|s| **s == "validated").count() as u64;
        let files_failed = statuses.iter().filter(|s| **s == "failed").count() as u64;
        let files_needs_review = statuses.iter().filter(|s| **s == "needs_review").count() as u64;
        let files_skipped = statuses.iter().filter(|s| **s == "skipped").count() as u64;

        let total_ticks = tick + 1;
        let terminal_or_failed = files_validated + files_skipped + files_needs_review + files_failed;
        let tokens_per_file = if terminal_or_failed > 0 {
            total_tokens as f64 / terminal_or_failed as f64
        } else {
            0.0
        };
        let cost_per_file_usd = if terminal_or_failed > 0 {
            total_cost_usd / terminal_or_failed as f64
        } else {
            0.0
        };
        let success_rate = if files_total > 0 {
            files_validated as f64 / files_total as f64
        } else {
            0.0
        };
        let rollback_denom = files_validated + files_failed;
        let rollback_rate = if rollback_denom > 0 {
            files_failed as f64 / rollback_denom as f64
        } else {
            0.0
        };
        let human_escalation_rate = if files_total > 0 {
            files_needs_review as f64 / files_total as f64
        } else {
            0.0
        };
        let retry_total = self.files_with_retry.len() as u64;
        let retry_resolution_rate = if retry_total > 0 {
            self.resolved_retry_files.len() as f64 / retry_total as f64
        } else {
            0.0
        };

        let starvation_count = self
            .idle_ticks_by_file
            .iter()
            .filter(|(file_key, idle_ticks)| {
                **idle_ticks > self.starvation_threshold
                    && !TERMINAL_STATUSES.contains(
                        &normalized_statuses
                            .get(*file_key)
                            .map(String::as_str)
                            .unwrap_or("pending"),
                    )
            })
            .count() as u64;

        let row = TickRow {
            tick,
            any_agent_acted: agents_acted.any(),
            acted_scout: agents_acted.scout,
            acted_transformer: agents_acted.transformer,
            acted_tester: agents_acted.tester,
            acted_validator: agents_acted.validator,
            files_total,
            files_migrated,
            files_validated,
            files_failed,
            files_needs_review,
            total_tokens,
            total_cost_usd,
            total_ticks,
            tokens_per_file: round6(tokens_per_file),
            cost_per_file_usd: round6(cost_per_file_usd),
            success_rate: round6(success_rate),
            rollback_rate: round6(rollback_rate),
            human_escalation_rate: round6(human_escalation_rate),
            retry_resolution_rate: round6(retry_resolution_rate),
            starvation_count,
            audit_completeness: round6(self.compute_audit_completeness()),
        };
        self.tick_rows.push(row);
    }

    pub fn build_summary(&self, stop_reason: &str) -> RunSummary {
        let Some(last) = self.tick_rows.last() else {
            return RunSummary {
                stop_reason: stop_reason.to_string(),
                total_ticks: 0,
                files_total: 0,
                files_validated: 0,
                files_failed: 0,
                files_needs_review: 0,
                total_tokens: 0,
                total_cost_usd: 0.0,
                success_rate: 0.0,
                rollback_rate: 0.0,
                human_escalation_rate: 0.0,
                retry_resolution_rate: 0.0,
                starvation_count: 0,
                audit_completeness: 1.0,
            };
        };
        RunSummary {
            stop_reason: stop_reason.to_string(),
            total_ticks: last.total_ticks,
            files_total: last.files_total,
            files_validated: last.files_validated,
            files_failed: last.files_failed,
            files_needs_review: last.files_needs_review,
            total_tokens: last.total_tokens,
            total_cost_usd: last.total_cost_usd,
            success_rate: last.success_rate,
            rollback_rate: last.rollback_rate,
            human_escalation_rate: last.human_escalation_rate,
            retry_resolution_rate: last.retry_resolution_rate,
            starvation_count: last.starvation_count,
            audit_completeness: last.audit_completeness,
        }
    }

    fn update_status_tracking(&mut self, current_statuses: &BTreeMap<String, String>) {
        for (file_key, current_status) in current_statuses {
            let previous_status = self.previous_statuses.get(file_key).cloned();
            if previous_status.as_deref() == Some(current_status.as_str()) {
                *self.idle_ticks_by_file.entry(file_key.clone()).or_insert(0) += 1;
            } else {
                self.idle_ticks_by_file.insert(file_key.clone(), 0);
            }

            if current_status == "retry" && previous_status.as_deref() != Some("retry") {
                self.files_with_retry.insert(file_key.clone());
            }
            if current_status == "validated" && self.files_with_retry.contains(file_key) {
                self.resolved_retry_files.insert(file_key.clone());
            }

            self.previous_statuses
                .insert(file_key.clone(), current_status.clone());
        }

        let stale: Vec<String> = self
            .previous_statuses
            .keys()
            .filter(|k| !current_statuses.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            self.previous_statuses.remove(&key);
            self.idle_ticks_by_file.remove(&key);
        }
    }

    fn compute_audit_completeness(&self) -> f64 {
        let Ok(contents) = fs::read_to_string(&self.audit_log_path) else {
            return 1.0;
        };
        let lines: Vec<&str> = contents.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.is_empty() {
            return 1.0;
        }

        let required_fields = ["timestamp", "agent", "pheromone_type", "file_key", "action"];
        let mut full_trace_events = 0usize;
        for line in &lines {
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            let Some(object) = event.as_object() else {
                continue;
            };
            let complete = required_fields.iter().all(|field| {
                object
                    .get(*field)
                    .map(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
                    .unwrap_or(false)
            });
            if complete {
                full_trace_events += 1;
            }
        }
        full_trace_events as f64 / lines.len() as f64
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

pub fn ensure_output_dir(output_dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(output_dir).map_err(|e| StoreError::Io {
        path: output_dir.display().to_string(),
        source: e,
    })
}

pub fn write_ticks_csv(path: &Path, tick_rows: &[TickRow]) -> Result<(), StoreError> {
    let mut out = String::new();
    out.push_str(&TICK_FIELDNAMES.join(","));
    out.push('\n');
    for row in tick_rows {
        let value = serde_json::to_value(row).map_err(StoreError::Serialization)?;
        let object = value.as_object().expect("TickRow serializes to an object");
        let cells: Vec<String> = TICK_FIELDNAMES
            .iter()
            .map(|field| csv_cell(object.get(*field)))
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    write_file(path, &out)
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), StoreError> {
    let serialized = serde_json::to_string_pretty(summary).map_err(StoreError::Serialization)?;
    write_file(path, &format!("{serialized}\n"))
}

pub fn write_manifest_json(path: &Path, manifest: &Value) -> Result<(), StoreError> {
    let serialized = serde_json::to_string_pretty(manifest).map_err(StoreError::Serialization)?;
    write_file(path, &format!("{serialized}\n"))
}

fn write_file(path: &Path, contents: &str) -> Result<(), StoreError> {
    let mut file = fs::File::create(path).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    file.write_all(contents.as_bytes()).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn status_map(entries: &[(&str, &str)]) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for (key, status) in entries {
            map.insert(key.to_string(), json!({"status": status}));
        }
        map
    }

    #[test]
    fn success_rate_and_rollback_rate_match_reference_formula() {
        let dir = tempdir().unwrap();
        let audit_path = dir.path().join("audit_log.jsonl");
        fs::write(&audit_path, "").unwrap();
        let mut collector = MetricsCollector::new(&audit_path, 12);

        let statuses = status_map(&[("a.py", "validated"), ("b.py", "failed"), ("c.py", "pending")]);
        collector.record_tick(0, &AgentsActed::default(), &statuses, 100, 0.0);

        let row = &collector.tick_rows()[0];
        assert_eq!(row.files_total, 3);
        assert!((row.success_rate - (1.0 / 3.0)).abs() < 1e-9);
        assert!((row.rollback_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn retry_resolution_tracks_retry_then_validated_transition() {
        let dir = tempdir().unwrap();
        let audit_path = dir.path().join("audit_log.jsonl");
        fs::write(&audit_path, "").unwrap();
        let mut collector = MetricsCollector::new(&audit_path, 12);

        collector.record_tick(0, &AgentsActed::default(), &status_map(&[("a.py", "retry")]), 0, 0.0);
        collector.record_tick(1, &AgentsActed::default(), &status_map(&[("a.py", "validated")]), 0, 0.0);

        let row = &collector.tick_rows()[1];
        assert_eq!(row.retry_resolution_rate, 1.0);
    }

    #[test]
    fn starvation_counts_non_terminal_idle_files_past_threshold() {
        let dir = tempdir().unwrap();
        let audit_path = dir.path().join("audit_log.jsonl");
        fs::write(&audit_path, "").unwrap();
        let mut collector = MetricsCollector::new(&audit_path, 2);

        for tick in 0..4 {
            collector.record_tick(tick, &AgentsActed::default(), &status_map(&[("a.py", "pending")]), 0, 0.0);
        }

        let row = collector.tick_rows().last().unwrap();
        assert_eq!(row.starvation_count, 1);
    }

    #[test]
    fn audit_completeness_ignores_incomplete_events() {
        let dir = tempdir().unwrap();
        let audit_path = dir.path().join("audit_log.jsonl");
        let complete = json!({"timestamp": "t", "agent": "scout", "pheromone_type": "tasks", "file_key": "a.py", "action": "write"});
        let incomplete = json!({"timestamp": "t", "agent": "scout"});
        fs::write(
            &audit_path,
            format!("{}\n{}\n", complete, incomplete),
        )
        .unwrap();

        let collector = MetricsCollector::new(&audit_path, 12);
        assert!((collector.compute_audit_completeness() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_run_summary_matches_reference_defaults() {
        let dir = tempdir().unwrap();
        let audit_path = dir.path().join("audit_log.jsonl");
        let collector = MetricsCollector::new(&audit_path, 12);
        let summary = collector.build_summary("max_ticks");
        assert_eq!(summary.total_ticks, 0);
        assert_eq!(summary.audit_completeness, 1.0);
    }
}
