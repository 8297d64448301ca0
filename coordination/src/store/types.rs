//! Typed views over the three pheromone namespaces.
//!
//! The store engine itself operates on untyped `serde_json::Map` entries
//! (see `pheromone_store.rs`) since entries are heterogeneous and gain
//! fields over time; these structs are the typed read side used by agents
//! and capabilities, with a bounded `metadata` leaf for trace-specific
//! extras that don't warrant a first-class field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type FileKey = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Regex,
    Hybrid,
    TextScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Python,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDetail {
    pub pattern: String,
    pub line: u64,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub intensity: f64,
    #[serde(default)]
    pub patterns_found: Vec<String>,
    #[serde(default)]
    pub pattern_details: Vec<PatternDetail>,
    #[serde(default)]
    pub dependencies: Vec<FileKey>,
    pub analysis_source: AnalysisSource,
    pub file_kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_complexity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// Status state machine. Terminal = {Validated, Skipped, NeedsReview}
/// (see `Status::is_terminal`; `needs_review` is terminal per the
/// resolved Open Question in SPEC_FULL.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Transformed,
    Tested,
    Validated,
    NeedsReview,
    Retry,
    Skipped,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Validated | Status::Skipped | Status::NeedsReview)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).unwrap_or(Value::Null);
        write!(f, "{}", s.as_str().unwrap_or("unknown"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: Status,
    #[serde(default)]
    pub retry_count: u64,
    #[serde(default)]
    pub inhibition: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_acquired_tick: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<Status>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityEntry {
    pub confidence: f64,
    #[serde(default)]
    pub tests_total: u64,
    #[serde(default)]
    pub tests_passed: u64,
    #[serde(default)]
    pub tests_failed: u64,
    #[serde(default)]
    pub coverage: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// The three typed trace namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Tasks,
    Status,
    Quality,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Tasks => "tasks",
            Namespace::Status => "status",
            Namespace::Quality => "quality",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Namespace::Tasks => "tasks.json",
            Namespace::Status => "status.json",
            Namespace::Quality => "quality.json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tasks" => Some(Namespace::Tasks),
            "status" => Some(Namespace::Status),
            "quality" => Some(Namespace::Quality),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Write,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub agent: String,
    pub pheromone_type: String,
    pub file_key: FileKey,
    pub action: AuditAction,
    pub fields_changed: Vec<String>,
    pub previous_values: BTreeMap<String, Value>,
}
