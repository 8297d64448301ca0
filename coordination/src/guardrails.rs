//! Stateless policy object enforcing budget, retry-cap, scope-lock and
//! TTL rules, plus trace stamping. Ported from the reference
//! implementation's `environment/guardrails.py`.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::GuardrailError;
use crate::store::types::FileKey;

/// System actors that stamp traces without holding a scope lock.
pub const SYSTEM_DECAY: &str = "system_decay";
pub const SYSTEM_RETRY: &str = "system_retry";
pub const SYSTEM_TTL: &str = "system_ttl";

#[derive(Debug, Clone, Copy)]
pub struct Guardrails {
    pub max_tokens_total: u64,
    pub max_retry_count: u64,
    pub scope_lock_ttl: i64,
}

/// Result of `enforce_scope_lock_ttl`.
#[derive(Debug, Default)]
pub struct TtlReleaseReport {
    pub released: Vec<FileKey>,
}

impl Guardrails {
    pub fn new(max_tokens_total: u64, max_retry_count: u64, scope_lock_ttl: i64) -> Self {
        Self {
            max_tokens_total,
            max_retry_count,
            scope_lock_ttl,
        }
    }

    pub fn enforce_token_budget(&self, used: u64) -> Result<(), GuardrailError> {
        if used > self.max_tokens_total {
            return Err(GuardrailError::BudgetExceeded {
                used,
                limit: self.max_tokens_total,
            });
        }
        Ok(())
    }

    /// Whether a file at this retry count should be forced to `skipped`.
    pub fn enforce_retry_limit(&self, retry_count: u64) -> bool {
        retry_count > self.max_retry_count
    }

    /// Reject a write/update from `agent` when the entry is in_progress
    /// and locked by someone else.
    pub fn enforce_scope_lock(
        &self,
        file_key: &str,
        agent: &str,
        status_entry: Option<&Map<String, Value>>,
    ) -> Result<(), GuardrailError> {
        let Some(entry) = status_entry else {
            return Ok(());
        };
        let is_in_progress = entry.get("status").and_then(Value::as_str) == Some("in_progress");
        if !is_in_progress {
            return Ok(());
        }
        let Some(owner) = entry.get("lock_owner").and_then(Value::as_str) else {
            return Ok(());
        };
        if owner != agent {
            return Err(GuardrailError::ScopeLock {
                file_key: file_key.to_string(),
                holder: owner.to_string(),
                requester: agent.to_string(),
            });
        }
        Ok(())
    }

    /// Attach `{lock_owner, lock_acquired_tick}` to a status payload.
    pub fn acquire_scope_lock(payload: &mut Map<String, Value>, agent: &str, current_tick: i64) {
        payload.insert("lock_owner".into(), Value::String(agent.to_string()));
        payload.insert("lock_acquired_tick".into(), Value::from(current_tick));
    }

    /// Remove lock fields from a status payload, only if the caller is
    /// the current owner (no-op otherwise, matching the reference
    /// implementation's guard).
    pub fn release_scope_lock(
        entry: &mut Map<String, Value>,
        agent: &str,
    ) {
        let owner = entry.get("lock_owner").and_then(Value::as_str).map(str::to_string);
        if owner.as_deref() == Some(agent) {
            entry.remove("lock_owner");
            entry.remove("lock_acquired_tick");
        }
    }

    /// TTL-release every zombie `in_progress` lock. Mutates `status_data`
    /// in place and returns the set of released file keys. Does not
    /// touch inhibition (see SPEC_FULL.md's resolved Open Question #2).
    pub fn enforce_scope_lock_ttl(
        &self,
        status_data: &mut Map<String, Value>,
        current_tick: i64,
    ) -> TtlReleaseReport {
        let mut report = TtlReleaseReport::default();
        for (file_key, value) in status_data.iter_mut() {
            let Some(entry) = value.as_object_mut() else {
                continue;
            };
            if entry.get("status").and_then(Value::as_str) != Some("in_progress") {
                continue;
            }
            let lock_tick = entry.get("lock_acquired_tick").and_then(Value::as_i64).unwrap_or(0);
            if current_tick - lock_tick <= self.scope_lock_ttl {
                continue;
            }
            let previous_status = entry.get("status").cloned();
            if let Some(prev) = previous_status {
                entry.insert("previous_status".into(), prev);
            }
            entry.insert("status".into(), Value::String("pending".into()));
            let retry_count = entry.get("retry_count").and_then(Value::as_u64).unwrap_or(0);
            entry.insert("retry_count".into(), Value::from(retry_count + 1));
            entry.remove("lock_owner");
            entry.remove("lock_acquired_tick");
            entry.insert("updated_by".into(), Value::String(SYSTEM_TTL.to_string()));
            entry.insert("timestamp".into(), Value::String(utc_timestamp()));
            report.released.push(file_key.clone());
        }
        report
    }

}

/// Stamp `timestamp` plus `created_by` (on write) or `updated_by` (on
/// update).
pub fn stamp_trace(payload: &mut Map<String, Value>, agent: &str, is_write: bool) {
    payload.insert("timestamp".into(), Value::String(utc_timestamp()));
    if is_write {
        payload
            .entry("created_by")
            .or_insert_with(|| Value::String(agent.to_string()));
    } else {
        payload.insert("updated_by".into(), Value::String(agent.to_string()));
    }
}

/// UTC ISO-8601 timestamp with zero microseconds and a trailing `Z`.
pub fn utc_timestamp() -> String {
    Utc::now()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
        + "Z"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardrails() -> Guardrails {
        Guardrails::new(1000, 3, 5)
    }

    #[test]
    fn token_budget_rejects_overage() {
        let g = guardrails();
        assert!(g.enforce_token_budget(1000).is_ok());
        assert!(g.enforce_token_budget(1001).is_err());
    }

    #[test]
    fn retry_limit_forces_skip_past_max() {
        let g = guardrails();
        assert!(!g.enforce_retry_limit(3));
        assert!(g.enforce_retry_limit(4));
    }

    #[test]
    fn scope_lock_blocks_other_agents() {
        let g = guardrails();
        let mut entry = Map::new();
        entry.insert("status".into(), Value::String("in_progress".into()));
        entry.insert("lock_owner".into(), Value::String("transformer".into()));
        assert!(g.enforce_scope_lock("a.py", "tester", Some(&entry)).is_err());
        assert!(g.enforce_scope_lock("a.py", "transformer", Some(&entry)).is_ok());
    }

    #[test]
    fn scope_lock_ttl_demotes_and_clears_lock() {
        let g = Guardrails::new(1000, 3, -1);
        let mut status_data = Map::new();
        let mut entry = Map::new();
        entry.insert("status".into(), Value::String("in_progress".into()));
        entry.insert("lock_owner".into(), Value::String("transformer".into()));
        entry.insert("lock_acquired_tick".into(), Value::from(-10));
        entry.insert("retry_count".into(), Value::from(0));
        status_data.insert("a.py".into(), Value::Object(entry));

        let report = g.enforce_scope_lock_ttl(&mut status_data, 0);
        assert_eq!(report.released, vec!["a.py".to_string()]);
        let updated = status_data.get("a.py").unwrap().as_object().unwrap();
        assert_eq!(updated.get("status").unwrap(), "pending");
        assert_eq!(updated.get("retry_count").unwrap(), 1);
        assert!(!updated.contains_key("lock_owner"));
        assert!(!updated.contains_key("lock_acquired_tick"));
    }

    #[test]
    fn release_is_noop_for_non_owner() {
        let mut entry = Map::new();
        entry.insert("lock_owner".into(), Value::String("transformer".into()));
        Guardrails::release_scope_lock(&mut entry, "tester");
        assert_eq!(entry.get("lock_owner").unwrap(), "transformer");
        Guardrails::release_scope_lock(&mut entry, "transformer");
        assert!(!entry.contains_key("lock_owner"));
    }
}
