//! Validator's confidence-threshold decision logic (spec §4.5.4). Ported
//! from the reference implementation's `agents/capabilities/validate.py`.

use coordination::config::ValidatorConfig;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackDisposition {
    Retry,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorDecision {
    /// `confidence >= validator_confidence_high`: commit, terminal `validated`.
    AutoValidate,
    /// `confidence >= validator_confidence_low`: `needs_review`, no file change.
    Escalate,
    /// else: revert to HEAD, then retry or give up depending on retry cap.
    Rollback(RollbackDisposition),
}

/// §4.5.4 candidate selection: any `status=tested`, lexicographic first.
pub fn select_candidate(status: &Map<String, Value>) -> Option<String> {
    let mut keys: Vec<&String> = status
        .iter()
        .filter(|(_, v)| v.get("status").and_then(Value::as_str) == Some("tested"))
        .map(|(k, _)| k)
        .collect();
    keys.sort();
    keys.first().map(|k| (*k).clone())
}

pub fn decide(confidence: f64, config: &ValidatorConfig, retry_count: u64, max_retry_count: u64) -> ValidatorDecision {
    if confidence >= config.validator_confidence_high {
        ValidatorDecision::AutoValidate
    } else if confidence >= config.validator_confidence_low {
        ValidatorDecision::Escalate
    } else if retry_count + 1 <= max_retry_count {
        ValidatorDecision::Rollback(RollbackDisposition::Retry)
    } else {
        ValidatorDecision::Rollback(RollbackDisposition::Skipped)
    }
}

pub fn bump_confidence_for_validate(confidence: f64) -> f64 {
    (confidence + 0.1).min(1.0)
}

pub fn drop_confidence_for_rollback(confidence: f64) -> f64 {
    (confidence - 0.2).max(0.0)
}

pub fn commit_message_for(file_key: &str, confidence: f64) -> String {
    crate::vcs::commit_message(file_key, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ValidatorConfig {
        ValidatorConfig::default()
    }

    #[test]
    fn high_confidence_auto_validates_s6() {
        assert_eq!(decide(0.9, &config(), 0, 3), ValidatorDecision::AutoValidate);
        assert_eq!(bump_confidence_for_validate(0.9), 1.0);
    }

    #[test]
    fn mid_confidence_escalates_s6() {
        assert_eq!(decide(0.6, &config(), 0, 3), ValidatorDecision::Escalate);
    }

    #[test]
    fn low_confidence_rolls_back_and_retries_s6() {
        assert_eq!(
            decide(0.2, &config(), 0, 3),
            ValidatorDecision::Rollback(RollbackDisposition::Retry)
        );
        assert_eq!(drop_confidence_for_rollback(0.2), 0.0);
    }

    #[test]
    fn low_confidence_at_retry_cap_skips() {
        assert_eq!(
            decide(0.2, &config(), 3, 3),
            ValidatorDecision::Rollback(RollbackDisposition::Skipped)
        );
    }

    #[test]
    fn selects_lexicographically_first_tested() {
        let mut status = Map::new();
        status.insert("b.py".into(), serde_json::json!({"status": "tested"}));
        status.insert("a.py".into(), serde_json::json!({"status": "tested"}));
        assert_eq!(select_candidate(&status), Some("a.py".to_string()));
    }
}
