//! Validator: decision agent (spec §4.5.4). Selects one `tested`
//! candidate per `run()` and, based on `quality.confidence`, commits,
//! escalates to human review, or rolls back (retrying or giving up).

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use coordination::store::Namespace;

use crate::agent::{Agent, AgentContext};
use crate::capabilities::validate::{
    bump_confidence_for_validate, commit_message_for, decide, drop_confidence_for_rollback, select_candidate,
    RollbackDisposition, ValidatorDecision,
};
use crate::error::AgentError;

pub struct ValidatorAgent;

pub struct ValidatorPerception {
    status: Map<String, Value>,
    quality: Map<String, Value>,
}

pub struct ValidatorAction {
    file_key: String,
    confidence: f64,
    retry_count: u64,
    inhibition: f64,
}

enum ValidatorOutcomeKind {
    Validated { new_confidence: f64 },
    Escalated,
    RolledBack { disposition: RollbackDisposition, new_confidence: f64 },
}

pub struct ValidatorOutcome {
    file_key: String,
    retry_count: u64,
    inhibition: f64,
    kind: ValidatorOutcomeKind,
}

#[async_trait]
impl Agent for ValidatorAgent {
    type Perception = ValidatorPerception;
    type Action = ValidatorAction;
    type Outcome = ValidatorOutcome;

    fn name(&self) -> &'static str {
        "validator"
    }

    async fn perceive(&self, ctx: &AgentContext<'_>) -> Result<Self::Perception, AgentError> {
        Ok(ValidatorPerception {
            status: ctx.store.read_all(Namespace::Status)?,
            quality: ctx.store.read_all(Namespace::Quality)?,
        })
    }

    fn should_act(&self, perception: &Self::Perception) -> bool {
        select_candidate(&perception.status).is_some()
    }

    fn decide(&self, perception: &Self::Perception) -> Option<Self::Action> {
        let file_key = select_candidate(&perception.status)?;
        let confidence = perception
            .quality
            .get(&file_key)
            .and_then(|v| v.get("confidence"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let status_entry = perception.status.get(&file_key);
        let retry_count = status_entry
            .and_then(|v| v.get("retry_count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let inhibition = status_entry
            .and_then(|v| v.get("inhibition"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Some(ValidatorAction {
            file_key,
            confidence,
            retry_count,
            inhibition,
        })
    }

    async fn execute(
        &self,
        ctx: &AgentContext<'_>,
        action: Self::Action,
    ) -> Result<Self::Outcome, AgentError> {
        let ValidatorAction {
            file_key,
            confidence,
            retry_count,
            inhibition,
        } = action;

        let decision = decide(confidence, &ctx.config.validator, retry_count, ctx.config.guardrails.max_retry_count);

        let kind = match decision {
            ValidatorDecision::AutoValidate => {
                ctx.vcs.add(&file_key)?;
                if ctx.vcs.diff_index("HEAD")? {
                    ctx.vcs.commit(&commit_message_for(&file_key, confidence))?;
                }
                ValidatorOutcomeKind::Validated {
                    new_confidence: bump_confidence_for_validate(confidence),
                }
            }
            ValidatorDecision::Escalate => ValidatorOutcomeKind::Escalated,
            ValidatorDecision::Rollback(disposition) => {
                ctx.vcs.checkout("HEAD", &file_key)?;
                ValidatorOutcomeKind::RolledBack {
                    disposition,
                    new_confidence: drop_confidence_for_rollback(confidence),
                }
            }
        };

        Ok(ValidatorOutcome {
            file_key,
            retry_count,
            inhibition,
            kind,
        })
    }

    async fn deposit(&self, ctx: &AgentContext<'_>, outcome: Self::Outcome) -> Result<(), AgentError> {
        let ValidatorOutcome {
            file_key,
            retry_count,
            inhibition,
            kind,
        } = outcome;

        match kind {
            ValidatorOutcomeKind::Validated { new_confidence } => {
                let mut status = Map::new();
                status.insert("status".into(), json!("validated"));
                ctx.store
                    .update(Namespace::Status, &file_key, self.name(), status, ctx.guardrails)?;

                let mut quality = Map::new();
                quality.insert("confidence".into(), json!(new_confidence));
                ctx.store
                    .update(Namespace::Quality, &file_key, self.name(), quality, ctx.guardrails)?;
            }
            ValidatorOutcomeKind::Escalated => {
                let mut status = Map::new();
                status.insert("status".into(), json!("needs_review"));
                ctx.store
                    .update(Namespace::Status, &file_key, self.name(), status, ctx.guardrails)?;
            }
            ValidatorOutcomeKind::RolledBack { disposition, new_confidence } => {
                let mut status = Map::new();
                match disposition {
                    RollbackDisposition::Retry => {
                        status.insert("status".into(), json!("retry"));
                        status.insert("retry_count".into(), json!(retry_count + 1));
                        status.insert("inhibition".into(), json!((inhibition + 0.5_f64).min(1.0)));
                    }
                    RollbackDisposition::Skipped => {
                        status.insert("status".into(), json!("skipped"));
                    }
                }
                ctx.store
                    .update(Namespace::Status, &file_key, self.name(), status, ctx.guardrails)?;

                let mut quality = Map::new();
                quality.insert("confidence".into(), json!(new_confidence));
                ctx.store
                    .update(Namespace::Quality, &file_key, self.name(), quality, ctx.guardrails)?;
            }
        }
        Ok(())
    }
}
