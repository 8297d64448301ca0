//! Transformer: production agent (spec §4.5.2). Selects one candidate per
//! `run()`, harvests few-shot examples and retry context, calls the LLM,
//! runs the syntax gate with bounded self-repair, and writes the result.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use coordination::config::TransformerConfig;
use coordination::llm::extract_code_block;
use coordination::store::Namespace;

use crate::agent::{Agent, AgentContext};
use crate::capabilities::transform::{
    build_few_shot_section, build_repair_prompt, build_retry_context_section, build_transformer_user_prompt,
    diff_line_count, first_syntax_error_message, is_large_file, is_valid_python_syntax, normalize_trailing_newline,
    select_candidate, select_few_shot_keys, SelectionTier, TRANSFORMER_ROLE_PROMPT,
};
use crate::error::AgentError;
use crate::prompts::with_preamble;

/// Confidence floor for few-shot harvesting (spec §4.5.2: "`quality.
/// confidence ≥ 0.8`"), distinct from the validator's own confidence
/// thresholds even though the default happens to coincide.
const FEW_SHOT_MIN_CONFIDENCE: f64 = 0.8;

pub struct TransformerAgent;

pub struct TransformerPerception {
    tasks: Map<String, Value>,
    status: Map<String, Value>,
    quality: Map<String, Value>,
    config: TransformerConfig,
}

pub struct TransformerAction {
    file_key: String,
    tier: SelectionTier,
}

enum TransformDisposition {
    Success {
        tokens_used: u64,
        latency_ms: u64,
        diff_lines: usize,
        patterns_migrated: Vec<String>,
        repair_attempts_used: u32,
        syntax_gate_passed: bool,
        large_file_mode: bool,
        transform_mode: &'static str,
        selection_tier: &'static str,
    },
    Retryable {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

pub struct TransformerOutcome {
    file_key: String,
    retry_count: u64,
    inhibition: f64,
    disposition: TransformDisposition,
}

#[async_trait]
impl Agent for TransformerAgent {
    type Perception = TransformerPerception;
    type Action = TransformerAction;
    type Outcome = TransformerOutcome;

    fn name(&self) -> &'static str {
        "transformer"
    }

    async fn perceive(&self, ctx: &AgentContext<'_>) -> Result<Self::Perception, AgentError> {
        Ok(TransformerPerception {
            tasks: ctx.store.read_all(Namespace::Tasks)?,
            status: ctx.store.read_all(Namespace::Status)?,
            quality: ctx.store.read_all(Namespace::Quality)?,
            config: ctx.config.transformer.clone(),
        })
    }

    fn should_act(&self, perception: &Self::Perception) -> bool {
        select_candidate(&perception.tasks, &perception.status, &perception.config).is_some()
    }

    fn decide(&self, perception: &Self::Perception) -> Option<Self::Action> {
        let (file_key, tier) = select_candidate(&perception.tasks, &perception.status, &perception.config)?;
        Some(TransformerAction { file_key, tier })
    }

    async fn execute(
        &self,
        ctx: &AgentContext<'_>,
        action: Self::Action,
    ) -> Result<Self::Outcome, AgentError> {
        let file_key = action.file_key;
        let tier = action.tier;

        let task_entry = ctx.store.read_one(Namespace::Tasks, &file_key)?;
        let status_entry = ctx.store.read_one(Namespace::Status, &file_key)?;
        let quality_entry = ctx.store.read_one(Namespace::Quality, &file_key)?;

        let retry_count = status_entry
            .as_ref()
            .and_then(|v| v.get("retry_count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let inhibition = status_entry
            .as_ref()
            .and_then(|v| v.get("inhibition"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let file_kind = task_entry
            .as_ref()
            .and_then(|v| v.get("file_kind"))
            .and_then(Value::as_str)
            .unwrap_or("python")
            .to_string();
        let patterns: BTreeSet<String> = task_entry
            .as_ref()
            .and_then(|v| v.get("patterns_found"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        let patterns_list: Vec<String> = patterns.iter().cloned().collect();

        // Acquire scope lock: partial update so retry_count/inhibition survive.
        let mut lock_fields = Map::new();
        lock_fields.insert("status".into(), json!("in_progress"));
        lock_fields.insert("current_tick".into(), json!(ctx.current_tick));
        ctx.store
            .update(Namespace::Status, &file_key, self.name(), lock_fields, ctx.guardrails)?;

        let path = ctx.repo_root.join(&file_key);
        let content = std::fs::read_to_string(&path).map_err(|e| AgentError::Transform {
            file_key: file_key.clone(),
            message: format!("failed to read source: {e}"),
        })?;

        let large_file_mode = is_large_file(&content, ctx.config.transformer.large_file_line_threshold);
        let is_python = file_kind == "python";

        let few_shot_section = if is_python && !large_file_mode {
            let keys = select_few_shot_keys(
                &file_key,
                &patterns,
                &ctx.store.read_all(Namespace::Tasks)?,
                &ctx.store.read_all(Namespace::Status)?,
                &ctx.store.read_all(Namespace::Quality)?,
                FEW_SHOT_MIN_CONFIDENCE,
                ctx.config.transformer.max_examples,
            );
            let mut examples = Vec::new();
            for key in keys {
                if let Ok(example_content) = std::fs::read_to_string(ctx.repo_root.join(&key)) {
                    examples.push((key, example_content));
                }
            }
            build_few_shot_section(&examples)
        } else {
            None
        };

        let retry_context_section = if retry_count > 0 {
            let issues: Vec<String> = quality_entry
                .as_ref()
                .and_then(|v| v.get("issues"))
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default();
            build_retry_context_section(&issues, large_file_mode, ctx.config.transformer.max_retry_issues)
        } else {
            None
        };

        let transform_mode: &'static str = match (few_shot_section.is_some(), retry_context_section.is_some()) {
            (true, true) => "few_shot_retry",
            (true, false) => "few_shot",
            (false, true) => "retry",
            (false, false) => "standard",
        };

        let system = with_preamble(&ctx.config.prompts, TRANSFORMER_ROLE_PROMPT);
        let user_prompt = build_transformer_user_prompt(
            &file_key,
            &content,
            few_shot_section.as_deref(),
            retry_context_section.as_deref(),
        );

        let Some(llm) = ctx.llm else {
            return Ok(TransformerOutcome {
                file_key,
                retry_count,
                inhibition,
                disposition: TransformDisposition::Retryable {
                    reason: "no LLM client configured".to_string(),
                },
            });
        };

        let response = match llm.call(&user_prompt, Some(&system)).await {
            Ok(r) => r,
            Err(e @ coordination::LlmError::Configuration(_)) => return Err(AgentError::from(e)),
            Err(e) => {
                return Ok(TransformerOutcome {
                    file_key,
                    retry_count,
                    inhibition,
                    disposition: TransformDisposition::Failed { reason: e.to_string() },
                })
            }
        };

        let mut tokens_used = response.tokens_used;
        let mut latency_ms = response.latency_ms;
        let mut current_code = extract_code_block(&response.content);

        if current_code.trim().is_empty() {
            return Ok(TransformerOutcome {
                file_key,
                retry_count,
                inhibition,
                disposition: TransformDisposition::Retryable {
                    reason: "LLM returned an empty transform result".to_string(),
                },
            });
        }

        let mut repair_attempts_used = 0u32;
        let mut syntax_gate_passed = true;

        if is_python {
            syntax_gate_passed = is_valid_python_syntax(&current_code);
            while !syntax_gate_passed && repair_attempts_used < ctx.config.transformer.repair_attempts_max {
                let error_message =
                    first_syntax_error_message(&current_code).unwrap_or_else(|| "unknown syntax error".to_string());
                let repair_prompt = build_repair_prompt(&file_key, &current_code, &error_message);
                match llm.call(&repair_prompt, Some(&system)).await {
                    Ok(repair_response) => {
                        tokens_used += repair_response.tokens_used;
                        latency_ms += repair_response.latency_ms;
                        current_code = extract_code_block(&repair_response.content);
                        repair_attempts_used += 1;
                        syntax_gate_passed = is_valid_python_syntax(&current_code);
                    }
                    Err(e) => {
                        warn!(file_key, error = %e, "transformer: repair call failed");
                        repair_attempts_used += 1;
                        break;
                    }
                }
            }

            if !syntax_gate_passed {
                return Ok(TransformerOutcome {
                    file_key,
                    retry_count,
                    inhibition,
                    disposition: TransformDisposition::Retryable {
                        reason: format!(
                            "syntax gate failed after {repair_attempts_used} repair attempt(s)"
                        ),
                    },
                });
            }
        }

        let new_content = normalize_trailing_newline(&current_code);
        let diff_lines = diff_line_count(&content, &new_content);

        std::fs::write(&path, &new_content).map_err(|e| AgentError::Transform {
            file_key: file_key.clone(),
            message: format!("failed to write migrated source: {e}"),
        })?;

        Ok(TransformerOutcome {
            file_key,
            retry_count,
            inhibition,
            disposition: TransformDisposition::Success {
                tokens_used,
                latency_ms,
                diff_lines,
                patterns_migrated: patterns_list,
                repair_attempts_used,
                syntax_gate_passed,
                large_file_mode,
                transform_mode,
                selection_tier: tier.as_str(),
            },
        })
    }

    async fn deposit(&self, ctx: &AgentContext<'_>, outcome: Self::Outcome) -> Result<(), AgentError> {
        let mut fields = Map::new();
        match outcome.disposition {
            TransformDisposition::Success {
                tokens_used,
                latency_ms,
                diff_lines,
                patterns_migrated,
                repair_attempts_used,
                syntax_gate_passed,
                large_file_mode,
                transform_mode,
                selection_tier,
            } => {
                fields.insert("status".into(), json!("transformed"));
                fields.insert(
                    "metadata".into(),
                    json!({
                        "tokens_used": tokens_used,
                        "latency_ms": latency_ms,
                        "diff_lines": diff_lines,
                        "patterns_migrated": patterns_migrated,
                        "repair_attempts_used": repair_attempts_used,
                        "syntax_gate_passed": syntax_gate_passed,
                        "large_file_mode": large_file_mode,
                        "transform_mode": transform_mode,
                        "selection_tier": selection_tier,
                    }),
                );
            }
            TransformDisposition::Retryable { reason } => {
                fields.insert("status".into(), json!("retry"));
                fields.insert("retry_count".into(), json!(outcome.retry_count + 1));
                fields.insert("inhibition".into(), json!((outcome.inhibition + 0.5_f64).min(1.0)));
                fields.insert("metadata".into(), json!({ "last_error": reason }));
            }
            TransformDisposition::Failed { reason } => {
                fields.insert("status".into(), json!("failed"));
                fields.insert("metadata".into(), json!({ "last_error": reason }));
            }
        }
        ctx.store
            .update(Namespace::Status, &outcome.file_key, self.name(), fields, ctx.guardrails)?;
        Ok(())
    }
}
