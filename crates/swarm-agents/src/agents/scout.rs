//! Scout: discovery agent (spec §4.5.1). A single `run()` discovers and
//! scores every not-yet-visited candidate file in one pass, because
//! normalization (`normalize_entries`) is a min-max across the whole batch.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use coordination::store::Namespace;

use crate::agent::{Agent, AgentContext};
use crate::capabilities::discover::{
    analyze_python_file, analyze_text_file, build_scout_user_prompt, discover_candidate_files,
    normalize_entries, parse_llm_analysis, read_text_file, DiscoveryEntry, SCOUT_ROLE_PROMPT,
};
use crate::error::AgentError;
use crate::prompts::with_preamble;

pub struct ScoutAgent;

pub struct ScoutPerception {
    candidates: Vec<String>,
    all_python_keys: BTreeSet<String>,
    all_file_keys: BTreeSet<String>,
}

pub struct ScoutOutcome {
    entries: Vec<DiscoveryEntry>,
}

#[async_trait]
impl Agent for ScoutAgent {
    type Perception = ScoutPerception;
    type Action = Vec<String>;
    type Outcome = ScoutOutcome;

    fn name(&self) -> &'static str {
        "scout"
    }

    async fn perceive(&self, ctx: &AgentContext<'_>) -> Result<Self::Perception, AgentError> {
        let discovered = discover_candidate_files(ctx.repo_root, ctx.config)
            .map_err(|e| AgentError::Discover { message: e.to_string() })?;

        let existing_tasks = ctx.store.read_all(Namespace::Tasks)?;
        let existing_status = ctx.store.read_all(Namespace::Status)?;

        let all_python_keys: BTreeSet<String> = discovered
            .iter()
            .filter(|k| k.ends_with(".py"))
            .cloned()
            .collect();
        let all_file_keys: BTreeSet<String> = discovered.iter().cloned().collect();

        let candidates: Vec<String> = discovered
            .into_iter()
            .filter(|key| !existing_tasks.contains_key(key))
            .filter(|key| {
                existing_status
                    .get(key)
                    .and_then(|v| v.get("status"))
                    .and_then(Value::as_str)
                    .map(|s| !matches!(s, "validated" | "skipped" | "needs_review"))
                    .unwrap_or(true)
            })
            .collect();

        Ok(ScoutPerception {
            candidates,
            all_python_keys,
            all_file_keys,
        })
    }

    fn should_act(&self, perception: &Self::Perception) -> bool {
        !perception.candidates.is_empty()
    }

    fn decide(&self, perception: &Self::Perception) -> Option<Self::Action> {
        Some(perception.candidates.clone())
    }

    async fn execute(
        &self,
        ctx: &AgentContext<'_>,
        action: Self::Action,
    ) -> Result<Self::Outcome, AgentError> {
        let perception_python_keys: BTreeSet<String> =
            action.iter().filter(|k| k.ends_with(".py")).cloned().collect();
        let all_file_keys: BTreeSet<String> = action.iter().cloned().collect();

        let mut entries = Vec::with_capacity(action.len());
        for file_key in &action {
            let path = ctx.repo_root.join(file_key);
            let is_python = file_key.ends_with(".py");
            let content = match read_text_file(&path, ctx.config.non_python.max_text_file_bytes, !is_python) {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) => {
                    warn!(file_key, error = %e, "scout: failed to read file, skipping");
                    continue;
                }
            };

            if is_python {
                let llm_analysis = if ctx.config.scout.llm_analysis_enabled {
                    self.analyze_with_llm(ctx, file_key, &content).await
                } else {
                    None
                };
                entries.push(analyze_python_file(
                    file_key,
                    &content,
                    &perception_python_keys,
                    llm_analysis,
                    &ctx.config.scout,
                ));
            } else if let Some(entry) = analyze_text_file(
                file_key,
                &content,
                &all_file_keys,
                &ctx.config.non_python.legacy_tokens,
            ) {
                entries.push(entry);
            }
        }

        normalize_entries(&mut entries, ctx.config.scout.clamp_min, ctx.config.scout.clamp_max);
        Ok(ScoutOutcome { entries })
    }

    async fn deposit(&self, ctx: &AgentContext<'_>, outcome: Self::Outcome) -> Result<(), AgentError> {
        for entry in outcome.entries {
            let mut task: Map<String, Value> = Map::new();
            task.insert("intensity".into(), json!(entry.intensity));
            task.insert("patterns_found".into(), json!(entry.patterns_found));
            task.insert("pattern_details".into(), serde_json::to_value(&entry.pattern_details).unwrap_or(Value::Null));
            task.insert("dependencies".into(), json!(entry.dependencies));
            task.insert("analysis_source".into(), json!(entry.analysis_source));
            task.insert("file_kind".into(), json!(entry.file_kind));
            if let Some(score) = entry.llm_complexity_score {
                task.insert("llm_complexity_score".into(), json!(score));
            }
            ctx.store.write(Namespace::Tasks, &entry.file_key, task, self.name(), ctx.guardrails)?;

            let mut status: Map<String, Value> = Map::new();
            status.insert("status".into(), json!("pending"));
            status.insert("retry_count".into(), json!(0));
            status.insert("inhibition".into(), json!(0.0));
            ctx.store.write(Namespace::Status, &entry.file_key, status, self.name(), ctx.guardrails)?;
        }
        Ok(())
    }
}

impl ScoutAgent {
    async fn analyze_with_llm(
        &self,
        ctx: &AgentContext<'_>,
        file_key: &str,
        content: &str,
    ) -> Option<crate::capabilities::discover::LlmAnalysis> {
        let llm = ctx.llm?;
        let system = with_preamble(&ctx.config.prompts, SCOUT_ROLE_PROMPT);
        let prompt = build_scout_user_prompt(file_key, content);
        match llm.call(&prompt, Some(&system)).await {
            Ok(response) => {
                let code = coordination::llm::extract_code_block(&response.content);
                parse_llm_analysis(&code)
            }
            Err(e) => {
                warn!(file_key, error = %e, "scout: llm analysis call failed, falling back to regex-only");
                None
            }
        }
    }
}
