//! Tester: evaluation agent (spec §4.5.3). Selects one `transformed`
//! candidate per `run()`, runs the adaptive fallback chain for Python
//! files (per-module tests → compile/import probe → global suite) or
//! structural validation for non-Python text files, and deposits quality.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use coordination::config::NonPythonConfig;
use coordination::store::Namespace;

use crate::agent::{Agent, AgentContext};
use crate::capabilities::test::{
    classify_global_suite_failure, classify_import_failure, discover_test_file, module_name_for,
    parse_coverage_percent, parse_pytest_summary, select_candidate, validate_non_python_file, FailureClass,
    COMPILE_IMPORT_FAIL_CONFIDENCE, FALLBACK_PASS_OR_INCONCLUSIVE_CONFIDENCE, FALLBACK_RELATED_CONFIDENCE,
    NO_TESTS_RUN_CONFIDENCE,
};
use crate::error::AgentError;

pub struct TesterAgent;

pub struct TesterPerception {
    status: Map<String, Value>,
    tasks: Map<String, Value>,
}

pub struct TesterAction {
    file_key: String,
    file_kind: String,
}

pub struct TesterOutcome {
    file_key: String,
    confidence: f64,
    tests_total: u64,
    tests_passed: u64,
    tests_failed: u64,
    coverage: f64,
    issues: Vec<String>,
    test_mode: &'static str,
}

#[async_trait]
impl Agent for TesterAgent {
    type Perception = TesterPerception;
    type Action = TesterAction;
    type Outcome = TesterOutcome;

    fn name(&self) -> &'static str {
        "tester"
    }

    async fn perceive(&self, ctx: &AgentContext<'_>) -> Result<Self::Perception, AgentError> {
        Ok(TesterPerception {
            status: ctx.store.read_all(Namespace::Status)?,
            tasks: ctx.store.read_all(Namespace::Tasks)?,
        })
    }

    fn should_act(&self, perception: &Self::Perception) -> bool {
        select_candidate(&perception.status).is_some()
    }

    fn decide(&self, perception: &Self::Perception) -> Option<Self::Action> {
        let file_key = select_candidate(&perception.status)?;
        let file_kind = perception
            .tasks
            .get(&file_key)
            .and_then(|v| v.get("file_kind"))
            .and_then(Value::as_str)
            .unwrap_or("python")
            .to_string();
        Some(TesterAction { file_key, file_kind })
    }

    async fn execute(
        &self,
        ctx: &AgentContext<'_>,
        action: Self::Action,
    ) -> Result<Self::Outcome, AgentError> {
        let TesterAction { file_key, file_kind } = action;

        if file_kind != "python" {
            return self.evaluate_non_python(ctx, file_key);
        }

        let module_name = module_name_for(&file_key);

        if let Some(test_file) = discover_test_file(ctx.repo_root, &file_key) {
            let out = ctx.subprocess.run_module_tests(ctx.repo_root, &test_file, &module_name)?;
            let (total, passed, failed) = parse_pytest_summary(&out.stdout);
            let coverage = parse_coverage_percent(&out.stdout);
            let confidence = if total == 0 { NO_TESTS_RUN_CONFIDENCE } else { passed as f64 / total as f64 };
            let issues = if out.success() { Vec::new() } else { vec![out.compact_issue()] };
            return Ok(TesterOutcome {
                file_key,
                confidence,
                tests_total: total,
                tests_passed: passed,
                tests_failed: failed,
                coverage,
                issues,
                test_mode: "module_tests",
            });
        }

        let compile_out = ctx.subprocess.byte_compile(ctx.repo_root, &file_key)?;
        if !compile_out.success() {
            let combined = format!("{} {}", compile_out.stdout, compile_out.stderr);
            if classify_import_failure(&combined) == FailureClass::Related {
                return Ok(TesterOutcome {
                    file_key,
                    confidence: COMPILE_IMPORT_FAIL_CONFIDENCE,
                    tests_total: 0,
                    tests_passed: 0,
                    tests_failed: 0,
                    coverage: 0.0,
                    issues: vec![compile_out.compact_issue()],
                    test_mode: "fallback_compile_import_fail",
                });
            }
        } else {
            let import_out = ctx.subprocess.import_module(ctx.repo_root, &module_name)?;
            if !import_out.success() {
                let combined = format!("{} {}", import_out.stdout, import_out.stderr);
                if classify_import_failure(&combined) == FailureClass::Related {
                    return Ok(TesterOutcome {
                        file_key,
                        confidence: COMPILE_IMPORT_FAIL_CONFIDENCE,
                        tests_total: 0,
                        tests_passed: 0,
                        tests_failed: 0,
                        coverage: 0.0,
                        issues: vec![import_out.compact_issue()],
                        test_mode: "fallback_compile_import_fail",
                    });
                }
            }
        }

        let global_out = ctx.subprocess.run_global_suite(ctx.repo_root)?;
        let (total, passed, failed) = parse_pytest_summary(&global_out.stdout);
        if global_out.success() {
            Ok(TesterOutcome {
                file_key,
                confidence: FALLBACK_PASS_OR_INCONCLUSIVE_CONFIDENCE,
                tests_total: total,
                tests_passed: passed,
                tests_failed: failed,
                coverage: parse_coverage_percent(&global_out.stdout),
                issues: Vec::new(),
                test_mode: "fallback_global_inconclusive",
            })
        } else {
            let combined = format!("{} {}", global_out.stdout, global_out.stderr);
            let (confidence, issues, test_mode) = match classify_global_suite_failure(&combined, &file_key, &module_name) {
                FailureClass::Related => (
                    FALLBACK_RELATED_CONFIDENCE,
                    vec![global_out.compact_issue()],
                    "fallback_global_related",
                ),
                FailureClass::Inconclusive => (
                    FALLBACK_PASS_OR_INCONCLUSIVE_CONFIDENCE,
                    Vec::new(),
                    "fallback_global_inconclusive",
                ),
            };
            Ok(TesterOutcome {
                file_key,
                confidence,
                tests_total: total,
                tests_passed: passed,
                tests_failed: failed,
                coverage: parse_coverage_percent(&global_out.stdout),
                issues,
                test_mode,
            })
        }
    }

    async fn deposit(&self, ctx: &AgentContext<'_>, outcome: Self::Outcome) -> Result<(), AgentError> {
        let mut quality = Map::new();
        quality.insert("confidence".into(), json!(outcome.confidence));
        quality.insert("tests_total".into(), json!(outcome.tests_total));
        quality.insert("tests_passed".into(), json!(outcome.tests_passed));
        quality.insert("tests_failed".into(), json!(outcome.tests_failed));
        quality.insert("coverage".into(), json!(outcome.coverage));
        quality.insert("issues".into(), json!(outcome.issues));
        quality.insert("metadata".into(), json!({ "test_mode": outcome.test_mode }));
        ctx.store
            .write(Namespace::Quality, &outcome.file_key, quality, self.name(), ctx.guardrails)?;

        let mut status = Map::new();
        status.insert("status".into(), json!("tested"));
        ctx.store
            .update(Namespace::Status, &outcome.file_key, self.name(), status, ctx.guardrails)?;
        Ok(())
    }
}

impl TesterAgent {
    fn evaluate_non_python(&self, ctx: &AgentContext<'_>, file_key: String) -> Result<TesterOutcome, AgentError> {
        let path = ctx.repo_root.join(&file_key);
        let content = std::fs::read_to_string(&path).map_err(|e| AgentError::Test {
            file_key: file_key.clone(),
            message: format!("failed to read source: {e}"),
        })?;

        let all_file_keys: BTreeSet<String> = ctx
            .store
            .read_all(Namespace::Tasks)?
            .keys()
            .cloned()
            .collect();

        let config: &NonPythonConfig = &ctx.config.non_python;
        let issues = validate_non_python_file(&file_key, &content, &all_file_keys, config);
        let confidence = if issues.is_empty() { config.pass_confidence } else { config.fail_confidence };

        Ok(TesterOutcome {
            file_key,
            confidence,
            tests_total: 0,
            tests_passed: 0,
            tests_failed: 0,
            coverage: 0.0,
            issues,
            test_mode: "structural_validation",
        })
    }
}
