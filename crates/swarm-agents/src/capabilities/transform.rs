//! Transformer's candidate selection, few-shot/retry-context harvesting,
//! prompt construction and syntax-gate checking (spec §4.5.2). Ported
//! from the reference implementation's `agents/capabilities/transform.py`
//! and `agents/transformer.py`.

use std::collections::BTreeSet;

use coordination::config::TransformerConfig;
use serde_json::{Map, Value};
use tree_sitter::Parser;

pub const TRANSFORMER_ROLE_PROMPT: &str =
    "Your role: TRANSFORMER (production). You migrate a single Python 2 source file to Python 3, \
     preserving behavior exactly. Return only the complete migrated file contents inside a single \
     fenced code block, with no commentary before or after the fence.";

/// One of the three candidate tiers selected, in priority order. Exposed
/// only for tests that want to assert which tier fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    Preferred,
    Fallback,
    Starved,
}

impl SelectionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionTier::Preferred => "preferred",
            SelectionTier::Fallback => "fallback",
            SelectionTier::Starved => "starved",
        }
    }
}

/// §4.5.2 three-tier candidate selection over `status ∈ {pending, retry}`.
/// Returns the chosen file key and which tier produced it.
pub fn select_candidate(
    tasks: &Map<String, Value>,
    status: &Map<String, Value>,
    config: &TransformerConfig,
) -> Option<(String, SelectionTier)> {
    let eligible: Vec<&String> = status
        .iter()
        .filter(|(_, v)| {
            matches!(
                v.get("status").and_then(Value::as_str),
                Some("pending") | Some("retry")
            )
        })
        .map(|(k, _)| k)
        .collect();

    let intensity = |key: &str| -> f64 {
        tasks
            .get(key)
            .and_then(|v| v.get("intensity"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };
    let inhibition = |key: &str| -> f64 {
        status
            .get(key)
            .and_then(|v| v.get("inhibition"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };

    let mut preferred: Vec<&String> = eligible
        .iter()
        .copied()
        .filter(|k| intensity(k) > config.transformer_intensity_min && inhibition(k) < config.inhibition_threshold)
        .collect();
    if !preferred.is_empty() {
        preferred.sort_by(|a, b| {
            intensity(b)
                .partial_cmp(&intensity(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        return Some((preferred[0].clone(), SelectionTier::Preferred));
    }

    let mut fallback: Vec<&String> = eligible
        .iter()
        .copied()
        .filter(|k| inhibition(k) < config.inhibition_threshold)
        .collect();
    if !fallback.is_empty() {
        fallback.sort_by(|a, b| {
            intensity(b)
                .partial_cmp(&intensity(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        return Some((fallback[0].clone(), SelectionTier::Fallback));
    }

    let mut starved: Vec<&String> = eligible
        .iter()
        .copied()
        .filter(|k| inhibition(k) >= config.inhibition_threshold)
        .collect();
    if !starved.is_empty() {
        starved.sort_by(|a, b| {
            inhibition(a)
                .partial_cmp(&inhibition(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    intensity(b)
                        .partial_cmp(&intensity(a))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.cmp(b))
        });
        return Some((starved[0].clone(), SelectionTier::Starved));
    }

    None
}

/// §4.5.2 few-shot harvesting: up to `max_examples` other validated
/// files whose confidence clears `min_confidence` and whose pattern set
/// intersects `target_patterns`, ranked by confidence then file key.
pub fn select_few_shot_keys(
    target_file_key: &str,
    target_patterns: &BTreeSet<String>,
    tasks: &Map<String, Value>,
    status: &Map<String, Value>,
    quality: &Map<String, Value>,
    min_confidence: f64,
    max_examples: usize,
) -> Vec<String> {
    if max_examples == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<(String, f64)> = status
        .iter()
        .filter(|(key, v)| {
            key.as_str() != target_file_key
                && v.get("status").and_then(Value::as_str) == Some("validated")
        })
        .filter_map(|(key, _)| {
            let confidence = quality.get(key)?.get("confidence")?.as_f64()?;
            if confidence < min_confidence {
                return None;
            }
            let patterns: BTreeSet<String> = tasks
                .get(key)
                .and_then(|v| v.get("patterns_found"))
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            if patterns.is_disjoint(target_patterns) {
                return None;
            }
            Some((key.clone(), confidence))
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    candidates
        .into_iter()
        .take(max_examples)
        .map(|(key, _)| key)
        .collect()
}

/// Whether the target source is large enough to disable few-shot
/// examples and truncate retry context (spec §4.5.2).
pub fn is_large_file(source: &str, large_file_line_threshold: usize) -> bool {
    source.lines().count() >= large_file_line_threshold
}

/// Build the "Few-shot examples" prompt section from harvested
/// `(file_key, content)` pairs. Returns `None` when empty.
pub fn build_few_shot_section(examples: &[(String, String)]) -> Option<String> {
    if examples.is_empty() {
        return None;
    }
    let mut out = String::from("Few-shot examples (previously validated migrations with overlapping patterns):\n");
    for (key, content) in examples {
        out.push_str(&format!("\n--- {key} ---\n{content}\n"));
    }
    Some(out)
}

/// Build the "Retry context" prompt section from prior `quality.issues`,
/// truncated to `max_retry_issues` chars in large-file mode.
pub fn build_retry_context_section(
    issues: &[String],
    large_file_mode: bool,
    max_retry_issues: usize,
) -> Option<String> {
    if issues.is_empty() {
        return None;
    }
    let mut joined = format!("Retry context (issues from the previous attempt):\n{}", issues.join("\n"));
    if large_file_mode && joined.chars().count() > max_retry_issues {
        joined = joined.chars().take(max_retry_issues).collect::<String>() + "...";
    }
    Some(joined)
}

pub fn build_transformer_user_prompt(
    file_key: &str,
    file_content: &str,
    few_shot_section: Option<&str>,
    retry_context_section: Option<&str>,
) -> String {
    let mut prompt = format!("File: {file_key}\n---\n{file_content}\n---\n");
    if let Some(section) = few_shot_section {
        prompt.push('\n');
        prompt.push_str(section);
    }
    if let Some(section) = retry_context_section {
        prompt.push('\n');
        prompt.push_str(section);
    }
    prompt.push_str(
        "\nMigrate this file to Python 3. Return the complete file contents in a single fenced code block.",
    );
    prompt
}

pub fn build_repair_prompt(file_key: &str, broken_code: &str, syntax_error: &str) -> String {
    format!(
        "The following migration of {file_key} does not parse as valid Python 3:\n\n\
         ```python\n{broken_code}\n```\n\n\
         Parser error: {syntax_error}\n\n\
         Return the complete corrected file contents in a single fenced code block."
    )
}

/// True iff `source` parses as syntactically valid Python 3 (§4.5.2
/// syntax gate). `false` on empty input — an empty transform result is
/// rejected before the gate ever runs.
pub fn is_valid_python_syntax(source: &str) -> bool {
    first_syntax_error_message(source).is_none()
}

/// First syntax error tree-sitter finds, rendered as a human-readable
/// "line N: ..." message suitable for feeding back to the LLM verbatim.
pub fn first_syntax_error_message(source: &str) -> Option<String> {
    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_python::LANGUAGE.into()).is_err() {
        return None;
    }
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }
    find_error_node(root).map(|node| {
        let pos = node.start_position();
        format!(
            "line {}: unexpected or missing token near {:?}",
            pos.row + 1,
            node.kind()
        )
    })
}

fn find_error_node(node: tree_sitter::Node) -> Option<tree_sitter::Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_error_node(child) {
            return Some(found);
        }
    }
    None
}

/// Normalize trailing newline: exactly one `\n` at end of file.
pub fn normalize_trailing_newline(content: &str) -> String {
    let trimmed = content.trim_end_matches('\n');
    format!("{trimmed}\n")
}

/// Heuristic diff-line count between `old` and `new` content: number of
/// positions whose line differs, counting extra lines on the longer side.
pub fn diff_line_count(old: &str, new: &str) -> usize {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let max_len = old_lines.len().max(new_lines.len());
    let mut changed = 0;
    for i in 0..max_len {
        match (old_lines.get(i), new_lines.get(i)) {
            (Some(a), Some(b)) if a == b => {}
            _ => changed += 1,
        }
    }
    changed
}
