//! Tester's adaptive evaluation capability (spec §4.5.3): per-module
//! test discovery, the byte-compile/import/global-suite fallback chain,
//! and non-Python structural validation. Ported from the reference
//! implementation's `agents/capabilities/test.py`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use coordination::config::NonPythonConfig;
use regex::Regex;
use serde_json::{Map, Value};

/// Markers in compile/import stderr that mean "this failure says nothing
/// about the migration's correctness" rather than "the migration broke
/// this module" (spec §4.5.3: optional-dependency hints, CLI `SystemExit`,
/// Python-2-only stdlib missing).
const INCONCLUSIVE_MARKERS: [&str; 6] = [
    "ModuleNotFoundError",
    "ImportError: No module named",
    "SystemExit",
    "No module named 'Tkinter'",
    "No module named 'ConfigParser'",
    "No module named 'urllib2'",
];

const INCONCLUSIVE_GLOBAL_MARKERS: [&str; 3] = ["conftest", "no tests ran", "collected 0 items"];

pub const COMPILE_IMPORT_FAIL_CONFIDENCE: f64 = 0.4;
pub const FALLBACK_RELATED_CONFIDENCE: f64 = 0.6;
pub const FALLBACK_PASS_OR_INCONCLUSIVE_CONFIDENCE: f64 = 0.8;
pub const NO_TESTS_RUN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Inconclusive,
    Related,
}

/// §4.5.3 candidate selection: any `status=transformed`, lexicographic first.
pub fn select_candidate(status: &Map<String, Value>) -> Option<String> {
    let mut keys: Vec<&String> = status
        .iter()
        .filter(|(_, v)| v.get("status").and_then(Value::as_str) == Some("transformed"))
        .map(|(k, _)| k)
        .collect();
    keys.sort();
    keys.first().map(|k| (*k).clone())
}

/// Probe for a colocated or `tests/`-sibling module `test_<stem>.py`.
pub fn discover_test_file(repo_root: &Path, file_key: &str) -> Option<String> {
    let path = Path::new(file_key);
    let stem = path.file_stem()?.to_string_lossy().to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let test_name = format!("test_{stem}.py");

    let colocated = join_key(parent, &test_name);
    if repo_root.join(&colocated).is_file() {
        return Some(colocated);
    }

    let sibling = join_key(&parent.join("tests"), &test_name);
    if repo_root.join(&sibling).is_file() {
        return Some(sibling);
    }

    None
}

fn join_key(dir: &Path, name: &str) -> String {
    if dir.as_os_str().is_empty() {
        name.to_string()
    } else {
        format!("{}/{name}", dir.to_string_lossy().replace('\\', "/"))
    }
}

/// Module import name (dotted path minus `.py`) used for global-suite
/// "does this failure mention me" classification and for `import X` probes.
pub fn module_name_for(file_key: &str) -> String {
    file_key.trim_end_matches(".py").replace('/', ".")
}

/// Classify a compile/import failure as inconclusive (don't blame the
/// migration) or related (count it against confidence).
pub fn classify_import_failure(combined_output: &str) -> FailureClass {
    if INCONCLUSIVE_MARKERS
        .iter()
        .any(|marker| combined_output.contains(marker))
    {
        FailureClass::Inconclusive
    } else {
        FailureClass::Related
    }
}

/// Classify a non-zero global-suite run: "related" if the output
/// mentions the module path/name/module-id, else "inconclusive".
pub fn classify_global_suite_failure(combined_output: &str, file_key: &str, module_name: &str) -> FailureClass {
    if INCONCLUSIVE_GLOBAL_MARKERS
        .iter()
        .any(|marker| combined_output.to_lowercase().contains(marker))
    {
        return FailureClass::Inconclusive;
    }
    if combined_output.contains(file_key) || combined_output.contains(module_name) {
        FailureClass::Related
    } else {
        FailureClass::Inconclusive
    }
}

/// Parse a pytest terminal summary line (`"3 passed, 1 failed in 0.12s"`)
/// into `(total, passed, failed)`.
pub fn parse_pytest_summary(stdout: &str) -> (u64, u64, u64) {
    let passed = extract_count(stdout, r"(\d+)\s+passed");
    let failed = extract_count(stdout, r"(\d+)\s+failed");
    let errored = extract_count(stdout, r"(\d+)\s+error");
    (passed + failed + errored, passed, failed + errored)
}

fn extract_count(text: &str, pattern: &str) -> u64 {
    Regex::new(pattern)
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parse a `pytest-cov` `TOTAL ... NN%` line into a `[0,1]` fraction.
pub fn parse_coverage_percent(stdout: &str) -> f64 {
    Regex::new(r"TOTAL\s+.*?(\d+)%")
        .ok()
        .and_then(|re| re.captures(stdout))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|p| (p / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

/// Structural validation for a non-Python text file: parse-check by
/// extension, legacy-token scan, broken `*.py` cross-reference scan.
/// Returns the issues found; empty ⇒ clean.
pub fn validate_non_python_file(
    file_key: &str,
    content: &str,
    all_file_keys: &BTreeSet<String>,
    config: &NonPythonConfig,
) -> Vec<String> {
    let mut issues = Vec::new();

    if let Some(err) = parse_check(file_key, content) {
        issues.push(err);
    }
    issues.extend(detect_legacy_tokens(content, &config.legacy_tokens));
    issues.extend(detect_broken_py_references(content, all_file_keys));
    issues
}

fn parse_check(file_key: &str, content: &str) -> Option<String> {
    let ext = Path::new(file_key)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;

    match ext.as_str() {
        ".json" => serde_json::from_str::<Value>(content)
            .err()
            .map(|e| format!("invalid JSON: {e}")),
        ".yaml" | ".yml" => serde_yaml::from_str::<serde_yaml::Value>(content)
            .err()
            .map(|e| format!("invalid YAML: {e}")),
        ".toml" => content
            .parse::<toml::Value>()
            .err()
            .map(|e| format!("invalid TOML: {e}")),
        ".sh" => check_shell_syntax(content),
        _ => None,
    }
}

fn check_shell_syntax(content: &str) -> Option<String> {
    let mut dir = std::env::temp_dir();
    dir.push(format!("swarm-shcheck-{}.sh", std::process::id()));
    if std::fs::write(&dir, content).is_err() {
        return None;
    }
    let result = std::process::Command::new("sh")
        .arg("-n")
        .arg(&dir)
        .output();
    let _ = std::fs::remove_file(&dir);
    match result {
        Ok(output) if !output.status.success() => {
            Some(format!("shell syntax error: {}", String::from_utf8_lossy(&output.stderr)))
        }
        _ => None,
    }
}

fn detect_legacy_tokens(content: &str, legacy_tokens: &[String]) -> Vec<String> {
    legacy_tokens
        .iter()
        .filter(|token| content.contains(token.as_str()))
        .map(|token| format!("legacy token found: {token:?}"))
        .collect()
}

const PY_REF_PATTERN: &str = r"[\w./\-]+\.py\b";

fn detect_broken_py_references(content: &str, all_file_keys: &BTreeSet<String>) -> Vec<String> {
    let Ok(re) = Regex::new(PY_REF_PATTERN) else {
        return Vec::new();
    };
    re.find_iter(content)
        .map(|m| m.as_str().trim_start_matches("./").to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|reference| !all_file_keys.contains(reference))
        .map(|reference| format!("broken reference to {reference:?}"))
        .collect()
}

pub fn path_for(repo_root: &Path, file_key: &str) -> PathBuf {
    repo_root.join(file_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selects_lexicographically_first_transformed() {
        let mut status = Map::new();
        status.insert("b.py".into(), json!({"status": "transformed"}));
        status.insert("a.py".into(), json!({"status": "transformed"}));
        status.insert("c.py".into(), json!({"status": "pending"}));
        assert_eq!(select_candidate(&status), Some("a.py".to_string()));
    }

    #[test]
    fn classifies_related_failure_when_module_mentioned_s5() {
        let output = "collected 3 items\nmodule.py:12: AssertionError\n1 failed";
        assert_eq!(
            classify_global_suite_failure(output, "module.py", "module"),
            FailureClass::Related
        );
    }

    #[test]
    fn classifies_inconclusive_when_module_not_mentioned() {
        let output = "ERROR conftest.py - no tests ran";
        assert_eq!(
            classify_global_suite_failure(output, "module.py", "module"),
            FailureClass::Inconclusive
        );
    }

    #[test]
    fn import_failure_missing_optional_dependency_is_inconclusive() {
        let output = "ModuleNotFoundError: No module named 'numpy'";
        assert_eq!(classify_import_failure(output), FailureClass::Inconclusive);
    }

    #[test]
    fn parses_pytest_summary_counts() {
        assert_eq!(parse_pytest_summary("3 passed, 1 failed in 0.04s"), (4, 3, 1));
    }

    #[test]
    fn parses_coverage_percent() {
        assert_eq!(parse_coverage_percent("TOTAL  120  18  85%\n"), 0.85);
    }

    #[test]
    fn module_name_replaces_slashes_and_strips_extension() {
        assert_eq!(module_name_for("pkg/sub/mod.py"), "pkg.sub.mod");
    }

    #[test]
    fn detects_legacy_tokens_and_broken_references() {
        let all: BTreeSet<String> = ["present.py".to_string()].into_iter().collect();
        let content = "see present.py and missing.py, uses print ";
        let config = NonPythonConfig::default();
        let issues = validate_non_python_file("notes.txt", content, &all, &config);
        assert!(issues.iter().any(|i| i.contains("missing.py")));
        assert!(issues.iter().any(|i| i.contains("print")));
    }

    #[test]
    fn json_parse_check_flags_invalid_json() {
        let all = BTreeSet::new();
        let config = NonPythonConfig::default();
        let issues = validate_non_python_file("bad.json", "{not valid", &all, &config);
        assert!(issues.iter().any(|i| i.contains("invalid JSON")));
    }
}
