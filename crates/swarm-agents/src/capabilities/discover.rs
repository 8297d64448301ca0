//! Scout's file discovery and pattern-detection capability, shared
//! between the concrete `ScoutAgent` and anything else that wants the
//! same analysis. Ported from the reference implementation's
//! `agents/capabilities/discover.py`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use coordination::config::{Config, ScoutConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

pub const SCOUT_ROLE_PROMPT: &str =
    "Your role: SCOUT (explorer/forager). You analyze Python 2 source files to identify ALL \
     migration patterns. Your output becomes task pheromones that guide a downstream \
     Transformer agent. Any pattern you miss will not be addressed by the colony. Return only \
     valid JSON matching the requested schema.";

const EXCLUDED_DIRS: [&str; 6] = [
    ".git",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
];

/// All pattern identifiers the Scout can emit, AST-only entries included.
pub const PATTERN_NAMES: [&str; 19] = [
    "print_statement",
    "print_chevron",
    "dict_iteritems",
    "dict_iterkeys",
    "dict_itervalues",
    "dict_has_key",
    "xrange",
    "unicode_literal",
    "long_literal",
    "raise_syntax",
    "except_syntax",
    "old_division",
    "raw_input",
    "apply_builtin",
    "execfile_builtin",
    "string_module",
    "urllib_import",
    "metaclass_syntax",
    "future_imports",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: String,
    pub line: u64,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryEntry {
    pub file_key: String,
    pub file_kind: &'static str,
    pub patterns_found: Vec<String>,
    pub pattern_details: Vec<PatternMatch>,
    pub dependencies: Vec<String>,
    pub dep_count: usize,
    pub raw_score: f64,
    pub analysis_source: &'static str,
    pub llm_complexity_score: Option<f64>,
    /// Set by `normalize_entries` after min-max normalization + clamping.
    pub intensity: f64,
}

/// Optional merged-in LLM analysis, already parsed and validated.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmAnalysis {
    pub patterns: Vec<LlmPattern>,
    #[serde(default = "default_complexity")]
    pub complexity_score: f64,
}

fn default_complexity() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmPattern {
    pub name: String,
    #[serde(default = "default_line")]
    pub line: i64,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_line() -> i64 {
    1
}

/// Walk `repo_path`, returning every candidate file key (POSIX-relative
/// paths), sorted. Python files are always candidates; other text files
/// only when `non_python.enabled` and their extension is allow-listed.
pub fn discover_candidate_files(
    repo_path: &Path,
    config: &Config,
) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    walk(repo_path, repo_path, config, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(root: &Path, dir: &Path, config: &Config, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if EXCLUDED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            walk(root, &path, config, out)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(&path);
        let key = relative.to_string_lossy().replace('\\', "/");

        let suffix = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        if suffix == ".py" {
            out.push(key);
            continue;
        }

        if config.non_python.enabled && config.non_python.include_extensions.contains(&suffix) {
            out.push(key);
        }
    }
    Ok(())
}

/// Analyze one Python file's content: regex + AST pattern detection,
/// internal dependency resolution, and (when supplied) LLM-merged
/// analysis producing a hybrid score.
pub fn analyze_python_file(
    file_key: &str,
    file_content: &str,
    all_python_file_keys: &BTreeSet<String>,
    llm_analysis: Option<LlmAnalysis>,
    config: &ScoutConfig,
) -> DiscoveryEntry {
    let regex_details = detect_patterns(file_content);
    let dependencies = detect_internal_dependencies(file_key, file_content, all_python_file_keys);
    let dep_count = dependencies.len();

    let (merged, raw_score, analysis_source, llm_complexity_score) = match &llm_analysis {
        Some(llm) => {
            let merged = merge_analyses(Some(llm), &regex_details);
            let raw_score = compute_hybrid_score(&merged, dep_count, llm.complexity_score, config);
            (merged, raw_score, "hybrid", Some(llm.complexity_score))
        }
        None => {
            let raw_score = (regex_details.len() as f64 * 0.6) + (dep_count as f64 * 0.4);
            (regex_details.clone(), raw_score, "regex", None)
        }
    };

    let mut patterns_found: BTreeSet<String> =
        merged.iter().map(|m| m.pattern.clone()).collect();
    let patterns_found: Vec<String> = patterns_found.drain(..).collect();

    DiscoveryEntry {
        file_key: file_key.to_string(),
        file_kind: "python",
        patterns_found,
        pattern_details: merged,
        dependencies,
        dep_count,
        raw_score,
        analysis_source,
        llm_complexity_score,
        intensity: 0.0,
    }
}

/// Analyze a non-Python text file for legacy tokens and cross-file
/// `*.py` references. Returns `None` when nothing of interest is found
/// (the reference implementation drops such files from the result set).
pub fn analyze_text_file(
    file_key: &str,
    file_content: &str,
    all_file_keys: &BTreeSet<String>,
    legacy_tokens: &[String],
) -> Option<DiscoveryEntry> {
    let mut details = detect_text_legacy_patterns(file_content, legacy_tokens);
    let (dependencies, ref_details) =
        detect_text_python_dependencies(file_content, file_key, all_file_keys);
    details.extend(ref_details);

    if details.is_empty() && dependencies.is_empty() {
        return None;
    }

    details.sort_by(|a, b| (a.line, &a.pattern, &a.source).cmp(&(b.line, &b.pattern, &b.source)));

    let patterns_found: Vec<String> = details
        .iter()
        .map(|d| d.pattern.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let dep_count = dependencies.len();
    let raw_score = (details.len() as f64 * 0.6) + (dep_count as f64 * 0.4);

    Some(DiscoveryEntry {
        file_key: file_key.to_string(),
        file_kind: "text",
        patterns_found,
        pattern_details: details,
        dependencies,
        dep_count,
        raw_score,
        analysis_source: "text_scan",
        llm_complexity_score: None,
        intensity: 0.0,
    })
}

/// Min-max normalize `raw_score` across `entries` into
/// `[clamp_min, clamp_max]`, with a `0.5` fallback when every score is
/// identical (degenerate case — a single-file run, or a run where every
/// file scores the same).
pub fn normalize_entries(entries: &mut [DiscoveryEntry], clamp_min: f64, clamp_max: f64) {
    if entries.is_empty() {
        return;
    }
    let score_min = entries.iter().map(|e| e.raw_score).fold(f64::INFINITY, f64::min);
    let score_max = entries
        .iter()
        .map(|e| e.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    for entry in entries.iter_mut() {
        let normalized = if (score_max - score_min).abs() < f64::EPSILON {
            0.5
        } else {
            (entry.raw_score - score_min) / (score_max - score_min)
        };
        entry.intensity = normalized.clamp(clamp_min, clamp_max);
    }
}

fn detect_patterns(file_content: &str) -> Vec<PatternMatch> {
    let mut seen: BTreeSet<(String, u64)> = BTreeSet::new();
    let mut details = Vec::new();

    for (pattern, line) in detect_ast_patterns(file_content) {
        let key = (pattern.clone(), line);
        if seen.insert(key) {
            details.push(PatternMatch {
                pattern,
                line,
                source: "ast".to_string(),
                severity: None,
                description: None,
            });
        }
    }

    for (pattern, regex) in regex_patterns() {
        for m in regex.find_iter(file_content) {
            let line = line_from_offset(file_content, m.start());
            let key = (pattern.clone(), line);
            if seen.insert(key) {
                details.push(PatternMatch {
                    pattern: pattern.clone(),
                    line,
                    source: "regex".to_string(),
                    severity: None,
                    description: None,
                });
            }
        }
    }

    if !has_future_import(file_content) {
        details.push(PatternMatch {
            pattern: "future_imports".to_string(),
            line: 1,
            source: "regex".to_string(),
            severity: None,
            description: None,
        });
    }

    details.sort_by(|a, b| (a.line, &a.pattern, &a.source).cmp(&(b.line, &b.pattern, &b.source)));
    details
}

fn regex_patterns() -> Vec<(String, Regex)> {
    vec![
        ("print_statement", r"(?m)^\s*print\s+[^(].*"),
        ("print_chevron", r"(?m)^\s*print\s*>>\s*[^,]+,"),
        ("dict_iteritems", r"\.iteritems\s*\("),
        ("dict_iterkeys", r"\.iterkeys\s*\("),
        ("dict_itervalues", r"\.itervalues\s*\("),
        ("dict_has_key", r"\.has_key\s*\("),
        ("xrange", r"\bxrange\b"),
        ("unicode_literal", r#"\bu["']"#),
        ("long_literal", r"\b\d+L\b"),
        ("raise_syntax", r"\braise\s+[\w.]+\s*,\s*[^\n]+"),
        ("except_syntax", r"\bexcept\s+[^:\n]+\s*,\s*\w+\s*:"),
        ("raw_input", r"\braw_input\s*\("),
        ("apply_builtin", r"\bapply\s*\("),
        ("execfile_builtin", r"\bexecfile\s*\("),
        (
            "urllib_import",
            r"\b(import\s+urllib2|from\s+urllib2\s+import)\b",
        ),
        ("metaclass_syntax", r"__metaclass__\s*="),
    ]
    .into_iter()
    .map(|(name, pattern)| (name.to_string(), Regex::new(pattern).expect("valid pattern regex")))
    .collect()
}

fn has_future_import(file_content: &str) -> bool {
    Regex::new(r"(?m)^\s*from\s+__future__\s+import\s+")
        .expect("valid regex")
        .is_match(file_content)
}

fn line_from_offset(content: &str, offset: usize) -> u64 {
    content[..offset].matches('\n').count() as u64 + 1
}

/// AST-only patterns that regexes can't reliably detect: integer
/// floor-division (`old_division`), `urllib2` imports, `__metaclass__`
/// assignment, and `string.xxx` calls after `import string`.
fn detect_ast_patterns(file_content: &str) -> Vec<(String, u64)> {
    let mut parser = Parser::new();
    if parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .is_err()
    {
        return Vec::new();
    }
    let Some(tree) = parser.parse(file_content, None) else {
        return Vec::new();
    };

    let mut detected = Vec::new();
    let mut imports_string = false;
    let source = file_content.as_bytes();

    // Two passes: first collect `import string`, then everything else,
    // since a `string.xxx` call can textually precede its import in
    // pathological files but in practice always follows it.
    collect_string_import(tree.root_node(), source, &mut imports_string);
    walk_ast(tree.root_node(), source, imports_string, &mut detected);

    detected
}

fn collect_string_import(node: Node, source: &[u8], imports_string: &mut bool) {
    if node.kind() == "import_statement" {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "dotted_name" {
                if let Ok(text) = child.utf8_text(source) {
                    if text == "string" {
                        *imports_string = true;
                    }
                }
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_string_import(child, source, imports_string);
    }
}

fn walk_ast(node: Node, source: &[u8], imports_string: bool, detected: &mut Vec<(String, u64)>) {
    let line = node.start_position().row as u64 + 1;

    match node.kind() {
        "binary_operator" => {
            let op_text = node.utf8_text(source).unwrap_or("");
            let has_div_operator = node
                .child_by_field_name("operator")
                .and_then(|n| n.utf8_text(source).ok())
                .map(|t| t == "/")
                .unwrap_or_else(|| op_text.contains('/') && !op_text.contains("//"));
            if has_div_operator {
                let left = node.child_by_field_name("left");
                let right = node.child_by_field_name("right");
                if left.map(|n| is_integer_like(n, source)).unwrap_or(false)
                    && right.map(|n| is_integer_like(n, source)).unwrap_or(false)
                {
                    detected.push(("old_division".to_string(), line));
                }
            }
        }
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "dotted_name" {
                    if let Ok(text) = child.utf8_text(source) {
                        if text == "urllib2" {
                            detected.push(("urllib_import".to_string(), line));
                        }
                    }
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                if module.utf8_text(source).ok() == Some("urllib2") {
                    detected.push(("urllib_import".to_string(), line));
                }
            }
        }
        "assignment" => {
            if let Some(left) = node.child_by_field_name("left") {
                if left.kind() == "identifier" && left.utf8_text(source).ok() == Some("__metaclass__") {
                    detected.push(("metaclass_syntax".to_string(), line));
                }
            }
        }
        "call" => {
            if imports_string {
                if let Some(func) = node.child_by_field_name("function") {
                    if func.kind() == "attribute" {
                        if let Some(object) = func.child_by_field_name("object") {
                            if object.kind() == "identifier" && object.utf8_text(source).ok() == Some("string") {
                                detected.push(("string_module".to_string(), line));
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_ast(child, source, imports_string, detected);
    }
}

fn is_integer_like(node: Node, source: &[u8]) -> bool {
    node.kind() == "integer" && node.utf8_text(source).is_ok()
}

fn detect_internal_dependencies(
    file_key: &str,
    file_content: &str,
    all_file_keys: &BTreeSet<String>,
) -> Vec<String> {
    let mut imported_modules: BTreeSet<String> = BTreeSet::new();

    let mut parser = Parser::new();
    let parsed_ok = parser.set_language(&tree_sitter_python::LANGUAGE.into()).is_ok();
    let tree = if parsed_ok {
        parser.parse(file_content, None)
    } else {
        None
    };

    if let Some(tree) = tree {
        collect_imports(tree.root_node(), file_content.as_bytes(), &mut imported_modules);
    } else {
        let import_re = Regex::new(r"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))")
            .expect("valid regex");
        for caps in import_re.captures_iter(file_content) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                imported_modules.insert(m.as_str().to_string());
            }
        }
    }

    let mut dependencies: BTreeSet<String> = BTreeSet::new();
    for module_name in &imported_modules {
        for candidate in module_to_file_candidates(module_name) {
            if all_file_keys.contains(&candidate) && candidate != file_key {
                dependencies.insert(candidate);
            }
        }
    }
    dependencies.into_iter().collect()
}

fn collect_imports(node: Node, source: &[u8], modules: &mut BTreeSet<String>) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "dotted_name" {
                    if let Ok(text) = child.utf8_text(source) {
                        modules.insert(text.to_string());
                    }
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                if let Ok(text) = module.utf8_text(source) {
                    modules.insert(text.to_string());
                }
            }
        }
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_imports(child, source, modules);
    }
}

fn module_to_file_candidates(module_name: &str) -> Vec<String> {
    let normalized = module_name.replace('.', "/");
    vec![format!("{normalized}.py"), format!("{normalized}/__init__.py")]
}

fn detect_text_legacy_patterns(file_content: &str, legacy_tokens: &[String]) -> Vec<PatternMatch> {
    let mut seen: BTreeSet<(String, u64)> = BTreeSet::new();
    let mut details = Vec::new();

    for token in legacy_tokens {
        let token_text = token.trim();
        if token_text.is_empty() {
            continue;
        }
        let pattern_name = format!("legacy_token_{}", to_pattern_id(token_text));
        let Ok(regex) = Regex::new(&format!("(?i){}", regex::escape(token_text))) else {
            continue;
        };
        for m in regex.find_iter(file_content) {
            let line = line_from_offset(file_content, m.start());
            let key = (pattern_name.clone(), line);
            if seen.insert(key) {
                details.push(PatternMatch {
                    pattern: pattern_name.clone(),
                    line,
                    source: "text_scan".to_string(),
                    severity: None,
                    description: None,
                });
            }
        }
    }
    details
}

fn detect_text_python_dependencies(
    file_content: &str,
    file_key: &str,
    all_file_keys: &BTreeSet<String>,
) -> (Vec<String>, Vec<PatternMatch>) {
    let re = Regex::new(r"[A-Za-z0-9_./-]+\.py\b").expect("valid regex");
    let mut dependencies: BTreeSet<String> = BTreeSet::new();
    let mut details = Vec::new();

    for m in re.find_iter(file_content) {
        let raw_ref = m.as_str();
        if let Some(resolved) = resolve_python_reference(raw_ref, file_key, all_file_keys) {
            dependencies.insert(resolved);
            details.push(PatternMatch {
                pattern: "python_file_reference".to_string(),
                line: line_from_offset(file_content, m.start()),
                source: "text_scan".to_string(),
                severity: None,
                description: Some(raw_ref.to_string()),
            });
        }
    }

    (dependencies.into_iter().collect(), details)
}

fn resolve_python_reference(
    raw_ref: &str,
    file_key: &str,
    all_file_keys: &BTreeSet<String>,
) -> Option<String> {
    let normalized = raw_ref.trim().replace('\\', "/");
    if all_file_keys.contains(&normalized) {
        return Some(normalized);
    }

    let current_dir = Path::new(file_key)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    if !current_dir.is_empty() && current_dir != "." {
        let candidate = format!("{current_dir}/{normalized}").replace("//", "/");
        if all_file_keys.contains(&candidate) {
            return Some(candidate);
        }
    }

    let basename = Path::new(&normalized)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let matches: Vec<&String> = all_file_keys
        .iter()
        .filter(|key| key.as_str() == basename || key.ends_with(&format!("/{basename}")))
        .collect();
    if matches.len() == 1 {
        return Some(matches[0].clone());
    }
    None
}

fn to_pattern_id(text: &str) -> String {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = Regex::new(r"_+")
        .expect("valid regex")
        .replace_all(&normalized, "_")
        .trim_matches('_')
        .to_string();
    if trimmed.is_empty() {
        "legacy".to_string()
    } else {
        trimmed
    }
}

fn merge_analyses(
    llm_analysis: Option<&LlmAnalysis>,
    regex_details: &[PatternMatch],
) -> Vec<PatternMatch> {
    let Some(llm) = llm_analysis else {
        return regex_details.to_vec();
    };

    let mut regex_by_key: std::collections::BTreeMap<(String, i64), &PatternMatch> =
        std::collections::BTreeMap::new();
    for entry in regex_details {
        regex_by_key.insert((entry.pattern.clone(), entry.line as i64), entry);
    }

    let mut merged = Vec::new();
    let mut existing: BTreeSet<(String, i64)> = BTreeSet::new();

    for llm_pattern in &llm.patterns {
        let name = llm_pattern.name.trim().to_string();
        if name.is_empty() {
            continue;
        }
        let line = if llm_pattern.line > 0 { llm_pattern.line } else { 1 };
        let key = (name.clone(), line);

        if let Some(regex_entry) = regex_by_key.get(&key) {
            merged.push(PatternMatch {
                pattern: regex_entry.pattern.clone(),
                line: regex_entry.line,
                source: "llm+regex".to_string(),
                severity: Some(llm_pattern.severity.clone().unwrap_or_else(|| "medium".to_string())),
                description: llm_pattern.description.clone(),
            });
        } else {
            merged.push(PatternMatch {
                pattern: name.clone(),
                line: line as u64,
                source: "llm".to_string(),
                severity: Some(llm_pattern.severity.clone().unwrap_or_else(|| "medium".to_string())),
                description: llm_pattern.description.clone(),
            });
        }
        existing.insert(key);
    }

    for entry in regex_details {
        let key = (entry.pattern.clone(), entry.line as i64);
        if !existing.contains(&key) {
            merged.push(entry.clone());
        }
    }

    merged.sort_by(|a, b| (a.line, &a.pattern).cmp(&(b.line, &b.pattern)));
    merged
}

fn compute_hybrid_score(
    patterns: &[PatternMatch],
    dep_count: usize,
    llm_complexity_score: f64,
    config: &ScoutConfig,
) -> f64 {
    let weighted_count: f64 = patterns
        .iter()
        .map(|p| match p.severity.as_deref() {
            Some("high") => config.severity_weight_high,
            Some("low") => config.severity_weight_low,
            _ => config.severity_weight_medium,
        })
        .sum();
    let complexity = llm_complexity_score / 10.0;
    weighted_count * config.w_p + dep_count as f64 * config.w_d + complexity * config.w_c
}

/// Parse an LLM JSON response into a validated `LlmAnalysis`, applying
/// the same leniency as the reference implementation's fenced-code
/// stripping (the caller is expected to already have run
/// `extract_code_block` on the raw response text).
pub fn parse_llm_analysis(text: &str) -> Option<LlmAnalysis> {
    let trimmed = text.trim();
    serde_json::from_str(trimmed).ok()
}

pub fn build_scout_user_prompt(file_key: &str, file_content: &str) -> String {
    format!(
        "Analyze this Python 2 file for ALL patterns that need conversion to Python 3.\n\n\
         File: {file_key}\n---\n{file_content}\n---\n\n\
         Return a JSON object:\n\
         {{\n  \"patterns\": [\n    {{\"name\": \"snake_case_id\", \"line\": <int>, \
         \"severity\": \"high|medium|low\",\n     \"description\": \"Brief explanation\"}}\n  ],\n  \
         \"complexity_score\": <float 1-10>,\n  \"summary\": \"One sentence on migration difficulty\"\n}}\n\n\
         Known pattern identifiers (non-exhaustive):\n{}\n\n\
         You may identify patterns beyond this list. Use descriptive snake_case names.",
        PATTERN_NAMES.join(", ")
    )
}

pub fn read_text_file(path: &Path, max_text_file_bytes: u64, is_text: bool) -> std::io::Result<Option<String>> {
    if is_text {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > max_text_file_bytes {
            return Ok(None);
        }
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

pub fn file_key_path(root: &Path, file_key: &str) -> PathBuf {
    root.join(file_key)
}
