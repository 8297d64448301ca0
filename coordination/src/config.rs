//! Layered configuration: built-in defaults, overridden by an optional
//! YAML config file, overridden by environment variables. CLI flags are
//! layered on top of this by the `swarm-agents` binary.
//!
//! Field documentation follows the teacher's convention of naming the
//! env var and default inline so the source of each value is obvious
//! without cross-referencing a separate table.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decay::DecayType;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// `PHEROMONE_DECAY_TYPE` (default: exponential).
    pub decay_type: DecayType,
    /// `PHEROMONE_DECAY_RATE` (default: 0.05).
    pub decay_rate: f64,
    /// `PHEROMONE_INHIBITION_DECAY_RATE` (default: 0.1).
    pub inhibition_decay_rate: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            decay_type: DecayType::Exponential,
            decay_rate: 0.05,
            inhibition_decay_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// `SWARM_MAX_TOKENS_TOTAL` (default: 100_000).
    pub max_tokens_total: u64,
    /// `SWARM_MAX_RETRY_COUNT` (default: 3).
    pub max_retry_count: u64,
    /// `SWARM_SCOPE_LOCK_TTL` ticks (default: 5).
    pub scope_lock_ttl: i64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_tokens_total: 100_000,
            max_retry_count: 3,
            scope_lock_ttl: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `SWARM_LLM_MODEL` (default: qwen/qwen3-235b-a22b-2507, matching
    /// the reference implementation's OpenRouter default).
    pub model: String,
    /// `SWARM_LLM_TEMPERATURE` (default: 0.2).
    pub temperature: f64,
    /// `SWARM_LLM_MAX_RESPONSE_TOKENS` (default: 4096).
    pub max_response_tokens: u32,
    /// `SWARM_LLM_RETRY_ATTEMPTS` (default: 3).
    pub retry_attempts: u32,
    /// `SWARM_LLM_RETRY_BACKOFF` seconds, comma-separated (default: 1,2,4).
    pub retry_backoff: Vec<f64>,
    /// `SWARM_LLM_TIMEOUT_SECS` (default: 60).
    pub timeout_secs: u64,
    /// `SWARM_MAX_BUDGET_USD` (default: 0.0, meaning cost tracking off).
    pub max_budget_usd: f64,
    /// `SWARM_PRICING_STRICT` (default: false). When true and cost
    /// tracking is enabled, missing pricing data fails construction.
    pub pricing_strict: bool,
    /// `SWARM_PRICING_ENDPOINT` — URL for the per-model pricing table.
    pub pricing_endpoint: Option<String>,
    /// `OPENROUTER_BASE_URL` (default: https://openrouter.ai/api/v1).
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "qwen/qwen3-235b-a22b-2507".to_string(),
            temperature: 0.2,
            max_response_tokens: 4096,
            retry_attempts: 3,
            retry_backoff: vec![1.0, 2.0, 4.0],
            timeout_secs: 60,
            max_budget_usd: 0.0,
            pricing_strict: false,
            pricing_endpoint: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// `SWARM_TRANSFORMER_INTENSITY_MIN` (default: 0.3).
    pub transformer_intensity_min: f64,
    /// `SWARM_INHIBITION_THRESHOLD` (default: 0.5).
    pub inhibition_threshold: f64,
    /// `SWARM_FEW_SHOT_MAX_EXAMPLES` (default: 3).
    pub max_examples: usize,
    /// `SWARM_MAX_RETRY_ISSUES` chars kept in large-file mode (default: 500).
    pub max_retry_issues: usize,
    /// `SWARM_LARGE_FILE_LINE_THRESHOLD` (default: 400).
    pub large_file_line_threshold: usize,
    /// `SWARM_REPAIR_ATTEMPTS_MAX` for the syntax gate (default: 2).
    pub repair_attempts_max: u32,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            transformer_intensity_min: 0.3,
            inhibition_threshold: 0.5,
            max_examples: 3,
            max_retry_issues: 500,
            large_file_line_threshold: 400,
            repair_attempts_max: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// `SWARM_VALIDATOR_CONFIDENCE_HIGH` (default: 0.8).
    pub validator_confidence_high: f64,
    /// `SWARM_VALIDATOR_CONFIDENCE_LOW` (default: 0.5).
    pub validator_confidence_low: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            validator_confidence_high: 0.8,
            validator_confidence_low: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    /// Clamp bounds applied after min-max normalization (default: [0.1, 1.0]).
    pub clamp_min: f64,
    pub clamp_max: f64,
    /// Hybrid-score weight for pattern severity (default: 0.5).
    pub w_p: f64,
    /// Hybrid-score weight for dependency count (default: 0.2).
    pub w_d: f64,
    /// Hybrid-score weight for LLM complexity (default: 0.3).
    pub w_c: f64,
    pub severity_weight_high: f64,
    pub severity_weight_medium: f64,
    pub severity_weight_low: f64,
    /// Whether to enable LLM-assisted hybrid analysis (default: false).
    pub llm_analysis_enabled: bool,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            clamp_min: 0.1,
            clamp_max: 1.0,
            w_p: 0.5,
            w_d: 0.2,
            w_c: 0.3,
            severity_weight_high: 1.5,
            severity_weight_medium: 1.0,
            severity_weight_low: 0.5,
            llm_analysis_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NonPythonConfig {
    /// `SWARM_NON_PYTHON_ENABLED` (default: false).
    pub enabled: bool,
    /// `SWARM_NON_PYTHON_EXTENSIONS` (default: .cfg,.ini,.txt,.yaml,.yml,.json,.toml,.sh).
    pub include_extensions: Vec<String>,
    /// `SWARM_MAX_TEXT_FILE_BYTES` (default: 65536).
    pub max_text_file_bytes: u64,
    /// `SWARM_LEGACY_TOKENS` (default: print statement markers, see below).
    pub legacy_tokens: Vec<String>,
    pub strict_guardrails: bool,
    /// `SWARM_NON_PY_PASS_CONFIDENCE` (default: 0.85).
    pub pass_confidence: f64,
    /// `SWARM_NON_PY_FAIL_CONFIDENCE` (default: 0.4).
    pub fail_confidence: f64,
}

impl Default for NonPythonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            include_extensions: vec![
                ".cfg", ".ini", ".txt", ".yaml", ".yml", ".json", ".toml", ".sh",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_text_file_bytes: 65_536,
            legacy_tokens: vec!["print ", "xrange(", "basestring", "unicode("]
                .into_iter()
                .map(String::from)
                .collect(),
            strict_guardrails: true,
            pass_confidence: 0.85,
            fail_confidence: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// `SWARM_MAX_TICKS` (default: 200).
    pub max_ticks: u64,
    /// `SWARM_IDLE_CYCLES_TO_STOP` (default: 5).
    pub idle_cycles_to_stop: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_ticks: 200,
            idle_cycles_to_stop: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub dry_run: bool,
    pub resume: bool,
    pub review: bool,
    pub seed: Option<u64>,
    pub verbose: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            resume: false,
            review: false,
            seed: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Override or disable (`""`) the stigmergic preamble prepended to
    /// every role-specific agent prompt.
    pub stigmergic_preamble: Option<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            stigmergic_preamble: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub decay: DecayConfig,
    pub guardrails: GuardrailConfig,
    pub llm: LlmConfig,
    pub transformer: TransformerConfig,
    pub validator: ValidatorConfig,
    pub scout: ScoutConfig,
    pub non_python: NonPythonConfig,
    pub scheduler: SchedulerConfig,
    pub runtime: RuntimeConfig,
    pub prompts: PromptConfig,
    /// Free-form extension bag for settings not promoted to a typed
    /// field, read by capabilities that need a config knob this struct
    /// doesn't enumerate.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            decay: DecayConfig::default(),
            guardrails: GuardrailConfig::default(),
            llm: LlmConfig::default(),
            transformer: TransformerConfig::default(),
            validator: ValidatorConfig::default(),
            scout: ScoutConfig::default(),
            non_python: NonPythonConfig::default(),
            scheduler: SchedulerConfig::default(),
            runtime: RuntimeConfig::default(),
            prompts: PromptConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load defaults, then overlay an optional YAML config file, then
    /// overlay process environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)?;
            let from_file: Config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            config = from_file;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SWARM_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = parse_env("SWARM_LLM_TEMPERATURE") {
            self.llm.temperature = v;
        }
        if let Some(v) = parse_env("SWARM_MAX_TOKENS_TOTAL") {
            self.guardrails.max_tokens_total = v;
        }
        if let Some(v) = parse_env("SWARM_MAX_RETRY_COUNT") {
            self.guardrails.max_retry_count = v;
        }
        if let Some(v) = parse_env("SWARM_SCOPE_LOCK_TTL") {
            self.guardrails.scope_lock_ttl = v;
        }
        if let Some(v) = parse_env("SWARM_MAX_BUDGET_USD") {
            self.llm.max_budget_usd = v;
        }
        if let Some(v) = parse_env("SWARM_MAX_TICKS") {
            self.scheduler.max_ticks = v;
        }
        if let Some(v) = parse_env("SWARM_IDLE_CYCLES_TO_STOP") {
            self.scheduler.idle_cycles_to_stop = v;
        }
        if let Ok(v) = std::env::var("SWARM_PRICING_ENDPOINT") {
            self.llm.pricing_endpoint = Some(v);
        }
        if let Some(v) = parse_env_bool("SWARM_PRICING_STRICT") {
            self.llm.pricing_strict = v;
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn parse_env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let c = Config::default();
        assert_eq!(c.guardrails.max_tokens_total, 100_000);
        assert_eq!(c.validator.validator_confidence_high, 0.8);
        assert_eq!(c.validator.validator_confidence_low, 0.5);
        assert_eq!(c.scout.w_p, 0.5);
        assert_eq!(c.scout.w_d, 0.2);
        assert_eq!(c.scout.w_c, 0.3);
    }

    #[test]
    fn load_from_yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "guardrails:\n  max_tokens_total: 5000\n").unwrap();
        let c = Config::load(Some(&path)).unwrap();
        assert_eq!(c.guardrails.max_tokens_total, 5000);
    }
}
