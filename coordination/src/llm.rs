//! LLM gateway: a provider-agnostic chat call with pre-call budget
//! enforcement, retry/backoff for transient failures, and code-block
//! extraction for the Transformer. Ported from the reference
//! implementation's `stigmergy/llm_client.py`, generalized from a single
//! hardcoded OpenRouter client into a small pricing-aware gateway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::LlmConfig;

const RETRYABLE_STATUS_CODES: [u16; 4] = [429, 500, 502, 503];

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing required setting: {0}")]
    Configuration(String),
    #[error("token budget exceeded before call: used={used}, estimated={estimated}, budget={budget}")]
    BudgetExceeded {
        used: u64,
        estimated: u64,
        budget: u64,
    },
    #[error("cost budget exceeded: spent=${spent:.4}, estimated=${estimated:.4}, budget=${budget:.4}")]
    CostBudgetExceeded {
        spent: f64,
        estimated: f64,
        budget: f64,
    },
    #[error("transient provider error after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },
    #[error("provider error: {0}")]
    Provider(String),
}

/// Standard response envelope for all LLM calls.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
    pub latency_ms: u64,
}

/// One entry of a `$/1M tokens`-style pricing table, keyed by model id.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelPricing {
    pub id: String,
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

/// Provider-agnostic chat gateway. Talks OpenAI-compatible chat
/// completions over `reqwest`, matching the reference implementation's
/// OpenRouter backend.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_response_tokens: u32,
    retry_attempts: u32,
    retry_backoff: Vec<f64>,
    max_tokens_total: u64,
    max_budget_usd: f64,
    pricing: Option<ModelPricing>,
    total_tokens_used: AtomicU64,
    total_cost_micros: AtomicU64,
}

impl LlmClient {
    /// Construct a gateway from config plus an already-resolved API key.
    /// When `llm.max_budget_usd > 0` and `llm.pricing_strict` is set,
    /// construction fails if no pricing entry is found for `llm.model`.
    pub async fn new(
        config: &LlmConfig,
        api_key: String,
        max_tokens_total: u64,
    ) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::Configuration(
                "OPENROUTER_API_KEY environment variable is required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        let pricing = if config.max_budget_usd > 0.0 {
            match fetch_pricing(&http, config).await {
                Ok(p) => p,
                Err(e) if config.pricing_strict => return Err(e),
                Err(e) => {
                    warn!("pricing lookup failed, cost tracking disabled for this run: {e}");
                    None
                }
            }
        } else {
            None
        };

        if config.max_budget_usd > 0.0 && config.pricing_strict && pricing.is_none() {
            return Err(LlmError::Configuration(format!(
                "no pricing entry found for model {:?} and pricing_strict is set",
                config.model
            )));
        }

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_response_tokens: config.max_response_tokens,
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff: if config.retry_backoff.is_empty() {
                vec![1.0, 2.0, 4.0]
            } else {
                config.retry_backoff.clone()
            },
            max_tokens_total,
            max_budget_usd: config.max_budget_usd,
            pricing,
            total_tokens_used: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
        })
    }

    pub fn total_tokens_used(&self) -> u64 {
        self.total_tokens_used.load(Ordering::Relaxed)
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    fn estimate_tokens(&self, prompt: &str, system: Option<&str>) -> u64 {
        let payload_chars = prompt.len() + system.map(str::len).unwrap_or(0);
        let estimated_prompt_tokens = (payload_chars as u64 + 3) / 4;
        estimated_prompt_tokens.max(1) + self.max_response_tokens as u64
    }

    fn estimate_cost(&self, estimated_tokens: u64) -> f64 {
        let Some(pricing) = &self.pricing else {
            return 0.0;
        };
        // Treat the whole estimate as prompt tokens for the pre-call
        // check; actual accounting after the call splits prompt/completion.
        (estimated_tokens as f64 / 1_000_000.0) * pricing.prompt_per_million
    }

    fn check_budget(&self, estimated_tokens: u64) -> Result<(), LlmError> {
        let used = self.total_tokens_used.load(Ordering::Relaxed);
        if used + estimated_tokens > self.max_tokens_total {
            return Err(LlmError::BudgetExceeded {
                used,
                estimated: estimated_tokens,
                budget: self.max_tokens_total,
            });
        }
        if self.max_budget_usd > 0.0 {
            let spent = self.total_cost_usd();
            let estimated_cost = self.estimate_cost(estimated_tokens);
            if spent + estimated_cost > self.max_budget_usd {
                return Err(LlmError::CostBudgetExceeded {
                    spent,
                    estimated: estimated_cost,
                    budget: self.max_budget_usd,
                });
            }
        }
        Ok(())
    }

    /// Call the model with `prompt` and an optional `system` preamble.
    /// Retries transient failures up to `retry_attempts` times using
    /// the configured backoff table.
    pub async fn call(&self, prompt: &str, system: Option<&str>) -> Result<LlmResponse, LlmError> {
        let estimated_tokens = self.estimate_tokens(prompt, system);
        self.check_budget(estimated_tokens)?;

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.retry_attempts {
            let start = Instant::now();
            match self.send_once(prompt, system).await {
                Ok((content, prompt_tokens, completion_tokens)) => {
                    let tokens_used = prompt_tokens + completion_tokens;
                    self.total_tokens_used.fetch_add(tokens_used, Ordering::Relaxed);
                    if let Some(pricing) = &self.pricing {
                        let cost = (prompt_tokens as f64 / 1_000_000.0) * pricing.prompt_per_million
                            + (completion_tokens as f64 / 1_000_000.0) * pricing.completion_per_million;
                        self.total_cost_micros
                            .fetch_add((cost * 1_000_000.0).round() as u64, Ordering::Relaxed);
                    }
                    return Ok(LlmResponse {
                        content,
                        tokens_used,
                        model: self.model.clone(),
                        latency_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err((err, retryable)) => {
                    if !retryable {
                        return Err(err);
                    }
                    last_error = Some(err);
                    let has_next_attempt = attempt + 1 < self.retry_attempts;
                    if !has_next_attempt {
                        break;
                    }
                    let backoff = backoff_for_attempt(&self.retry_backoff, attempt as usize);
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
            }
        }

        Err(LlmError::Transient {
            attempts: self.retry_attempts,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// One HTTP attempt. Returns `(content, prompt_tokens, completion_tokens)`
    /// on success, or `(error, is_retryable)` on failure.
    async fn send_once(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<(String, u64, u64), (LlmError, bool)> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_response_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect();
                (LlmError::Provider(e.to_string()), retryable)
            })?;

        let status = response.status();
        if !status.is_success() {
            let retryable = is_retryable_status(status);
            let text = response.text().await.unwrap_or_default();
            return Err((
                LlmError::Provider(format!("HTTP {status}: {text}")),
                retryable,
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| (LlmError::Provider(e.to_string()), false))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let prompt_tokens = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        Ok((content, prompt_tokens, completion_tokens))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status.as_u16())
}

fn backoff_for_attempt(table: &[f64], attempt: usize) -> f64 {
    table.get(attempt).copied().unwrap_or_else(|| *table.last().unwrap_or(&1.0))
}

/// Extract the longest fenced code block (```` ```python ```` or bare
/// ```` ``` ````) from `text`, falling back to the trimmed raw text.
/// Isolated fence lines with no paired close are stripped before the
/// fallback so a truncated response doesn't leak a dangling backtick
/// fence into the transformed file.
pub fn extract_code_block(text: &str) -> String {
    let mut longest: Option<&str> = None;
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while let Some(start_rel) = find_fence(&bytes[i..]) {
        let fence_start = i + start_rel;
        let Some(after_lang_nl) = find_newline_after_fence(text, fence_start) else {
            break;
        };
        let body_start = after_lang_nl;
        let Some(close_rel) = text[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + close_rel;
        let candidate = &text[body_start..body_end];
        if longest.map(|l| candidate.len() > l.len()).unwrap_or(true) {
            longest = Some(candidate);
        }
        i = body_end + 3;
    }

    match longest {
        Some(block) => block.trim().to_string(),
        None => strip_isolated_fences(text).trim().to_string(),
    }
}

fn find_fence(bytes: &[u8]) -> Option<usize> {
    bytes.windows(3).position(|w| w == b"```")
}

fn find_newline_after_fence(text: &str, fence_start: usize) -> Option<usize> {
    let after_fence = fence_start + 3;
    let rest = text.get(after_fence..)?;
    let lang_end = rest.find('\n')?;
    Some(after_fence + lang_end + 1)
}

fn strip_isolated_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn fetch_pricing(
    http: &reqwest::Client,
    config: &LlmConfig,
) -> Result<Option<ModelPricing>, LlmError> {
    let Some(endpoint) = &config.pricing_endpoint else {
        return Ok(None);
    };

    #[derive(Deserialize)]
    struct PricingTableEntry {
        id: String,
        #[serde(default)]
        pricing: Option<RawPricing>,
    }
    #[derive(Deserialize)]
    struct RawPricing {
        #[serde(default)]
        prompt: Option<String>,
        #[serde(default)]
        completion: Option<String>,
    }
    #[derive(Deserialize)]
    struct PricingTable {
        data: Vec<PricingTableEntry>,
    }

    let table: PricingTable = http
        .get(endpoint)
        .send()
        .await
        .map_err(|e| LlmError::Configuration(format!("pricing fetch failed: {e}")))?
        .json()
        .await
        .map_err(|e| LlmError::Configuration(format!("pricing parse failed: {e}")))?;

    let canonical = canonical_slug(&config.model);
    let variant_prefix = config.model.split(':').next().unwrap_or(&config.model);

    let found = table
        .data
        .iter()
        .find(|e| e.id == config.model)
        .or_else(|| table.data.iter().find(|e| canonical_slug(&e.id) == canonical))
        .or_else(|| table.data.iter().find(|e| e.id.starts_with(variant_prefix)));

    Ok(found.and_then(|entry| {
        let pricing = entry.pricing.as_ref()?;
        let prompt_per_token: f64 = pricing.prompt.as_ref()?.parse().ok()?;
        let completion_per_token: f64 = pricing.completion.as_ref()?.parse().ok()?;
        Some(ModelPricing {
            id: entry.id.clone(),
            prompt_per_million: prompt_per_token * 1_000_000.0,
            completion_per_million: completion_per_token * 1_000_000.0,
        })
    }))
}

fn canonical_slug(id: &str) -> String {
    id.split(':').next().unwrap_or(id).to_lowercase()
}
