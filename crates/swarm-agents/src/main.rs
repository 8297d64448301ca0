//! CLI entry point (spec §6). Loads configuration, opens (or resumes)
//! the pheromone store rooted at the target repo, and either runs the
//! `--review` sub-mode over `needs_review` entries or drives the
//! scheduler to completion.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use coordination::{Config, Guardrails, LlmClient, PheromoneStore};
use swarm_agents::review::{run_review, StdinPrompter};
use swarm_agents::scheduler::{Scheduler, StopReason};
use swarm_agents::subprocess::PythonSubprocessRunner;
use swarm_agents::vcs::{GitVcs, NullVcs, Vcs};

/// Coordinate Scout/Transformer/Tester/Validator agents over a shared
/// pheromone store to migrate a Python 2 codebase to Python 3.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Local path or git URL of the repository to migrate.
    #[arg(long)]
    repo: String,

    /// Git ref to check out when `--repo` is a URL (ignored for local paths).
    #[arg(long, default_value = "HEAD")]
    repo_ref: String,

    /// Optional YAML config file, layered under env vars and these flags.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_ticks: Option<u64>,

    #[arg(long)]
    max_tokens: Option<u64>,

    #[arg(long)]
    max_budget_usd: Option<f64>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Suppress VCS side effects (commit/revert); traces are still deposited.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Reopen an existing pheromone store instead of requiring an empty one.
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Run the interactive needs_review triage loop instead of the scheduler.
    #[arg(long, default_value_t = false)]
    review: bool,

    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    apply_cli_overrides(&mut config, &args);

    let repo_root = resolve_repo(&args.repo, &args.repo_ref).context("resolving --repo")?;
    let pheromones_dir = repo_root.join("pheromones");

    if !args.resume && pheromones_dir.exists() && has_existing_entries(&pheromones_dir)? {
        bail!(
            "pheromone store at {} already has entries; pass --resume to continue an existing run",
            pheromones_dir.display()
        );
    }

    let store = PheromoneStore::new(&pheromones_dir).context("opening pheromone store")?;

    let vcs: Box<dyn Vcs> = if args.dry_run {
        Box::new(NullVcs)
    } else {
        Box::new(GitVcs::new(repo_root.clone()))
    };

    if args.review {
        let guardrails = Guardrails::new(
            config.guardrails.max_tokens_total,
            config.guardrails.max_retry_count,
            config.guardrails.scope_lock_ttl,
        );
        let mut prompter = StdinPrompter;
        let outcomes = run_review(&store, &guardrails, vcs.as_ref(), &mut prompter)
            .context("running review sub-mode")?;
        info!(count = outcomes.len(), "review: applied decisions");
        return Ok(());
    }

    let llm = build_llm_client(&config).await?;
    let subprocess = Box::new(PythonSubprocessRunner::default());

    let mut scheduler = Scheduler::new(store, config, repo_root, llm, vcs, subprocess);

    let outcome = match scheduler.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "scheduler aborted on an unrecoverable error");
            let _ = flush_metrics(&scheduler, "error");
            std::process::exit(1);
        }
    };

    flush_metrics(&scheduler, outcome.stop_reason.as_str())?;
    info!(
        stop_reason = outcome.stop_reason.as_str(),
        ticks_run = outcome.ticks_run,
        "run complete"
    );
    if matches!(outcome.stop_reason, StopReason::BudgetExhausted) {
        warn!("run stopped on budget exhaustion; some files may not have reached a terminal status");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn apply_cli_overrides(config: &mut Config, args: &Args) {
    if let Some(v) = args.max_ticks {
        config.scheduler.max_ticks = v;
    }
    if let Some(v) = args.max_tokens {
        config.guardrails.max_tokens_total = v;
    }
    if let Some(v) = args.max_budget_usd {
        config.llm.max_budget_usd = v;
    }
    if let Some(v) = &args.model {
        config.llm.model = v.clone();
    }
    config.runtime.seed = args.seed.or(config.runtime.seed);
    config.runtime.dry_run = args.dry_run;
    config.runtime.resume = args.resume;
    config.runtime.review = args.review;
    config.runtime.verbose = args.verbose;
}

/// Clone `repo` into a scratch directory when it looks like a remote
/// URL; otherwise treat it as an existing local path. `repo_ref` is only
/// meaningful for the clone path — spec §6's VCS interface is
/// Validator-only and doesn't require ref resolution for a local repo.
fn resolve_repo(repo: &str, repo_ref: &str) -> Result<PathBuf> {
    let looks_remote = repo.starts_with("http://")
        || repo.starts_with("https://")
        || repo.starts_with("git@")
        || repo.starts_with("ssh://");

    if !looks_remote {
        return Path::new(repo)
            .canonicalize()
            .with_context(|| format!("repo path {repo:?} does not exist"));
    }

    let dest = std::env::temp_dir().join(format!("swarm-repo-{}", uuid::Uuid::new_v4()));
    let mut cmd = std::process::Command::new("git");
    cmd.arg("clone");
    if !repo_ref.is_empty() && repo_ref != "HEAD" {
        cmd.args(["--branch", repo_ref]);
    }
    cmd.arg(repo).arg(&dest);

    let status = cmd.status().context("invoking git clone")?;
    if !status.success() {
        bail!("git clone of {repo} failed");
    }
    Ok(dest)
}

fn has_existing_entries(pheromones_dir: &Path) -> Result<bool> {
    for file in ["tasks.json", "status.json", "quality.json"] {
        let path = pheromones_dir.join(file);
        if !path.exists() {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap_or(serde_json::json!({}));
        if value.as_object().map(|m| !m.is_empty()).unwrap_or(false) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Construct the LLM gateway when an API key is configured. Missing key
/// means a no-LLM run (Scout falls back to regex-only analysis,
/// Transformer fails fast on every candidate with a retryable
/// disposition) rather than a fatal configuration error, so a dry
/// analysis-only pass over a repo doesn't require API access.
async fn build_llm_client(config: &Config) -> Result<Option<LlmClient>> {
    let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        warn!("OPENROUTER_API_KEY not set; running without an LLM gateway");
        return Ok(None);
    }
    let client = LlmClient::new(&config.llm, api_key, config.guardrails.max_tokens_total)
        .await
        .context("constructing LLM gateway")?;
    Ok(Some(client))
}

fn flush_metrics(scheduler: &Scheduler, stop_reason: &str) -> Result<()> {
    let output_dir = scheduler.store().audit_log_path().parent().unwrap().join("metrics");
    coordination::metrics::ensure_output_dir(&output_dir)?;
    coordination::metrics::write_ticks_csv(&output_dir.join("ticks.csv"), scheduler.metrics().tick_rows())?;
    let summary = scheduler.metrics().build_summary(stop_reason);
    coordination::metrics::write_summary_json(&output_dir.join("summary.json"), &summary)?;
    let manifest = serde_json::json!({
        "stop_reason": stop_reason,
        "ticks": scheduler.metrics().tick_rows().len(),
    });
    coordination::metrics::write_manifest_json(&output_dir.join("manifest.json"), &manifest)?;
    Ok(())
}
