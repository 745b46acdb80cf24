/*
linkdigest - batch summarizer binary.
Reads a collected batch as JSON, attaches an LLM summary to every item and writes the batch back out.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::{Config, ProviderKind};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use linkdigest::{Batch, Summarizer};

#[derive(Parser, Debug)]
#[command(name = "linkdigest", about = "Summarize every link of a collected batch with an LLM")]
struct Args {
    /// Batch JSON produced by the collection step
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Where to write the summarized batch (stdout when omitted)
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override `[summarize].provider` (openai, deepseek, gemini, glm)
    #[arg(long)]
    provider: Option<String>,

    /// Override the model of the selected provider
    #[arg(long)]
    model: Option<String>,

    /// Override the API key of the selected provider
    #[arg(long)]
    api_key: Option<String>,

    /// Summarize pre-fetched content longer than this many chars in chunks
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut config = load_config(args.config.clone()).await?;
    apply_overrides(&mut config, &args)?;

    let mut summarizer = match Summarizer::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "invalid summarization configuration");
            return Err(e.into());
        }
    };

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read batch: {}", args.input.display()))?;
    let mut batch: Batch = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse batch JSON: {}", args.input.display()))?;

    let started = Instant::now();
    let stats = summarizer.summarize_all(&mut batch).await;
    info!(
        total = stats.total,
        succeeded = stats.succeeded,
        failed = stats.failed,
        elapsed = %linkdigest::collection::format_elapsed(started.elapsed()),
        "batch summarized"
    );

    let rendered = serde_json::to_string_pretty(&batch).context("Failed to serialize batch")?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, rendered)
                .await
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            info!(path = %path.display(), "summaries written");
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

/// `config.default.toml` merged with `--config` (or `config.toml` when present).
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = match explicit {
        Some(p) => {
            if !p.exists() {
                error!(path = ?p, "specified config file not found");
                return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
            }
            Some(p)
        }
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(provider) = &args.provider {
        config.summarize.provider = Some(provider.clone());
    }
    if let Some(chunk_size) = args.chunk_size {
        config.summarize.chunk_size = Some(chunk_size);
    }

    if args.model.is_some() || args.api_key.is_some() {
        let provider: ProviderKind = config.active_provider()?;
        let section = config.provider_section_mut(provider);
        if let Some(model) = &args.model {
            section.model = Some(model.clone());
        }
        if let Some(key) = &args.api_key {
            section.api_key = Some(key.clone());
        }
    }
    Ok(())
}
