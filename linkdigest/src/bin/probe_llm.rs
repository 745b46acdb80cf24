//! Summarize a single URL with the resolved configuration and print the outcome.
//!
//! Usage: probe_llm <url> [config.toml]

use anyhow::{Context, Result};
use common::Config;
use std::path::PathBuf;

use linkdigest::{BatchItem, Summarizer};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().context("usage: probe_llm <url> [config.toml]")?;
    let config_path = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("config.toml"));

    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        Some(config_path.as_path()).filter(|p| p.exists()),
    )
    .await?;

    let mut summarizer = Summarizer::from_config(config)?;

    println!("\n{}", "=".repeat(60));
    println!("Provider: {}", summarizer.primary().provider());
    println!("Model: {}", summarizer.primary().configured_model());
    println!("URL: {}", url);
    println!("{}", "=".repeat(60));

    let record = summarizer.summarize_item(&BatchItem::new("", url)).await;

    if record.success {
        println!("✓ Success ({}, {} tokens)", record.processing_time, record.tokens_consumed);
        println!("  Model: {}", record.model_used);
        println!("  Brief: {}", record.brief);
        println!("  Summary: {}", record.summary);
    } else {
        eprintln!("✗ Failed: {}", record.error.as_deref().unwrap_or("unknown"));
    }
    if let Some(warning) = &record.warning {
        println!("  Warning: {}", warning);
    }

    Ok(())
}
