//! agromitra-rag - operator CLI for the retrieval index
//!
//! Builds or loads the index the chat backend serves from, and answers
//! ad-hoc queries against it.

mod cli;

use agromitra_retrieval::{InitOutcome, RetrievalConfig, RetrievalService};
use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so query output stays pipeable (e.g. AGROMITRA_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AGROMITRA_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let service = RetrievalService::builder()
        .with_config(config)
        .build()
        .context("invalid configuration")?;

    match cli.command {
        Commands::Query { text, k, json } => {
            start(&service, cli.force_rebuild).await?;
            let results = match k {
                Some(k) => service.query(&text, k).await,
                None => service.query_default(&text).await,
            }
            .context("query failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for result in &results {
                    println!("{:.4}\t{}", result.score, result.document);
                }
            }
        }
        Commands::Rebuild => {
            service
                .force_rebuild()
                .await
                .context("failed to rebuild index")?;
            let status = service.status().await?;
            println!("Indexed {} documents", status.documents);
        }
        Commands::Status => {
            start(&service, cli.force_rebuild).await?;
            let status = service.status().await?;
            println!("documents:   {}", status.documents);
            println!("dimension:   {}", status.dimension);
            println!("fingerprint: {}", status.fingerprint);
            println!("model:       {}", status.model);
            println!("built at:    {}", status.built_at.to_rfc3339());
        }
    }

    Ok(())
}

/// Defaults, then the config file, then the environment, then flags.
fn load_config(cli: &Cli) -> Result<RetrievalConfig> {
    let mut config = match &cli.config {
        Some(path) => RetrievalConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RetrievalConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid environment override")?;

    if let Some(corpus) = &cli.corpus {
        config.corpus_path = corpus.clone();
    }
    if let Some(dir) = &cli.index_dir {
        config.index_dir = dir.clone();
    }
    if let Some(provider) = cli.provider {
        config.embedding.provider = provider.into();
    }
    Ok(config)
}

async fn start(service: &RetrievalService, force_rebuild: bool) -> Result<()> {
    if force_rebuild {
        service
            .force_rebuild()
            .await
            .context("failed to rebuild index")?;
        info!("Index rebuilt on request");
        return Ok(());
    }

    let outcome = service
        .initialize()
        .await
        .context("failed to initialize index")?;
    match outcome {
        InitOutcome::Loaded => info!("Using stored index"),
        InitOutcome::Rebuilt(reason) => info!("Built a new index ({reason:?})"),
    }
    Ok(())
}
