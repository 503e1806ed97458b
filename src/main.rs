//! ares-rag CLI entry point
//!
//! - `ares-rag config` - Show or validate the configuration
//! - `ares-rag ingest` - Index a text file
//! - `ares-rag search` - Query indexed documents
//! - `ares-rag delete` - Remove a document
//! - `ares-rag sweep` - Drop expired memories
//! - `ares-rag reconcile` - Re-index documents stuck in `indexing`

use anyhow::{bail, Context, Result};
use ares_rag::cli::output::Output;
use ares_rag::cli::{Cli, Commands};
use ares_rag::{RagConfig, RagService, ServiceResponse};
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    init_tracing(cli.json_logs, cli.verbose);

    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    if let Err(e) = run(cli, &output).await {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn init_tracing(json: bool, verbose: bool) {
    let default_filter = if verbose { "ares_rag=debug" } else { "ares_rag=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    if let Commands::Config { full, validate } = cli.command {
        return run_config(&cli.config, full, validate, output);
    }

    let config = RagConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let service = RagService::from_config(&config)
        .await
        .context("Failed to start the RAG service")?;

    match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::Ingest { owner, title, file } => {
            run_ingest(&service, owner, title, &file, output).await
        }
        Commands::Search {
            query,
            top_k,
            min_score,
        } => run_search(&service, &query, top_k, min_score, output).await,
        Commands::Delete { owner, doc_id } => {
            into_data(service.delete_document(owner, doc_id).await)?;
            output.success(&format!("Deleted document {}", doc_id));
            Ok(())
        }
        Commands::Sweep => {
            let removed = into_data(service.clean_expired_memories().await)?;
            output.success(&format!("Removed {} expired memories", removed));
            Ok(())
        }
        Commands::Reconcile => {
            let recovered = into_data(service.reconcile_documents().await)?;
            output.success(&format!("Re-indexed {} documents", recovered));
            Ok(())
        }
    }
}

fn run_config(path: &Path, full: bool, validate: bool, output: &Output) -> Result<()> {
    if validate {
        RagConfig::load(path).with_context(|| format!("{} is invalid", path.display()))?;
        output.success(&format!("{} is valid", path.display()));
        return Ok(());
    }

    let config = RagConfig::load_or_default(path)?;
    if full {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    output.header("Configuration");
    output.kv("file", &path.display().to_string());
    output.kv("database", &config.database.url);
    output.kv("vector provider", &config.vector.provider);
    output.kv("dimensions", &config.vector.dimensions.to_string());
    output.kv("embedding model", &config.embedding.model);
    output.kv("embedding endpoint", &config.embedding.base_url);
    output.kv("id step", &config.allocator.step.to_string());
    output.kv(
        "chunk window",
        &format!(
            "{} sentences, stride {}",
            config.document.window_size, config.document.window_stride
        ),
    );
    output.kv(
        "memory ttl",
        &format!("{} days", config.memory.default_ttl_days),
    );
    output.hint("Use --full to print every setting");
    Ok(())
}

async fn run_ingest(
    service: &RagService,
    owner: u64,
    title: Option<String>,
    file: &Path,
    output: &Output,
) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let title = match title {
        Some(t) => t,
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string()),
    };

    let metadata = ares_rag::types::DocumentMetadata {
        source: Some(file.display().to_string()),
        ..Default::default()
    };

    let doc_id = into_data(
        service
            .add_document(owner, &title, &content, Some(metadata))
            .await,
    )?;
    output.success(&format!("Indexed \"{}\" as document {}", title, doc_id));
    Ok(())
}

async fn run_search(
    service: &RagService,
    query: &str,
    top_k: usize,
    min_score: f32,
    output: &Output,
) -> Result<()> {
    let hits = into_data(service.search_documents(query, top_k, min_score).await)?;
    if hits.is_empty() {
        output.warning("No matching documents");
        return Ok(());
    }

    output.header(&format!("{} result(s)", hits.len()));
    for (i, hit) in hits.iter().enumerate() {
        output.hit(i + 1, hit);
    }
    output.newline();
    Ok(())
}

fn into_data<T>(response: ServiceResponse<T>) -> Result<T> {
    match response.data {
        Some(data) if response.is_ok() => Ok(data),
        _ => bail!("{} (code {})", response.message, response.code),
    }
}
