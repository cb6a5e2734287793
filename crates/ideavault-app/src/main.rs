//! IdeaVault terminal client.
//!
//! Usage:
//!   # Against a PocketBase server (config file, then IDEAVAULT_URL, then --url)
//!   cargo run -p ideavault-app -- --url http://127.0.0.1:8090
//!
//!   # Ephemeral in-memory vault; register an account to begin
//!   cargo run -p ideavault-app -- --memory

mod command;
mod shell;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ideavault_client::{ClientConfig, MemoryBackend, PocketBaseBackend, VaultBackend, start_client};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt};

use shell::Shell;

/// Terminal client for an IdeaVault collection.
#[derive(Parser, Debug)]
#[command(name = "ideavault")]
#[command(about = "Capture and organize startup ideas from the terminal")]
struct Args {
    /// Server base URL (overrides the config file and IDEAVAULT_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Config file (default: <config dir>/ideavault/client.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use an ephemeral in-memory backend instead of a server
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the shell
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::load_default()?,
    }
    .with_env()
    .with_base_url_override(args.url.clone());

    let backend: Arc<dyn VaultBackend> = if args.memory {
        tracing::info!("Starting with in-memory backend");
        Arc::new(MemoryBackend::new())
    } else {
        tracing::info!(url = %config.base_url, "Connecting to PocketBase");
        Arc::new(PocketBaseBackend::new(&config).context("failed to build HTTP client")?)
    };

    let (_session, sync) = start_client(backend, config.insert_order);
    let mut shell = Shell::new(sync.clone(), std::io::stdout());
    shell.run(BufReader::new(tokio::io::stdin())).await?;

    sync.shutdown();
    tracing::info!("Goodbye");
    Ok(())
}
