//! notes: transactional note renames for a markdown vault.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use notes_core::{Vault, WalStore};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod config;
mod tools;

use cli::{Cli, Commands};
use config::{Config, LogFormat};
use tools::Context;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Commands::Version = cli.command {
        println!("notes {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = load_config(&cli.config)?;
    if let Some(vault) = cli.vault.clone() {
        config.vault_path = Some(vault);
    }
    if let Some(wal_dir) = cli.wal_dir.clone() {
        config.wal_dir = Some(wal_dir);
    }
    init_logging(&config)?;

    let ctx = Arc::new(build_context(&config)?);
    let (tool, arguments) = tool_call(&cli.command, &config);

    info!("Running {} against {}", tool, ctx.vault().root().display());
    let outcome = tokio::task::spawn_blocking(move || tools::call(&ctx, tool, &arguments))
        .await
        .context("Tool task panicked")?;

    match outcome {
        Ok(output) => {
            println!("{}", output);
            Ok(ExitCode::SUCCESS)
        }
        Err(output) => {
            eprintln!("{}", output);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Map a subcommand onto the tool it drives and that tool's arguments.
fn tool_call(command: &Commands, config: &Config) -> (&'static str, Value) {
    match command {
        Commands::Rename(args) => (
            "rename_note",
            json!({
                "from": args.from,
                "to": args.to,
                "update_links": config.update_links && !args.no_update_links,
                "format": args.format.as_str(),
            }),
        ),
        Commands::Links(args) => ("get_links", json!({ "file_path": args.note })),
        Commands::Pending(args) => (
            "list_pending",
            json!({
                "older_than_secs": args.older_than_secs,
                "format": args.format.as_str(),
            }),
        ),
        Commands::Version => ("version", Value::Null),
    }
}

fn build_context(config: &Config) -> Result<Context> {
    let vault_path = config.vault_path.clone().with_context(|| {
        format!(
            "No vault configured. Pass --vault, set NOTES_VAULT or add vault_path to {}",
            Config::default_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "the config file".to_string())
        )
    })?;
    let vault = Vault::open(&vault_path)
        .with_context(|| format!("Failed to open vault {}", vault_path.display()))?;

    let wal_dir = match &config.wal_dir {
        Some(dir) => dir.clone(),
        None => WalStore::default_dir().context("Failed to locate the write-ahead log directory")?,
    };

    Ok(Context::new(
        Arc::new(vault),
        WalStore::new(wal_dir),
        config.update_links,
    ))
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    Config::load(path.as_deref()).context("Failed to load configuration")
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level));

    // Logs go to stderr so tool output on stdout stays clean.
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match config.log.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
        }
    }

    Ok(())
}
