//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// notes: rename notes in a markdown vault without breaking their links.
#[derive(Parser)]
#[command(name = "notes")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Vault root directory (overrides `vault_path` in the config file).
    #[arg(long, global = true, env = "NOTES_VAULT")]
    pub vault: Option<PathBuf>,

    /// Write-ahead log directory (overrides `wal_dir` in the config file).
    #[arg(long, global = true, env = "NOTES_WAL_DIR")]
    pub wal_dir: Option<PathBuf>,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Rename a note and rewrite the links that point to it.
    Rename(RenameArgs),
    /// Show backlinks and forward links of a note.
    Links(LinksArgs),
    /// List write-ahead log entries left behind by interrupted renames.
    Pending(PendingArgs),
    /// Print version information.
    Version,
}

/// Arguments for the rename command.
#[derive(Args)]
pub struct RenameArgs {
    /// Current vault-relative path of the note, e.g. `Projects/Trip Report.md`.
    pub from: String,

    /// New vault-relative path, e.g. `Archive/Trip Report 2024.md`.
    pub to: String,

    /// Rename the file only; leave links to it untouched.
    #[arg(long)]
    pub no_update_links: bool,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the links command.
#[derive(Args)]
pub struct LinksArgs {
    /// Vault-relative path of the note.
    pub note: String,
}

/// Arguments for the pending command.
#[derive(Args)]
pub struct PendingArgs {
    /// Only report entries at least this many seconds old.
    #[arg(long, default_value = "60")]
    pub older_than_secs: u64,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for CLI commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }
}
