//! bdms-migrate - schema migrations for the borehole data store

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{backup, lint, logs, revert, script, status, update};

/// bdms-migrate - apply and revert BDMS schema migrations
#[derive(Parser)]
#[command(name = "bdms-migrate", version, about, long_about = None)]
struct Cli {
    /// DuckDB database file or `:memory:` (overrides settings and BDMS_CONNECTION)
    #[arg(long, global = true)]
    connection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations in id order
    Update {
        /// Stop after applying this migration
        #[arg(long)]
        to: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Revert applied migrations, most recent first
    Revert {
        /// Number of migrations to revert
        #[arg(long, default_value = "1", conflicts_with = "to")]
        steps: usize,
        /// Revert every migration applied after this one
        #[arg(long)]
        to: Option<String>,
        /// Skip creating safety backup
        #[arg(long)]
        skip_backup: bool,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show applied and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List compiled-in migrations and their operations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check migration definitions without touching the database
    Lint {
        /// Fail on warnings as well as errors
        #[arg(long)]
        deny_warnings: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render migrations as a SQL script without executing it
    Script {
        /// Only migrations not yet in the ledger
        #[arg(long)]
        pending: bool,
        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage database backups
    Backup {
        #[command(subcommand)]
        command: backup::BackupCommands,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BDMS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let connection = cli.connection;
    match cli.command {
        Commands::Update { to, json } => update::run(connection, to, json),
        Commands::Revert { steps, to, skip_backup, force, json } => {
            let target = match to {
                Some(id) => revert::RevertTarget::To(id),
                None => revert::RevertTarget::Steps(steps),
            };
            revert::run(connection, target, skip_backup, force, json)
        }
        Commands::Status { json } => status::run(connection, json),
        Commands::List { json } => status::run_list(json),
        Commands::Lint { deny_warnings, json } => lint::run(deny_warnings, json),
        Commands::Script { pending, output } => script::run(connection, pending, output),
        Commands::Backup { command } => backup::run(connection, command),
        Commands::Logs { command } => logs::run(command),
    }
}
