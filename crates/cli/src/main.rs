//! ctxpack CLI — the main entry point.
//!
//! Commands:
//! - `apply`     — Commit a batch of write intents atomically
//! - `rebuild`   — Regenerate the context pack from its sources
//! - `decompose` — Write pack edits back to their source files
//! - `prune`     — Print the pack fitted to a size budget
//! - `validate`  — Check configuration (and optionally an intent batch)
//! - `status`    — Show store, pack and stamp status

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ctxpack",
    about = "ctxpack — atomic markdown document sync against a git-backed store",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.ctxpack/config.toml)
    #[arg(short, long, global = true, env = "CTXPACK_CONFIG")]
    config: Option<PathBuf>,

    /// Sync object name; keys the per-object state directory
    #[arg(short, long, global = true, default_value = "default")]
    object: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit a batch of write intents (JSON file, or `-` for stdin)
    Apply {
        /// Intent batch: an array, a single intent, or `{"intents": [...]}`
        input: String,
    },

    /// Regenerate the context pack from its canonical sources
    Rebuild,

    /// Write edited pack sections back to their source files
    Decompose,

    /// Print the context pack pruned to a size budget
    Prune {
        /// Budget in bytes (defaults to prune.budget_chars)
        #[arg(short, long)]
        budget: Option<usize>,

        /// Write the pruned pack here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration and, optionally, an intent batch
    Validate {
        /// Intent batch to check without committing
        #[arg(long)]
        intents: Option<String>,

        /// Print the default configuration and exit
        #[arg(long)]
        print_default: bool,
    },

    /// Show store, pack and stamp status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so pack output can be piped
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    let object = cli.object.as_str();
    match cli.command {
        Commands::Apply { input } => {
            commands::apply::run(&mut commands::session(config_path, object)?, &input).await?
        }
        Commands::Rebuild => {
            commands::rebuild::run(&mut commands::session(config_path, object)?).await?
        }
        Commands::Decompose => {
            commands::decompose::run(&mut commands::session(config_path, object)?).await?
        }
        Commands::Prune { budget, output } => {
            let mut session = commands::session(config_path, object)?;
            commands::prune::run(&mut session, budget, output.as_deref()).await?
        }
        Commands::Validate {
            intents,
            print_default,
        } => commands::validate::run(config_path, intents.as_deref(), print_default)?,
        Commands::Status => {
            commands::status::run(&mut commands::session(config_path, object)?).await?
        }
    }

    Ok(())
}
