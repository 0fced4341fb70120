//! # Enforcement Search CLI (`esearch`)
//!
//! Routes natural-language questions about sanctions enforcement documents
//! to the right retrieval strategy and prints the answer.
//!
//! ## Usage
//!
//! ```bash
//! esearch --config ./config/esearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `esearch ask "<question>"` | Classify, retrieve and answer |
//! | `esearch classify "<question>"` | Show how a question would be routed |
//! | `esearch routes` | List the supported query types with examples |
//! | `esearch check` | Validate the config and construct every backend |
//!
//! ## Examples
//!
//! ```bash
//! # Structured filter search
//! esearch ask "Find OFAC violations related to Iran sanctions from 2020 to 2023"
//!
//! # Grounded answer over retrieved passages, as JSON
//! esearch ask "Can Iranian origin banknotes be imported into the U.S.?" --json
//!
//! # Routing diagnostics with span events
//! RUST_LOG=enforcement_search=debug esearch classify "How many violations were there in 2023?"
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use enforcement_search::{ask, config};

/// Enforcement Search: question routing and retrieval-augmented answering
/// over legal enforcement documents.
#[derive(Parser)]
#[command(
    name = "esearch",
    about = "Question routing and retrieval-augmented answering over legal enforcement documents",
    version,
    long_about = "esearch classifies a question, routes it to a structured filter search, a \
    semantic search with a grounded generated answer, or the statistical placeholder, and prints \
    the answer together with the documents it was built from."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/esearch.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question.
    ///
    /// Runs the full pipeline: classification (with retry), the selected
    /// retrieval strategy, and answer assembly. Ctrl-C cancels the request.
    Ask {
        question: String,

        /// Print the answer envelope as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Classify a question without running a search.
    Classify {
        question: String,

        #[arg(long)]
        json: bool,
    },

    /// List the supported query types with example questions.
    Routes {
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and report the configured backends.
    Check,
}

fn init_tracing(verbose: u8) -> anyhow::Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    // Commands that don't require config
    if let Commands::Routes { json } = cli.command {
        return ask::run_routes(json);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask { question, json } => {
            ask::run_ask(&cfg, &question, json).await?;
        }
        Commands::Classify { question, json } => {
            ask::run_classify(&cfg, &question, json).await?;
        }
        Commands::Check => {
            ask::run_check(&cfg)?;
        }
        Commands::Routes { .. } => {}
    }

    Ok(())
}
