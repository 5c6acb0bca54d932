mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deepsearch::config::DeepSearchConfig;

#[derive(Parser)]
#[command(name = "deepsearch", version, about = "Deep search with cited answers over a local LLM")]
struct Cli {
    /// Config file (defaults to ~/.deepsearch/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a deep search and print the cited answer
    Ask {
        /// The question to research
        query: String,
        /// Reuse a session id so short-term memory carries across invocations
        #[arg(long)]
        session: Option<String>,
        /// Override the configured number of follow-up searches
        #[arg(long)]
        max_depth: Option<usize>,
        /// Restrict retrieval to these adapters (comma-separated)
        #[arg(long, value_delimiter = ',')]
        adapters: Option<Vec<String>>,
    },
    /// Inspect archived runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
    /// Inspect and maintain stored memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Check database health and model reachability
    Doctor,
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recent runs
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one run with its answer and sources
    Show { id: String },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Memory statistics
    Stats,
    /// List records
    List {
        /// short_term or long_term
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Exempt a record from eviction
    Pin { id: String },
    /// Copy a consolidated or pinned short-term record into long-term memory
    Promote {
        id: String,
        /// Long-term topic key
        key: String,
    },
    /// Delete a record permanently
    Forget {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Fold a session's short-term records into one
    Consolidate { session: String },
    /// Evict long-term records
    Evict {
        /// Evict one topic instead of applying the capacity limit
        #[arg(long)]
        key: Option<String>,
    },
    /// Delete all memory, or one scope of it
    Wipe {
        /// short_term or long_term; everything when omitted
        #[arg(long)]
        scope: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DeepSearchConfig::load_from(path)?,
        None => DeepSearchConfig::load()?,
    };

    // Log to stderr so stdout carries only the answer.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Ask {
            query,
            session,
            max_depth,
            adapters,
        } => {
            cli::ask::ask(config, &query, session, max_depth, adapters).await?;
        }
        Command::Runs { action } => match action {
            RunsAction::List { limit } => cli::runs::list(&config, limit)?,
            RunsAction::Show { id } => cli::runs::show(&config, &id)?,
        },
        Command::Memory { action } => match action {
            MemoryAction::Stats => cli::memory::stats(&config)?,
            MemoryAction::List { scope, key, limit } => {
                cli::memory::list(&config, scope.as_deref(), key.as_deref(), limit)?
            }
            MemoryAction::Pin { id } => cli::memory::pin(&config, &id)?,
            MemoryAction::Promote { id, key } => cli::memory::promote(&config, &id, &key)?,
            MemoryAction::Forget { id, reason } => {
                cli::memory::forget(&config, &id, reason.as_deref())?
            }
            MemoryAction::Consolidate { session } => cli::memory::consolidate(&config, &session)?,
            MemoryAction::Evict { key } => cli::memory::evict(&config, key.as_deref())?,
            MemoryAction::Wipe { scope, yes } => {
                cli::memory::wipe(&config, scope.as_deref(), yes)?
            }
        },
        Command::Doctor => {
            cli::doctor::doctor(&config).await?;
        }
    }

    Ok(())
}
