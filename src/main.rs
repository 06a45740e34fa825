//! # storelens CLI
//!
//! ## Usage
//!
//! ```bash
//! storelens --config ./config/storelens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `storelens init` | Create the path record store |
//! | `storelens serve` | Start the HTTP API |
//! | `storelens extract <file>...` | Print the extracted text of files |
//! | `storelens crossref <file>...` | Report values shared between files |
//! | `storelens paths <action>` | Manage configured paths |
//! | `storelens ask "<question>"` | Ask a question over files, paths and store data |
//! | `storelens format-inr <amount>` | Format a rupee amount |
//!
//! `extract`, `crossref` and `format-inr` work without a config file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storelens::{commands, config, migrate, server};

/// storelens: a retail operations assistant over uploaded files,
/// configured folders, and store data.
#[derive(Parser)]
#[command(name = "storelens", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/storelens.toml")]
    config: PathBuf,

    /// Log at info level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and tables. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Extract and print the text content of files.
    Extract {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Find structured values (store IDs, dates, amounts...) shared between files.
    Crossref {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Manage configured paths.
    Paths {
        #[command(subcommand)]
        action: PathsAction,
    },

    /// Ask a question.
    Ask {
        question: String,

        /// Include a file as an upload. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Do not pull files from configured paths.
        #[arg(long)]
        no_paths: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Format an amount in rupees using lakh / crore units.
    FormatInr {
        #[arg(allow_hyphen_values = true)]
        amount: String,
    },
}

#[derive(Subcommand)]
enum PathsAction {
    /// List configured paths.
    List,
    /// Add a path. Rejected if it does not exist or is already configured.
    Add {
        name: String,
        location: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Check a location without saving anything.
    Validate { location: String },
    /// Change a path's name, location, or description.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a path record. Files on disk are not touched.
    Remove { id: String },
    /// Rescan a path and refresh its file listing.
    Scan { id: String },
    /// Search file names and contents across configured paths.
    Search { query: String },
}

fn init_logging(cli: &Cli) {
    let default_filter = if cli.verbose || matches!(cli.command, Commands::Serve) {
        "storelens=info"
    } else {
        "storelens=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Commands that don't require config
    match &cli.command {
        Commands::Extract { files } => return commands::run_extract(files),
        Commands::Crossref { files } => return commands::run_crossref(files),
        Commands::FormatInr { amount } => return commands::run_format_inr(amount),
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Paths { action } => match action {
            PathsAction::List => commands::run_paths_list(&cfg).await?,
            PathsAction::Add {
                name,
                location,
                description,
            } => commands::run_paths_add(&cfg, &name, &location, description.as_deref()).await?,
            PathsAction::Validate { location } => commands::run_paths_validate(&cfg, &location)?,
            PathsAction::Update {
                id,
                name,
                location,
                description,
            } => {
                commands::run_paths_update(
                    &cfg,
                    &id,
                    name.as_deref(),
                    location.as_deref(),
                    description.as_deref(),
                )
                .await?
            }
            PathsAction::Remove { id } => commands::run_paths_remove(&cfg, &id).await?,
            PathsAction::Scan { id } => commands::run_paths_scan(&cfg, &id).await?,
            PathsAction::Search { query } => commands::run_paths_search(&cfg, &query).await?,
        },
        Commands::Ask {
            question,
            files,
            no_paths,
            json,
        } => {
            commands::run_ask(&cfg, &question, &files, !no_paths, json).await?;
        }
        Commands::Extract { .. } | Commands::Crossref { .. } | Commands::FormatInr { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
