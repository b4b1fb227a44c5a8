//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod config_cmd;
mod crawl;
mod inspect;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use newsacquire::config::load_settings;
use newsacquire::validate::ValidationMode;

#[derive(Parser)]
#[command(name = "news")]
#[command(about = "Resilient news article acquisition")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, extract, validate and store articles for a list of jobs
    Crawl {
        /// Newline-delimited JSON jobs file ("-" reads stdin)
        #[arg(long, default_value = "-")]
        jobs: PathBuf,
        /// Reject articles below the word minimum (default)
        #[arg(long, conflicts_with = "lenient")]
        strict: bool,
        /// Keep short articles, flagged as low confidence
        #[arg(long)]
        lenient: bool,
        /// Global cap on in-flight fetches
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Keep records in memory instead of the database
        #[arg(long)]
        dry_run: bool,
        /// Print the final statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify a saved response (OK, CHALLENGE, RATE_LIMITED, HARD_FAIL)
    Classify {
        /// File holding the response body
        file: PathBuf,
        /// HTTP status the body was served with
        #[arg(short, long, default_value = "200")]
        status: u16,
        /// Response header as NAME=VALUE (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Origin whose configured challenge patterns apply
        #[arg(long)]
        origin: Option<String>,
    },

    /// Run extraction and validation over a saved HTML document
    Extract {
        /// HTML file to extract from
        file: PathBuf,
        /// URL the document was served from
        #[arg(short, long)]
        url: String,
        /// Origin whose selectors and thresholds apply
        #[arg(long)]
        origin: Option<String>,
        /// Validate in lenient mode
        #[arg(long)]
        lenient: bool,
    },

    /// Show the effective configuration
    Config,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut settings, config) = load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Crawl {
            jobs,
            strict,
            lenient,
            concurrency,
            dry_run,
            json,
        } => {
            if strict {
                settings.validation.mode = ValidationMode::Strict;
            } else if lenient {
                settings.validation.mode = ValidationMode::Lenient;
            }
            if let Some(n) = concurrency {
                anyhow::ensure!(n > 0, "--concurrency must be at least 1");
                settings.concurrency = n;
            }
            crawl::cmd_crawl(&settings, &jobs, dry_run, json).await
        }
        Commands::Classify {
            file,
            status,
            headers,
            origin,
        } => inspect::cmd_classify(&settings, &file, status, &headers, origin.as_deref()).await,
        Commands::Extract {
            file,
            url,
            origin,
            lenient,
        } => {
            if lenient {
                settings.validation.mode = ValidationMode::Lenient;
            }
            inspect::cmd_extract(&settings, &file, &url, origin.as_deref()).await
        }
        Commands::Config => config_cmd::cmd_config_show(&settings, &config),
    }
}
