//! # Full-text pipeline CLI (`ftx`)
//!
//! ```bash
//! ftx --config ./config/ftx.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ftx run <links>` | Classify, extract and publish every record in a link file |
//! | `ftx check <links>` | Classify and route only; nothing is extracted or written |
//! | `ftx show <bibcode>` | Print the stored provenance of a bibcode |
//! | `ftx stats` | Audit the store for complete and incomplete pairs |
//! | `ftx sweep` | Clean up after interrupted publications |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fulltext_pipeline::config::{self, Config};
use fulltext_pipeline::{links, pipeline, show, stats};

/// Full-text pipeline: extract full text only when its source has changed.
#[derive(Parser)]
#[command(name = "ftx", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ftx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a link file.
    ///
    /// Records whose source path matches the stored provenance are skipped.
    /// New and changed records are extracted and published atomically.
    Run {
        /// Link file: `bibcode <path> [provider] [format]` per line.
        links: PathBuf,
    },

    /// Classify and route a link file without extracting anything.
    Check {
        links: PathBuf,
    },

    /// Show the stored provenance for a bibcode.
    Show {
        bibcode: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Audit the store.
    Stats,

    /// Remove staging leftovers and restore interrupted replacements.
    Sweep,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Run { links } => {
            let batch = links::read_links_from_file(&links)?;
            let summary = pipeline::run_pipeline(&cfg, batch).await?;
            summary.print();
        }
        Commands::Check { links } => {
            let batch = links::read_links_from_file(&links)?;
            let summary = pipeline::run_check(&cfg, batch).await?;
            summary.print();
        }
        Commands::Show { bibcode, json } => {
            show::run_show(&cfg, &bibcode, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Sweep => {
            stats::run_sweep(&cfg)?;
        }
    }

    Ok(())
}
