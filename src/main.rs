//! # Source Context CLI (`srcctx`)
//!
//! Maps documentation pages to the source files and folders they describe.
//!
//! ## Usage
//!
//! ```bash
//! srcctx --config ./srcctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srcctx detect <doc>` | Detect the source context of one page |
//! | `srcctx batch [docs..]` | Run detection over many pages as a background job |
//! | `srcctx tree` | Print the project snapshot detection works from |
//! | `srcctx serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Rule-based detection for one page
//! srcctx detect docs/storage-adapters.md
//!
//! # Every page under the configured docs root, JSON progress on stderr
//! srcctx batch --progress json
//!
//! # Another project, machine-readable output
//! srcctx --root ../my-app detect ../my-app/docs/api.md --json
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (for example `RUST_LOG=source_context=debug` to see agent tool calls).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use source_context::progress::ProgressMode;
use source_context::{batch, config, detect, file_tree, server};

/// Detect which source files a documentation page describes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, rule-based detection runs over the current directory.
#[derive(Parser)]
#[command(
    name = "srcctx",
    about = "Detect which source files and folders a documentation page describes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults are used when it does not exist.
    #[arg(long, global = true, default_value = "./srcctx.toml")]
    config: PathBuf,

    /// Project root to scan, overriding `detection.project_root`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the source context of a single documentation page.
    Detect {
        /// Path to the page (Markdown or MDX).
        doc: PathBuf,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Detect source contexts for many pages as one batch job.
    ///
    /// With no documents listed, every page under `detection.docs_root`
    /// matching `detection.doc_globs` is processed.
    Batch {
        /// Pages to process, in order.
        docs: Vec<PathBuf>,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the finished job as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the file tree snapshot after excludes and ignore rules.
    Tree {
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load_or_minimal(&cli.config)?;
    if let Some(root) = cli.root {
        cfg.detection.project_root = root;
    }

    match cli.command {
        Commands::Detect { doc, json } => {
            detect::run_detect(&cfg, &doc, json).await?;
        }
        Commands::Batch {
            docs,
            progress,
            json,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            batch::run_batch(&cfg, docs, mode, json).await?;
        }
        Commands::Tree { json } => {
            file_tree::run_tree(&cfg, json)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
