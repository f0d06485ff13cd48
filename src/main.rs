//! Librarian main entry point
//!
//! This is the command-line interface for registering documentation sources
//! and running web ingestion against the local store.

use anyhow::Context;
use clap::{Parser, Subcommand};
use librarian::config::{load_config_or_default, Config};
use librarian::crawler::{ingest_web_source, IngestOptions, IngestServices};
use librarian::output::{format_ingest_summary, format_source_list, load_source_stats, print_source_stats};
use librarian::storage::{
    shared, NewWebSource, SqliteStorage, Storage, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAGES,
};
use librarian::url::{normalize_url, PathPrefixSet};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Librarian: a local mirror of developer documentation
///
/// Librarian crawls documentation sites into a local store of documents and
/// search chunks, re-crawling incrementally and deactivating pages that
/// disappear upstream.
#[derive(Parser, Debug)]
#[command(name = "librarian")]
#[command(version)]
#[command(about = "A local mirror of developer documentation", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a web documentation source
    Add {
        /// Root URL of the documentation
        url: String,

        /// Allowed path prefix (repeatable); defaults to the root path
        #[arg(long = "allow", value_name = "PREFIX")]
        allow: Vec<String>,

        /// Denied path prefix (repeatable)
        #[arg(long = "deny", value_name = "PREFIX")]
        deny: Vec<String>,

        /// Maximum link depth from the root
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: u32,

        /// Maximum number of pages recorded for the source
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: u32,

        /// Version label for stored documents
        #[arg(long)]
        version_label: Option<String>,

        /// Always render pages with the headless renderer
        #[arg(long)]
        force_headless: bool,

        /// Accept pages without code snippets
        #[arg(long)]
        no_require_code_snippets: bool,
    },

    /// List registered sources
    List,

    /// Remove a source with all of its pages, documents and chunks
    Remove {
        /// Source id
        id: i64,
    },

    /// Crawl a source and update its documents
    Ingest {
        /// Source id
        id: i64,

        /// Discard all crawl state and re-crawl from scratch
        #[arg(long)]
        force: bool,

        /// Pages fetched concurrently (overrides the config file)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show crawl and document statistics for a source
    Status {
        /// Source id
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = load_config_or_default(cli.config.as_deref()).context("Failed to load configuration")?;
    let db_path = config.storage.database_path();
    tracing::debug!("Using database {}", db_path.display());
    let mut storage = SqliteStorage::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    match cli.command {
        Command::Add {
            url,
            allow,
            deny,
            max_depth,
            max_pages,
            version_label,
            force_headless,
            no_require_code_snippets,
        } => {
            let root = normalize_url(&url).with_context(|| format!("Invalid root URL: {}", url))?;
            let source = NewWebSource {
                denied_paths: PathPrefixSet::new(deny)?,
                max_depth,
                max_pages,
                version_label,
                force_headless,
                require_code_snippets: !no_require_code_snippets,
                ..NewWebSource::new(&root)
            }
            .with_allowed_paths(&root, PathPrefixSet::new(allow)?);

            let id = storage.add_web_source(&source)?;
            println!("Added source {} ({})", id, root);
        }
        Command::List => {
            print!("{}", format_source_list(&storage.list_sources()?));
        }
        Command::Remove { id } => {
            if storage.remove_source(id)? {
                println!("Removed source {}", id);
            } else {
                anyhow::bail!("Source {} not found", id);
            }
        }
        Command::Status { id } => {
            print_source_stats(&load_source_stats(&storage, id)?);
        }
        Command::Ingest {
            id,
            force,
            concurrency,
        } => {
            handle_ingest(&config, storage, id, force, concurrency).await?;
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("librarian=info,warn"),
            1 => EnvFilter::new("librarian=debug,info"),
            2 => EnvFilter::new("librarian=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs one ingestion, stopping cleanly on Ctrl-C
async fn handle_ingest(
    config: &Config,
    storage: SqliteStorage,
    source_id: i64,
    force: bool,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let mut options = IngestOptions::from_config(config);
    options.force = force;
    if let Some(concurrency) = concurrency {
        options.concurrency = concurrency.max(1);
    }

    let services = IngestServices::from_config(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing the current batch");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = ingest_web_source(
        shared(storage),
        source_id,
        services,
        &options,
        shutdown_rx,
    )
    .await
    .with_context(|| format!("Ingestion of source {} failed", source_id))?;

    println!("{}", format_ingest_summary(&summary));
    Ok(())
}
