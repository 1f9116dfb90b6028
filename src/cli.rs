//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;

use crate::config::ScrapeConfig;
use crate::models::{JobStatus, SearchCriteria};
use crate::run::{RunEvent, ScrapeEngine};
use crate::store::SqliteJobStore;

#[derive(Parser)]
#[command(name = "jobharvest")]
#[command(about = "Job-listing scrape engine with anti-detection pacing")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true, default_value = "jobs.db")]
    db: PathBuf,

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
    /// Run a job search and persist discovered listings
    Search {
        /// Job title or keywords to search for
        title: String,
        /// Location to search in
        #[arg(short, long, default_value = "")]
        location: String,
        /// Extra query filter as key=value (can repeat)
        #[arg(short, long)]
        filter: Vec<String>,
        /// Maximum number of search pages to walk
        #[arg(long)]
        max_pages: Option<u32>,
        /// Skip detail pages; persist partial records from search results
        #[arg(long)]
        no_details: bool,
    },

    /// Export stored listings to CSV
    Export {
        /// Output file path
        #[arg(short, long, default_value = "jobs.csv")]
        output: PathBuf,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            title,
            location,
            filter,
            max_pages,
            no_details,
        } => {
            cmd_search(
                cli.config.as_deref(),
                &cli.db,
                title,
                location,
                filter,
                max_pages,
                no_details,
            )
            .await
        }
        Commands::Export { output } => cmd_export(&cli.db, &output).await,
    }
}

async fn cmd_search(
    config_path: Option<&std::path::Path>,
    db: &std::path::Path,
    title: String,
    location: String,
    filters: Vec<String>,
    max_pages: Option<u32>,
    no_details: bool,
) -> anyhow::Result<()> {
    let mut config = ScrapeConfig::load(config_path)?;
    if let Some(pages) = max_pages {
        config.max_pages = pages;
    }
    if no_details {
        config.fetch_details = false;
    }

    let mut criteria = SearchCriteria::new(title, location);
    for entry in filters {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("filter must be key=value, got '{}'", entry))?;
        criteria = criteria.with_filter(key, value);
    }

    let store = Arc::new(SqliteJobStore::open(db)?);
    let driver = build_driver(&config)?;
    let engine = Arc::new(ScrapeEngine::new(Arc::new(config), driver, store));

    // First Ctrl-C cancels gracefully; a second one kills the process.
    let canceller = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", style("Cancelling, finishing in-flight work...").yellow());
            canceller.cancel();
        }
    });

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let summary = engine.run(criteria).await?;
    printer.abort();

    println!();
    println!(
        "{} {} found, {} persisted, {} failed, {} abandoned",
        style("Done:").green().bold(),
        summary.found,
        style(summary.persisted).green(),
        style(summary.failed).yellow(),
        style(summary.abandoned).red(),
    );
    Ok(())
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::StatusChanged { job_id, status } => {
            let tag = match status {
                JobStatus::Discovered => style("discovered").cyan(),
                JobStatus::Fetching => style("fetching  ").dim(),
                JobStatus::Extracted => style("extracted ").blue(),
                JobStatus::Persisted => style("persisted ").green(),
                JobStatus::Failed => style("failed    ").yellow(),
                JobStatus::Abandoned => style("abandoned ").red(),
            };
            println!("  {} {}", tag, job_id);
        }
        RunEvent::RecordPersisted(record) => {
            println!(
                "  {} {} at {} ({})",
                style("saved     ").green().bold(),
                record.title,
                record.company,
                record.location
            );
        }
        RunEvent::PersistentBlock => {
            eprintln!(
                "{}",
                style("Persistent block: fresh sessions are rejected immediately, giving up")
                    .red()
                    .bold()
            );
        }
        RunEvent::RunComplete(_) => {}
    }
}

async fn cmd_export(db: &std::path::Path, output: &std::path::Path) -> anyhow::Result<()> {
    let store = SqliteJobStore::open(db)?;
    let count = store.export_csv(output).await?;
    println!(
        "{} {} records to {}",
        style("Exported").green().bold(),
        count,
        output.display()
    );
    Ok(())
}

#[cfg(feature = "browser")]
fn build_driver(config: &ScrapeConfig) -> anyhow::Result<Arc<dyn crate::browser::BrowserDriver>> {
    Ok(Arc::new(crate::browser::ChromiumDriver::new(
        config.browser.clone(),
        config.page_timeout(),
    )))
}

#[cfg(not(feature = "browser"))]
fn build_driver(_config: &ScrapeConfig) -> anyhow::Result<Arc<dyn crate::browser::BrowserDriver>> {
    anyhow::bail!("built without the 'browser' feature; no browser driver available")
}
