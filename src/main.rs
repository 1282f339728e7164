use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dom;
mod error;
mod export;
mod extract;
mod fetch;
mod listings;
mod pipeline;
mod store;
mod types;
mod utils;

use config::ScraperConfig;
use dom::SelectorSet;
use export::SnapshotExporter;
use fetch::Fetcher;
use pipeline::{PersistenceSink, Pipeline};
use store::CarStore;

#[derive(Parser)]
#[command(name = "turbo-listings")]
#[command(about = "turbo.az car listings scraper")]
struct Cli {
    /// Stop after this many result pages
    #[arg(long, global = true)]
    max_pages: Option<u32>,
    /// JSON config file; missing keys use the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape listings into SQLite and CSV snapshots (default)
    Run,
    /// Upsert a CSV snapshot into the database
    Import {
        #[arg(value_name = "CSV")]
        csv: PathBuf,
    },
    /// Print a summary of the stored listings
    Summary,
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    Ok(())
}

fn run_scrape(config: &ScraperConfig) -> Result<()> {
    let selectors = SelectorSet::compile(&config.selectors)?;
    let fetcher = Fetcher::new(config)?;
    let store = CarStore::open(&config.database)?;
    let mut sink = PersistenceSink::new(store, SnapshotExporter::new(config));

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current listing");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    let stats = Pipeline::new(&fetcher, config, &selectors, shutdown).run(&mut sink);

    if stats.aborted {
        println!("Could not determine the number of result pages, nothing scraped.");
        return Ok(());
    }

    println!();
    println!(
        "Pages: {}/{}{}",
        stats.pages_processed,
        stats.total_pages,
        if stats.interrupted { " (interrupted)" } else { "" }
    );
    println!(
        "Listings: {} found, {} extracted, {} skipped",
        stats.listings_found, stats.extracted, stats.skipped
    );
    println!(
        "Saved: {} inserted, {} updated, {} failed in {} flushes",
        stats.saved.inserted, stats.saved.updated, stats.saved.failed, stats.flushes
    );
    println!(
        "Database: {}",
        utils::osc8_file_link(&config.database, &config.database.display().to_string())
    );
    Ok(())
}

fn run_import(config: &ScraperConfig, csv: &Path) -> Result<()> {
    let records = export::read_snapshot(csv)?;
    let mut store = CarStore::open(&config.database)?;
    let report = store.save_batch(&records);
    info!(
        inserted = report.inserted,
        updated = report.updated,
        failed = report.failed,
        "Import finished"
    );

    println!(
        "Imported {} of {} rows from {} ({} new, {} updated, {} failed)",
        report.saved(),
        records.len(),
        csv.display(),
        report.inserted,
        report.updated,
        report.failed
    );
    println!("Database now holds {} listings", store.count()?);
    Ok(())
}

fn run_summary(config: &ScraperConfig) -> Result<()> {
    let store = CarStore::open(&config.database)?;
    let summary = store.summary()?;

    let fmt_num = |v: Option<f64>, decimals: usize| match v {
        Some(v) => format!("{:.*}", decimals, v),
        None => "-".to_string(),
    };

    println!("Listings: {}", summary.total);
    println!("Average price: {}", fmt_num(summary.avg_price, 0));
    println!("Average year: {}", fmt_num(summary.avg_year, 1));
    println!("Average mileage: {}", fmt_num(summary.avg_mileage, 0));
    println!(
        "Price range: {} .. {}",
        fmt_num(summary.min_price, 0),
        fmt_num(summary.max_price, 0)
    );
    println!("Unique brands: {}", summary.unique_brands);

    if !summary.top_brands.is_empty() {
        println!("\nTop brands:");
        for (brand, count) in &summary.top_brands {
            println!("  {:<20} {}", brand, count);
        }
    }
    if !summary.years.is_empty() {
        println!("\nListings by year:");
        for (year, count) in &summary.years {
            println!("  {}  {}", year, count);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ScraperConfig::load_from_path(path)?,
        None => ScraperConfig::default(),
    }
    .with_max_pages(cli.max_pages);

    init_logging(config.log_file.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_scrape(&config),
        Commands::Import { csv } => run_import(&config, &csv),
        Commands::Summary => run_summary(&config),
    }
}
