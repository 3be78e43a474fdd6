mod config;
mod db;
mod export;
mod extract;
mod fetch;
mod lock;
mod notify;
mod page;
mod scheduler;
mod utils;
mod walker;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::db::Store;
use crate::fetch::HttpFetcher;
use crate::lock::InstanceLock;
use crate::notify::SmtpMailer;
use crate::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "ad_watcher", about = "Watch classifieds searches and mail new ads")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every feed, sleep, repeat forever (default)
    Run,
    /// Run a single cycle over all feeds and exit
    Once,
    /// Known-ad counts per feed
    Stats,
    /// Show a feed's known ads, newest first
    List {
        /// Feed name as configured
        #[arg(short, long)]
        feed: String,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Write a feed's known ads to CSV
    Export {
        /// Feed name as configured
        #[arg(short, long)]
        feed: String,
        /// Output file (default: <feed>.csv)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let lock = InstanceLock::acquire(&config.db_path)?;
            let store = open_store(&config.db_path)?;
            let fetcher = HttpFetcher::new(config.request_timeout())?;
            let mailer = SmtpMailer::new(&config.mail, config.request_timeout());
            tracing::debug!("Holding {}", lock.path().display());
            info!(
                "Watching {} feeds every {}s (store: {})",
                config.feeds.len(),
                config.scrape_delay_secs,
                config.db_path.display()
            );
            Scheduler::new(&config, &store, &fetcher, &mailer)
                .run_forever()
                .await;
            Ok(())
        }
        Commands::Once => {
            let _lock = InstanceLock::acquire(&config.db_path)?;
            let store = open_store(&config.db_path)?;
            let fetcher = HttpFetcher::new(config.request_timeout())?;
            let mailer = SmtpMailer::new(&config.mail, config.request_timeout());

            let t0 = Instant::now();
            let reports = Scheduler::new(&config, &store, &fetcher, &mailer)
                .run_cycle()
                .await;

            println!(
                "{:<16} | {:>5} | {:>5} | {:>5} | {:>8} | {:>10} | {:<9} | {:>6} | Walk",
                "Feed", "Pages", "Ads", "New", "Excluded", "Unreadable", "Persisted", "Mailed"
            );
            println!("{}", "-".repeat(100));
            for r in &reports {
                println!(
                    "{:<16} | {:>5} | {:>5} | {:>5} | {:>8} | {:>10} | {:<9} | {:>6} | {}",
                    utils::truncate(&r.feed, 16),
                    r.pages,
                    r.fragments,
                    r.new_ids.len(),
                    r.excluded,
                    r.malformed + r.extract_failed,
                    if r.persisted { "yes" } else { "NO" },
                    format!("{}/{}", r.delivered, r.delivered + r.delivery_failures),
                    r.walk_end.as_ref().map(|e| e.to_string()).unwrap_or_default()
                );
            }
            let skipped = config.feeds.len() - reports.len();
            if skipped > 0 {
                println!("\n{} feed(s) skipped, see log", skipped);
            }
            println!("\nDone in {:.1}s", t0.elapsed().as_secs_f64());
            Ok(())
        }
        Commands::Stats => {
            let store = open_store(&config.db_path)?;
            let counts = store.feed_counts()?;
            for feed in &config.feeds {
                let n = counts
                    .iter()
                    .find(|c| c.feed == feed.name)
                    .map(|c| c.ads)
                    .unwrap_or(0);
                println!("{:<20} {:>6} known ads", feed.name, n);
            }
            // Feeds dropped from the config still have rows.
            for c in counts.iter().filter(|c| config.feed(&c.feed).is_none()) {
                println!("{:<20} {:>6} known ads (not configured)", c.feed, c.ads);
            }
            Ok(())
        }
        Commands::List { feed, limit, json } => {
            let store = open_store(&config.db_path)?;
            let known = store.load(&feed)?;
            let rows: Vec<_> = known.records().iter().take(limit).collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if known.is_empty() {
                println!("No known ads for {}.", feed);
                return Ok(());
            }

            println!(
                "{:>12} | {:<40} | {:>10} | {:<16} | {:<14}",
                "Id", "Title", "Price", "Location", "Posted"
            );
            println!("{}", "-".repeat(104));
            for r in &rows {
                println!(
                    "{:>12} | {:<40} | {:>10} | {:<16} | {:<14}",
                    r.id,
                    utils::truncate(&r.title, 40),
                    r.price,
                    utils::truncate(&r.location, 16),
                    utils::truncate(&r.posted, 14)
                );
            }
            println!("\n{} of {} known ads for {}", rows.len(), known.len(), feed);
            Ok(())
        }
        Commands::Export { feed, out } => export_feed(&config, &feed, out),
    }
}

fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("Failed to open store {}", path.display()))
}

fn export_feed(config: &Config, feed: &str, out: Option<PathBuf>) -> Result<()> {
    let store = open_store(&config.db_path)?;
    let known = store.load(feed)?;
    let out = out.unwrap_or_else(|| PathBuf::from(format!("{}.csv", feed)));

    let file = std::fs::File::create(&out)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    export::write_csv(std::io::BufWriter::new(file), &known)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} ads to {}", known.len(), out.display());
    Ok(())
}
