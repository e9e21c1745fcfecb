use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gander::crawl::{crawl_batch, CrawlOptions};
use gander::model::Site;
use gander::repo::{LogNotifier, MemoryRepository};
use gander::{Config, FeedEngine};

#[derive(Parser, Debug)]
#[command(
    name = "gander",
    about = "Feed ingestion engine: parse, discover, and crawl RSS/Atom feeds"
)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and parse a single feed, printing its items as JSON
    Parse {
        /// Feed URL
        url: String,
    },
    /// Discover candidate feed URLs for a site
    Discover {
        /// Human-facing site URL
        site_url: String,
    },
    /// Run one crawl pass over the given feed URLs (in-memory repository)
    Crawl {
        /// Feed URLs to register as sites
        #[arg(required = true)]
        feeds: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean JSON
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load config")?,
        None => Config::default(),
    };

    let engine = FeedEngine::new(&config).context("Failed to build engine")?;

    match args.command {
        Command::Parse { url } => match engine.parse_url(&url).await {
            Ok(feed) => print_json(&*feed)?,
            Err(e) => fail(&e.to_string())?,
        },
        Command::Discover { site_url } => match engine.discover(&site_url).await {
            Ok(feeds) => print_json(&serde_json::json!({ "feeds": feeds }))?,
            Err(e) => fail(&e.to_string())?,
        },
        Command::Crawl { feeds } => {
            let repo = MemoryRepository::new();
            for (index, feed_url) in feeds.iter().enumerate() {
                repo.add_site(Site {
                    id: index as i64 + 1,
                    url: feed_url.clone(),
                    feed_url: Some(feed_url.clone()),
                    etag: None,
                    last_modified: None,
                    last_checked_at: None,
                })
                .await;
            }
            let results = crawl_batch(
                &engine,
                &repo,
                &LogNotifier,
                &CrawlOptions::from_config(&config),
            )
            .await
            .context("Crawl pass failed")?;
            print_json(&results)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Interactive error payload: `{ "error": "..." }` on stdout, nonzero exit.
fn fail(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "error": message }))?
    );
    std::process::exit(1);
}
