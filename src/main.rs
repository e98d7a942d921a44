use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mirror_jukebox::config::AppConfig;
use mirror_jukebox::crawler::Crawler;
use mirror_jukebox::db::{self, DynError};
use mirror_jukebox::fetcher::{BoundedFetcher, FetchTimeouts};
use mirror_jukebox::serve::serve_catalog;

#[derive(Parser, Debug)]
#[command(author, version, about = "Catalog a remote music mirror and play it back on shuffle")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the mirror into the catalog and exit
    Crawl {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Serve the catalog and player API via HTTP
    Serve {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        /// Start a background crawl even if the catalog is populated
        #[arg(long)]
        crawl: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), DynError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Crawl { config } => crawl(AppConfig::load(&config)?).await,
        Command::Serve { config, crawl } => serve_catalog(AppConfig::load(&config)?, crawl).await,
    }
}

async fn crawl(config: AppConfig) -> Result<(), DynError> {
    config.ensure_directories()?;

    let db_path = config.database_path();
    let pool = db::open_database_connection(&db_path).await?;
    db::init_database_schema(&pool).await?;
    println!("SQLite database: {}", db_path.display());
    println!("Crawling: {}", config.mirror_base_url);

    let fetcher = BoundedFetcher::new(config.crawl.concurrency, FetchTimeouts::from(&config.crawl))?;
    let cancel = CancellationToken::new();
    let crawler = Crawler::new(Arc::new(config), pool.clone(), fetcher, cancel.clone());

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let stats = crawler.crawl_all().await;
    pool.close().await;
    let stats = stats?;

    println!(
        "Crawled {} categories, {} collections, {} directories; {} new tracks from {} archives inspected",
        stats.categories,
        stats.collections,
        stats.directories,
        stats.tracks_added,
        stats.archives_inspected
    );
    Ok(())
}
