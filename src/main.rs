use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use gator::config::Config;
use gator::feed::Fetcher;
use gator::scheduler::{Scheduler, ShutdownHandle};
use gator::storage::{Database, StoreError};
use gator::util::{parse_interval, validate_feed_url};

/// Get the config directory path (~/.config/gator/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("gator");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "Command-line RSS aggregator")]
struct Args {
    /// Config file (default: ~/.config/gator/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides `database_path` from the config
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll registered feeds forever, one feed per interval
    Agg {
        /// Time between polls, e.g. 30s, 1m, 1h30m
        #[arg(value_parser = parse_interval)]
        interval: Duration,
    },
    /// Register a feed owned by the current user
    Addfeed { name: String, url: String },
    /// List registered feeds
    Feeds,
    /// Show the newest posts from the current user's feeds
    Browse {
        #[arg(default_value_t = 2)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gator=info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => {
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)
                    .context("Failed to create config directory")?;
            }
            config.database_path(&config_dir)
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!(
                "Error: the database at {} is locked by another process.",
                db_path.display()
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Agg { interval } => run_aggregator(db, &config, interval).await,
        Command::Addfeed { name, url } => add_feed(&db, &config, &name, &url).await,
        Command::Feeds => list_feeds(&db).await,
        Command::Browse { limit } => browse(&db, &config, limit).await,
    }
}

async fn run_aggregator(db: Database, config: &Config, interval: Duration) -> Result<()> {
    let options = config.fetcher_options()?;
    let fetcher = Fetcher::new(&options).context("Failed to build HTTP client")?;
    let dates = config.date_parser()?;
    let formats: Vec<String> = dates.formats().iter().map(ToString::to_string).collect();
    tracing::debug!(formats = %formats.join(", "), "Publish date formats");

    let (scheduler, shutdown) = Scheduler::new(db, fetcher, dates, interval);
    println!("Collecting feeds every {}", humanize(scheduler.interval()));

    let signals = tokio::spawn(wait_for_signal(shutdown));
    scheduler.run().await;
    signals.abort();
    Ok(())
}

/// Fire the shutdown handle on Ctrl+C or SIGTERM
async fn wait_for_signal(shutdown: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested");
    shutdown.shutdown();
}

async fn add_feed(db: &Database, config: &Config, name: &str, url: &str) -> Result<()> {
    let url = validate_feed_url(url).with_context(|| format!("Invalid feed URL: {}", url))?;
    let owner = &config.current_user;
    match db.insert_feed(name, url.as_str(), owner).await {
        Ok(feed) => {
            println!("Added feed {} ({})", feed.name, feed.url);
            println!("  id:    {}", feed.id);
            println!("  owner: {}", feed.owner);
            Ok(())
        }
        Err(e) if e.is_unique_violation() => {
            anyhow::bail!("A feed with URL {} is already registered", url)
        }
        Err(e) => Err(e).context("Failed to add feed"),
    }
}

async fn list_feeds(db: &Database) -> Result<()> {
    let feeds = db.list_feeds().await.context("Failed to load feeds")?;
    if feeds.is_empty() {
        println!("No feeds registered. Add one with: gator addfeed <name> <url>");
        return Ok(());
    }
    for feed in feeds {
        let fetched = feed
            .last_fetched_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("* {} ({})", feed.name, feed.url);
        println!("    owner: {}, last fetched: {}", feed.owner, fetched);
    }
    Ok(())
}

async fn browse(db: &Database, config: &Config, limit: i64) -> Result<()> {
    let posts = db
        .posts_for_owner(&config.current_user, limit)
        .await
        .context("Failed to load posts")?;
    if posts.is_empty() {
        println!("No posts yet for {}", config.current_user);
        return Ok(());
    }
    for post in posts {
        let published = post.published_at.format("%Y-%m-%d %H:%M");
        println!("{}  {}", published, post.title);
        println!("    {}", post.url);
        if let Some(description) = &post.description {
            println!("    {}", description);
        }
    }
    Ok(())
}

/// Render an interval the way it was typed, e.g. `1m30s`
fn humanize(interval: Duration) -> String {
    let secs = interval.as_secs();
    if interval.subsec_nanos() != 0 || secs == 0 {
        return format!("{:?}", interval);
    }
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if h > 0 || m > 0 {
        out.push_str(&format!("{}m", m));
    }
    out.push_str(&format!("{}s", s));
    out
}
