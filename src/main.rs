//! Filefinder - incrementally synchronized file index
//!
//! Command-line front end for the indexing engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use filefinder::config::{normalize_root, DEFAULT_BATCH_SIZE};
use filefinder::error::StorageError;
use filefinder::storage::{
    count_entries, init_storage, list_roots, prune_roots, remove_root, Database, Entry, SortKey,
    SortOrder,
};
use filefinder::sync::{
    Reconciler, SchedulerConfig, SyncEvent, SyncOptions, SyncReport, SyncScheduler,
};
use filefinder::telemetry::{gather_metrics, init_metrics, init_tracing, metrics};
use filefinder::view::{Query, QueryView};
use filefinder::walker::{scan_root, WalkOptions, Walker};
use filefinder::{Config, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Filefinder - incrementally synchronized file index
#[derive(Parser, Debug)]
#[command(name = "filefinder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for the `SQLite` index
    #[arg(short, long, env = "FILEFINDER_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Root directories to index
    #[arg(short, long, env = "FILEFINDER_ROOTS", value_delimiter = ',')]
    root: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FILEFINDER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "FILEFINDER_LOG_JSON")]
    log_json: bool,

    /// Rows written per transaction
    #[arg(long, env = "FILEFINDER_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Retries for a failed batch commit
    #[arg(long, env = "FILEFINDER_COMMIT_RETRIES", default_value = "3")]
    commit_retries: u32,

    /// Follow symbolic links while walking
    #[arg(long, env = "FILEFINDER_FOLLOW_LINKS")]
    follow_links: bool,

    /// Stay on the filesystem of each root
    #[arg(long, env = "FILEFINDER_SAME_FILE_SYSTEM")]
    same_file_system: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync pass per configured root
    Sync {
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync in the background and keep re-syncing until interrupted
    Watch {
        /// Seconds between passes
        #[arg(long, env = "FILEFINDER_SYNC_INTERVAL", default_value = "300")]
        interval: u64,
    },
    /// Print a page of indexed entries
    Query {
        /// Words that must all appear in the path
        filter: Vec<String>,

        /// Sort column
        #[arg(long, value_enum, default_value = "size")]
        sort: SortArg,

        /// Sort descending
        #[arg(long, conflicts_with = "asc")]
        desc: bool,

        /// Sort ascending
        #[arg(long)]
        asc: bool,

        /// Rows to skip
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Rows to print
        #[arg(long, default_value = "50")]
        limit: u64,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print matching and total entry counts
    Count {
        /// Words that must all appear in the path
        filter: Vec<String>,
    },
    /// List indexed roots
    Roots,
    /// Remove a root and all of its entries
    RemoveRoot {
        /// Root directory
        path: PathBuf,
    },
    /// Walk a directory without indexing it
    Scan {
        /// Directory to walk
        root: PathBuf,
    },
    /// Print index statistics
    Stats {
        /// Also print Prometheus metrics
        #[arg(long)]
        metrics: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortArg {
    Name,
    Dir,
    Size,
    Modified,
    Path,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => Self::Name,
            SortArg::Dir => Self::Directory,
            SortArg::Size => Self::Size,
            SortArg::Modified => Self::Modified,
            SortArg::Path => Self::Path,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);
    init_metrics();

    let config = Config {
        data_dir: cli.data_dir,
        roots: cli.root,
        log_level: cli.log_level,
        batch_size: cli.batch_size,
        max_commit_retries: cli.commit_retries,
        sync_interval: None,
        follow_links: cli.follow_links,
        same_file_system: cli.same_file_system,
    };

    tracing::debug!(?config, "Configuration loaded");

    match cli.command {
        Command::Sync { json } => run_sync(&config, json).await,
        Command::Watch { interval } => {
            let config = Config {
                sync_interval: Some(Duration::from_secs(interval)),
                ..config
            };
            run_watch(&config).await
        }
        Command::Query {
            filter,
            sort,
            desc,
            asc,
            offset,
            limit,
            json,
        } => {
            let order = if desc || (!asc && matches!(sort, SortArg::Size | SortArg::Modified)) {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            };
            let query = Query::new(&filter.join(" ")).sorted_by(sort.into(), order);
            run_query(&config, &query, offset, limit, json)
        }
        Command::Count { filter } => {
            let view = QueryView::new(open_index(&config)?);
            let status = view.status(&Query::new(&filter.join(" ")))?;
            println!("{}/{}", status.filtered, status.total);
            Ok(())
        }
        Command::Roots => run_roots(&config),
        Command::RemoveRoot { path } => run_remove_root(&config, &path),
        Command::Scan { root } => {
            let walker = Walker::new(WalkOptions {
                follow_links: config.follow_links,
                same_file_system: config.same_file_system,
            });
            let stats = scan_root(&walker, &normalize_root(&root)?)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).unwrap_or_default()
            );
            Ok(())
        }
        Command::Stats { metrics } => run_stats(&config, metrics),
    }
}

fn open_index(config: &Config) -> Result<Database> {
    let db = Database::open(config.database_path())?;
    init_storage(&db)?;
    Ok(db)
}

async fn run_sync(config: &Config, json: bool) -> Result<()> {
    config.validate_for_sync()?;
    let roots = config.normalized_roots()?;

    let db = open_index(config)?;
    let keep = roots
        .iter()
        .map(|r| r.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    for pruned in db.with_transaction(|conn| prune_roots(conn, &keep))? {
        tracing::info!(root = %pruned.path, "Pruned root no longer configured");
    }

    let reconciler = Arc::new(Reconciler::new(db, SyncOptions::from(config)));
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current batch");
            ctrl_c.cancel();
        }
    });

    for root in roots {
        let report = Arc::clone(&reconciler)
            .sync_path_async(root, cancel.clone())
            .await?;
        print_report(&report, json);
        if cancel.is_cancelled() {
            break;
        }
    }

    Ok(())
}

async fn run_watch(config: &Config) -> Result<()> {
    config.validate_for_sync()?;

    // The scheduler writes through its own connection; this one reads
    let reader = open_index(config)?;
    let writer = Database::open(config.database_path())?;
    let view = QueryView::new(reader);

    let scheduler = SyncScheduler::start(writer, SchedulerConfig::from_config(config)?)?;
    let mut events = scheduler.subscribe();
    scheduler.request_sync_all()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(SyncEvent::Started { root }) => println!("syncing {root}"),
                Ok(SyncEvent::Progress(p)) => tracing::info!(
                    root = %p.root,
                    observed = p.observed,
                    inserted = p.inserted,
                    updated = p.updated,
                    deleted = p.deleted,
                    "Sync progress"
                ),
                Ok(SyncEvent::Finished(report)) => {
                    print_report(&report, false);
                    let status = view.status(&Query::default())?;
                    println!("{} entries indexed", status.total);
                }
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "Missed sync events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    tokio::task::spawn_blocking(move || scheduler.shutdown())
        .await
        .map_err(|e| filefinder::Error::internal(format!("shutdown failed: {e}")))?;
    Ok(())
}

fn run_query(config: &Config, query: &Query, offset: u64, limit: u64, json: bool) -> Result<()> {
    let view = QueryView::new(open_index(config)?);
    let rows = view.rows_in_range(query, offset, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows).unwrap_or_default());
        return Ok(());
    }

    for entry in &rows {
        println!("{}", format_row(entry));
    }
    Ok(())
}

fn format_row(entry: &Entry) -> String {
    format!(
        "{:>14}  {}  {:<4}  {}",
        entry.size,
        entry.modified().format("%Y-%m-%d %H:%M"),
        entry.kind.as_str(),
        entry.path
    )
}

fn run_roots(config: &Config) -> Result<()> {
    let db = open_index(config)?;
    for root in db.with_conn(list_roots)? {
        let synced = root
            .last_synced_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map_or_else(|| "never".to_string(), |dt| dt.to_rfc3339());
        println!(
            "{:>4}  {}  {}  {}",
            root.id,
            root.path,
            synced,
            root.last_status.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn run_remove_root(config: &Config, path: &std::path::Path) -> Result<()> {
    let root = normalize_root(path)?;
    let root = root.to_string_lossy();
    let db = open_index(config)?;

    match db.with_transaction(|conn| remove_root(conn, &root))? {
        Some(removed) => {
            println!("removed {root} ({removed} entries)");
            Ok(())
        }
        None => Err(StorageError::not_found("root", root.into_owned()).into()),
    }
}

fn run_stats(config: &Config, show_metrics: bool) -> Result<()> {
    let db = open_index(config)?;
    let entries = db.with_conn(count_entries)?;
    let roots = db.with_conn(list_roots)?;

    println!("index:   {}", db.path());
    println!("roots:   {}", roots.len());
    println!("entries: {entries}");

    if show_metrics {
        metrics::ENTRIES_TOTAL.set(i64::try_from(entries).unwrap_or(i64::MAX));
        print!("{}", gather_metrics());
    }
    Ok(())
}

fn print_report(report: &SyncReport, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
        return;
    }

    println!(
        "{}: {} ({} observed, +{} ~{} -{}, {} skipped) in {} ms",
        report.root,
        report.status.as_str(),
        report.observed,
        report.inserted,
        report.updated,
        report.deleted,
        report.skipped,
        report.elapsed_ms
    );
    for message in &report.diagnostics {
        println!("  {message}");
    }
}
