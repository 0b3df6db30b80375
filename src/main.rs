use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gameshelf::catalog_store::ContentKind;
use gameshelf::config;
use gameshelf::dedupe::DuplicateFilter;
use gameshelf::scan::ScanOutcome;
use gameshelf::watch::{spawn_debounce_loop, LibraryWatcher};
use gameshelf::LibraryEngine;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

fn parse_kind(s: &str) -> Result<ContentKind, String> {
    ContentKind::from_str(s).ok_or_else(|| format!("Unknown content type '{}'", s))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding library.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Library root folder. Repeat for several libraries.
    #[clap(long = "library", value_parser = parse_path)]
    pub library_paths: Vec<PathBuf>,

    /// Console keys file enabling content-based identification.
    #[clap(long, value_parser = parse_path)]
    pub keys_file: Option<PathBuf>,

    /// JSON title database with names, versions and DLC lists.
    #[clap(long, value_parser = parse_path)]
    pub titledb: Option<PathBuf>,

    /// Quiet period in seconds before a library refresh runs.
    #[clap(long)]
    pub debounce_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan every library, or only the given one.
    Scan {
        #[clap(long, value_parser = parse_path)]
        path: Option<PathBuf>,
    },

    /// Print the library view.
    Library,

    /// Report updates, DLC and base games known to exist but not owned.
    Missing,

    /// Preview, or with --apply perform, the canonical layout rename.
    Organize {
        #[clap(long)]
        apply: bool,
        #[clap(long)]
        dry_run: bool,
        /// Rename files where they are instead of moving them into title folders.
        #[clap(long)]
        in_place: bool,
        #[clap(long)]
        keep_empty_folders: bool,
    },

    /// List duplicate and superseded files, optionally deleting them.
    Duplicates {
        #[clap(long)]
        title_id: Option<String>,
        #[clap(long, value_parser = parse_kind)]
        kind: Option<ContentKind>,
        #[clap(long)]
        delete: bool,
        #[clap(long)]
        dry_run: bool,
    },

    /// Extract and organize a finished download into a library.
    Process {
        #[clap(value_parser = parse_path)]
        source: PathBuf,
        #[clap(long)]
        target_index: Option<usize>,
    },

    /// Scan, then keep the catalog in sync with filesystem changes.
    Watch,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            library_paths: args.library_paths.clone(),
            keys_file: args.keys_file.clone(),
            titledb_path: args.titledb.clone(),
            debounce_secs: args.debounce_secs,
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  libraries: {:?}", app_config.library_paths);
    if app_config.library_paths.is_empty() {
        warn!("No library paths configured");
    }

    let engine = Arc::new(LibraryEngine::open(&app_config)?);

    match cli_args.command {
        Command::Scan { path } => {
            let outcome = match path {
                Some(path) => engine.scan_path(&path),
                None => engine.scan_all(),
            };
            engine.flush_refresh();
            print_json(&outcome)?;
        }
        Command::Library => {
            let view = engine.library()?;
            print_json(view.as_slice())?;
        }
        Command::Missing => {
            print_json(&engine.missing(None)?)?;
        }
        Command::Organize {
            apply,
            dry_run,
            in_place,
            keep_empty_folders,
        } => {
            let by_name = !in_place && app_config.organize.organize_by_name;
            let preview = engine.preview(None, by_name)?;
            if apply || dry_run {
                let remove_empty = !keep_empty_folders && app_config.organize.remove_empty_folders;
                let report = engine.apply(&preview.changes, dry_run, remove_empty);
                engine.flush_refresh();
                print_json(&report)?;
            } else {
                print_json(&preview)?;
            }
        }
        Command::Duplicates {
            title_id,
            kind,
            delete,
            dry_run,
        } => {
            let records = engine.find_duplicates(&DuplicateFilter { title_id, kind })?;
            if delete || dry_run {
                let report = engine.delete_duplicates(&records, dry_run);
                engine.flush_refresh();
                print_json(&report)?;
            } else {
                print_json(&records)?;
            }
        }
        Command::Process {
            source,
            target_index,
        } => {
            let report = engine.process_download(&source, target_index)?;
            engine.flush_refresh();
            print_json(&report)?;
        }
        Command::Watch => run_watch(engine).await?,
    }

    Ok(())
}

async fn run_watch(engine: Arc<LibraryEngine>) -> Result<()> {
    let scan_engine = engine.clone();
    let outcome = tokio::task::spawn_blocking(move || scan_engine.scan_all()).await?;
    if let ScanOutcome::Completed(report) = &outcome {
        info!(
            "Initial scan: {} identified, {} failed",
            report.identified,
            report.failed.len()
        );
    }

    let watcher = LibraryWatcher::new(engine.libraries())?;
    let refresh_loop = spawn_debounce_loop(engine.debouncer().clone(), Duration::from_secs(1));

    // Detached: next_batch blocks until the watcher shuts down.
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let batch_engine = engine.clone();
    std::thread::spawn(move || {
        while let Some(batch) = watcher.next_batch(Duration::from_millis(500)) {
            let report = batch_engine.apply_watch_batch(batch);
            info!(
                "Applied changes: {} moved, {} deleted, {} modified, {} identified, {} failed",
                report.moved + report.promoted,
                report.deleted,
                report.modified,
                report.identified,
                report.failed.len()
            );
        }
        let _ = done_tx.send(());
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down watcher"),
        _ = done_rx => error!("Library watcher stopped unexpectedly"),
    }

    refresh_loop.abort();
    let flush_engine = engine.clone();
    tokio::task::spawn_blocking(move || flush_engine.flush_refresh()).await?;
    Ok(())
}
