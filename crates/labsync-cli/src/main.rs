//! LabSync CLI
//!
//! Thin wrapper around labsync-core for inspecting and driving a local
//! offline store from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Show store information
//! labsync info
//!
//! # Write a default config file / generate a store key
//! labsync config init
//! labsync config generate-key
//!
//! # Queue a local mutation
//! labsync queue add samples s1 create --data '{"tube": "red"}'
//!
//! # Inspect the queue
//! labsync queue list
//! labsync queue show <record_id>
//!
//! # Release a rejected record for another attempt
//! labsync queue retry <record_id>
//!
//! # Read the local replica
//! labsync cache show samples
//!
//! # Run one sync pass against a remote
//! labsync sync --remote https://lab.example.org/api
//!
//! # Keep syncing in the background until Ctrl+C
//! labsync serve
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use labsync_core::{
    HttpRemote, LabSyncConfig, MemoryRemote, OfflineRecord, OfflineSync, Operation, RecordId,
    RemoteStore, StoreCrypto, SyncEvent, SyncOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// LabSync - offline sync for lab workflows
#[derive(Parser)]
#[command(name = "labsync")]
#[command(version)]
#[command(about = "LabSync - offline sync for lab workflows")]
#[command(
    long_about = "Queue lab record mutations while offline, read a local replica of remote collections, and reconcile with the remote store when it is reachable."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.labsync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/labsync.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store information
    Info,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Operation queue management
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Local replica management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show sync status and per-collection metadata
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one sync pass
    Sync {
        /// Remote base URL (overrides config)
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Sync in the background until interrupted
    Serve {
        /// Remote base URL (overrides config)
        #[arg(short, long)]
        remote: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print a fresh base64 store encryption key
    GenerateKey,
}

#[derive(Subcommand)]
enum QueueAction {
    /// Queue a local mutation
    Add {
        collection: String,
        document_id: String,
        operation: OperationArg,
        /// JSON object payload (ignored for delete)
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// List queued records
    List {
        /// Include records already delivered
        #[arg(long)]
        all: bool,
    },
    /// Show one record
    Show {
        /// Record ID (ULID string)
        record_id: String,
    },
    /// Queue a delivered record for delivery again
    Resync {
        /// Record ID (ULID string)
        record_id: String,
    },
    /// Release a rejected record for another attempt
    Retry {
        /// Record ID (ULID string)
        record_id: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cached documents
    Show {
        collection: String,
        /// Single document ID
        id: Option<String>,
    },
    /// Drop cached documents and pull watermarks
    Clear {
        /// Only this collection
        collection: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OperationArg {
    Create,
    Update,
    Delete,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Create => Operation::Create,
            OperationArg::Update => Operation::Update,
            OperationArg::Delete => Operation::Delete,
        }
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory (~/.labsync/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".labsync")
        .join("data")
}

/// Parse a record ID from ULID string
fn parse_record_id(s: &str) -> Result<RecordId> {
    RecordId::from_string(s).map_err(|e| anyhow::anyhow!("Invalid record ID '{}': {}", s, e))
}

/// Build the HTTP remote from `--remote` or the config
fn http_remote(config: &LabSyncConfig, url: Option<String>) -> Result<HttpRemote> {
    let url = url
        .or_else(|| config.remote.url.clone())
        .context("No remote configured: pass --remote or set remote.url / LABSYNC_REMOTE_URL")?;
    Ok(HttpRemote::new(url, config.remote.api_token.clone())?)
}

fn open_engine(
    config: &LabSyncConfig,
    data_dir: &Path,
    remote: Arc<dyn RemoteStore>,
) -> Result<OfflineSync> {
    OfflineSync::from_config(config, data_dir, remote)
        .with_context(|| format!("Failed to open store in {}", data_dir.display()))
}

/// Open the store for commands that never reach the remote
fn open_local(config: &LabSyncConfig, data_dir: &Path) -> Result<OfflineSync> {
    open_engine(config, data_dir, Arc::new(MemoryRemote::new()))
}

fn mask(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "(set)"
    } else {
        "(not set)"
    }
}

fn print_record_line(record: &OfflineRecord) {
    let state = if record.is_synced() {
        "synced".to_string()
    } else if let Some(err) = record.sync_error() {
        format!("pending, {}", err)
    } else {
        "pending".to_string()
    };
    println!(
        "  {} {:<6} {}/{} [{}]",
        record.id,
        record.operation.to_string(),
        record.collection,
        record.document_id,
        state
    );
}

fn print_record(record: &OfflineRecord) {
    println!("Record:");
    println!("  ID: {}", record.id);
    println!("  Collection: {}", record.collection);
    println!("  Document: {}", record.document_id);
    println!("  Operation: {}", record.operation);
    println!("  Timestamp: {}", record.timestamp.to_rfc3339());
    println!("  Synced: {}", record.is_synced());
    println!("  Attempts: {}", record.attempts);
    if let Some(err) = record.sync_error() {
        println!("  Error: {}", err);
    }
    println!("  Data: {}", record.data);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config_path = cli
        .config
        .unwrap_or_else(|| LabSyncConfig::path_in(&data_dir));

    // Loaded per command so `config init` works even when the current file is invalid
    let load_config = || LabSyncConfig::load(&config_path);

    match cli.command {
        Commands::Info => {
            let config = load_config()?;
            let sync = open_local(&config, &data_dir)?;
            let stats = sync.queue().stats()?;

            println!("LabSync v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Storage:");
            println!("  Backend: {}", sync.store().backend_name().unwrap_or("(closed)"));
            println!(
                "  Encryption: {}",
                if config.storage.encryption_key.is_some() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!();
            println!("Queue:");
            println!("  Pending: {}", stats.pending);
            println!("  Synced: {}", stats.synced);
            if stats.corrupt > 0 {
                println!("  Unreadable: {}", stats.corrupt);
            }
            println!();
            println!(
                "Remote: {}",
                config.remote.url.as_deref().unwrap_or("(not configured)")
            );
            println!("Tracked collections: {}", config.sync.collections.len());
            println!("Data directory: {}", data_dir.display());
            println!("Config file: {}", config_path.display());
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config()?;
                println!("# {}", config_path.display());
                println!("[storage]");
                println!("backend = \"{}\"", config.storage.backend);
                if let Some(threshold) = config.storage.compression_threshold {
                    println!("compression_threshold = {}", threshold);
                }
                println!("encryption_key = {}", mask(&config.storage.encryption_key));
                println!();
                println!("[sync]");
                println!("interval_secs = {}", config.sync.interval_secs);
                println!("remote_timeout_ms = {}", config.sync.remote_timeout_ms);
                println!("page_size = {}", config.sync.page_size);
                println!("max_pages_per_pass = {}", config.sync.max_pages_per_pass);
                println!("pull_concurrency = {}", config.sync.pull_concurrency);
                println!("collections = {:?}", config.sync.collections);
                println!();
                println!("[remote]");
                println!(
                    "url = {}",
                    config.remote.url.as_deref().unwrap_or("(not set)")
                );
                println!("api_token = {}", mask(&config.remote.api_token));
            }
            ConfigAction::GenerateKey => {
                let key = StoreCrypto::generate_key();
                println!("{}", StoreCrypto::key_to_base64(&key));
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "Config file {} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                LabSyncConfig::default().save(&config_path)?;
                println!("Wrote default config to {}", config_path.display());
            }
        },

        Commands::Queue { action } => {
            let config = load_config()?;
            let sync = open_local(&config, &data_dir)?;
            match action {
                QueueAction::Add {
                    collection,
                    document_id,
                    operation,
                    data,
                } => {
                    let data: serde_json::Value =
                        serde_json::from_str(&data).context("--data must be valid JSON")?;
                    let record =
                        sync.queue_operation(&collection, &document_id, operation.into(), data)?;
                    println!("Queued {} of {}/{}", record.operation, collection, document_id);
                    println!("  ID: {}", record.id);
                }
                QueueAction::List { all } => {
                    let records = if all {
                        sync.queue().list_all()?
                    } else {
                        sync.queue().list_unsynced()?
                    };
                    if records.is_empty() {
                        println!("Queue is empty.");
                    } else {
                        println!("Records ({}):", records.len());
                        for record in &records {
                            print_record_line(record);
                        }
                    }
                }
                QueueAction::Show { record_id } => {
                    let id = parse_record_id(&record_id)?;
                    match sync.queue().get(&id)? {
                        Some(record) => print_record(&record),
                        None => anyhow::bail!("Record not found: {}", record_id),
                    }
                }
                QueueAction::Resync { record_id } => {
                    let id = parse_record_id(&record_id)?;
                    let record = sync.queue().request_resync(&id)?;
                    println!("Record {} queued for delivery", record.id);
                }
                QueueAction::Retry { record_id } => {
                    let id = parse_record_id(&record_id)?;
                    let record = sync.queue().retry_rejected(&id)?;
                    println!("Record {} released for retry", record.id);
                }
            }
        }

        Commands::Cache { action } => {
            let config = load_config()?;
            let sync = open_local(&config, &data_dir)?;
            match action {
                CacheAction::Show { collection, id } => {
                    let entries = sync.get_cached_data(&collection, id.as_deref())?;
                    if entries.is_empty() {
                        println!("No cached documents in '{}'.", collection);
                    } else {
                        println!("Cached documents ({}):", entries.len());
                        for entry in entries {
                            println!(
                                "  {} (updated {}) {}",
                                entry.id,
                                entry.updated_at.to_rfc3339(),
                                entry.data
                            );
                        }
                    }
                }
                CacheAction::Clear { collection } => {
                    let removed = sync.cache().clear(collection.as_deref())?;
                    println!("Removed {} cached document(s)", removed);
                }
            }
        }

        Commands::Status { json } => {
            let config = load_config()?;
            let sync = open_local(&config, &data_dir)?;
            let status = sync.get_status();
            let metadata = sync.metadata()?;

            if json {
                let value = serde_json::json!({
                    "status": status,
                    "collections": metadata,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Pending changes: {}", status.pending_changes);
                match status.last_sync {
                    Some(ts) => println!("Last sync: {}", ts.to_rfc3339()),
                    None => println!("Last sync: never"),
                }
                if !status.errors.is_empty() {
                    println!("Last sync errors ({}):", status.errors.len());
                    for error in &status.errors {
                        println!("  {}", error);
                    }
                }
                if metadata.is_empty() {
                    println!("Collections: none pulled yet");
                } else {
                    println!("Collections:");
                    for meta in metadata {
                        let watermark = meta
                            .last_sync_timestamp
                            .map(|ts| ts.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string());
                        print!("  {} [{}] since {}", meta.collection, meta.status, watermark);
                        if let Some(err) = meta.error {
                            print!(" ({})", err);
                        }
                        println!();
                    }
                }
            }
        }

        Commands::Sync { remote } => {
            let config = load_config()?;
            let remote = http_remote(&config, remote)?;
            let sync = open_engine(&config, &data_dir, Arc::new(remote))?;
            info!(data_dir = %data_dir.display(), "Running one sync pass");

            match sync.sync_now().await {
                SyncOutcome::Completed(report) => {
                    println!("{}", report);
                    for error in &report.errors {
                        println!("  {}", error);
                    }
                    sync.shutdown().await;
                    if !report.succeeded() {
                        anyhow::bail!("Sync pass finished with errors");
                    }
                }
                SyncOutcome::AlreadyRunning => println!("A sync pass is already running."),
                SyncOutcome::Offline => println!("Offline, nothing done."),
            }
        }

        Commands::Serve { remote } => {
            let config = load_config()?;
            let remote = http_remote(&config, remote)?;
            let remote_url = remote.base_url().to_string();
            let probe = Arc::new(remote.clone());
            let sync = open_engine(&config, &data_dir, Arc::new(remote))?;

            println!("Starting LabSync...");
            println!("  Remote: {}", remote_url);
            println!("  Interval: {}s", config.sync.interval_secs);
            println!("Data directory: {}", data_dir.display());
            println!();

            let _listener = sync.add_listener(|event| match event {
                SyncEvent::PassCompleted(report) => println!("[Sync] {}", report),
                SyncEvent::ConnectivityChanged(change) => println!("[Network] {:?}", change),
                SyncEvent::StatusChanged(_) => {}
            });

            let cancel = CancellationToken::new();
            let probe_task = sync.network().spawn_probe(
                probe,
                Duration::from_secs(config.sync.interval_secs.clamp(5, 30)),
                cancel.clone(),
            );
            sync.start()?;
            info!(interval_secs = config.sync.interval_secs, "Background sync started");

            println!("Syncing. Press Ctrl+C to stop.");
            println!();

            tokio::signal::ctrl_c().await?;
            println!();
            println!("Received shutdown signal...");

            cancel.cancel();
            let _ = probe_task.await;
            sync.shutdown().await;
            println!("Goodbye.");
        }
    }

    Ok(())
}
