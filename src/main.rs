mod app;
mod cache;
mod config;
mod error;
mod event;
mod remote;
mod store;
mod sync;
mod ui;

use cache::{CacheManager, CacheResult, INVENTORY_KEY, PRICING_KEY};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use config::Config;
use remote::{Mutation, MutationKind, RestClient};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use store::{KvStore, SqliteStore, UnavailableStore};
use sync::{ConnectivityEvent, ConnectivityMonitor, SyncItem, SyncOrchestrator, SyncQueue, SystemClock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long `galley status` waits to learn whether the backend is reachable
const STATUS_CHECK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Orchestrator over backend mutations, replayed through the REST client
pub type Orchestrator = SyncOrchestrator<Mutation, dyn KvStore, RestClient>;

#[derive(Parser, Debug)]
#[command(name = "galley")]
#[command(about = "Offline-first sync for the crew meal-planning backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/galley/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Queue a mutation locally and print its id
  Enqueue {
    /// Backend table, e.g. meal_plans
    table: String,
    /// insert, update, upsert or delete
    kind: MutationKind,
    /// Primary key of the target row (update and delete)
    #[arg(long)]
    key: Option<String>,
    /// Row as JSON
    #[arg(long)]
    record: Option<String>,
    /// Explicit id instead of a derived one
    #[arg(long)]
    id: Option<String>,
  },
  /// Show queue counts and unsynced changes
  Status,
  /// Check connectivity and replay pending changes once
  Sync,
  /// Keep syncing in the background until interrupted
  Run,
  /// Live status view
  Watch,
  /// Print a cached snapshot
  Cache {
    which: CacheKind,
    /// Fetch from the backend first, falling back to the cache when offline
    #[arg(long)]
    refresh: bool,
  },
  /// Release a quarantined change back into replay
  Requeue { id: String },
  /// Drop synced changes older than the retention window
  Compact,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CacheKind {
  Inventory,
  Pricing,
}

/// Everything a command needs, wired from the configuration
struct Galley {
  config: Config,
  client: RestClient,
  orchestrator: Arc<Orchestrator>,
  cache: Arc<CacheManager<dyn KvStore>>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // The status view owns the terminal, so its logs go to a file
  let _guard = init_logging(matches!(args.command, Command::Watch))?;

  let config = Config::load(args.config.as_deref())?;
  let needs_network = match &args.command {
    Command::Sync | Command::Run | Command::Watch => true,
    Command::Cache { refresh, .. } => *refresh,
    _ => false,
  };
  let galley = Galley::build(config, needs_network)?;

  match args.command {
    Command::Enqueue {
      table,
      kind,
      key,
      record,
      id,
    } => galley.enqueue(table, kind, key, record, id),
    Command::Status => galley.print_status().await,
    Command::Sync => galley.sync_once().await,
    Command::Run => galley.run().await,
    Command::Watch => galley.watch().await,
    Command::Cache { which, refresh } => galley.show_cache(which, refresh).await,
    Command::Requeue { id } => {
      if galley.orchestrator.requeue(&id) {
        println!("Requeued {}", id);
        Ok(())
      } else {
        Err(eyre!("No quarantined change with id {}", id))
      }
    }
    Command::Compact => {
      let removed = galley.orchestrator.compact();
      println!("Removed {} synced change(s)", removed);
      Ok(())
    }
  }
}

fn init_logging(to_file: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("GALLEY_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| "galley=info".into());

  if !to_file {
    tracing_subscriber::registry()
      .with(filter)
      .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
      .init();
    return Ok(None);
  }

  let dir = dirs::data_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("galley")
    .join("logs");
  let appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("galley")
    .filename_suffix("log")
    .build(&dir)
    .map_err(|e| eyre!("Failed to open log directory {}: {}", dir.display(), e))?;
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  Ok(Some(guard))
}

/// Open the database, or a stand-in that keeps the app memory-only.
fn open_store(config: &Config) -> Arc<dyn KvStore> {
  if !config.storage.enabled {
    info!("Local storage disabled, changes are kept in memory only");
    return Arc::new(UnavailableStore::new("local storage disabled"));
  }

  let Some(path) = config.storage_path() else {
    warn!("No data directory found, changes are kept in memory only");
    return Arc::new(UnavailableStore::new("no data directory"));
  };

  match SqliteStore::open(&path) {
    Ok(store) => {
      info!("Using local storage at {}", path.display());
      Arc::new(store)
    }
    Err(e) => {
      warn!("Failed to open {}: {}", path.display(), e);
      Arc::new(UnavailableStore::new(e.to_string()))
    }
  }
}

impl Galley {
  fn build(config: Config, needs_network: bool) -> Result<Self> {
    let api_key = match Config::get_api_key() {
      Ok(key) => key,
      Err(e) if needs_network => return Err(e),
      Err(_) => String::new(),
    };
    let client = RestClient::new(&config.backend, &api_key)?;

    let store = open_store(&config);
    let clock = Arc::new(SystemClock);

    let queue = SyncQueue::open(store.clone(), clock.clone())
      .map_err(|e| eyre!("Failed to load the sync queue: {}", e))?;
    let orchestrator = Arc::new(Orchestrator::new(
      queue,
      client.clone(),
      config.sync.retry_policy(),
      config.sync.retention(),
    ));

    let cache = Arc::new(CacheManager::new(store, clock).with_stale_time(config.sync.stale_time()));

    Ok(Self {
      config,
      client,
      orchestrator,
      cache,
    })
  }

  fn enqueue(
    &self,
    table: String,
    kind: MutationKind,
    key: Option<String>,
    record: Option<String>,
    id: Option<String>,
  ) -> Result<()> {
    if kind.needs_key() && key.is_none() {
      return Err(eyre!("{} needs --key", kind));
    }

    let record = match record {
      Some(raw) => serde_json::from_str(&raw).map_err(|e| eyre!("Invalid --record JSON: {}", e))?,
      None if kind == MutationKind::Delete => serde_json::Value::Null,
      None => return Err(eyre!("{} needs --record", kind)),
    };

    let mutation = Mutation {
      table,
      kind,
      key,
      record,
    };

    let id = match id {
      Some(id) => {
        self
          .orchestrator
          .enqueue(SyncItem::new(id.clone(), mutation, Utc::now()));
        id
      }
      None => self.orchestrator.enqueue_new(mutation),
    };

    println!("{}", id);
    if self.orchestrator.status().memory_only {
      warn!("Local storage unavailable, this change is lost when galley exits");
    }
    Ok(())
  }

  /// Probe once and feed the result to the orchestrator.
  async fn probe(&self) -> usize {
    let event = if self.client.is_reachable().await {
      ConnectivityEvent::Online
    } else {
      ConnectivityEvent::Offline
    };
    self.orchestrator.handle(event).await
  }

  async fn print_status(&self) -> Result<()> {
    let stats = self.orchestrator.stats();
    self
      .orchestrator
      .set_online(sync::check_within(&self.client, STATUS_CHECK_TIMEOUT).await);
    let status = self.orchestrator.status();

    println!("{}: {}", self.config.title(), status.badge());
    print!(
      "{} pending, {} quarantined, {} synced",
      stats.pending, stats.quarantined, stats.synced
    );
    match stats.oldest_pending {
      Some(at) => println!(" (oldest queued {})", ui::format_age(Utc::now() - at)),
      None => println!(),
    }
    if status.memory_only {
      println!("Local storage unavailable, changes are kept in memory only");
    }

    let now = Utc::now();
    for item in self
      .orchestrator
      .pending_items()
      .iter()
      .filter(|item| !item.quarantined)
    {
      print_item(item, now);
    }

    let quarantined = self.orchestrator.quarantined_items();
    if !quarantined.is_empty() {
      println!("Needs attention (`galley requeue <id>` to retry):");
      for item in &quarantined {
        print_item(item, now);
      }
    }
    Ok(())
  }

  async fn sync_once(&self) -> Result<()> {
    self.probe().await;

    let status = self.orchestrator.status();
    match (status.online, status.last_pass) {
      (false, _) => println!("{}", status.badge()),
      (true, Some(summary)) if summary.attempted > 0 => println!("{}", summary),
      (true, _) => println!("Nothing to sync"),
    }
    if status.quarantined > 0 {
      println!(
        "{} change(s) need attention, see `galley status`",
        status.quarantined
      );
    }
    Ok(())
  }

  /// Start the probe, the sync loop and cache refresh.
  fn start(&self) -> (sync::SyncHandle, JoinHandle<()>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let monitor =
      ConnectivityMonitor::new(self.client.clone(), self.config.sync.probe_interval()).spawn(tx);
    let handle = self
      .orchestrator
      .clone()
      .spawn(rx, self.config.sync.interval());
    let refresher = spawn_cache_refresh(
      self.cache.clone(),
      self.client.clone(),
      self.orchestrator.subscribe(),
      self.config.sync.interval(),
    );
    (handle, monitor, refresher)
  }

  async fn run(&self) -> Result<()> {
    let (handle, monitor, refresher) = self.start();
    info!("Sync running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Stopping");
    monitor.abort();
    refresher.abort();
    handle.shutdown().await;
    Ok(())
  }

  async fn watch(&self) -> Result<()> {
    let (handle, monitor, refresher) = self.start();

    let mut app = app::App::new(
      self.config.title(),
      self.orchestrator.clone(),
      self.cache.clone(),
    );
    let result = app.run().await;

    monitor.abort();
    refresher.abort();
    handle.shutdown().await;
    result
  }

  async fn show_cache(&self, which: CacheKind, refresh: bool) -> Result<()> {
    match (which, refresh) {
      (CacheKind::Inventory, true) => print_cached(
        &self
          .cache
          .refresh_inventory(self.client.fetch_inventory())
          .await,
      ),
      (CacheKind::Pricing, true) => print_cached(
        &self
          .cache
          .refresh_pricing(self.client.fetch_pricing())
          .await,
      ),
      (CacheKind::Inventory, false) => {
        print_cached(&self.stored(INVENTORY_KEY, self.cache.load_cached_inventory()))
      }
      (CacheKind::Pricing, false) => {
        print_cached(&self.stored(PRICING_KEY, self.cache.load_cached_pricing()))
      }
    }
  }

  /// Wrap data read from the cache slot `key` with its age.
  fn stored<V>(&self, key: &str, data: V) -> CacheResult<V> {
    match self.cache.cached_at(key) {
      Some(at) => CacheResult::from_cache(data, at, self.cache.is_stale(at)),
      None => CacheResult::missing(data),
    }
  }
}

fn print_item(item: &SyncItem<Mutation>, now: chrono::DateTime<Utc>) {
  println!(
    "  {:<28} {:<18} {:<7} {:<12} {:>3}  {}",
    item.id,
    item.data.table,
    item.data.kind.to_string(),
    item.state(now).to_string(),
    item.attempts,
    item.last_error.as_deref().unwrap_or("")
  );
}

fn print_cached<V: Serialize>(result: &CacheResult<V>) -> Result<()> {
  match result.cached_at {
    Some(at) => eprintln!(
      "Source: {} ({})",
      result.source,
      ui::format_age(Utc::now() - at)
    ),
    None => eprintln!("Source: {}", result.source),
  }
  println!("{}", serde_json::to_string_pretty(&result.data)?);
  Ok(())
}

/// Refresh cached snapshots periodically and whenever the backend comes back.
fn spawn_cache_refresh(
  cache: Arc<CacheManager<dyn KvStore>>,
  client: RestClient,
  mut status: watch::Receiver<sync::SyncStatus>,
  every: std::time::Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    let mut was_online = status.borrow().online;

    loop {
      let refresh = tokio::select! {
        _ = ticker.tick() => was_online,
        changed = status.changed() => {
          if changed.is_err() {
            break;
          }
          let online = status.borrow_and_update().online;
          let came_back = online && !was_online;
          was_online = online;
          came_back
        }
      };

      if refresh {
        let inventory = cache.refresh_inventory(client.fetch_inventory()).await;
        let pricing = cache.refresh_pricing(client.fetch_pricing()).await;
        if inventory.is_offline() || pricing.is_offline() {
          warn!(
            "Cache refresh incomplete (inventory: {}, pricing: {})",
            inventory.source, pricing.source
          );
        } else {
          info!(
            "Cache refreshed: {} inventory items, {} prices",
            inventory.data.len(),
            pricing.data.len()
          );
        }
      }
    }
  })
}
