use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dailycache::cache::{BatchMetadata, CacheManager, DailyResource, SqliteStorage};
use dailycache::config::{Config, LogConfig};
use dailycache::models::{DailyNews, DailyTerms};
use dailycache::network::{NetworkStateTracker, Subscription};
use dailycache::remote::{Locale, RestClient, RestMetadataFetcher, RestResourceFetcher};
use dailycache::repository::{RepositoryResult, ResourceRepository};

#[derive(Parser, Debug)]
#[command(name = "dailycache")]
#[command(about = "Fetch today's news digest and terms, cache-first with offline fallback")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dailycache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Start in offline mode and serve only cached content
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
  /// Show today's news digest
  News,
  /// Show today's terms
  Terms,
  /// Remove cache entries from previous days
  ClearOld,
  /// Remove every cache entry
  ClearAll,
}

/// Initialize the tracing subscriber. The returned guard flushes the log file
/// on drop.
fn init_tracing(log: &LogConfig) -> Option<WorkerGuard> {
  // RUST_LOG wins over the configured level
  let level = log.level.as_deref().unwrap_or("warn");
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

  let (file_layer, guard) = match &log.dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "dailycache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_ansi(false).with_writer(writer)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(io::stderr))
    .with(file_layer)
    .init();

  guard
}

fn print_result<T: Serialize>(result: &RepositoryResult<T>) -> Result<()> {
  let json = serde_json::to_string_pretty(result)
    .map_err(|e| eyre!("Failed to serialize result: {}", e))?;
  println!("{}", json);

  match &result.error {
    Some(error) => Err(eyre!("{}", error.message)),
    None => Ok(()),
  }
}

type Cache = CacheManager<SqliteStorage, RestMetadataFetcher>;

/// Remove old (or all) entries; sweeps never consult the watermark.
fn clear_cache(storage: SqliteStorage, all: bool) -> Result<()> {
  let cache = CacheManager::new(storage, || std::future::ready(None::<BatchMetadata>));
  let removed = if all {
    cache.clear_all_cache()
  } else {
    cache.clear_old_cache()
  };
  println!("Removed {} cache entries", removed);
  Ok(())
}

/// Everything the fetch commands share.
struct Session {
  cache: Cache,
  network: Arc<NetworkStateTracker>,
  client: RestClient,
  subscription: Subscription,
}

/// Wire the cache, tracker and REST client used by the fetch commands.
fn connect(config: &Config, storage: SqliteStorage, offline: bool) -> Result<Session> {
  let client = RestClient::new(&config.remote, Config::get_api_key()?)?;
  let cache = CacheManager::new(storage, RestMetadataFetcher::new(client.clone()));
  if config.cache.clear_old_on_start {
    cache.clear_old_cache();
  }

  let network = Arc::new(NetworkStateTracker::new());
  // Subscribe first so the --offline transition is logged too
  let subscription = network.subscribe(|state| {
    info!(
      connected = state.is_connected,
      connection_type = %state.connection_type,
      "Network state changed"
    );
  });
  if offline {
    network.set_state(false, "none");
  }

  info!(today = %cache.today(), offline, "dailycache starting");
  Ok(Session {
    cache,
    network,
    client,
    subscription,
  })
}

async fn show_today<T: DailyResource>(session: Session, locale: Locale) -> Result<()> {
  let repo = ResourceRepository::<T, _, _, _>::new(
    session.cache,
    session.network,
    RestResourceFetcher::<T>::new(session.client),
  )
  .with_locale(locale);

  let result = repo.get_today().await;
  session.subscription.unsubscribe();
  print_result(&result)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _guard = init_tracing(&config.log);

  let storage = match &config.cache.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };

  match args.command {
    Command::ClearOld => clear_cache(storage, false),
    Command::ClearAll => clear_cache(storage, true),
    Command::News => {
      let session = connect(&config, storage, args.offline)?;
      show_today::<DailyNews>(session, config.locale).await
    }
    Command::Terms => {
      let session = connect(&config, storage, args.offline)?;
      show_today::<DailyTerms>(session, config.locale).await
    }
  }
}
