mod cache;
mod config;
mod gateway;
mod network;
mod server;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use cache::{CacheStorage, SqliteStorage};
use gateway::Gateway;
use network::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "offline-gateway")]
#[command(about = "Offline-first caching gateway in front of a web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-gateway/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Upstream origin to forward requests to
  #[arg(long, global = true)]
  upstream: Option<String>,

  /// Address to listen on
  #[arg(long, global = true)]
  listen: Option<SocketAddr>,

  /// Cache database path
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Cache version to install
  #[arg(long, global = true)]
  cache_version: Option<String>,

  /// Verbose logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
  /// Install the configured version and serve requests (default)
  #[default]
  Serve,
  /// Install the configured version, activate it if allowed, and exit
  Install,
  /// List cache stores
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = setup_tracing(args.verbose)?;

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(upstream) = args.upstream {
    config.network.upstream = upstream;
  }
  if let Some(listen) = args.listen {
    config.server.listen = listen;
  }
  if let Some(database) = args.database {
    config.cache.database = Some(database);
  }
  if let Some(version) = args.cache_version {
    config.cache.version = version;
  }
  config.validate()?;

  let storage = Arc::new(match &config.cache.database {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  });

  match args.command.unwrap_or_default() {
    Command::Stores => list_stores(storage.as_ref(), &config.cache.store_name()),
    Command::Install => {
      let gateway = install(&config, storage).await?;
      let state = gateway.state()?;
      println!("{} {}", state.version_name, state.lifecycle);
      Ok(())
    }
    Command::Serve => {
      let gateway = install(&config, storage).await?;
      server::serve(gateway, &config.server).await
    }
  }
}

async fn install(
  config: &config::Config,
  storage: Arc<SqliteStorage>,
) -> Result<Arc<Gateway<SqliteStorage, HttpNetwork>>> {
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  info!(upstream = %network.upstream(), "using upstream");

  let gateway = Arc::new(Gateway::new(&config.cache, storage, network));
  let lifecycle = gateway.on_install().await?;
  info!(store = %gateway.store_name(), %lifecycle, "gateway ready");

  Ok(gateway)
}

fn list_stores(storage: &impl CacheStorage, current: &str) -> Result<()> {
  let names = storage.store_names()?;
  if names.is_empty() {
    println!("no stores");
    return Ok(());
  }

  for name in names {
    let marker = if name == current { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, storage.entry_count(&name)?);
  }
  Ok(())
}

/// Directory for the cache database and log file.
fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offline-gateway"))
}

fn setup_tracing(verbose: bool) -> Result<WorkerGuard> {
  use tracing_subscriber::prelude::*;
  use tracing_subscriber::{fmt, EnvFilter};

  let log_dir = data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "offline-gateway.log"));

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("offline_gateway=debug,info")
    } else {
      EnvFilter::new("offline_gateway=info,warn")
    }
  });

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
