use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Store name prefix; the store is named `<name>-<version>`
  pub name: String,
  pub version: String,
  /// Page served when both the network and the store miss
  pub shell_path: String,
  /// Application shell seeded into the store at install time
  pub bootstrap_assets: Vec<String>,
  /// Path suffixes served cache-first
  pub static_extensions: Vec<String>,
  /// Activate a freshly installed version without waiting
  pub skip_waiting: bool,
  /// Database location (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "geotracker".to_string(),
      version: "v3.1.7".to_string(),
      shell_path: "/index.html".to_string(),
      bootstrap_assets: ["/", "/index.html", "/app.js", "/manifest.json", "/service-worker.js"]
        .into_iter()
        .map(String::from)
        .collect(),
      static_extensions: [
        ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".woff", ".woff2", ".ttf", ".json",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      skip_waiting: true,
      database: None,
    }
  }
}

impl CacheConfig {
  /// Name of the store for the configured version.
  pub fn store_name(&self) -> String {
    format!("{}-{}", self.name, self.version)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Origin that requests are forwarded to
  pub upstream: String,
  /// Per-request timeout; none by default
  pub timeout_secs: Option<u64>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      upstream: "http://127.0.0.1:8000".to_string(),
      timeout_secs: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub listen: SocketAddr,
  /// Largest request body buffered before forwarding
  pub max_body_bytes: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
      max_body_bytes: 16 * 1024 * 1024,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-gateway.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-gateway/config.yaml
  /// 4. Built-in defaults
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-gateway.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-gateway").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  /// Check the invariants the gateway relies on.
  pub fn validate(&self) -> Result<()> {
    let cache = &self.cache;

    if cache.name.trim().is_empty() || cache.version.trim().is_empty() {
      return Err(eyre!("cache.name and cache.version must not be empty"));
    }

    if let Some(path) = cache
      .bootstrap_assets
      .iter()
      .chain(std::iter::once(&cache.shell_path))
      .find(|p| !p.starts_with('/'))
    {
      return Err(eyre!("'{}' is not a root-relative path", path));
    }

    if !cache.bootstrap_assets.contains(&cache.shell_path) {
      return Err(eyre!(
        "shell page {} must be one of the bootstrap assets",
        cache.shell_path
      ));
    }

    let upstream = Url::parse(&self.network.upstream)
      .map_err(|e| eyre!("Invalid upstream URL {}: {}", self.network.upstream, e))?;
    if !matches!(upstream.scheme(), "http" | "https") {
      return Err(eyre!("Upstream must be an http(s) URL, got {}", upstream));
    }

    Ok(())
  }
}
