//! The offline cache gateway.
//!
//! Owns one versioned store and intercepts every request from the pages it
//! controls. Static assets are served cache-first, everything else
//! network-first, and the stored shell page is the last resort when the
//! network is unreachable. Installing a version seeds its store with the
//! application shell; activating it deletes every other store.

mod classify;
mod message;

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::{
  is_cacheable, CacheLayer, CacheStorage, CachedResponse, RequestKey, ResponseSource,
};
use crate::config::CacheConfig;
use crate::network::{GatewayRequest, GatewayResponse, Network};

pub use classify::{Classifier, RequestClass};
pub use message::{ControlMessage, ControlReply};

/// Lifecycle of one installed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Created, install not started yet
  Parsed,
  /// Store being opened and seeded
  Installing,
  /// Installed, waiting to be activated
  Waiting,
  /// Stale stores being purged
  Activating,
  /// Controlling requests
  Active,
  /// Install failed; this version will never activate
  Redundant,
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Lifecycle::Parsed => write!(f, "parsed"),
      Lifecycle::Installing => write!(f, "installing"),
      Lifecycle::Waiting => write!(f, "waiting"),
      Lifecycle::Activating => write!(f, "activating"),
      Lifecycle::Active => write!(f, "active"),
      Lifecycle::Redundant => write!(f, "redundant"),
    }
  }
}

/// Version record owned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayState {
  pub version_name: String,
  pub lifecycle: Lifecycle,
  /// Activation was requested before the normal wait completed
  pub skip_waiting: bool,
}

impl GatewayState {
  /// Move a waiting version to activating. Returns whether this call did so;
  /// the caller that gets `true` owns the activation.
  fn claim_activation(&mut self) -> bool {
    if self.lifecycle != Lifecycle::Waiting {
      return false;
    }
    self.lifecycle = Lifecycle::Activating;
    true
  }
}

pub struct Gateway<S: CacheStorage, N: Network> {
  network: Arc<N>,
  cache: CacheLayer<S>,
  classifier: Classifier,
  bootstrap_assets: Vec<String>,
  state: Mutex<GatewayState>,
}

impl<S: CacheStorage, N: Network> Gateway<S, N> {
  pub fn new(config: &CacheConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    let version_name = config.store_name();

    Self {
      network,
      cache: CacheLayer::new(storage, version_name.clone(), &config.shell_path),
      classifier: Classifier::new(&config.static_extensions),
      bootstrap_assets: config.bootstrap_assets.clone(),
      state: Mutex::new(GatewayState {
        version_name,
        lifecycle: Lifecycle::Parsed,
        skip_waiting: config.skip_waiting,
      }),
    }
  }

  fn lock_state(&self) -> Result<MutexGuard<'_, GatewayState>> {
    self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Snapshot of the version record.
  pub fn state(&self) -> Result<GatewayState> {
    Ok(self.lock_state()?.clone())
  }

  pub fn lifecycle(&self) -> Result<Lifecycle> {
    Ok(self.lock_state()?.lifecycle)
  }

  fn set_lifecycle(&self, lifecycle: Lifecycle) -> Result<()> {
    let mut state = self.lock_state()?;
    debug!(from = %state.lifecycle, to = %lifecycle, "lifecycle transition");
    state.lifecycle = lifecycle;
    Ok(())
  }

  pub fn store_name(&self) -> &str {
    self.cache.store_name()
  }

  #[cfg(test)]
  pub fn storage(&self) -> &Arc<S> {
    self.cache.storage()
  }

  /// Install this version: open its store and seed the bootstrap assets.
  ///
  /// Individual assets that fail to fetch or store are skipped. Only a failure
  /// to open the store fails the install. If skip-waiting was requested the
  /// version is activated right away; a failed activation leaves it waiting.
  /// Returns the resulting lifecycle state.
  pub async fn on_install(&self) -> Result<Lifecycle> {
    {
      let mut state = self.lock_state()?;
      if state.lifecycle != Lifecycle::Parsed {
        return Err(eyre!("Cannot install while {}", state.lifecycle));
      }
      state.lifecycle = Lifecycle::Installing;
    }

    let store = self.store_name().to_string();
    let opened = self
      .cache
      .blocking(|storage, name| storage.open_store(name))
      .await;
    if let Err(e) = opened {
      self.set_lifecycle(Lifecycle::Redundant)?;
      return Err(e.wrap_err(format!("Install of {} failed", store)));
    }

    let seeded = self.seed().await;
    info!(%store, seeded, total = self.bootstrap_assets.len(), "installed");

    // Waiting and the skip-waiting check share one lock scope, so a
    // SKIP_WAITING message cannot claim the same activation.
    let activate = {
      let mut state = self.lock_state()?;
      state.lifecycle = Lifecycle::Waiting;
      state.skip_waiting && state.claim_activation()
    };
    if activate {
      if let Err(e) = self.activate().await {
        warn!(%store, "activation failed, staying in waiting: {:#}", e);
      }
    }

    self.lifecycle()
  }

  /// Fetch every bootstrap asset concurrently and store the successful ones.
  async fn seed(&self) -> usize {
    let fetches = self.bootstrap_assets.iter().map(|path| async move {
      let request = GatewayRequest::get(path.as_str());
      (path, self.network.fetch(&request).await)
    });

    let mut seeded = 0;
    for (path, result) in join_all(fetches).await {
      match result {
        Ok(response) if is_cacheable(response.status) => {
          let copy = CachedResponse::capture(&response);
          let key = RequestKey::get(path);
          match self
            .cache
            .blocking(move |storage, store| storage.put(store, &key, &copy))
            .await
          {
            Ok(()) => seeded += 1,
            Err(e) => warn!(%path, "failed to store bootstrap asset: {}", e),
          }
        }
        Ok(response) => warn!(%path, status = %response.status, "bootstrap asset not seeded"),
        Err(e) => warn!(%path, "failed to fetch bootstrap asset: {}", e),
      }
    }
    seeded
  }

  /// Activate this version: delete every store but the current one.
  ///
  /// All deletions complete before the version becomes active. If one fails
  /// the version goes back to waiting so activation can be retried.
  pub async fn on_activate(&self) -> Result<()> {
    {
      let mut state = self.lock_state()?;
      match state.lifecycle {
        Lifecycle::Active => return Ok(()),
        Lifecycle::Waiting => state.lifecycle = Lifecycle::Activating,
        other => return Err(eyre!("Cannot activate while {}", other)),
      }
    }

    self.activate().await
  }

  /// Purge stale stores for a version this caller moved to activating.
  async fn activate(&self) -> Result<()> {
    match self.purge_stale_stores().await {
      Ok(purged) => {
        self.set_lifecycle(Lifecycle::Active)?;
        info!(store = %self.store_name(), purged, "activated");
        Ok(())
      }
      Err(e) => {
        self.set_lifecycle(Lifecycle::Waiting)?;
        Err(e.wrap_err(format!("Activation of {} failed", self.store_name())))
      }
    }
  }

  async fn purge_stale_stores(&self) -> Result<usize> {
    self
      .cache
      .blocking(|storage, current| {
        let mut purged = 0;
        for name in storage.store_names()? {
          if name != current {
            storage.delete_store(&name)?;
            debug!(store = %name, "deleted stale store");
            purged += 1;
          }
        }
        Ok(purged)
      })
      .await
  }

  /// Intercept a request from a controlled page.
  ///
  /// Non-GET requests, and every request while this version is not active,
  /// go straight to the network and come back unmodified. Otherwise static
  /// assets are served cache-first and everything else network-first. An
  /// error means the network failed and neither a stored copy nor the shell
  /// page could stand in.
  pub async fn on_fetch(&self, request: GatewayRequest) -> Result<GatewayResponse> {
    if request.method != Method::GET || self.lifecycle()? != Lifecycle::Active {
      let mut response = self.network.fetch(&request).await?;
      response.source = ResponseSource::Passthrough;
      return Ok(response);
    }

    let key = RequestKey::new(&request.method, &request.target);
    let class = self.classifier.classify(request.path());
    let network = &*self.network;
    let request = &request;
    let fetch = move || async move { network.fetch(request).await };

    let response = match class {
      RequestClass::StaticAsset => self.cache.cache_first(key, fetch).await?,
      RequestClass::Dynamic => self.cache.network_first(key, fetch).await?,
    };

    debug!(
      path = %request.target,
      ?class,
      source = %response.source,
      status = %response.status,
      "served"
    );
    Ok(response)
  }

  /// Handle a control message from the page.
  pub async fn on_message(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
    match message {
      ControlMessage::SkipWaiting => {
        // Installing picks the flag up when it finishes; activating or
        // active needs nothing more.
        let activate = {
          let mut state = self.lock_state()?;
          state.skip_waiting = true;
          state.claim_activation()
        };
        if activate {
          self.activate().await?;
        }
        Ok(None)
      }
      ControlMessage::GetCacheStatus => Ok(Some(ControlReply::ok(self.store_name()))),
    }
  }

  /// Wait for all store writes started by `on_fetch` to finish.
  pub async fn flush_writes(&self) {
    self.cache.flush_writes().await;
  }
}
