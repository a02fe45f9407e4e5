//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CachedResponse, RequestKey, ResponseSource};
use crate::network::GatewayResponse;

/// Whether a network response may be written to the store.
///
/// Only 2xx responses are cached; anything else is passed through untouched.
pub fn is_cacheable(status: StatusCode) -> bool {
  status.is_success()
}

/// Cache layer bound to one named store.
///
/// Sits between the gateway and the network, implementing the cache-first and
/// network-first strategies with a shell-page fallback for offline mode.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  store_name: String,
  /// Terminal fallback served when both network and store miss
  shell_key: RequestKey,
  /// Store writes that have been started but not yet observed
  pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(storage: Arc<S>, store_name: impl Into<String>, shell_path: &str) -> Self {
    Self {
      storage,
      store_name: store_name.into(),
      shell_key: RequestKey::get(shell_path),
      pending_writes: Mutex::new(Vec::new()),
    }
  }

  #[cfg(test)]
  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn store_name(&self) -> &str {
    &self.store_name
  }

  /// Run a storage call against this layer's store on the blocking pool.
  ///
  /// The SQLite connection sits behind a synchronous mutex, so no storage
  /// call may run on an async worker thread.
  pub async fn blocking<T, F>(&self, call: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&S, &str) -> Result<T> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let store = self.store_name.clone();

    tokio::task::spawn_blocking(move || call(storage.as_ref(), store.as_str()))
      .await
      .map_err(|e| eyre!("Storage task failed: {}", e))?
  }

  /// Look up a request in the store. Storage errors count as a miss.
  pub async fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    let owned = key.clone();
    match self
      .blocking(move |storage, store| storage.match_request(store, &owned))
      .await
    {
      Ok(hit) => hit,
      Err(e) => {
        warn!(store = %self.store_name, %key, "store lookup failed: {}", e);
        None
      }
    }
  }

  /// The stored shell page, if present.
  async fn shell(&self) -> Option<GatewayResponse> {
    self
      .lookup(&self.shell_key)
      .await
      .map(|cached| cached.into_response(ResponseSource::Fallback))
  }

  /// Start writing a copy of `response` to the store without waiting for it.
  ///
  /// Non-cacheable responses are ignored. A failed write is logged and has no
  /// other effect.
  pub fn put_detached(&self, key: RequestKey, response: &GatewayResponse) {
    if !is_cacheable(response.status) {
      debug!(%key, status = %response.status, "not caching non-success response");
      return;
    }

    let copy = CachedResponse::capture(response);
    let storage = Arc::clone(&self.storage);
    let store = self.store_name.clone();

    let handle = tokio::task::spawn_blocking(move || {
      match storage.put(&store, &key, &copy) {
        Ok(()) => debug!(%store, %key, "stored response"),
        Err(e) => warn!(%store, %key, "store write failed: {}", e),
      }
    });

    if let Ok(mut pending) = self.pending_writes.lock() {
      pending.retain(|h| !h.is_finished());
      pending.push(handle);
    }
  }

  /// Wait for every store write started so far to finish.
  pub async fn flush_writes(&self) {
    let handles = match self.pending_writes.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(_) => return,
    };

    for handle in handles {
      if let Err(e) = handle.await {
        warn!("store write task failed: {}", e);
      }
    }
  }

  /// Cache-first strategy, for static assets.
  ///
  /// 1. Return the stored copy if present, without touching the network
  /// 2. Otherwise fetch, store a copy on success and return it
  /// 3. On network failure, return the shell page
  pub async fn cache_first<F, Fut>(&self, key: RequestKey, fetcher: F) -> Result<GatewayResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<GatewayResponse>>,
  {
    if let Some(cached) = self.lookup(&key).await {
      return Ok(cached.into_response(ResponseSource::Cache));
    }

    match fetcher().await {
      Ok(response) => {
        self.put_detached(key, &response);
        Ok(response)
      }
      Err(e) => match self.shell().await {
        Some(shell) => {
          debug!(%key, "network failed, serving shell page: {}", e);
          Ok(shell)
        }
        None => Err(e.wrap_err(format!("{} failed and no shell page is stored", key))),
      },
    }
  }

  /// Network-first strategy, for everything that is not a static asset.
  ///
  /// 1. Fetch, store a copy on success and return it
  /// 2. On network failure, return the stored copy
  /// 3. If there is none, return the shell page
  pub async fn network_first<F, Fut>(&self, key: RequestKey, fetcher: F) -> Result<GatewayResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<GatewayResponse>>,
  {
    match fetcher().await {
      Ok(response) => {
        self.put_detached(key, &response);
        Ok(response)
      }
      Err(e) => {
        // Network failed, serve whatever the store has (offline mode)
        if let Some(cached) = self.lookup(&key).await {
          debug!(%key, "network failed, serving stored copy: {}", e);
          return Ok(cached.into_response(ResponseSource::Cache));
        }
        match self.shell().await {
          Some(shell) => {
            debug!(%key, "network failed, serving shell page: {}", e);
            Ok(shell)
          }
          None => Err(e.wrap_err(format!(
            "{} failed with no stored copy and no shell page",
            key
          ))),
        }
      }
    }
  }
}
