//! Core types for the cache store: request identity, captured responses and
//! response provenance.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::network::GatewayResponse;

/// Identity of a cached request: method plus origin-relative target.
///
/// The gateway fronts a single origin, so scheme and host are not part of the
/// identity. Only GET requests are ever stored, but the method stays in the key
/// so that identities are unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  target: String,
}

impl RequestKey {
  pub fn new(method: &Method, target: &str) -> Self {
    Self {
      method: method.as_str().to_ascii_uppercase(),
      target: target.to_string(),
    }
  }

  /// Key for a GET of the given origin-relative target (e.g. "/index.html").
  pub fn get(target: &str) -> Self {
    Self::new(&Method::GET, target)
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn target(&self) -> &str {
    &self.target
  }

  /// Stable, fixed-length hash used as the storage primary key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.target.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.target)
  }
}

/// A response captured into a cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub status: u16,
  /// Header pairs in the order they were received
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// When the response was written to the store
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Capture a copy of a response for storage.
  ///
  /// Header values that are not valid UTF-8 are dropped.
  pub fn capture(response: &GatewayResponse) -> Self {
    let headers = response
      .headers
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    Self {
      status: response.status.as_u16(),
      headers,
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  /// Rebuild a response from the stored copy.
  pub fn into_response(self, source: ResponseSource) -> GatewayResponse {
    let mut headers = HeaderMap::new();
    for (name, value) in &self.headers {
      if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) {
        headers.append(name, value);
      }
    }

    GatewayResponse {
      status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
      headers,
      body: self.body,
      source,
    }
  }
}

/// Indicates where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Stored copy of the requested resource
  Cache,
  /// Stored shell page served in place of the requested resource
  Fallback,
  /// Forwarded without consulting the store (non-GET, or gateway not active)
  Passthrough,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::Cache => write!(f, "cache"),
      ResponseSource::Fallback => write!(f, "fallback"),
      ResponseSource::Passthrough => write!(f, "passthrough"),
    }
  }
}
