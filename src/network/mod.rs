//! Requests, responses and the network seam the gateway fetches through.

mod client;

use async_trait::async_trait;
use color_eyre::Result;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};

use crate::cache::ResponseSource;

pub use client::HttpNetwork;

/// A request intercepted from a page.
///
/// `target` is the origin-relative path and query, e.g. `/app.js?v=2`.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
  pub method: Method,
  pub target: String,
  pub headers: HeaderMap,
  pub body: Vec<u8>,
}

impl GatewayRequest {
  pub fn new(method: Method, target: impl Into<String>) -> Self {
    Self {
      method,
      target: target.into(),
      headers: HeaderMap::new(),
      body: Vec::new(),
    }
  }

  pub fn get(target: impl Into<String>) -> Self {
    Self::new(Method::GET, target)
  }

  /// The path component of the target, without the query string.
  pub fn path(&self) -> &str {
    match self.target.split_once('?') {
      Some((path, _)) => path,
      None => &self.target,
    }
  }
}

/// A response handed back to the page.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Vec<u8>,
  /// Where the response came from; never exposed to the page
  pub source: ResponseSource,
}

/// The network the gateway falls through to.
///
/// `Err` means the request failed at the transport level (connection refused,
/// timeout, ...). Any HTTP status, including 4xx and 5xx, is an `Ok`.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &GatewayRequest) -> Result<GatewayResponse>;
}
