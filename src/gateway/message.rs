//! Control channel between the controlling page and the gateway.

use serde::{Deserialize, Serialize};

/// Messages a page can post to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting version now instead of waiting for its turn
  SkipWaiting,
  /// Ask for the name of the active store
  GetCacheStatus,
}

/// Reply to `GET_CACHE_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlReply {
  pub status: &'static str,
  pub cache_version: String,
}

impl ControlReply {
  pub fn ok(cache_version: impl Into<String>) -> Self {
    Self {
      status: "ok",
      cache_version: cache_version.into(),
    }
  }
}
