//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named stores mapping request identities to captured responses
//! - A SQLite storage backend
//! - Cache-first and network-first strategies with a shell-page fallback

mod layer;
mod storage;
mod traits;

pub use layer::{is_cacheable, CacheLayer};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CachedResponse, RequestKey, ResponseSource};
