//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::key::ResourceKey;

/// Snapshot of a cache entry: the last known value plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub value: Value,
  /// Marked by invalidation, cleared by a successful fetch or a manual write
  pub stale: bool,
  /// When the value last came back from the network
  pub fetched_at: Option<DateTime<Utc>>,
  /// When the value was last written, by a fetch or a manual write
  pub updated_at: DateTime<Utc>,
  /// Optimistic mutations currently holding background fetching off this key
  pub pending_mutations: u32,
}

/// Result from a query read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was written to the cache (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from data that was still fresh in the cache.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where query data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network fetch failed, serving the stale cached value
  Offline,
}

/// Notification sent to cache subscribers on every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// A value was written, either from the network or a manual `set`
  Updated(ResourceKey),
  /// An entry was marked stale
  Invalidated(ResourceKey),
  /// An entry was evicted
  Removed(ResourceKey),
}

impl CacheEvent {
  pub fn key(&self) -> &ResourceKey {
    match self {
      CacheEvent::Updated(key) | CacheEvent::Invalidated(key) | CacheEvent::Removed(key) => key,
    }
  }
}
