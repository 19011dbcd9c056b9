//! Query observers: typed, active subscriptions to one cached resource.
//!
//! Inspired by TanStack Query. A `QueryObserver<T>` registers a fetcher for its
//! key with the shared [`QueryCache`]; while it lives, invalidating the key
//! refetches it in the background, and an optional interval polls it.
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let todos = QueryObserver::new(&cache, keys::todos(), move || {
//!     let api = api.clone();
//!     async move { api.list_todos().await }
//! });
//!
//! let result = todos.fetch().await?;
//! if result.source == CacheSource::Offline {
//!     warn_offline(result.cached_at);
//! }
//! render(&result.data);
//! ```

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{fetcher, CacheResult, Fetcher, QueryCache, ResourceKey};

/// The state of a query
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Nothing cached and nothing in flight
  Idle,
  /// First fetch in flight
  Loading,
  /// Data is available (possibly stale, possibly being refetched)
  Success(T),
  /// Last fetch failed and nothing is cached
  Error(String),
}

/// Active subscriber for a single resource key.
///
/// Dropping the observer unregisters it and stops any polling.
pub struct QueryObserver<T> {
  cache: QueryCache,
  key: ResourceKey,
  fetcher: Fetcher,
  poller: Option<JoinHandle<()>>,
  _data: PhantomData<fn() -> T>,
}

impl<T> QueryObserver<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Create an observer for `key` with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It is called for every
  /// network fetch of the key, foreground or background.
  pub fn new<F, Fut>(cache: &QueryCache, key: ResourceKey, fetch: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetcher = fetcher(move || {
      let fut = fetch();
      async move {
        let data = fut.await?;
        serde_json::to_value(data).map_err(|e| eyre!("Failed to encode fetched data: {}", e))
      }
    });
    cache.register_observer(&key, fetcher.clone());

    Self {
      cache: cache.clone(),
      key,
      fetcher,
      poller: None,
      _data: PhantomData,
    }
  }

  /// Refetch on a fixed interval for as long as `keep_polling` holds for the
  /// cached data. Polling also continues while nothing is cached yet.
  pub fn poll_while<P>(mut self, every: Duration, keep_polling: P) -> Self
  where
    P: Fn(&T) -> bool + Send + 'static,
  {
    if let Some(previous) = self.poller.take() {
      previous.abort();
    }

    let cache = self.cache.clone();
    let key = self.key.clone();
    self.poller = Some(tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      // First tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if let Some(data) = cache.get_as::<T>(&key) {
          if !keep_polling(&data) {
            debug!(%key, "Polling finished");
            break;
          }
        }
        cache.refetch_in_background(&key);
      }
    }));
    self
  }

  pub fn key(&self) -> &ResourceKey {
    &self.key
  }

  /// Cached data, if any.
  pub fn data(&self) -> Option<T> {
    self.cache.get_as(&self.key)
  }

  /// Derive the current state from the cache.
  #[cfg(test)]
  pub fn state(&self) -> QueryState<T> {
    if let Some(data) = self.data() {
      return QueryState::Success(data);
    }
    if self.cache.is_fetching(&self.key) {
      return QueryState::Loading;
    }
    match self.cache.last_error(&self.key) {
      Some(error) => QueryState::Error(error),
      None => QueryState::Idle,
    }
  }

  /// Read with a cache-first strategy.
  ///
  /// 1. Fresh cached data is returned without touching the network
  /// 2. Otherwise the key is fetched
  /// 3. If that fails and stale data exists, the stale data is served (offline mode)
  pub async fn fetch(&self) -> Result<CacheResult<T>> {
    if !self.cache.is_stale(&self.key) {
      if let Some(entry) = self.cache.entry(&self.key) {
        let data = decode::<T>(&self.key, entry.value)?;
        return Ok(CacheResult::from_cache(data, entry.updated_at));
      }
    }

    match self.refetch().await {
      Ok(data) => Ok(CacheResult::from_network(data)),
      Err(e) => match self.cache.entry(&self.key) {
        Some(entry) => {
          debug!(
            key = %self.key,
            error = %e,
            invalidated = entry.stale,
            pending_mutations = entry.pending_mutations,
            "Serving stale data"
          );
          let cached_at = entry.fetched_at.unwrap_or(entry.updated_at);
          let data = decode::<T>(&self.key, entry.value)?;
          Ok(CacheResult::offline(data, cached_at))
        }
        None => Err(e),
      },
    }
  }

  /// Force a network fetch, superseding one already in flight.
  pub async fn refetch(&self) -> Result<T> {
    let value = self
      .cache
      .fetch_with(&self.key, self.fetcher.clone())
      .await?;
    decode(&self.key, value)
  }
}

fn decode<T: DeserializeOwned>(key: &ResourceKey, value: serde_json::Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| eyre!("Failed to decode data for {}: {}", key, e))
}

impl<T> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    if let Some(poller) = self.poller.take() {
      poller.abort();
    }
    self.cache.unregister_observer(&self.key);
  }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("polling", &self.poller.is_some())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_query_success() {
    let cache = QueryCache::new();
    let query = QueryObserver::new(&cache, ResourceKey::named("numbers"), || async {
      Ok(vec![1, 2, 3])
    });

    assert_eq!(query.state(), QueryState::Idle);

    let result = query.fetch().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, vec![1, 2, 3]);
    assert_eq!(query.state(), QueryState::Success(vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let cache = QueryCache::new();
    let query: QueryObserver<i32> = QueryObserver::new(&cache, ResourceKey::named("n"), || async {
      Err(eyre!("Something went wrong"))
    });

    assert!(query.fetch().await.is_err());
    assert_eq!(
      query.state(),
      QueryState::Error("Something went wrong".to_string())
    );
  }

  #[tokio::test]
  async fn test_fresh_data_served_from_cache() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let query = QueryObserver::new(&cache, ResourceKey::named("n"), move || {
      let counter = counter_clone.clone();
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    });

    query.fetch().await.unwrap();
    let second = query.fetch().await.unwrap();

    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_data_served_when_network_fails() {
    let cache = QueryCache::new();
    let key = ResourceKey::named("n");
    cache.set(&key, |_| serde_json::json!(7));
    cache.invalidate(&key);

    let query: QueryObserver<i32> =
      QueryObserver::new(&cache, key, || async { Err(eyre!("offline")) });
    let result = query.fetch().await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, 7);
  }

  #[tokio::test]
  async fn test_invalidation_refetches_while_observed() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let query = QueryObserver::new(&cache, ResourceKey::named("n"), move || {
      let counter = counter_clone.clone();
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    });
    query.fetch().await.unwrap();

    cache.invalidate(query.key());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(query.data(), Some(1));

    let key = query.key().clone();
    drop(query);
    cache.invalidate(&key);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_refetch_supersedes_pending() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let query = Arc::new(QueryObserver::new(&cache, ResourceKey::named("n"), move || {
      let counter = counter_clone.clone();
      async move {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(n)
      }
    }));

    let first = {
      let query = query.clone();
      tokio::spawn(async move { query.refetch().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Second refetch should cancel the first
    let second = query.refetch().await.unwrap();
    assert!(first.await.unwrap().is_err());
    assert_eq!(second, 1);
    assert_eq!(query.data(), Some(1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_polling_stops_when_condition_fails() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let query = QueryObserver::new(&cache, ResourceKey::named("n"), move || {
      let counter = counter_clone.clone();
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
    })
    .poll_while(Duration::from_secs(5), |n: &u32| *n < 3);

    query.fetch().await.unwrap();
    assert_eq!(query.data(), Some(1));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(query.data(), Some(3));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }
}
