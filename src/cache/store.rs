//! Keyed in-memory store of the most recent known resource values.
//!
//! The store never performs network I/O on its own behalf. Fetches run through
//! fetchers supplied by callers (one-off via [`QueryCache::fetch_with`], or
//! registered by a live [`crate::query::QueryObserver`] for background refetch).

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::key::ResourceKey;
use super::traits::{CacheEntry, CacheEvent};

/// A factory producing one fetch of a resource's JSON value.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value>> + Send + 'static,
{
  Arc::new(move || f().boxed())
}

struct StoredValue {
  value: Value,
  stale: bool,
  fetched_at: Option<DateTime<Utc>>,
  updated_at: DateTime<Utc>,
}

struct InFlight {
  abort: AbortHandle,
}

#[derive(Default)]
struct Slot {
  stored: Option<StoredValue>,
  pending_mutations: u32,
  /// Bumped on every fetch start and cancellation; a fetch only writes if its
  /// generation is still current.
  generation: u64,
  in_flight: Option<InFlight>,
  refetch_deferred: bool,
  observers: usize,
  fetcher: Option<Fetcher>,
  last_error: Option<String>,
}

impl Slot {
  fn is_idle(&self) -> bool {
    self.stored.is_none() && self.observers == 0 && self.pending_mutations == 0
  }
}

#[derive(Default)]
struct Inner {
  slots: HashMap<ResourceKey, Slot>,
}

/// Process-wide client cache.
///
/// Constructed once at application start and handed out by clone; every clone
/// shares the same entries. Reads and writes are synchronous and never
/// interleave with each other.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Mutex<Inner>>,
  events: broadcast::Sender<CacheEvent>,
  /// How long after its last write an entry is considered stale
  stale_time: Duration,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryCache {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      events,
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self
      .inner
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn emit(&self, event: CacheEvent) {
    // No receivers is fine
    let _ = self.events.send(event);
  }

  /// Receive a notification for every write, invalidation and eviction.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  /// Last known value for `key`, or `None` if it was never fetched or set.
  pub fn get(&self, key: &ResourceKey) -> Option<Value> {
    self
      .lock()
      .slots
      .get(key)
      .and_then(|slot| slot.stored.as_ref())
      .map(|stored| stored.value.clone())
  }

  /// Typed read. A value of unexpected shape is logged and treated as absent.
  pub fn get_as<T: DeserializeOwned>(&self, key: &ResourceKey) -> Option<T> {
    let value = self.get(key)?;
    match serde_json::from_value(value) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(%key, error = %e, "Cached value has unexpected shape");
        None
      }
    }
  }

  /// Value and metadata for `key`.
  pub fn entry(&self, key: &ResourceKey) -> Option<CacheEntry> {
    let inner = self.lock();
    let slot = inner.slots.get(key)?;
    let stored = slot.stored.as_ref()?;
    Some(CacheEntry {
      value: stored.value.clone(),
      stale: stored.stale,
      fetched_at: stored.fetched_at,
      updated_at: stored.updated_at,
      pending_mutations: slot.pending_mutations,
    })
  }

  /// Replace the value at `key` with `updater(current)`, where an absent entry
  /// reads as `Value::Null`.
  ///
  /// The updater runs under the cache lock and must not call back into the cache.
  pub fn set(&self, key: &ResourceKey, updater: impl FnOnce(Value) -> Value) {
    {
      let mut inner = self.lock();
      let slot = inner.slots.entry(key.clone()).or_default();
      let current = slot
        .stored
        .as_ref()
        .map(|stored| stored.value.clone())
        .unwrap_or(Value::Null);
      write_value(slot, updater(current));
    }
    trace!(%key, "Cache entry written");
    self.emit(CacheEvent::Updated(key.clone()));
  }

  /// Typed `set`. An absent entry reads as `T::default()`.
  pub fn set_as<T>(&self, key: &ResourceKey, updater: impl FnOnce(T) -> T) -> Result<()>
  where
    T: Serialize + DeserializeOwned + Default,
  {
    {
      let mut inner = self.lock();
      let slot = inner.slots.entry(key.clone()).or_default();
      let current = match slot.stored.as_ref() {
        Some(stored) => serde_json::from_value(stored.value.clone())
          .map_err(|e| eyre!("Failed to decode cached value for {}: {}", key, e))?,
        None => T::default(),
      };
      let value = serde_json::to_value(updater(current))
        .map_err(|e| eyre!("Failed to encode value for {}: {}", key, e))?;
      write_value(slot, value);
    }
    trace!(%key, "Cache entry written");
    self.emit(CacheEvent::Updated(key.clone()));
    Ok(())
  }

  /// Put a snapshot back verbatim: a value is rewritten, an absent snapshot evicts.
  ///
  /// A stale mark on the current entry survives the restore, so an
  /// invalidation that landed after the snapshot still forces a refetch.
  pub fn restore(&self, key: &ResourceKey, snapshot: Option<Value>) {
    let Some(value) = snapshot else {
      self.remove(key);
      return;
    };
    {
      let mut inner = self.lock();
      let slot = inner.slots.entry(key.clone()).or_default();
      let was_stale = slot.stored.as_ref().is_some_and(|stored| stored.stale);
      write_value(slot, value);
      if let Some(stored) = slot.stored.as_mut() {
        stored.stale = was_stale;
      }
    }
    trace!(%key, "Cache entry restored");
    self.emit(CacheEvent::Updated(key.clone()));
  }

  /// Mark `key` stale. If an observer is active for it, a background refetch
  /// starts (or is deferred until fetching is resumed).
  pub fn invalidate(&self, key: &ResourceKey) {
    self.invalidate_where(|candidate| candidate == key);
  }

  /// Invalidate every key starting with `prefix`.
  pub fn invalidate_matching(&self, prefix: &ResourceKey) {
    self.invalidate_where(|candidate| candidate.starts_with(prefix));
  }

  fn invalidate_where(&self, matches: impl Fn(&ResourceKey) -> bool) {
    let mut invalidated = Vec::new();
    {
      let mut inner = self.lock();
      for (key, slot) in inner.slots.iter_mut().filter(|(key, _)| matches(key)) {
        self.schedule_refetch(key, slot);
        // Slots held only by a pause or an observer have nothing to invalidate
        if let Some(stored) = slot.stored.as_mut() {
          stored.stale = true;
          invalidated.push(key.clone());
        }
      }
    }
    for key in invalidated {
      debug!(%key, "Cache entry invalidated");
      self.emit(CacheEvent::Invalidated(key));
    }
  }

  /// Evict `key` entirely, cancelling any fetch in flight for it.
  pub fn remove(&self, key: &ResourceKey) {
    let removed = {
      let mut inner = self.lock();
      let Some(slot) = inner.slots.get_mut(key) else {
        return;
      };
      cancel_in_flight(slot);
      slot.last_error = None;
      let removed = slot.stored.take().is_some();
      if slot.is_idle() {
        inner.slots.remove(key);
      }
      removed
    };
    if removed {
      debug!(%key, "Cache entry removed");
      self.emit(CacheEvent::Removed(key.clone()));
    }
  }

  /// True if the entry is missing, invalidated, or older than the stale time.
  pub fn is_stale(&self, key: &ResourceKey) -> bool {
    let inner = self.lock();
    match inner.slots.get(key).and_then(|slot| slot.stored.as_ref()) {
      Some(stored) => stored.stale || Utc::now() - stored.updated_at > self.stale_time,
      None => true,
    }
  }

  pub fn is_fetching(&self, key: &ResourceKey) -> bool {
    self
      .lock()
      .slots
      .get(key)
      .is_some_and(|slot| slot.in_flight.is_some())
  }

  /// Message of the last failed fetch, cleared by the next successful one.
  pub fn last_error(&self, key: &ResourceKey) -> Option<String> {
    self
      .lock()
      .slots
      .get(key)
      .and_then(|slot| slot.last_error.clone())
  }

  /// Run `fetcher` now and store its result, superseding any fetch in flight
  /// for the same key. Fails if the fetch itself fails or is cancelled before
  /// its result is written.
  pub async fn fetch_with(&self, key: &ResourceKey, fetcher: Fetcher) -> Result<Value> {
    let rx = {
      let mut inner = self.lock();
      let slot = inner.slots.entry(key.clone()).or_default();
      self.start_fetch(key, slot, fetcher)
    };
    rx.await
      .map_err(|_| eyre!("Fetch for {} was cancelled", key))?
  }

  /// Abort the fetch in flight for `key`, if any. Its result will never be
  /// written; a refetch is deferred until fetching is resumed.
  pub fn cancel_fetches(&self, key: &ResourceKey) -> bool {
    let mut inner = self.lock();
    let Some(slot) = inner.slots.get_mut(key) else {
      return false;
    };
    let cancelled = cancel_in_flight(slot);
    if cancelled {
      slot.refetch_deferred = true;
      debug!(%key, "Cancelled in-flight fetch");
    }
    cancelled
  }

  /// Hold background fetching off `key`. Calls nest; each must be matched by
  /// [`QueryCache::resume_fetching`].
  pub fn pause_fetching(&self, key: &ResourceKey) {
    let mut inner = self.lock();
    let slot = inner.slots.entry(key.clone()).or_default();
    slot.pending_mutations += 1;
  }

  /// Release one pause on `key`. When the last pause is released, a refetch
  /// deferred in the meantime (or owed to a stale entry) starts.
  pub fn resume_fetching(&self, key: &ResourceKey) {
    let mut inner = self.lock();
    let Some(slot) = inner.slots.get_mut(key) else {
      return;
    };
    slot.pending_mutations = slot.pending_mutations.saturating_sub(1);
    if slot.pending_mutations > 0 {
      return;
    }
    let owed = slot.refetch_deferred || slot.stored.as_ref().is_some_and(|stored| stored.stale);
    if owed {
      slot.refetch_deferred = false;
      self.schedule_refetch(key, slot);
    }
  }

  pub(crate) fn register_observer(&self, key: &ResourceKey, fetcher: Fetcher) {
    let mut inner = self.lock();
    let slot = inner.slots.entry(key.clone()).or_default();
    slot.observers += 1;
    slot.fetcher = Some(fetcher);
  }

  pub(crate) fn unregister_observer(&self, key: &ResourceKey) {
    let mut inner = self.lock();
    if let Some(slot) = inner.slots.get_mut(key) {
      slot.observers = slot.observers.saturating_sub(1);
      if slot.observers == 0 {
        slot.fetcher = None;
      }
    }
  }

  /// Start a background refetch through the registered observer, if allowed.
  pub(crate) fn refetch_in_background(&self, key: &ResourceKey) {
    let mut inner = self.lock();
    if let Some(slot) = inner.slots.get_mut(key) {
      self.schedule_refetch(key, slot);
    }
  }

  fn schedule_refetch(&self, key: &ResourceKey, slot: &mut Slot) {
    let Some(fetcher) = slot.fetcher.clone() else {
      return;
    };
    if slot.pending_mutations > 0 || tokio::runtime::Handle::try_current().is_err() {
      debug!(%key, "Background refetch deferred");
      slot.refetch_deferred = true;
      return;
    }
    if slot.in_flight.is_some() {
      return;
    }
    debug!(%key, "Background refetch");
    // Result is written by the task itself
    let _ = self.start_fetch(key, slot, fetcher);
  }

  fn start_fetch(
    &self,
    key: &ResourceKey,
    slot: &mut Slot,
    fetcher: Fetcher,
  ) -> oneshot::Receiver<Result<Value>> {
    cancel_in_flight(slot);
    slot.generation += 1;
    slot.refetch_deferred = false;
    let generation = slot.generation;

    let (tx, rx) = oneshot::channel();
    let cache = self.clone();
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      let result = fetcher().await;
      // Ignore send errors - caller may not be waiting
      let _ = tx.send(cache.finish_fetch(&task_key, generation, result));
    });
    slot.in_flight = Some(InFlight {
      abort: handle.abort_handle(),
    });
    rx
  }

  fn finish_fetch(&self, key: &ResourceKey, generation: u64, result: Result<Value>) -> Result<Value> {
    let mut inner = self.lock();
    let slot = match inner.slots.get_mut(key) {
      Some(slot) if slot.generation == generation => slot,
      _ => {
        debug!(%key, generation, "Discarding superseded fetch result");
        return Err(eyre!("Fetch for {} was cancelled", key));
      }
    };
    slot.in_flight = None;

    match result {
      Ok(value) => {
        let now = Utc::now();
        slot.stored = Some(StoredValue {
          value: value.clone(),
          stale: false,
          fetched_at: Some(now),
          updated_at: now,
        });
        slot.last_error = None;
        drop(inner);
        debug!(%key, "Fetched");
        self.emit(CacheEvent::Updated(key.clone()));
        Ok(value)
      }
      Err(e) => {
        slot.last_error = Some(e.to_string());
        drop(inner);
        warn!(%key, error = %e, "Fetch failed");
        Err(e)
      }
    }
  }
}

fn write_value(slot: &mut Slot, value: Value) {
  let fetched_at = slot.stored.as_ref().and_then(|stored| stored.fetched_at);
  slot.stored = Some(StoredValue {
    value,
    stale: false,
    fetched_at,
    updated_at: Utc::now(),
  });
}

fn cancel_in_flight(slot: &mut Slot) -> bool {
  match slot.in_flight.take() {
    Some(in_flight) => {
      in_flight.abort.abort();
      // Covers a task that already finished fetching but has not written yet
      slot.generation += 1;
      true
    }
    None => false,
  }
}
