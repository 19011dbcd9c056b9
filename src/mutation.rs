//! Optimistic mutations against the shared cache.
//!
//! Each mutation walks an explicit state machine:
//!
//! ```text
//! Idle -> Pending -> Committed
//!                 -> RolledBack
//! ```
//!
//! Entering `Pending` cancels in-flight fetches for the affected keys, pauses
//! background fetching for them, snapshots their values and applies the local
//! patch. The remote call then decides: success invalidates the keys so they
//! resync with the server; failure restores the snapshots verbatim and raises
//! one error notice. Fetching is resumed on every exit path.
//!
//! Two mutations over overlapping keys may run concurrently. If the one that
//! started first fails after the other committed, its rollback restores a
//! snapshot taken before the other's patch. The key keeps the stale mark left
//! by the successful one, so the next read refetches it from the server.

use color_eyre::Result;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::cache::{QueryCache, ResourceKey};
use crate::event::Notifier;

/// Lifecycle of one optimistic mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
  /// Not started
  Idle,
  /// Local patch applied, remote call in flight
  Pending,
  /// Remote call succeeded, affected keys invalidated
  Committed,
  /// Remote call (or the local patch) failed, snapshots restored
  RolledBack,
}

/// How a mutation settled
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
  Committed(T),
  RolledBack,
}

impl<T> MutationOutcome<T> {
  pub fn state(&self) -> MutationState {
    match self {
      MutationOutcome::Committed(_) => MutationState::Committed,
      MutationOutcome::RolledBack => MutationState::RolledBack,
    }
  }
}

/// Runs optimistic mutations against a shared cache.
#[derive(Clone)]
pub struct MutationCoordinator {
  cache: QueryCache,
  notifier: Notifier,
}

impl MutationCoordinator {
  pub fn new(cache: QueryCache, notifier: Notifier) -> Self {
    Self { cache, notifier }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Apply `patch` to the cache immediately, then settle it with `call`.
  ///
  /// `label` names the action in notices ("Moving todo 5 failed: ...").
  /// Failures never propagate: they come back as `MutationOutcome::RolledBack`
  /// after the user has been notified exactly once.
  pub async fn mutate<T, P, Fut>(
    &self,
    label: &str,
    keys: &[ResourceKey],
    patch: P,
    call: Fut,
  ) -> MutationOutcome<T>
  where
    P: FnOnce(&QueryCache) -> Result<()>,
    Fut: Future<Output = Result<T>>,
  {
    let mut mutation = PendingMutation::begin(&self.cache, keys);
    debug!(label, keys = keys.len(), "Mutation pending");

    if let Err(e) = patch(&self.cache) {
      mutation.roll_back();
      self.notifier.error(format!("{} failed: {}", label, e));
      return MutationOutcome::RolledBack;
    }

    match call.await {
      Ok(data) => {
        mutation.commit();
        info!(label, "Mutation committed");
        MutationOutcome::Committed(data)
      }
      Err(e) => {
        mutation.roll_back();
        warn!(label, error = %e, "Mutation rolled back");
        self.notifier.error(format!("{} failed: {}", label, e));
        MutationOutcome::RolledBack
      }
    }
  }
}

/// A mutation between its local patch and its remote settlement.
///
/// Owns the fetch pause on every affected key; dropping it releases them, so a
/// mutation abandoned mid-flight still leaves fetching enabled. An abandoned
/// mutation invalidates its keys instead of guessing at the outcome.
struct PendingMutation<'a> {
  cache: &'a QueryCache,
  keys: &'a [ResourceKey],
  snapshots: Vec<Option<Value>>,
  state: MutationState,
}

impl<'a> PendingMutation<'a> {
  fn begin(cache: &'a QueryCache, keys: &'a [ResourceKey]) -> Self {
    // Cancel before snapshotting so no stale fetch lands between the two
    for key in keys {
      cache.cancel_fetches(key);
      cache.pause_fetching(key);
    }
    let snapshots = keys.iter().map(|key| cache.get(key)).collect();

    Self {
      cache,
      keys,
      snapshots,
      state: MutationState::Pending,
    }
  }

  fn commit(&mut self) {
    for key in self.keys {
      self.cache.invalidate(key);
    }
    self.state = MutationState::Committed;
  }

  fn roll_back(&mut self) {
    for (key, snapshot) in self.keys.iter().zip(self.snapshots.drain(..)) {
      self.cache.restore(key, snapshot);
    }
    self.state = MutationState::RolledBack;
  }
}

impl Drop for PendingMutation<'_> {
  fn drop(&mut self) {
    if self.state == MutationState::Pending {
      debug!("Mutation abandoned while pending");
      for key in self.keys {
        self.cache.invalidate(key);
      }
    }
    for key in self.keys {
      self.cache.resume_fetching(key);
    }
  }
}
