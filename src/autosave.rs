//! Debounced autosave for locally edited values.
//!
//! ```text
//! Idle --on_change--> Pending --quiet window--> Saving --response--> Idle
//!                     Pending --on_change--> Pending (timer reset)
//! ```
//!
//! Only the trailing edit inside a quiet window is sent. The timer is released
//! on every exit path: it fires, a newer edit replaces it, or the controller is
//! torn down (dropped), in which case nothing is sent.
//!
//! Saves never overlap. A quiet window that ends while a save is in flight
//! marks the value dirty, and the latest value is sent once that save settles.

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::Notifier;

type SaveFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Where the controller is in its save cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosavePhase {
  Idle,
  /// Timer armed, waiting for the quiet window to pass
  Pending,
  /// Remote write in flight
  Saving,
}

struct Shared<T> {
  value: T,
  timer: Option<JoinHandle<()>>,
  /// Bumped by every edit; a timer only fires for the edit that armed it
  generation: u64,
  saving: bool,
  /// An edit became due while a save was in flight
  dirty: bool,
  last_error: Option<String>,
}

/// State shared between the controller and its timer and save tasks.
struct Core<T> {
  label: String,
  shared: Mutex<Shared<T>>,
  save: SaveFn<T>,
  notifier: Notifier,
  /// Signalled whenever the controller stops saving
  settled: Notify,
}

/// Buffers edits to one value and persists the last of them after a quiet period.
pub struct Autosave<T> {
  core: Arc<Core<T>>,
  delay: Duration,
}

impl<T: Clone + Send + 'static> Autosave<T> {
  pub fn new<F, Fut>(
    label: impl Into<String>,
    initial: T,
    delay: Duration,
    notifier: Notifier,
    save: F,
  ) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    Self {
      core: Arc::new(Core {
        label: label.into(),
        shared: Mutex::new(Shared {
          value: initial,
          timer: None,
          generation: 0,
          saving: false,
          dirty: false,
          last_error: None,
        }),
        save: Arc::new(move |value| save(value).boxed()),
        notifier,
        settled: Notify::new(),
      }),
      delay,
    }
  }

  /// The locally displayed value, including edits not yet saved.
  pub fn value(&self) -> T {
    self.core.lock().value.clone()
  }

  pub fn phase(&self) -> AutosavePhase {
    let shared = self.core.lock();
    if shared.timer.is_some() {
      AutosavePhase::Pending
    } else if shared.saving {
      AutosavePhase::Saving
    } else {
      AutosavePhase::Idle
    }
  }

  /// True from the moment a save is scheduled until its remote call settles.
  pub fn is_saving(&self) -> bool {
    self.phase() != AutosavePhase::Idle
  }

  /// Message of the last failed save, cleared by the next successful one.
  pub fn last_error(&self) -> Option<String> {
    self.core.lock().last_error.clone()
  }

  /// Record an edit and (re)arm the save timer.
  pub fn on_change(&self, value: T) {
    let mut shared = self.core.lock();
    shared.value = value;
    shared.generation += 1;
    if let Some(previous) = shared.timer.take() {
      previous.abort();
    }

    let generation = shared.generation;
    let delay = self.delay;
    let core = Arc::clone(&self.core);
    shared.timer = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let value = {
        let mut shared = core.lock();
        if shared.generation != generation {
          return;
        }
        // From here on teardown no longer reaches this task
        shared.timer = None;
        if shared.saving {
          debug!(label = %core.label, generation, "Autosave queued behind save in flight");
          shared.dirty = true;
          return;
        }
        shared.saving = true;
        shared.value.clone()
      };
      core.run_save(value).await;
    }));
    debug!(label = %self.core.label, generation, "Autosave scheduled");
  }

  /// Save a pending edit now instead of waiting for the quiet window.
  ///
  /// Resolves once every edit made so far has been sent.
  pub async fn flush(&self) {
    let value = {
      let mut shared = self.core.lock();
      match shared.timer.take() {
        Some(timer) => {
          timer.abort();
          shared.generation += 1;
          if shared.saving {
            shared.dirty = true;
            None
          } else {
            shared.saving = true;
            Some(shared.value.clone())
          }
        }
        None => None,
      }
    };
    if let Some(value) = value {
      self.core.run_save(value).await;
    }
    self.settle().await;
  }

  async fn settle(&self) {
    loop {
      let settled = self.core.settled.notified();
      if !self.core.lock().saving {
        return;
      }
      settled.await;
    }
  }

  /// Cancel any pending save. Equivalent to dropping the controller.
  pub fn teardown(self) {}
}

impl<T: Clone> Core<T> {
  fn lock(&self) -> MutexGuard<'_, Shared<T>> {
    self
      .shared
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Send `value`, then the latest value for as long as edits kept becoming
  /// due meanwhile. The caller has set `saving`.
  async fn run_save(&self, mut value: T) {
    loop {
      debug!(label = %self.label, "Autosave started");
      let result = (self.save)(value).await;

      let next = {
        let mut shared = self.lock();
        match &result {
          Ok(()) => shared.last_error = None,
          Err(e) => shared.last_error = Some(e.to_string()),
        }
        if shared.dirty {
          shared.dirty = false;
          Some(shared.value.clone())
        } else {
          shared.saving = false;
          None
        }
      };

      match result {
        Ok(()) => debug!(label = %self.label, "Autosave finished"),
        Err(e) => {
          // The local value stays as edited
          warn!(label = %self.label, error = %e, "Autosave failed");
          self
            .notifier
            .error(format!("Saving {} failed: {}", self.label, e));
        }
      }

      match next {
        Some(latest) => value = latest,
        None => {
          self.settled.notify_waiters();
          return;
        }
      }
    }
  }
}

impl<T> Drop for Autosave<T> {
  fn drop(&mut self) {
    let mut shared = self
      .core
      .shared
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(timer) = shared.timer.take() {
      debug!(label = %self.core.label, "Pending autosave cancelled");
      timer.abort();
    }
  }
}
