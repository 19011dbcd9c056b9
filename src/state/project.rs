//! Project details: the fetched project, transcription polling, the summary
//! editor and deletion.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::api::api_types::SummaryUpdate;
use crate::api::keys;
use crate::api::types::Project;
use crate::api::RemoteApi;
use crate::autosave::Autosave;
use crate::cache::{CacheSource, QueryCache};
use crate::event::Notifier;
use crate::query::QueryObserver;

pub struct ProjectDetails<R: RemoteApi> {
  id: i64,
  api: R,
  cache: QueryCache,
  notifier: Notifier,
  debounce: Duration,
  project: QueryObserver<Project>,
}

impl<R: RemoteApi> ProjectDetails<R> {
  /// Observe project `id`, polling every `poll` until its transcription exists.
  pub fn new(
    api: R,
    cache: &QueryCache,
    notifier: Notifier,
    id: i64,
    poll: Duration,
    debounce: Duration,
  ) -> Self {
    let fetch_api = api.clone();
    let project = QueryObserver::new(cache, keys::project(id), move || {
      let api = fetch_api.clone();
      async move { api.get_project(id).await }
    })
    .poll_while(poll, |project: &Project| project.transcription.is_none());

    Self {
      id,
      api,
      cache: cache.clone(),
      notifier,
      debounce,
      project,
    }
  }

  /// Fetch the project. When the server is unreachable but a copy is cached,
  /// the copy is served and the user told how old it is.
  pub async fn load(&self) -> Result<Project> {
    let result = self.project.fetch().await?;
    if result.source == CacheSource::Offline {
      let age = result
        .cached_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "an earlier fetch".to_string());
      self
        .notifier
        .info(format!("Server unreachable, showing project {} from {}", self.id, age));
    }
    Ok(result.data)
  }

  pub fn project(&self) -> Option<Project> {
    self.project.data()
  }

  /// Resolve once the cached project has a transcription.
  pub async fn wait_for_transcription(&self) -> Result<Project> {
    let mut events = self.cache.subscribe();
    loop {
      if let Some(project) = self.project.data() {
        if project.transcription.is_some() {
          return Ok(project);
        }
      }
      // Sleep until this project's entry changes
      loop {
        match events.recv().await {
          Ok(event) if event.key() == self.project.key() => break,
          Ok(_) => {}
          Err(RecvError::Lagged(_)) => break,
          Err(RecvError::Closed) => {
            return Err(eyre!("Cache closed while waiting for transcription"));
          }
        }
      }
    }
  }

  /// Autosaving editor for the summary, seeded with the cached summary.
  ///
  /// Each save writes the server's copy of the project back into the cache.
  pub fn summary_editor(&self, prompt_type: &str) -> Autosave<String> {
    let initial = self.project().map(|p| p.summary).unwrap_or_default();
    let id = self.id;
    let api = self.api.clone();
    let cache = self.cache.clone();
    let prompt_type = prompt_type.to_string();

    Autosave::new(
      "summary",
      initial,
      self.debounce,
      self.notifier.clone(),
      move |summary: String| {
        let api = api.clone();
        let cache = cache.clone();
        let update = SummaryUpdate {
          summary,
          prompt_type: prompt_type.clone(),
        };
        async move {
          let project = api.update_summary(id, update).await?;
          let value = serde_json::to_value(&project)
            .map_err(|e| eyre!("Failed to encode project {}: {}", id, e))?;
          cache.set(&keys::project(id), |_| value);
          Ok(())
        }
      },
    )
  }

  /// Delete the project through `deleter`. Consumes the hook: polling stops
  /// before the request goes out.
  ///
  /// Returns whether the project was deleted; failures become a notice.
  pub async fn delete<F, Fut>(self, deleter: F) -> bool
  where
    F: FnOnce(i64) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    let Self {
      id,
      cache,
      notifier,
      project,
      ..
    } = self;
    drop(project);

    match deleter(id).await {
      Ok(()) => {
        debug!(id, "Project deleted");
        cache.remove(&keys::project(id));
        cache.invalidate_matching(&keys::projects());
        notifier.info(format!("Project {} deleted", id));
        true
      }
      Err(e) => {
        notifier.error(format!("Deleting project {} failed: {}", id, e));
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::fake::FakeApi;
  use crate::autosave::AutosavePhase;
  use crate::event::{self, NoticeLevel, NoticeReceiver};

  const POLL: Duration = Duration::from_secs(5);
  const DEBOUNCE: Duration = Duration::from_millis(1000);

  fn project(id: i64, transcription: Option<&str>) -> Project {
    Project {
      id,
      title: "Standup".to_string(),
      created_at: "2024-05-01T10:00:00Z".parse().unwrap(),
      recording_url: Some("/recordings/standup.webm".to_string()),
      summary: "<p>Old summary</p>".to_string(),
      transcription: transcription.map(str::to_string),
    }
  }

  fn setup(api: FakeApi) -> (ProjectDetails<FakeApi>, QueryCache, NoticeReceiver) {
    let (notifier, notices) = event::channel();
    let cache = QueryCache::new();
    let details = ProjectDetails::new(api, &cache, notifier, 1, POLL, DEBOUNCE);
    (details, cache, notices)
  }

  #[tokio::test]
  async fn test_load_caches_project() {
    let api = FakeApi::default().with_project(project(1, Some("hello")));
    let (details, cache, _notices) = setup(api.clone());

    let loaded = details.load().await.unwrap();
    assert_eq!(loaded.title, "Standup");
    assert_eq!(cache.get_as::<Project>(&keys::project(1)), Some(loaded));

    // Fresh: served from cache
    details.load().await.unwrap();
    assert_eq!(api.reads(), 1);
  }

  #[tokio::test]
  async fn test_load_serves_stale_copy_when_offline() {
    let api = FakeApi::default().with_project(project(1, Some("hello")));
    let (details, cache, mut notices) = setup(api.clone());
    details.load().await.unwrap();

    api.fail_reads("Failed to reach server: connection refused");
    cache.invalidate(&keys::project(1));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let loaded = details.load().await.unwrap();
    assert_eq!(loaded.title, "Standup");
    let notices = notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Info);
    assert!(notices[0].message.starts_with("Server unreachable"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_polls_until_transcription_arrives() {
    let api = FakeApi::default().with_project(project(1, None));
    let (details, _cache, _notices) = setup(api.clone());
    details.load().await.unwrap();

    let transcriber = api.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_secs(7)).await;
      transcriber.set_transcription(1, "hello world");
    });

    let ready = tokio::time::timeout(Duration::from_secs(30), details.wait_for_transcription())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(ready.transcription.as_deref(), Some("hello world"));

    // Load, then polls at 5s and 10s; nothing after the transcription landed
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.reads(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_summary_editor_saves_last_edit_and_updates_cache() {
    let api = FakeApi::default().with_project(project(1, Some("t")));
    let (details, cache, mut notices) = setup(api.clone());
    details.load().await.unwrap();

    let editor = details.summary_editor("meeting");
    assert_eq!(editor.value(), "<p>Old summary</p>");
    editor.on_change("<p>N</p>".to_string());
    tokio::time::sleep(Duration::from_millis(300)).await;
    editor.on_change("<p>New</p>".to_string());
    assert_eq!(editor.phase(), AutosavePhase::Pending);

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(api.writes(), vec!["update_summary 1 <p>New</p>".to_string()]);
    let cached: Project = cache.get_as(&keys::project(1)).unwrap();
    assert_eq!(cached.summary, "<p>New</p>");
    assert!(notices.drain().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_summary_edit_during_held_save_lands_last() {
    let api = FakeApi::default().with_project(project(1, Some("t")));
    let (details, cache, mut notices) = setup(api.clone());
    details.load().await.unwrap();
    let release = api.hold_next_write();

    let editor = details.summary_editor("meeting");
    editor.on_change("A".to_string());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    editor.on_change("AB".to_string());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(api.writes(), vec!["update_summary 1 A".to_string()]);

    let _ = release.send(());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
      api.writes(),
      vec![
        "update_summary 1 A".to_string(),
        "update_summary 1 AB".to_string()
      ]
    );
    assert_eq!(editor.phase(), AutosavePhase::Idle);
    let server = api.get_project(1).await.unwrap();
    assert_eq!(server.summary, editor.value());
    let cached: Project = cache.get_as(&keys::project(1)).unwrap();
    assert_eq!(cached.summary, "AB");
    assert!(notices.drain().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_summary_save_failure_keeps_edit() {
    let api = FakeApi::default().with_project(project(1, Some("t")));
    let (details, cache, mut notices) = setup(api.clone());
    details.load().await.unwrap();
    api.fail_writes("Summary too long");

    let editor = details.summary_editor("meeting");
    editor.on_change("<p>Draft</p>".to_string());
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(editor.value(), "<p>Draft</p>");
    let cached: Project = cache.get_as(&keys::project(1)).unwrap();
    assert_eq!(cached.summary, "<p>Old summary</p>");
    let notices = notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Saving summary failed: Summary too long");
  }

  #[tokio::test]
  async fn test_delete_evicts_project() {
    let api = FakeApi::default().with_project(project(1, Some("t")));
    let (details, cache, mut notices) = setup(api);
    details.load().await.unwrap();

    let deleted = details.delete(|_| async { Ok(()) }).await;
    assert!(deleted);
    assert_eq!(cache.get(&keys::project(1)), None);
    let notices = notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Info);
  }

  #[tokio::test]
  async fn test_delete_failure_keeps_project() {
    let api = FakeApi::default().with_project(project(1, Some("t")));
    let (details, cache, mut notices) = setup(api);
    details.load().await.unwrap();

    let deleted = details
      .delete(|id| async move { Err(eyre!("Project {} is locked", id)) })
      .await;
    assert!(!deleted);
    assert!(cache.get(&keys::project(1)).is_some());
    let notices = notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].message, "Deleting project 1 failed: Project 1 is locked");
  }
}
