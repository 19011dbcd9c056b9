//! Backend REST API: wire types, domain types, resource keys and the client.

pub mod api_types;
pub mod client;
#[cfg(test)]
pub mod fake;
pub mod keys;
pub mod types;

use color_eyre::Result;
use std::future::Future;

use api_types::{SettingsUpdate, SummaryUpdate, TodoUpdate};
use types::{KanbanColumn, Project, Settings, Todo};

/// Remote operations the state hooks depend on.
///
/// Implemented by [`client::ApiClient`] over HTTP; tests substitute fakes.
pub trait RemoteApi: Clone + Send + Sync + 'static {
  fn get_project(&self, id: i64) -> impl Future<Output = Result<Project>> + Send;

  fn update_summary(
    &self,
    id: i64,
    update: SummaryUpdate,
  ) -> impl Future<Output = Result<Project>> + Send;

  fn list_columns(&self) -> impl Future<Output = Result<Vec<KanbanColumn>>> + Send;

  /// Todos in board order, with order normalized.
  fn list_todos(&self) -> impl Future<Output = Result<Vec<Todo>>> + Send;

  fn update_todo(&self, id: i64, update: TodoUpdate)
    -> impl Future<Output = Result<Todo>> + Send;

  fn get_settings(&self) -> impl Future<Output = Result<Settings>> + Send;

  /// Fails if the server answers `{ok: false}`.
  fn update_settings(&self, update: SettingsUpdate) -> impl Future<Output = Result<()>> + Send;
}
