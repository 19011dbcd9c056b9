//! In-memory `RemoteApi` for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::api_types::{ApiSettingsResponse, SettingsUpdate, SummaryUpdate, TodoUpdate};
use super::types::{sort_todos, KanbanColumn, Project, Settings, Todo};
use super::RemoteApi;

#[derive(Default)]
struct FakeState {
  projects: HashMap<i64, Project>,
  todos: Vec<Todo>,
  columns: Vec<KanbanColumn>,
  settings: Settings,
  /// Every read fails with this message while set
  fail_reads: Option<String>,
  /// Every write fails with this message while set
  fail_writes: Option<String>,
  /// Raw body the server answers settings updates with
  settings_reply: Option<String>,
  /// The next write waits for this to fire (or be dropped)
  gate: Option<oneshot::Receiver<()>>,
  writes: Vec<String>,
  reads: usize,
}

#[derive(Clone, Default)]
pub struct FakeApi {
  state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
  fn lock(&self) -> MutexGuard<'_, FakeState> {
    self.state.lock().unwrap()
  }

  pub fn with_project(self, project: Project) -> Self {
    self.lock().projects.insert(project.id, project);
    self
  }

  pub fn with_todos(self, todos: Vec<Todo>) -> Self {
    self.lock().todos = todos;
    self
  }

  pub fn with_columns(self, columns: Vec<KanbanColumn>) -> Self {
    self.lock().columns = columns;
    self
  }

  pub fn with_settings(self, settings: Settings) -> Self {
    self.lock().settings = settings;
    self
  }

  pub fn fail_reads(&self, message: &str) {
    self.lock().fail_reads = Some(message.to_string());
  }

  pub fn fail_writes(&self, message: &str) {
    self.lock().fail_writes = Some(message.to_string());
  }

  /// Answer settings updates with `body`, e.g. `{"ok":false,"message":"..."}`.
  pub fn reply_to_settings(&self, body: &str) {
    self.lock().settings_reply = Some(body.to_string());
  }

  /// Hold the next write until the returned sender fires.
  pub fn hold_next_write(&self) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel();
    self.lock().gate = Some(rx);
    tx
  }

  /// Writes issued so far, e.g. `"update_todo 5"`.
  pub fn writes(&self) -> Vec<String> {
    self.lock().writes.clone()
  }

  pub fn reads(&self) -> usize {
    self.lock().reads
  }

  pub fn set_transcription(&self, id: i64, text: &str) {
    if let Some(project) = self.lock().projects.get_mut(&id) {
      project.transcription = Some(text.to_string());
    }
  }

  fn read<T>(&self, f: impl FnOnce(&FakeState) -> Result<T>) -> Result<T> {
    let mut state = self.lock();
    state.reads += 1;
    if let Some(message) = state.fail_reads.clone() {
      return Err(eyre!("{}", message));
    }
    f(&state)
  }

  async fn write<T>(
    &self,
    call: String,
    apply: impl FnOnce(&mut FakeState) -> Result<T> + Send,
  ) -> Result<T> {
    let gate = {
      let mut state = self.lock();
      state.writes.push(call);
      state.gate.take()
    };
    if let Some(gate) = gate {
      let _ = gate.await;
    }

    let mut state = self.lock();
    if let Some(message) = state.fail_writes.clone() {
      return Err(eyre!("{}", message));
    }
    apply(&mut state)
  }
}

impl RemoteApi for FakeApi {
  async fn get_project(&self, id: i64) -> Result<Project> {
    self.read(|state| {
      state
        .projects
        .get(&id)
        .cloned()
        .ok_or_else(|| eyre!("Project not found"))
    })
  }

  async fn update_summary(&self, id: i64, update: SummaryUpdate) -> Result<Project> {
    self
      .write(format!("update_summary {} {}", id, update.summary), move |state| {
        let project = state
          .projects
          .get_mut(&id)
          .ok_or_else(|| eyre!("Project not found"))?;
        project.summary = update.summary;
        Ok(project.clone())
      })
      .await
  }

  async fn list_columns(&self) -> Result<Vec<KanbanColumn>> {
    self.read(|state| Ok(state.columns.clone()))
  }

  async fn list_todos(&self) -> Result<Vec<Todo>> {
    self.read(|state| {
      let mut todos = state.todos.clone();
      sort_todos(&mut todos);
      Ok(todos)
    })
  }

  async fn update_todo(&self, id: i64, update: TodoUpdate) -> Result<Todo> {
    self
      .write(format!("update_todo {}", id), move |state| {
        let todo = state
          .todos
          .iter_mut()
          .find(|t| t.id == id)
          .ok_or_else(|| eyre!("Todo not found"))?;
        todo.column_id = update.column_id;
        todo.completed = update.completed;
        todo.order = update.order;
        Ok(todo.clone())
      })
      .await
  }

  async fn get_settings(&self) -> Result<Settings> {
    self.read(|state| Ok(state.settings.clone()))
  }

  async fn update_settings(&self, update: SettingsUpdate) -> Result<()> {
    self
      .write("update_settings".to_string(), move |state| {
        if let Some(body) = &state.settings_reply {
          let response: ApiSettingsResponse = serde_json::from_str(body)
            .map_err(|e| eyre!("Failed to parse settings response: {}", e))?;
          response.into_result()?;
        }
        update.apply_to(&mut state.settings);
        Ok(())
      })
      .await
  }
}
