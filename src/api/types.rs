use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A recorded session with its generated notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: i64,
  pub title: String,
  pub created_at: DateTime<Utc>,
  /// Where the recording can be played from
  pub recording_url: Option<String>,
  /// Rich text (HTML), empty until generated
  pub summary: String,
  /// Plain text, absent while transcription is still running
  pub transcription: Option<String>,
}

/// Parent project info embedded in todo listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoProject {
  pub title: String,
  pub created_at: Option<DateTime<Utc>>,
}

/// A task extracted from a project, placed on the kanban board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
  pub id: i64,
  pub text: String,
  pub project_id: Option<i64>,
  pub column_id: Option<i64>,
  pub completed: bool,
  /// Position within the column. Always set: falls back to the id.
  pub order: f64,
  pub project: Option<TodoProject>,
}

impl Todo {
  /// Column order: by `order`, ties broken by id.
  pub fn board_cmp(&self, other: &Todo) -> Ordering {
    self
      .order
      .total_cmp(&other.order)
      .then(self.id.cmp(&other.id))
  }
}

/// Sort todos into board order.
pub fn sort_todos(todos: &mut [Todo]) {
  todos.sort_by(Todo::board_cmp);
}

/// A kanban column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KanbanColumn {
  pub id: i64,
  pub title: String,
}

/// Per-user settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
  pub openai_api_key: Option<String>,
  /// Prompt templates by prompt type
  pub prompts: BTreeMap<String, String>,
}

impl Settings {
  /// Mask the API key for display, keeping the last four characters.
  pub fn masked_api_key(&self) -> Option<String> {
    self.openai_api_key.as_ref().map(|key| {
      let chars: Vec<char> = key.chars().collect();
      let visible = chars.len().min(4);
      let tail: String = chars[chars.len() - visible..].iter().collect();
      format!("{}{}", "*".repeat(chars.len() - visible), tail)
    })
  }
}
