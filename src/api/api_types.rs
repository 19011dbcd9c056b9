//! Serde types matching the backend's JSON bodies.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{KanbanColumn, Project, Settings, Todo, TodoProject};

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProject {
  pub id: i64,
  #[serde(default)]
  pub title: String,
  pub created_at: DateTime<Utc>,
  pub recording_url: Option<String>,
  pub summary: Option<String>,
  pub transcription: Option<String>,
}

impl From<ApiProject> for Project {
  fn from(api: ApiProject) -> Self {
    Project {
      id: api.id,
      title: api.title,
      created_at: api.created_at,
      recording_url: api.recording_url,
      summary: api.summary.unwrap_or_default(),
      transcription: api.transcription.filter(|t| !t.is_empty()),
    }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryUpdate {
  pub summary: String,
  pub prompt_type: String,
}

// ============================================================================
// Todos and kanban columns
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTodoProject {
  #[serde(default)]
  pub title: String,
  pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTodo {
  pub id: i64,
  #[serde(default)]
  pub text: String,
  pub project_id: Option<i64>,
  pub column_id: Option<i64>,
  #[serde(default)]
  pub completed: bool,
  pub order: Option<f64>,
  pub project: Option<ApiTodoProject>,
}

impl ApiTodo {
  /// Convert to the domain type, filling a missing order from the id.
  pub fn normalize(self) -> Todo {
    Todo {
      id: self.id,
      text: self.text,
      project_id: self.project_id,
      column_id: self.column_id,
      completed: self.completed,
      order: self.order.unwrap_or(self.id as f64),
      project: self.project.map(|p| TodoProject {
        title: p.title,
        created_at: p.created_at,
      }),
    }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoUpdate {
  pub column_id: Option<i64>,
  pub completed: bool,
  pub order: f64,
}

#[derive(Debug, Deserialize)]
pub struct ApiColumn {
  pub id: i64,
  #[serde(default, alias = "name")]
  pub title: String,
}

impl From<ApiColumn> for KanbanColumn {
  fn from(api: ApiColumn) -> Self {
    KanbanColumn {
      id: api.id,
      title: api.title,
    }
  }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
  pub openai_api_key: Option<String>,
  #[serde(default)]
  pub prompts: Option<BTreeMap<String, String>>,
}

impl From<ApiSettings> for Settings {
  fn from(api: ApiSettings) -> Self {
    Settings {
      openai_api_key: api.openai_api_key.filter(|k| !k.is_empty()),
      prompts: api.prompts.unwrap_or_default(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub openai_api_key: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub prompts: Option<BTreeMap<String, String>>,
}

impl SettingsUpdate {
  pub fn is_empty(&self) -> bool {
    self.openai_api_key.is_none() && self.prompts.is_none()
  }

  /// Apply to cached settings the way the server will.
  pub fn apply_to(&self, settings: &mut Settings) {
    if let Some(key) = &self.openai_api_key {
      settings.openai_api_key = Some(key.clone());
    }
    if let Some(prompts) = &self.prompts {
      settings
        .prompts
        .extend(prompts.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
  }
}

/// `{ok: true}` or `{ok: false, message}`
#[derive(Debug, Deserialize)]
pub struct ApiSettingsResponse {
  pub ok: bool,
  pub message: Option<String>,
}

impl ApiSettingsResponse {
  /// The rejection message, if the server refused the update.
  pub fn rejection(self) -> Option<String> {
    if self.ok {
      None
    } else {
      Some(
        self
          .message
          .unwrap_or_else(|| "Settings update was rejected".to_string()),
      )
    }
  }

  /// A rejection becomes an error carrying the server's message.
  pub fn into_result(self) -> Result<()> {
    match self.rejection() {
      Some(message) => Err(eyre!("{}", message)),
      None => Ok(()),
    }
  }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  message: Option<String>,
  error: Option<String>,
}

/// Best-effort extraction of a human-readable message from an error body.
pub fn error_message(body: &str) -> Option<String> {
  let parsed: ApiErrorBody = serde_json::from_str(body).ok()?;
  parsed
    .message
    .or(parsed.error)
    .filter(|message| !message.trim().is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::sort_todos;
  use serde_json::json;

  #[test]
  fn test_todo_order_falls_back_to_id() {
    let todos: Vec<ApiTodo> = serde_json::from_value(json!([
      {"id": 10, "columnId": 1, "order": 3},
      {"id": 20, "columnId": 1, "order": 1},
      {"id": 30, "columnId": 1, "order": null},
    ]))
    .unwrap();
    let mut todos: Vec<Todo> = todos.into_iter().map(ApiTodo::normalize).collect();
    sort_todos(&mut todos);

    let ordered: Vec<(i64, f64)> = todos.iter().map(|t| (t.id, t.order)).collect();
    assert_eq!(ordered, vec![(20, 1.0), (10, 3.0), (30, 30.0)]);
  }

  #[test]
  fn test_todo_embeds_project() {
    let todo: ApiTodo = serde_json::from_value(json!({
      "id": 1,
      "text": "Send notes",
      "projectId": 4,
      "completed": true,
      "project": {"title": "Standup", "createdAt": "2024-03-01T10:00:00Z"}
    }))
    .unwrap();
    let todo = todo.normalize();
    assert!(todo.completed);
    assert_eq!(todo.column_id, None);
    assert_eq!(todo.project.unwrap().title, "Standup");
  }

  #[test]
  fn test_project_defaults() {
    let project: ApiProject = serde_json::from_value(json!({
      "id": 7,
      "title": "Interview",
      "createdAt": "2024-03-01T10:00:00Z",
      "transcription": ""
    }))
    .unwrap();
    let project = Project::from(project);
    assert_eq!(project.summary, "");
    assert_eq!(project.transcription, None);
  }

  #[test]
  fn test_todo_update_body() {
    let body = serde_json::to_value(TodoUpdate {
      column_id: Some(2),
      completed: false,
      order: 1.5,
    })
    .unwrap();
    assert_eq!(body, json!({"columnId": 2, "completed": false, "order": 1.5}));
  }

  #[test]
  fn test_summary_update_body() {
    let body = serde_json::to_value(SummaryUpdate {
      summary: "<p>hi</p>".to_string(),
      prompt_type: "meeting".to_string(),
    })
    .unwrap();
    assert_eq!(body, json!({"summary": "<p>hi</p>", "promptType": "meeting"}));
  }

  #[test]
  fn test_settings_update_skips_absent_fields() {
    let body = serde_json::to_value(SettingsUpdate {
      openai_api_key: Some("sk-1".to_string()),
      prompts: None,
    })
    .unwrap();
    assert_eq!(body, json!({"openaiApiKey": "sk-1"}));
  }

  #[test]
  fn test_settings_update_merges_prompts() {
    let mut settings = Settings::default();
    settings
      .prompts
      .insert("meeting".to_string(), "old".to_string());
    let update = SettingsUpdate {
      openai_api_key: None,
      prompts: Some(BTreeMap::from([
        ("meeting".to_string(), "new".to_string()),
        ("lecture".to_string(), "notes".to_string()),
      ])),
    };
    update.apply_to(&mut settings);
    assert_eq!(settings.prompts["meeting"], "new");
    assert_eq!(settings.prompts["lecture"], "notes");
    assert_eq!(settings.openai_api_key, None);
  }

  #[test]
  fn test_settings_response_rejection() {
    let ok: ApiSettingsResponse = serde_json::from_value(json!({"ok": true})).unwrap();
    assert_eq!(ok.rejection(), None);

    let rejected: ApiSettingsResponse =
      serde_json::from_value(json!({"ok": false, "message": "invalid key"})).unwrap();
    assert_eq!(rejected.rejection().as_deref(), Some("invalid key"));

    let bare: ApiSettingsResponse = serde_json::from_value(json!({"ok": false})).unwrap();
    assert_eq!(
      bare.rejection().as_deref(),
      Some("Settings update was rejected")
    );
  }

  #[test]
  fn test_error_message_extraction() {
    assert_eq!(
      error_message(r#"{"message": "Todo not found"}"#).as_deref(),
      Some("Todo not found")
    );
    assert_eq!(
      error_message(r#"{"error": "Unauthorized"}"#).as_deref(),
      Some("Unauthorized")
    );
    assert_eq!(error_message(r#"{"message": "  "}"#), None);
    assert_eq!(error_message("<html>Bad Gateway</html>"), None);
  }
}
