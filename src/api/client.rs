use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

use super::api_types::{
  error_message, ApiColumn, ApiProject, ApiSettings, ApiSettingsResponse, ApiTodo, SettingsUpdate,
  SummaryUpdate, TodoUpdate,
};
use super::types::{sort_todos, KanbanColumn, Project, Settings, Todo};
use super::RemoteApi;

const USER_AGENT: &str = concat!("recnotes/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the notes backend
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base_url(
      &config.api.url,
      Duration::from_secs(config.api.timeout_secs),
      Config::get_api_token(),
    )
  }

  pub fn with_base_url(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: parse_base_url(base_url)?,
      token,
    })
  }

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
    let request = self.http.request(method, self.url(path)?);
    Ok(match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    })
  }

  /// Send a request. Any non-2xx status is a failure carrying the body's
  /// message when it has one, else the status line.
  async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response> {
    debug!(action, "Request");
    let response = request.send().await.map_err(|e| {
      warn!(action, error = %e, "Request failed");
      eyre!("Failed to reach server: {}", e)
    })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      let message = error_message(&body).unwrap_or_else(|| status.to_string());
      warn!(action, %status, %message, "Request rejected");
      return Err(eyre!("{}", message));
    }

    Ok(response)
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, action: &str) -> Result<T> {
    self
      .send(request, action)
      .await?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response to {}: {}", action, e))
  }

  /// Delete a project. Not part of [`RemoteApi`]: callers hand it to the
  /// project hook as the delete action.
  pub async fn delete_project(&self, id: i64) -> Result<()> {
    let request = self.request(Method::DELETE, &format!("api/projects/{}", id))?;
    self.send(request, "delete project").await?;
    Ok(())
  }
}

impl RemoteApi for ApiClient {
  async fn get_project(&self, id: i64) -> Result<Project> {
    let request = self.request(Method::GET, &format!("api/projects/{}", id))?;
    let project: ApiProject = self.send_json(request, "get project").await?;
    Ok(project.into())
  }

  async fn update_summary(&self, id: i64, update: SummaryUpdate) -> Result<Project> {
    let request = self
      .request(Method::PUT, &format!("api/projects/{}/summary", id))?
      .json(&update);
    let project: ApiProject = self.send_json(request, "update summary").await?;
    Ok(project.into())
  }

  async fn list_columns(&self) -> Result<Vec<KanbanColumn>> {
    let request = self.request(Method::GET, "api/kanban/columns")?;
    let columns: Vec<ApiColumn> = self.send_json(request, "list columns").await?;
    Ok(columns.into_iter().map(KanbanColumn::from).collect())
  }

  async fn list_todos(&self) -> Result<Vec<Todo>> {
    let request = self.request(Method::GET, "api/todos")?;
    let todos: Vec<ApiTodo> = self.send_json(request, "list todos").await?;
    let mut todos: Vec<Todo> = todos.into_iter().map(ApiTodo::normalize).collect();
    sort_todos(&mut todos);
    Ok(todos)
  }

  async fn update_todo(&self, id: i64, update: TodoUpdate) -> Result<Todo> {
    let request = self
      .request(Method::PATCH, &format!("api/todos/{}", id))?
      .json(&update);
    let todo: ApiTodo = self.send_json(request, "update todo").await?;
    Ok(todo.normalize())
  }

  async fn get_settings(&self) -> Result<Settings> {
    let request = self.request(Method::GET, "api/settings")?;
    let settings: ApiSettings = self.send_json(request, "get settings").await?;
    Ok(settings.into())
  }

  async fn update_settings(&self, update: SettingsUpdate) -> Result<()> {
    let request = self.request(Method::POST, "api/settings")?.json(&update);
    let response: ApiSettingsResponse = self.send_json(request, "update settings").await?;
    response.into_result()
  }
}

/// Parse the configured base URL so that relative API paths append to it.
fn parse_base_url(raw: &str) -> Result<Url> {
  let mut url = Url::parse(raw).map_err(|e| eyre!("Invalid API url {}: {}", raw, e))?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}
