use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::{debug, info};

use crate::api::api_types::SettingsUpdate;
use crate::api::client::ApiClient;
use crate::api::types::{Project, Settings};
use crate::cache::QueryCache;
use crate::commands::{Command, SettingsCommand};
use crate::config::Config;
use crate::event::{self, NoticeLevel, NoticeReceiver, Notifier};
use crate::mutation::{MutationCoordinator, MutationState};
use crate::state::{BoardColumn, ProjectDetails, SettingsStore, TodoBoard};

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Backend client
  api: ApiClient,

  /// Shared by every hook for the lifetime of the process
  cache: QueryCache,

  notifier: Notifier,
  notices: NoticeReceiver,
  mutations: MutationCoordinator,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let api = ApiClient::new(&config)?;
    let cache = QueryCache::new().with_stale_time(config.cache.stale_time()?);
    let (notifier, notices) = event::channel();
    let mutations = MutationCoordinator::new(cache.clone(), notifier.clone());

    Ok(Self {
      config,
      api,
      cache,
      notifier,
      notices,
      mutations,
    })
  }

  /// Run one command, then print the notices it raised.
  ///
  /// Returns whether any of them was an error.
  pub async fn run(mut self, command: Command) -> Result<bool> {
    info!(?command, "Running command");
    let result = match command {
      Command::Project { id, wait } => self.show_project(id, wait).await,
      Command::Summary {
        id,
        prompt_type,
        text,
      } => self.edit_summary(id, &prompt_type, text).await,
      Command::Board => self.show_board().await,
      Command::Move {
        todo,
        column,
        index,
      } => self.move_todo(todo, column, index).await,
      Command::Toggle { todo } => self.toggle_todo(todo).await,
      Command::Settings(SettingsCommand::Show) => self.show_settings().await,
      Command::Settings(SettingsCommand::Set { api_key, prompts }) => {
        let update = SettingsUpdate {
          openai_api_key: api_key,
          prompts: SettingsCommand::prompts(&prompts),
        };
        self.update_settings(update).await
      }
      Command::Delete { id } => self.delete_project(id).await,
    };

    let had_errors = self.print_notices();
    result?;
    Ok(had_errors)
  }

  fn project_details(&self, id: i64) -> ProjectDetails<ApiClient> {
    ProjectDetails::new(
      self.api.clone(),
      &self.cache,
      self.notifier.clone(),
      id,
      Duration::from_secs(self.config.project.poll_secs),
      Duration::from_millis(self.config.autosave.debounce_ms),
    )
  }

  fn todo_board(&self) -> TodoBoard<ApiClient> {
    TodoBoard::new(
      self.api.clone(),
      self.mutations.clone(),
      self.notifier.clone(),
    )
  }

  async fn show_project(&self, id: i64, wait: bool) -> Result<()> {
    let details = self.project_details(id);
    let mut project = details.load().await?;
    if wait && project.transcription.is_none() {
      eprintln!("Waiting for transcription...");
      project = details.wait_for_transcription().await?;
    }
    print_project(&project);
    Ok(())
  }

  async fn edit_summary(&self, id: i64, prompt_type: &str, text: String) -> Result<()> {
    let details = self.project_details(id);
    details.load().await?;

    let editor = details.summary_editor(prompt_type);
    editor.on_change(text);
    debug!(id, saving = editor.is_saving(), "Summary edited");

    // Nothing more will be typed; skip the quiet window
    editor.flush().await;
    if editor.last_error().is_none() {
      self.notifier.info(format!("Summary of project {} saved", id));
    }
    editor.teardown();
    Ok(())
  }

  async fn show_board(&self) -> Result<()> {
    let board = self.todo_board().load().await?;
    print_board(&board);
    Ok(())
  }

  async fn move_todo(&self, todo: i64, column: i64, index: Option<usize>) -> Result<()> {
    let board = self.todo_board();
    board.load().await?;
    if board.move_todo(todo, column, index).await == MutationState::Committed {
      self
        .notifier
        .info(format!("Moved todo {} to column {}", todo, column));
    }
    print_board(&board.board());
    Ok(())
  }

  async fn toggle_todo(&self, todo: i64) -> Result<()> {
    let board = self.todo_board();
    board.load().await?;
    if board.toggle_completed(todo).await == MutationState::Committed {
      self.notifier.info(format!("Toggled todo {}", todo));
    }
    print_board(&board.board());
    Ok(())
  }

  async fn show_settings(&self) -> Result<()> {
    let settings = SettingsStore::new(self.api.clone(), self.mutations.clone())
      .load()
      .await?;
    print_settings(&settings);
    Ok(())
  }

  async fn update_settings(&self, update: SettingsUpdate) -> Result<()> {
    if update.is_empty() {
      return Err(eyre!("Nothing to update: pass --api-key or --prompt"));
    }

    let store = SettingsStore::new(self.api.clone(), self.mutations.clone());
    store.load().await?;
    if store.update(update).await == MutationState::Committed {
      self.notifier.info("Settings saved");
    }
    if let Some(settings) = store.settings() {
      print_settings(&settings);
    }
    Ok(())
  }

  async fn delete_project(&self, id: i64) -> Result<()> {
    let api = self.api.clone();
    self
      .project_details(id)
      .delete(move |id| async move { api.delete_project(id).await })
      .await;
    Ok(())
  }

  fn print_notices(&mut self) -> bool {
    let mut had_errors = false;
    for notice in self.notices.drain() {
      match notice.level {
        NoticeLevel::Info => eprintln!("{}", notice.message),
        NoticeLevel::Error => {
          had_errors = true;
          eprintln!("error: {}", notice.message);
        }
      }
    }
    had_errors
  }
}

fn print_project(project: &Project) {
  println!("#{} {}", project.id, project.title);
  println!("Created:   {}", project.created_at.format("%Y-%m-%d %H:%M"));
  if let Some(recording) = &project.recording_url {
    println!("Recording: {}", recording);
  }
  println!();
  println!("Summary:");
  if project.summary.is_empty() {
    println!("  (not generated yet)");
  } else {
    println!("{}", project.summary);
  }
  println!();
  println!("Transcription:");
  match &project.transcription {
    Some(text) => println!("{}", text),
    None => println!("  (in progress)"),
  }
}

fn print_board(board: &[BoardColumn]) {
  if board.is_empty() {
    println!("No columns");
    return;
  }
  for column in board {
    println!("{} ({})", column.column.title, column.todos.len());
    for todo in &column.todos {
      let mark = if todo.completed { "x" } else { " " };
      let project = todo
        .project
        .as_ref()
        .map(|p| format!("  [{}]", p.title))
        .unwrap_or_default();
      println!("  [{}] #{} {}{}", mark, todo.id, todo.text, project);
    }
  }
}

fn print_settings(settings: &Settings) {
  println!(
    "OpenAI API key: {}",
    settings
      .masked_api_key()
      .unwrap_or_else(|| "(not set)".to_string())
  );
  if settings.prompts.is_empty() {
    println!("Prompts: (none)");
    return;
  }
  println!("Prompts:");
  for (name, template) in &settings.prompts {
    println!("  {}: {}", name, template);
  }
}
