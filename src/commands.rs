//! Command-line commands

use clap::Subcommand;
use std::collections::BTreeMap;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Show a project's details
  #[command(visible_alias = "p")]
  Project {
    id: i64,

    /// Wait until the transcription is available
    #[arg(short, long)]
    wait: bool,
  },

  /// Replace a project's summary
  Summary {
    id: i64,

    /// Prompt the summary was generated with
    #[arg(long, default_value = "default")]
    prompt_type: String,

    /// New summary (rich text)
    text: String,
  },

  /// Show the kanban board
  #[command(visible_alias = "b")]
  Board,

  /// Move a todo to a column
  #[command(visible_alias = "mv")]
  Move {
    todo: i64,
    column: i64,

    /// Position within the column (default: end)
    #[arg(short, long)]
    index: Option<usize>,
  },

  /// Toggle a todo's completed flag
  Toggle { todo: i64 },

  /// Show or change user settings
  #[command(subcommand)]
  Settings(SettingsCommand),

  /// Delete a project
  #[command(visible_alias = "rm")]
  Delete { id: i64 },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SettingsCommand {
  /// Print the current settings (API key masked)
  Show,
  /// Update the API key and/or prompt templates
  Set {
    #[arg(long)]
    api_key: Option<String>,

    /// Prompt template, as NAME=TEMPLATE (repeatable)
    #[arg(long = "prompt", value_parser = parse_prompt)]
    prompts: Vec<(String, String)>,
  },
}

impl SettingsCommand {
  /// Collect repeated `--prompt` flags, later ones winning.
  pub fn prompts(prompts: &[(String, String)]) -> Option<BTreeMap<String, String>> {
    if prompts.is_empty() {
      return None;
    }
    Some(prompts.iter().cloned().collect())
  }
}

fn parse_prompt(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((name, template)) if !name.trim().is_empty() => {
      Ok((name.trim().to_string(), template.to_string()))
    }
    _ => Err(format!("expected NAME=TEMPLATE, got '{}'", raw)),
  }
}
