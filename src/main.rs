mod api;
mod app;
mod autosave;
mod cache;
mod commands;
mod config;
mod event;
mod logging;
mod mutation;
mod query;
mod state;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "recnotes")]
#[command(about = "Command-line client for recorded sessions, summaries and task boards")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/recnotes/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend base URL, overriding the configured one
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override API url if specified on command line
  if let Some(url) = args.api_url {
    config.api.url = url;
  }

  let log_guard = logging::init(&config.log)?;

  let app = app::App::new(config)?;
  let had_errors = app.run(args.command).await?;

  // Flush file logs before exiting
  drop(log_guard);
  if had_errors {
    std::process::exit(1);
  }

  Ok(())
}
