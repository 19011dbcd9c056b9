use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub autosave: AutosaveConfig,
  #[serde(default)]
  pub project: ProjectConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the backend, e.g. "http://localhost:3000"
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds after which a cached resource is refetched on next read
  #[serde(default = "default_stale_secs")]
  pub stale_secs: i64,
}

fn default_stale_secs() -> i64 {
  300
}

impl CacheConfig {
  pub fn stale_time(&self) -> Result<chrono::Duration> {
    if self.stale_secs < 0 {
      return Err(eyre!("cache.stale_secs must not be negative, got {}", self.stale_secs));
    }
    chrono::Duration::try_seconds(self.stale_secs)
      .ok_or_else(|| eyre!("cache.stale_secs is too large: {}", self.stale_secs))
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutosaveConfig {
  /// Quiet period before an edit is saved
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
  1000
}

impl Default for AutosaveConfig {
  fn default() -> Self {
    Self {
      debounce_ms: default_debounce_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
  /// Poll interval while a project's transcription is pending
  #[serde(default = "default_poll_secs")]
  pub poll_secs: u64,
}

fn default_poll_secs() -> u64 {
  5
}

impl Default for ProjectConfig {
  fn default() -> Self {
    Self {
      poll_secs: default_poll_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Write daily log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./recnotes.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/recnotes/config.yaml
  /// 4. ~/.config/recnotes/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/recnotes/config.yaml\n\
                 with at least:\n\n  api:\n    url: http://localhost:3000"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("recnotes.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("recnotes").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    Ok(config)
  }

  /// Reject values the cache and poller cannot run with.
  fn validate(&self) -> Result<()> {
    if self.project.poll_secs == 0 {
      return Err(eyre!("project.poll_secs must be at least 1"));
    }
    self.cache.stale_time()?;
    Ok(())
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API bearer token from the environment, if set.
  ///
  /// Checks RECNOTES_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("RECNOTES_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}
