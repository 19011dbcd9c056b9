use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

const LOG_FILE: &str = "recnotes.log";

/// Install the global subscriber.
///
/// Logs go to a daily rolling file under `log.directory` when configured,
/// otherwise to stderr. The returned guard flushes the file writer and must be
/// held until exit.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  match &config.directory {
    Some(directory) => {
      std::fs::create_dir_all(directory).map_err(|e| {
        eyre!(
          "Failed to create log directory {}: {}",
          directory.display(),
          e
        )
      })?;
      let appender = tracing_appender::rolling::daily(directory, LOG_FILE);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(filter("info"))
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter("warn"))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}

/// `RECNOTES_LOG`, then `RUST_LOG`, then `default`.
fn filter(default: &str) -> EnvFilter {
  ["RECNOTES_LOG", "RUST_LOG"]
    .iter()
    .find_map(|var| {
      std::env::var(var)
        .ok()
        .filter(|directives| !directives.is_empty())
    })
    .and_then(|directives| EnvFilter::try_new(directives).ok())
    .unwrap_or_else(|| EnvFilter::new(default))
}
