use tokio::sync::mpsc;
use tracing::{info, warn};

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Error,
}

/// A non-blocking message for the user (the status line of the client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
}

/// Create a connected notifier/receiver pair
pub fn channel() -> (Notifier, NoticeReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (Notifier { tx }, NoticeReceiver { rx })
}

/// Sending half, cloned into every component that can fail on the user's behalf
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: mpsc::UnboundedSender<Notice>,
}

impl Notifier {
  pub fn info(&self, message: impl Into<String>) {
    let message = message.into();
    info!(%message, "Notice");
    self.send(NoticeLevel::Info, message);
  }

  pub fn error(&self, message: impl Into<String>) {
    let message = message.into();
    warn!(%message, "Error notice");
    self.send(NoticeLevel::Error, message);
  }

  fn send(&self, level: NoticeLevel, message: String) {
    // Receiver may be gone during shutdown
    let _ = self.tx.send(Notice { level, message });
  }
}

/// Receiving half, owned by whatever displays notices
pub struct NoticeReceiver {
  rx: mpsc::UnboundedReceiver<Notice>,
}

impl NoticeReceiver {
  /// Receive the next notice
  #[cfg(test)]
  pub async fn next(&mut self) -> Option<Notice> {
    self.rx.recv().await
  }

  /// Take every notice received so far without waiting
  pub fn drain(&mut self) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = self.rx.try_recv() {
      notices.push(notice);
    }
    notices
  }
}
