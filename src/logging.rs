//! Channel-based logging, mirroring the host's `LogMessage` / error-logger
//! split so this crate never needs its own log backend.

use async_channel::Sender;

#[derive(Clone, Debug)]
pub struct LogMessage {
  pub connection_id: Option<u64>,
  pub message: String,
  pub is_warning: bool,
}

impl LogMessage {
  pub fn new(connection_id: Option<u64>, message: impl Into<String>, is_warning: bool) -> Self {
    Self {
      connection_id,
      message: message.into(),
      is_warning,
    }
  }
}

/// Connection-scoped logger bound to a process-wide log channel. Cloned
/// cheaply per connection; the `connection_id` is stamped onto every
/// message so a host can correlate log lines with a connection.
#[derive(Clone)]
pub struct ErrorLogger {
  connection_id: Option<u64>,
  sender: Sender<LogMessage>,
}

impl ErrorLogger {
  pub fn new(connection_id: Option<u64>, sender: Sender<LogMessage>) -> Self {
    Self {
      connection_id,
      sender,
    }
  }

  pub fn for_connection(&self, connection_id: u64) -> Self {
    Self {
      connection_id: Some(connection_id),
      sender: self.sender.clone(),
    }
  }

  pub async fn log(&self, message: &str) {
    let _ = self
      .sender
      .send(LogMessage::new(self.connection_id, message, false))
      .await;
  }

  pub async fn warn(&self, message: &str) {
    let _ = self
      .sender
      .send(LogMessage::new(self.connection_id, message, true))
      .await;
  }

  /// Used from non-async contexts, notably `ResolvesServerCert::resolve`,
  /// which rustls calls synchronously.
  pub fn log_sync(&self, message: &str) {
    let _ = self
      .sender
      .send_blocking(LogMessage::new(self.connection_id, message, false));
  }

  pub fn warn_sync(&self, message: &str) {
    let _ = self
      .sender
      .send_blocking(LogMessage::new(self.connection_id, message, true));
  }
}
