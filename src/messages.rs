//! Message protocol between pages and the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Commands a page can post to the worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PageCommand {
  CheckForUpdates,
  CacheUserData {
    #[serde(default)]
    data: Value,
  },
  ClearCache,
  SkipWaiting,
}

impl PageCommand {
  /// Parse a posted message. Anything without a recognised `command` is
  /// ignored rather than treated as an error.
  pub fn parse(message: &Value) -> Option<Self> {
    message.get("command")?;
    match serde_json::from_value(message.clone()) {
      Ok(command) => Some(command),
      Err(e) => {
        warn!("Ignoring unrecognised page message {}: {}", message, e);
        None
      }
    }
  }
}

/// Messages the worker posts to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  UpdateAvailable { version: String },
}
