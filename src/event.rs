use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::queue::{Calculation, ChatMessage};

/// Runtime events delivered to the worker, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default)]
    navigate: bool,
    #[serde(default)]
    destination: Option<String>,
  },
  /// A page posted a message
  Message { data: Value },
  /// The browser fired a background sync
  Sync { tag: String },
  /// A page asked for a sync once connectivity allows
  RegisterSync { tag: String },
  /// A page finished a calculation that should reach the server
  Calculation(Calculation),
  /// A page sent a chat message that should reach the server
  ChatMessage(ChatMessage),
  PeriodicSync { tag: String },
  /// Push payload, usually a JSON object
  Push {
    #[serde(default)]
    data: Option<Value>,
  },
  NotificationClick {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    tag: Option<String>,
  },
  Online,
  Offline,
  /// A page opened and connected a message port
  Connect { url: String },
  Disconnect { client: u64 },
}

impl Event {
  pub fn parse(line: &str) -> Option<Self> {
    match serde_json::from_str(line) {
      Ok(event) => Some(event),
      Err(e) => {
        warn!("Ignoring malformed event {:?}: {}", line, e);
        None
      }
    }
  }
}

/// Event handler that produces events from JSON lines on stdin
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn stdin reader
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            let line = line.trim();
            if line.is_empty() {
              continue;
            }
            if let Some(event) = Event::parse(line) {
              if tx.send(event).is_err() {
                break;
              }
            }
          }
          Ok(None) => {
            debug!("Event stream closed");
            break;
          }
          Err(e) => {
            warn!("Failed to read event: {}", e);
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event. None once input is exhausted.
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
