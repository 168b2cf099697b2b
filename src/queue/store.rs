//! Durable store for actions taken while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

/// The two logical collections queued actions live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Calculations,
  ChatMessages,
}

impl Collection {
  pub fn as_str(&self) -> &'static str {
    match self {
      Collection::Calculations => "calculations",
      Collection::ChatMessages => "chatMessages",
    }
  }
}

impl FromStr for Collection {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "calculations" => Ok(Collection::Calculations),
      "chatMessages" => Ok(Collection::ChatMessages),
      other => Err(eyre!("Unknown collection '{}'", other)),
    }
  }
}

/// A calculator run (EMI, affordability, rent-vs-buy, ROI, eligibility).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
  #[serde(rename = "type")]
  pub kind: String,
  pub inputs: Value,
  pub result: Value,
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub sender: String,
  pub text: String,
  pub timestamp: DateTime<Utc>,
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedAction {
  Calculation(Calculation),
  ChatMessage(ChatMessage),
}

impl QueuedAction {
  pub fn collection(&self) -> Collection {
    match self {
      QueuedAction::Calculation(_) => Collection::Calculations,
      QueuedAction::ChatMessage(_) => Collection::ChatMessages,
    }
  }

  fn to_payload(&self) -> Result<Value> {
    let value = match self {
      QueuedAction::Calculation(c) => serde_json::to_value(c)?,
      QueuedAction::ChatMessage(m) => serde_json::to_value(m)?,
    };
    Ok(value)
  }
}

/// A stored action as it is transmitted: `{id, ...payload}`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
  pub id: i64,
  pub payload: Map<String, Value>,
}

impl QueuedRecord {
  pub fn to_json(&self) -> Value {
    let mut record = Map::with_capacity(self.payload.len() + 1);
    record.insert("id".to_string(), Value::from(self.id));
    for (key, value) in &self.payload {
      if key != "id" {
        record.insert(key.clone(), value.clone());
      }
    }
    Value::Object(record)
  }
}

/// SQLite-backed action store with auto-incrementing ids.
pub struct ActionStore {
  conn: Mutex<Connection>,
  /// Held for the whole of a drain so replays of one collection never overlap
  calculations_drain: tokio::sync::Mutex<()>,
  chat_drain: tokio::sync::Mutex<()>,
}

/// Schema for the action queue.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queued_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_queued_actions_collection ON queued_actions(collection, id);
"#;

impl ActionStore {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
      calculations_drain: tokio::sync::Mutex::new(()),
      chat_drain: tokio::sync::Mutex::new(()),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Wait until no other drain of `collection` is running.
  pub async fn lock_drain(&self, collection: Collection) -> tokio::sync::MutexGuard<'_, ()> {
    match collection {
      Collection::Calculations => self.calculations_drain.lock().await,
      Collection::ChatMessages => self.chat_drain.lock().await,
    }
  }

  /// Append an action to `collection`. Returns the generated id.
  pub fn enqueue(&self, collection: Collection, action: &QueuedAction) -> Result<i64> {
    if action.collection() != collection {
      return Err(eyre!(
        "A {} action cannot be queued in {}",
        action.collection().as_str(),
        collection.as_str()
      ));
    }
    let payload = serde_json::to_string(&action.to_payload()?)
      .map_err(|e| eyre!("Failed to serialize action: {}", e))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT INTO queued_actions (collection, payload) VALUES (?, ?)",
        params![collection.as_str(), payload],
      )
      .map_err(|e| eyre!("Failed to queue action in {}: {}", collection.as_str(), e))?;

    Ok(conn.last_insert_rowid())
  }

  /// Every record in `collection`, oldest first.
  pub fn list(&self, collection: Collection) -> Result<Vec<QueuedRecord>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, payload FROM queued_actions WHERE collection = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![collection.as_str()], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to read {}: {}", collection.as_str(), e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read {}: {}", collection.as_str(), e))?;

    rows
      .into_iter()
      .map(|(id, payload)| {
        let payload: Map<String, Value> = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Corrupt queued action {}: {}", id, e))?;
        Ok(QueuedRecord { id, payload })
      })
      .collect()
  }

  pub fn count(&self, collection: Collection) -> Result<usize> {
    let count: i64 = self
      .lock()?
      .query_row(
        "SELECT COUNT(*) FROM queued_actions WHERE collection = ?",
        params![collection.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count {}: {}", collection.as_str(), e))?;
    Ok(count as usize)
  }

  /// Remove the records of `collection` up to and including `last_id`.
  /// Records queued after that id stay put.
  pub fn clear_through(&self, collection: Collection, last_id: i64) -> Result<usize> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM queued_actions WHERE collection = ? AND id <= ?",
        params![collection.as_str(), last_id],
      )
      .map_err(|e| eyre!("Failed to clear {}: {}", collection.as_str(), e))?;
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn emi(principal: u64) -> QueuedAction {
    QueuedAction::Calculation(Calculation {
      kind: "emi".to_string(),
      inputs: json!({"principal": principal, "rate": 8.5, "tenureYears": 20}),
      result: json!({"emi": 43391}),
      timestamp: Utc::now(),
    })
  }

  fn chat(text: &str) -> QueuedAction {
    QueuedAction::ChatMessage(ChatMessage {
      sender: "user".to_string(),
      text: text.to_string(),
      timestamp: Utc::now(),
    })
  }

  #[test]
  fn test_enqueue_assigns_increasing_ids() {
    let store = ActionStore::open_in_memory().unwrap();
    let a = store.enqueue(Collection::Calculations, &emi(5_000_000)).unwrap();
    let b = store.enqueue(Collection::Calculations, &emi(6_000_000)).unwrap();
    assert!(b > a);

    let records = store.list(Collection::Calculations).unwrap();
    assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);
  }

  #[test]
  fn test_collections_are_separate() {
    let store = ActionStore::open_in_memory().unwrap();
    store.enqueue(Collection::Calculations, &emi(5_000_000)).unwrap();
    store.enqueue(Collection::ChatMessages, &chat("2BHK under 80L?")).unwrap();

    assert_eq!(store.count(Collection::Calculations).unwrap(), 1);
    assert_eq!(store.count(Collection::ChatMessages).unwrap(), 1);
    let last = store.list(Collection::ChatMessages).unwrap()[0].id;
    assert_eq!(store.clear_through(Collection::ChatMessages, last).unwrap(), 1);
    assert_eq!(store.count(Collection::Calculations).unwrap(), 1);
  }

  #[test]
  fn test_clear_through_keeps_later_records() {
    let store = ActionStore::open_in_memory().unwrap();
    let first = store.enqueue(Collection::ChatMessages, &chat("A")).unwrap();
    let second = store.enqueue(Collection::ChatMessages, &chat("B")).unwrap();

    assert_eq!(store.clear_through(Collection::ChatMessages, first).unwrap(), 1);

    let left = store.list(Collection::ChatMessages).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, second);
    assert_eq!(left[0].payload["text"], json!("B"));
  }

  #[test]
  fn test_mismatched_collection_rejected() {
    let store = ActionStore::open_in_memory().unwrap();
    assert!(store.enqueue(Collection::ChatMessages, &emi(1)).is_err());
    assert_eq!(store.count(Collection::ChatMessages).unwrap(), 0);
  }

  #[test]
  fn test_record_json_shape() {
    let store = ActionStore::open_in_memory().unwrap();
    let id = store.enqueue(Collection::ChatMessages, &chat("hello")).unwrap();
    let record = store.list(Collection::ChatMessages).unwrap().remove(0);
    let body = record.to_json();

    assert_eq!(body["id"], json!(id));
    assert_eq!(body["sender"], json!("user"));
    assert_eq!(body["text"], json!("hello"));
    // RFC 3339 / ISO 8601
    let timestamp = body["timestamp"].as_str().unwrap();
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
  }
}
