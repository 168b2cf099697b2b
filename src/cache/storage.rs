//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::net::{Response, ResponseType};

/// A response read back from a partition.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub url: String,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named partitions, each mapping a request URL
/// to a captured response.
pub trait CacheStorage: Send + Sync {
  /// Names of every partition, oldest first.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Create the partition if it does not exist yet.
  fn create_partition(&self, name: &str) -> Result<()>;

  fn has_partition(&self, name: &str) -> Result<bool>;

  /// Delete a partition and all of its entries. Returns false if it did not exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  fn get(&self, partition: &str, url: &str) -> Result<Option<CachedEntry>>;

  /// Insert or replace a single entry.
  fn put(&self, partition: &str, url: &str, response: &Response) -> Result<()>;

  /// Insert or replace several entries atomically: either all land or none do.
  fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()>;

  /// URLs stored in a partition.
  fn urls(&self, partition: &str) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);

-- One row per cached request URL
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition);
"#;

/// SHA256 of the URL for stable, fixed-length keys.
fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

fn insert_entry(conn: &Connection, partition: &str, url: &str, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (partition, url_hash, url, status, headers, body, response_type, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        url_hash(url),
        url,
        response.status,
        headers,
        &response.body[..],
        response.response_type.as_str()
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", url, partition, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn create_partition(&self, name: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
    Ok(())
  }

  fn has_partition(&self, name: &str) -> Result<bool> {
    let found: Option<i64> = self
      .lock()?
      .query_row(
        "SELECT 1 FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up partition {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, partition: &str, url: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, String, String)> = conn
      .query_row(
        "SELECT status, headers, body, response_type, cached_at FROM entries
         WHERE partition = ? AND url_hash = ?",
        params![partition, url_hash(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} from {}: {}", url, partition, e))?;

    let Some((status, headers, body, response_type, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;

    Ok(Some(CachedEntry {
      url: url.to_string(),
      response: Response {
        status,
        headers,
        body: body.into(),
        response_type: response_type.parse::<ResponseType>()?,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, partition: &str, url: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, partition, url, response)
  }

  fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (url, response) in entries {
      insert_entry(&tx, partition, url, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn urls(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT url FROM entries WHERE partition = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry url: {}", e))?;

    Ok(urls)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn css() -> Response {
    Response::new(200, "body{}").with_header("content-type", "text/css")
  }

  #[test]
  fn test_put_get_roundtrip_preserves_response() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("shell", "https://app.test/styles.css", &css()).unwrap();

    let entry = storage
      .get("shell", "https://app.test/styles.css")
      .unwrap()
      .unwrap();
    assert_eq!(entry.response, css());
    assert!(storage.get("data", "https://app.test/styles.css").unwrap().is_none());
  }

  #[test]
  fn test_put_creates_partition() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(!storage.has_partition("shell").unwrap());
    storage.put("shell", "https://app.test/", &css()).unwrap();
    assert!(storage.has_partition("shell").unwrap());
  }

  #[test]
  fn test_delete_partition_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("old", "https://app.test/a", &css()).unwrap();
    storage.put("new", "https://app.test/a", &css()).unwrap();

    assert!(storage.delete_partition("old").unwrap());
    assert!(!storage.delete_partition("old").unwrap());
    assert_eq!(storage.partition_names().unwrap(), vec!["new".to_string()]);
    assert!(storage.get("old", "https://app.test/a").unwrap().is_none());
    assert!(storage.get("new", "https://app.test/a").unwrap().is_some());
  }

  #[test]
  fn test_put_all_writes_every_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      ("https://app.test/".to_string(), Response::new(200, "<html>")),
      ("https://app.test/script.js".to_string(), Response::new(200, "init()")),
    ];
    storage.put_all("shell", &entries).unwrap();

    assert_eq!(
      storage.urls("shell").unwrap(),
      vec!["https://app.test/", "https://app.test/script.js"]
    );
  }

  #[test]
  fn test_partition_names_in_creation_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_partition("magicai-v0.9.0").unwrap();
    storage.create_partition("magicai-v1.0.0").unwrap();
    storage.create_partition("magicai-v0.9.0").unwrap();

    assert_eq!(
      storage.partition_names().unwrap(),
      vec!["magicai-v0.9.0", "magicai-v1.0.0"]
    );
  }
}
