//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::config;
use crate::fetch::Response;

/// Summary of one stored entry, for listings.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// A namespace of named cache stores, each mapping request URL to response.
///
/// There are no transactional guarantees across calls: concurrent writers to
/// the same URL race and the last write wins. Use `update` or `take` when an
/// entry is read and written back.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  fn has(&self, name: &str) -> Result<bool>;

  /// All store names, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Drop a store and everything in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up a URL in one store. A missing store is a miss.
  fn match_url(&self, name: &str, url: &str) -> Result<Option<Response>>;

  /// Store a response, creating the store if needed.
  fn put(&self, name: &str, url: &str, response: &Response) -> Result<()>;

  /// Store several responses at once; either all are written or none.
  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Remove one entry. Returns whether it existed.
  fn remove(&self, name: &str, url: &str) -> Result<bool>;

  /// Remove one entry and return what it held, in a single step.
  fn take(&self, name: &str, url: &str) -> Result<Option<Response>>;

  /// Replace one entry with `f(current)` in a single step. Nothing is
  /// written when `f` fails.
  fn update<F>(&self, name: &str, url: &str, f: F) -> Result<()>
  where
    F: FnOnce(Option<Response>) -> Result<Response>;

  fn entries(&self, name: &str) -> Result<Vec<CacheEntryInfo>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    let path = config::data_dir()?.join("cache.db");
    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Storage that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named stores; rowid preserves creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(cache_name);
"#;

/// SHA256 of the URL, for fixed-length keys.
fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

fn insert_entry(conn: &Connection, name: &str, url: &str, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create cache store {}: {}", name, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (cache_name, url_hash, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        url_hash(url),
        url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", url, name, e))?;

  Ok(())
}

fn select_entry(conn: &Connection, name: &str, url: &str) -> Result<Option<Response>> {
  let row: Option<(u16, String, Vec<u8>)> = conn
    .query_row(
      "SELECT status, headers, body FROM cache_entries
       WHERE cache_name = ? AND url_hash = ?",
      params![name, url_hash(url)],
      |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
    .map_err(|e| eyre!("Failed to look up {} in {}: {}", url, name, e))?;

  match row {
    Some((status, headers, body)) => {
      let headers = serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", url, e))?;
      Ok(Some(Response {
        status,
        headers,
        body,
      }))
    }
    None => Ok(None),
  }
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create cache store {}: {}", name, e))?;
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache store {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_url(&self, name: &str, url: &str) -> Result<Option<Response>> {
    let conn = self.lock()?;
    select_entry(&conn, name, url)
  }

  fn put(&self, name: &str, url: &str, response: &Response) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    insert_entry(&tx, name, url, response)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create cache store {}: {}", name, e))?;

    for (url, response) in entries {
      insert_entry(&tx, name, url, response)?;
    }

    // Dropping the transaction on an early return rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn remove(&self, name: &str, url: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ? AND url_hash = ?",
        params![name, url_hash(url)],
      )
      .map_err(|e| eyre!("Failed to remove {} from {}: {}", url, name, e))?;
    Ok(removed > 0)
  }

  fn take(&self, name: &str, url: &str) -> Result<Option<Response>> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let entry = select_entry(&tx, name, url)?;
    if entry.is_some() {
      tx.execute(
        "DELETE FROM cache_entries WHERE cache_name = ? AND url_hash = ?",
        params![name, url_hash(url)],
      )
      .map_err(|e| eyre!("Failed to remove {} from {}: {}", url, name, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(entry)
  }

  fn update<F>(&self, name: &str, url: &str, f: F) -> Result<()>
  where
    F: FnOnce(Option<Response>) -> Result<Response>,
  {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let current = select_entry(&tx, name, url)?;
    let next = f(current)?;
    insert_entry(&tx, name, url, &next)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<CacheEntryInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, length(body), cached_at FROM cache_entries
         WHERE cache_name = ?
         ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, u16>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry of {}: {}", name, e))?;

    rows
      .into_iter()
      .map(|(url, status, size, cached_at)| {
        Ok(CacheEntryInfo {
          url,
          status,
          size: size.max(0) as usize,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
