//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{Cacheable, FamilyKey, PageWindow};

/// A single cached entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntity<T> {
  /// The cached entity
  pub entity: T,
  /// When the entity was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Rows are keyed by (entity type, scope, id). Writes replace whole records.
pub trait CacheStorage: Send + Sync {
  /// Insert or fully replace entities by id. Returns the number written.
  fn upsert_many<T: Cacheable>(&self, entities: &[T]) -> Result<usize>;

  /// Read a freshness-ordered window of a family. Empty family → empty vec.
  fn read_page<T: Cacheable>(
    &self,
    family: &FamilyKey,
    window: PageWindow,
  ) -> Result<Vec<CachedEntity<T>>>;

  /// Read one entity by id.
  fn read_by_id<T: Cacheable>(&self, family: &FamilyKey, id: &str)
    -> Result<Option<CachedEntity<T>>>;

  /// Number of rows in a family.
  fn count(&self, family: &FamilyKey) -> Result<usize>;

  /// Delete least-recently accessed rows until at most `max_entries` remain.
  fn evict(&self, family: &FamilyKey, max_entries: usize) -> Result<usize>;

  /// Delete every row in a family.
  fn clear(&self, family: &FamilyKey) -> Result<usize>;
}

// ============================================================================
// SQLite
// ============================================================================

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<SqliteInner>,
}

struct SqliteInner {
  conn: Connection,
  /// Monotonic access counter backing LRU ordering
  tick: i64,
}

impl SqliteInner {
  fn next_tick(&mut self) -> i64 {
    self.tick += 1;
    self.tick
  }
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Create a new SQLite storage at an explicit path.
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

  /// Non-durable database, used by tests.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    let tick: i64 = conn
      .query_row(
        "SELECT COALESCE(MAX(last_accessed), 0) FROM entity_cache",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read cache access counter: {}", e))?;

    Ok(Self {
      conn: Mutex::new(SqliteInner { conn, tick }),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("feedsync").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteInner>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Generic entity cache (stores serialized JSON)
CREATE TABLE IF NOT EXISTS entity_cache (
    entity_type TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT '',
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    freshness INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, scope, entity_key)
);

CREATE INDEX IF NOT EXISTS idx_entity_cache_freshness
    ON entity_cache(entity_type, scope, freshness DESC);

CREATE INDEX IF NOT EXISTS idx_entity_cache_access
    ON entity_cache(entity_type, scope, last_accessed);
"#;

impl CacheStorage for SqliteStorage {
  fn upsert_many<T: Cacheable>(&self, entities: &[T]) -> Result<usize> {
    let mut inner = self.lock()?;
    let entity_type = T::entity_type();
    let tick = inner.next_tick();

    let tx = inner
      .conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for entity in entities {
      let data =
        serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO entity_cache
           (entity_type, scope, entity_key, data, freshness, last_accessed, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          entity_type,
          entity.scope().unwrap_or(""),
          entity.id(),
          data,
          entity.freshness().timestamp_millis(),
          tick
        ],
      )
      .map_err(|e| eyre!("Failed to store entity: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(entities.len())
  }

  fn read_page<T: Cacheable>(
    &self,
    family: &FamilyKey,
    window: PageWindow,
  ) -> Result<Vec<CachedEntity<T>>> {
    let mut inner = self.lock()?;
    let tick = inner.next_tick();

    let rows: Vec<(String, Vec<u8>, String)> = {
      let mut stmt = inner
        .conn
        .prepare(
          "SELECT entity_key, data, cached_at FROM entity_cache
           WHERE entity_type = ? AND scope = ?
           ORDER BY freshness DESC, entity_key ASC
           LIMIT ? OFFSET ?",
        )
        .map_err(|e| eyre!("Failed to prepare page query: {}", e))?;

      let rows = stmt
        .query_map(
          params![
            family.entity_type,
            family.scope,
            window.limit as i64,
            window.offset as i64
          ],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| eyre!("Failed to query entities: {}", e))?
        .filter_map(|r| r.ok())
        .collect();
      rows
    };

    let mut entities = Vec::with_capacity(rows.len());
    for (key, data, cached_at) in rows {
      inner
        .conn
        .execute(
          "UPDATE entity_cache SET last_accessed = ?
           WHERE entity_type = ? AND scope = ? AND entity_key = ?",
          params![tick, family.entity_type, family.scope, key],
        )
        .map_err(|e| eyre!("Failed to touch entity: {}", e))?;

      // Rows written by an older build may no longer deserialize; skip them.
      if let Ok(entity) = serde_json::from_slice::<T>(&data) {
        entities.push(CachedEntity {
          entity,
          cached_at: parse_datetime(&cached_at)?,
        });
      }
    }

    Ok(entities)
  }

  fn read_by_id<T: Cacheable>(
    &self,
    family: &FamilyKey,
    id: &str,
  ) -> Result<Option<CachedEntity<T>>> {
    let mut inner = self.lock()?;
    let tick = inner.next_tick();

    let result: Option<(Vec<u8>, String)> = inner
      .conn
      .query_row(
        "SELECT data, cached_at FROM entity_cache
         WHERE entity_type = ? AND scope = ? AND entity_key = ?",
        params![family.entity_type, family.scope, id],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entity: {}", e))?;

    match result {
      Some((data, cached_at_str)) => {
        inner
          .conn
          .execute(
            "UPDATE entity_cache SET last_accessed = ?
             WHERE entity_type = ? AND scope = ? AND entity_key = ?",
            params![tick, family.entity_type, family.scope, id],
          )
          .map_err(|e| eyre!("Failed to touch entity: {}", e))?;

        let entity: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntity { entity, cached_at }))
      }
      None => Ok(None),
    }
  }

  fn count(&self, family: &FamilyKey) -> Result<usize> {
    let inner = self.lock()?;
    let count: i64 = inner
      .conn
      .query_row(
        "SELECT COUNT(*) FROM entity_cache WHERE entity_type = ? AND scope = ?",
        params![family.entity_type, family.scope],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entities: {}", e))?;
    Ok(count as usize)
  }

  fn evict(&self, family: &FamilyKey, max_entries: usize) -> Result<usize> {
    let inner = self.lock()?;
    let deleted = inner
      .conn
      .execute(
        "DELETE FROM entity_cache
         WHERE entity_type = ?1 AND scope = ?2 AND entity_key IN (
           SELECT entity_key FROM entity_cache
           WHERE entity_type = ?1 AND scope = ?2
           ORDER BY last_accessed DESC, freshness DESC
           LIMIT -1 OFFSET ?3
         )",
        params![family.entity_type, family.scope, max_entries as i64],
      )
      .map_err(|e| eyre!("Failed to evict entities: {}", e))?;
    Ok(deleted)
  }

  fn clear(&self, family: &FamilyKey) -> Result<usize> {
    let inner = self.lock()?;
    let deleted = inner
      .conn
      .execute(
        "DELETE FROM entity_cache WHERE entity_type = ? AND scope = ?",
        params![family.entity_type, family.scope],
      )
      .map_err(|e| eyre!("Failed to clear entities: {}", e))?;
    Ok(deleted)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

// ============================================================================
// In-memory
// ============================================================================

struct MemoryRow {
  data: Vec<u8>,
  freshness: i64,
  last_accessed: i64,
  cached_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
  families: HashMap<FamilyKey, HashMap<String, MemoryRow>>,
  tick: i64,
}

/// Process-local storage. Used when the durable cache is disabled and in tests.
#[derive(Default)]
pub struct MemoryStorage {
  inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Keys of a family sorted by freshness (most recent first).
fn freshness_order(rows: &HashMap<String, MemoryRow>) -> Vec<String> {
  let mut keys: Vec<(&String, i64)> = rows.iter().map(|(k, r)| (k, r.freshness)).collect();
  keys.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
  keys.into_iter().map(|(k, _)| k.clone()).collect()
}

impl CacheStorage for MemoryStorage {
  fn upsert_many<T: Cacheable>(&self, entities: &[T]) -> Result<usize> {
    let mut inner = self.lock()?;
    inner.tick += 1;
    let tick = inner.tick;

    for entity in entities {
      let data =
        serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
      inner
        .families
        .entry(FamilyKey::for_entity(entity))
        .or_default()
        .insert(
          entity.id().to_string(),
          MemoryRow {
            data,
            freshness: entity.freshness().timestamp_millis(),
            last_accessed: tick,
            cached_at: Utc::now(),
          },
        );
    }

    Ok(entities.len())
  }

  fn read_page<T: Cacheable>(
    &self,
    family: &FamilyKey,
    window: PageWindow,
  ) -> Result<Vec<CachedEntity<T>>> {
    let mut inner = self.lock()?;
    inner.tick += 1;
    let tick = inner.tick;

    let Some(rows) = inner.families.get_mut(family) else {
      return Ok(Vec::new());
    };

    let keys: Vec<String> = freshness_order(rows)
      .into_iter()
      .skip(window.offset)
      .take(window.limit)
      .collect();

    let mut entities = Vec::with_capacity(keys.len());
    for key in keys {
      if let Some(row) = rows.get_mut(&key) {
        row.last_accessed = tick;
        if let Ok(entity) = serde_json::from_slice::<T>(&row.data) {
          entities.push(CachedEntity {
            entity,
            cached_at: row.cached_at,
          });
        }
      }
    }

    Ok(entities)
  }

  fn read_by_id<T: Cacheable>(
    &self,
    family: &FamilyKey,
    id: &str,
  ) -> Result<Option<CachedEntity<T>>> {
    let mut inner = self.lock()?;
    inner.tick += 1;
    let tick = inner.tick;

    let Some(row) = inner.families.get_mut(family).and_then(|f| f.get_mut(id)) else {
      return Ok(None);
    };
    row.last_accessed = tick;

    let entity: T =
      serde_json::from_slice(&row.data).map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
    Ok(Some(CachedEntity {
      entity,
      cached_at: row.cached_at,
    }))
  }

  fn count(&self, family: &FamilyKey) -> Result<usize> {
    let inner = self.lock()?;
    Ok(inner.families.get(family).map(|f| f.len()).unwrap_or(0))
  }

  fn evict(&self, family: &FamilyKey, max_entries: usize) -> Result<usize> {
    let mut inner = self.lock()?;
    let Some(rows) = inner.families.get_mut(family) else {
      return Ok(0);
    };
    if rows.len() <= max_entries {
      return Ok(0);
    }

    let mut by_access: Vec<(String, i64, i64)> = rows
      .iter()
      .map(|(k, r)| (k.clone(), r.last_accessed, r.freshness))
      .collect();
    by_access.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)));

    let doomed: Vec<String> = by_access
      .into_iter()
      .skip(max_entries)
      .map(|(k, _, _)| k)
      .collect();
    for key in &doomed {
      rows.remove(key);
    }
    Ok(doomed.len())
  }

  fn clear(&self, family: &FamilyKey) -> Result<usize> {
    let mut inner = self.lock()?;
    Ok(inner.families.remove(family).map(|f| f.len()).unwrap_or(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{ClusterPost, MediaType, Prompt};
  use chrono::TimeZone;

  fn prompt(id: &str, day: u32) -> Prompt {
    Prompt {
      id: id.to_string(),
      title: format!("Prompt {}", id),
      content: "a cat in a hat".into(),
      description: None,
      platform: "midjourney".into(),
      tool: None,
      media_type: MediaType::Image,
      category: None,
      tags: vec![],
      image_url: None,
      likes: 0,
      views: 0,
      copies: 0,
      saves: 0,
      trending_score: None,
      approved: true,
      created_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
      updated_at: None,
    }
  }

  fn post(id: &str, cluster: &str, day: u32) -> ClusterPost {
    ClusterPost {
      id: id.to_string(),
      cluster_id: cluster.to_string(),
      platform: "reddit".into(),
      author: None,
      content: "post".into(),
      url: None,
      score: 1,
      comments: 0,
      media_type: MediaType::Text,
      posted_at: Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap(),
    }
  }

  fn backends() -> Vec<(&'static str, Box<dyn Fn() -> Box<dyn Backend>>)> {
    vec![
      (
        "sqlite",
        Box::new(|| -> Box<dyn Backend> { Box::new(SqliteStorage::in_memory().unwrap()) }),
      ),
      (
        "memory",
        Box::new(|| -> Box<dyn Backend> { Box::new(MemoryStorage::new()) }),
      ),
    ]
  }

  /// Object-safe shim so both backends run the same assertions.
  trait Backend {
    fn upsert(&self, prompts: &[Prompt]) -> usize;
    fn upsert_posts(&self, posts: &[ClusterPost]) -> usize;
    fn page(&self, limit: usize, offset: usize) -> Vec<Prompt>;
    fn posts(&self, cluster: &str) -> Vec<ClusterPost>;
    fn by_id(&self, id: &str) -> Option<Prompt>;
    fn evict(&self, max: usize) -> usize;
    fn count(&self) -> usize;
  }

  impl<S: CacheStorage> Backend for S {
    fn upsert(&self, prompts: &[Prompt]) -> usize {
      self.upsert_many(prompts).unwrap()
    }
    fn upsert_posts(&self, posts: &[ClusterPost]) -> usize {
      self.upsert_many(posts).unwrap()
    }
    fn page(&self, limit: usize, offset: usize) -> Vec<Prompt> {
      self
        .read_page::<Prompt>(&FamilyKey::of::<Prompt>(), PageWindow::new(limit, offset))
        .unwrap()
        .into_iter()
        .map(|c| c.entity)
        .collect()
    }
    fn posts(&self, cluster: &str) -> Vec<ClusterPost> {
      self
        .read_page::<ClusterPost>(
          &FamilyKey::scoped::<ClusterPost>(cluster),
          PageWindow::new(100, 0),
        )
        .unwrap()
        .into_iter()
        .map(|c| c.entity)
        .collect()
    }
    fn by_id(&self, id: &str) -> Option<Prompt> {
      self
        .read_by_id::<Prompt>(&FamilyKey::of::<Prompt>(), id)
        .unwrap()
        .map(|c| c.entity)
    }
    fn evict(&self, max: usize) -> usize {
      CacheStorage::evict(self, &FamilyKey::of::<Prompt>(), max).unwrap()
    }
    fn count(&self) -> usize {
      CacheStorage::count(self, &FamilyKey::of::<Prompt>()).unwrap()
    }
  }

  #[test]
  fn test_empty_cache_reads_are_empty() {
    for (name, make) in backends() {
      let storage = make();
      assert!(storage.page(10, 0).is_empty(), "{}", name);
      assert!(storage.by_id("missing").is_none(), "{}", name);
      assert_eq!(storage.count(), 0, "{}", name);
    }
  }

  #[test]
  fn test_upsert_is_idempotent() {
    for (name, make) in backends() {
      let storage = make();
      let items = vec![prompt("a", 1), prompt("b", 2)];
      storage.upsert(&items);
      let once = storage.page(10, 0);
      storage.upsert(&items);
      let twice = storage.page(10, 0);
      assert_eq!(once, twice, "{}", name);
      assert_eq!(storage.count(), 2, "{}", name);
    }
  }

  #[test]
  fn test_upsert_replaces_whole_record() {
    for (name, make) in backends() {
      let storage = make();
      let mut original = prompt("a", 1);
      original.description = Some("old".into());
      original.likes = 10;
      storage.upsert(&[original]);

      let mut replacement = prompt("a", 1);
      replacement.likes = 11;
      storage.upsert(&[replacement.clone()]);

      let stored = storage.by_id("a").unwrap();
      assert_eq!(stored, replacement, "{}", name);
      assert!(stored.description.is_none(), "{}", name);
    }
  }

  #[test]
  fn test_page_ordered_by_freshness() {
    for (name, make) in backends() {
      let storage = make();
      storage.upsert(&[prompt("old", 1), prompt("new", 20), prompt("mid", 10)]);

      let ids: Vec<String> = storage.page(10, 0).into_iter().map(|p| p.id).collect();
      assert_eq!(ids, vec!["new", "mid", "old"], "{}", name);

      let second: Vec<String> = storage.page(2, 1).into_iter().map(|p| p.id).collect();
      assert_eq!(second, vec!["mid", "old"], "{}", name);
    }
  }

  #[test]
  fn test_scoped_family_is_partitioned() {
    for (name, make) in backends() {
      let storage = make();
      storage.upsert_posts(&[post("1", "c1", 1), post("2", "c1", 2), post("3", "c2", 3)]);
      assert_eq!(storage.posts("c1").len(), 2, "{}", name);
      assert_eq!(storage.posts("c2").len(), 1, "{}", name);
      assert!(storage.posts("c3").is_empty(), "{}", name);
    }
  }

  #[test]
  fn test_evict_drops_least_recently_accessed() {
    for (name, make) in backends() {
      let storage = make();
      storage.upsert(&[prompt("a", 1)]);
      storage.upsert(&[prompt("b", 2)]);
      storage.upsert(&[prompt("c", 3)]);

      // Touch "a" so "b" becomes the least recently used.
      assert!(storage.by_id("a").is_some());

      assert_eq!(storage.evict(2), 1, "{}", name);
      assert_eq!(storage.count(), 2, "{}", name);
      assert!(storage.by_id("b").is_none(), "{}", name);
      assert!(storage.by_id("a").is_some(), "{}", name);
      assert!(storage.by_id("c").is_some(), "{}", name);
    }
  }

  #[test]
  fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.upsert_many(&[prompt("a", 1)]).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    let cached = storage
      .read_by_id::<Prompt>(&FamilyKey::of::<Prompt>(), "a")
      .unwrap()
      .unwrap();
    assert_eq!(cached.entity.id, "a");
  }
}
