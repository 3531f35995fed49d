//! Cache facade used by the fetch orchestrator.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::storage::{CacheStorage, CachedEntity};
use super::traits::{CacheRead, CacheWrite, Cacheable, FamilyKey, PageWindow};

/// Default bound on rows per family (per scope).
pub const DEFAULT_MAX_ENTRIES_PER_FAMILY: usize = 2000;

/// A page of cached entities with the newest `cached_at` among them.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage<T> {
  pub items: Vec<T>,
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CachedPage<T> {
  fn from_entities(entities: Vec<CachedEntity<T>>) -> Self {
    let cached_at = entities.iter().map(|e| e.cached_at).max();
    Self {
      items: entities.into_iter().map(|e| e.entity).collect(),
      cached_at,
    }
  }
}

/// Durable last-known copy of fetched entities.
///
/// Storage errors never escape: writes report [`CacheWrite::Failed`] and
/// reads report [`CacheRead::Unavailable`], both logged here.
pub struct LocalCache<S: CacheStorage> {
  storage: Arc<S>,
  max_entries_per_family: usize,
}

impl<S: CacheStorage> LocalCache<S> {
  /// Create a new cache with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      max_entries_per_family: DEFAULT_MAX_ENTRIES_PER_FAMILY,
    }
  }

  /// Set the per-family row bound.
  pub fn with_max_entries(mut self, max_entries_per_family: usize) -> Self {
    self.max_entries_per_family = max_entries_per_family.max(1);
    self
  }

  pub fn max_entries_per_family(&self) -> usize {
    self.max_entries_per_family
  }

  /// Insert or replace entities by id, then trim every touched family.
  pub fn upsert_many<T: Cacheable>(&self, items: &[T]) -> CacheWrite {
    if items.is_empty() {
      return CacheWrite::Written {
        stored: 0,
        evicted: 0,
      };
    }

    let stored = match self.storage.upsert_many(items) {
      Ok(stored) => stored,
      Err(e) => {
        warn!(entity_type = T::entity_type(), error = %e, "Cache write failed");
        return CacheWrite::Failed(e.to_string());
      }
    };

    let families: HashSet<FamilyKey> = items.iter().map(FamilyKey::for_entity).collect();
    let mut evicted = 0;
    for family in &families {
      match self.storage.evict(family, self.max_entries_per_family) {
        Ok(n) => evicted += n,
        Err(e) => {
          warn!(entity_type = family.entity_type, scope = %family.scope, error = %e, "Cache eviction failed");
        }
      }
    }

    if evicted > 0 {
      debug!(entity_type = T::entity_type(), evicted, "Evicted cache rows");
    }
    CacheWrite::Written { stored, evicted }
  }

  /// Replace an entire family with `items`.
  pub fn replace_family<T: Cacheable>(&self, family: &FamilyKey, items: &[T]) -> CacheWrite {
    if let Err(e) = self.storage.clear(family) {
      warn!(entity_type = family.entity_type, error = %e, "Cache clear failed");
      return CacheWrite::Failed(e.to_string());
    }
    self.upsert_many(items)
  }

  /// Freshness-ordered window of a family. An empty family is a `Miss`.
  pub fn read_page<T: Cacheable>(
    &self,
    family: &FamilyKey,
    window: PageWindow,
  ) -> CacheRead<CachedPage<T>> {
    match self.storage.read_page::<T>(family, window) {
      Ok(entities) if entities.is_empty() => CacheRead::Miss,
      Ok(entities) => CacheRead::Hit(CachedPage::from_entities(entities)),
      Err(e) => {
        warn!(entity_type = family.entity_type, error = %e, "Cache read failed");
        CacheRead::Unavailable(e.to_string())
      }
    }
  }

  /// Single entity by id.
  pub fn read_by_id<T: Cacheable>(&self, family: &FamilyKey, id: &str) -> CacheRead<CachedEntity<T>> {
    match self.storage.read_by_id::<T>(family, id) {
      Ok(Some(entity)) => CacheRead::Hit(entity),
      Ok(None) => CacheRead::Miss,
      Err(e) => {
        warn!(entity_type = family.entity_type, id, error = %e, "Cache read failed");
        CacheRead::Unavailable(e.to_string())
      }
    }
  }

  /// Read several ids, keeping the requested order and skipping misses.
  pub fn read_many<T: Cacheable>(&self, family: &FamilyKey, ids: &[String]) -> CacheRead<CachedPage<T>> {
    let mut entities = Vec::with_capacity(ids.len());
    for id in ids {
      match self.read_by_id::<T>(family, id) {
        CacheRead::Hit(entity) => entities.push(entity),
        CacheRead::Miss => {}
        CacheRead::Unavailable(reason) => return CacheRead::Unavailable(reason),
      }
    }
    if entities.is_empty() {
      CacheRead::Miss
    } else {
      CacheRead::Hit(CachedPage::from_entities(entities))
    }
  }

  /// Row count of a family; storage failures count as empty.
  pub fn count(&self, family: &FamilyKey) -> usize {
    self.storage.count(family).unwrap_or_else(|e| {
      warn!(entity_type = family.entity_type, error = %e, "Cache count failed");
      0
    })
  }
}

impl<S: CacheStorage> Clone for LocalCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      max_entries_per_family: self.max_entries_per_family,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::testing::{prompt, FailingStorage};
  use crate::api::types::Prompt;

  #[test]
  fn test_empty_family_is_miss() {
    let cache = LocalCache::new(MemoryStorage::new());
    let read = cache.read_page::<Prompt>(&FamilyKey::of::<Prompt>(), PageWindow::new(10, 0));
    assert_eq!(read, CacheRead::Miss);
    assert_eq!(
      cache.read_by_id::<Prompt>(&FamilyKey::of::<Prompt>(), "nope"),
      CacheRead::Miss
    );
  }

  #[test]
  fn test_upsert_enforces_bound() {
    let cache = LocalCache::new(MemoryStorage::new()).with_max_entries(3);
    let items: Vec<Prompt> = (1..=5).map(|i| prompt(&format!("p{}", i), i)).collect();

    let write = cache.upsert_many(&items);
    assert_eq!(
      write,
      CacheWrite::Written {
        stored: 5,
        evicted: 2
      }
    );
    assert_eq!(cache.count(&FamilyKey::of::<Prompt>()), 3);
  }

  #[test]
  fn test_storage_failures_are_reported_not_raised() {
    let cache = LocalCache::new(FailingStorage);
    assert!(matches!(
      cache.upsert_many(&[prompt("a", 1)]),
      CacheWrite::Failed(_)
    ));
    assert!(matches!(
      cache.read_page::<Prompt>(&FamilyKey::of::<Prompt>(), PageWindow::new(5, 0)),
      CacheRead::Unavailable(_)
    ));
    assert!(matches!(
      cache.read_by_id::<Prompt>(&FamilyKey::of::<Prompt>(), "a"),
      CacheRead::Unavailable(_)
    ));
    assert_eq!(cache.count(&FamilyKey::of::<Prompt>()), 0);
  }

  #[test]
  fn test_read_many_keeps_requested_order() {
    let cache = LocalCache::new(MemoryStorage::new());
    cache.upsert_many(&[prompt("a", 1), prompt("b", 2), prompt("c", 3)]);

    let ids = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
    let page = cache
      .read_many::<Prompt>(&FamilyKey::of::<Prompt>(), &ids)
      .into_option()
      .unwrap();
    let got: Vec<&str> = page.items.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(got, vec!["c", "a"]);
  }

  #[test]
  fn test_replace_family_drops_previous_rows() {
    let cache = LocalCache::new(MemoryStorage::new());
    cache.upsert_many(&[prompt("a", 1), prompt("b", 2)]);
    cache.replace_family(&FamilyKey::of::<Prompt>(), &[prompt("c", 3)]);

    assert_eq!(cache.count(&FamilyKey::of::<Prompt>()), 1);
    assert!(cache
      .read_by_id::<Prompt>(&FamilyKey::of::<Prompt>(), "a")
      .into_option()
      .is_none());
  }
}
