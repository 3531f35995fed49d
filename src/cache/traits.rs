//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::api::types::ContentItem;

/// Trait for entities that can be cached.
///
/// Identity and freshness come from [`ContentItem`]; this adds the storage
/// family and an optional scope for families partitioned by owner.
pub trait Cacheable: ContentItem + Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Entity family name for storage organization (e.g., "prompt", "cluster")
  fn entity_type() -> &'static str;

  /// Partition within the family (e.g., the cluster a post belongs to).
  /// Unscoped families return `None`.
  fn scope(&self) -> Option<&str> {
    None
  }
}

/// Trait for logical query identifiers.
pub trait QueryKey {
  /// Stable, fixed-length hash of the normalized query.
  fn cache_hash(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String;
}

/// Addresses one family (and optionally one scope inside it) in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FamilyKey {
  pub entity_type: &'static str,
  pub scope: String,
}

impl FamilyKey {
  /// The whole unscoped family of `T`.
  pub fn of<T: Cacheable>() -> Self {
    Self {
      entity_type: T::entity_type(),
      scope: String::new(),
    }
  }

  /// One scope of the family of `T`.
  pub fn scoped<T: Cacheable>(scope: &str) -> Self {
    Self {
      entity_type: T::entity_type(),
      scope: scope.to_string(),
    }
  }

  /// Family key an entity is stored under.
  pub fn for_entity<T: Cacheable>(entity: &T) -> Self {
    match entity.scope() {
      Some(scope) => Self::scoped::<T>(scope),
      None => Self::of::<T>(),
    }
  }
}

/// Window into a family's freshness-ordered rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
  pub limit: usize,
  pub offset: usize,
}

impl PageWindow {
  pub fn new(limit: usize, offset: usize) -> Self {
    Self { limit, offset }
  }

  /// Window covering page `page` (1-based) of size `limit`.
  pub fn page(page: u32, limit: u32) -> Self {
    Self {
      limit: limit as usize,
      offset: (page.max(1) as usize - 1) * limit as usize,
    }
  }
}

/// Outcome of a cache read.
///
/// `Miss` and `Unavailable` are both "no cached data" to the fetch path;
/// the distinction exists for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
  Hit(T),
  Miss,
  /// The storage backend failed; carries the reason.
  Unavailable(String),
}

impl<T> CacheRead<T> {
  pub fn is_hit(&self) -> bool {
    matches!(self, CacheRead::Hit(_))
  }

  pub fn into_option(self) -> Option<T> {
    match self {
      CacheRead::Hit(data) => Some(data),
      _ => None,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheRead<U> {
    match self {
      CacheRead::Hit(data) => CacheRead::Hit(f(data)),
      CacheRead::Miss => CacheRead::Miss,
      CacheRead::Unavailable(reason) => CacheRead::Unavailable(reason),
    }
  }
}

/// Outcome of a cache write. Never fails the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
  /// Rows written, and rows evicted to stay within the bound
  Written { stored: usize, evicted: usize },
  Failed(String),
}

/// Result from a fetch, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cached data served because the network request failed.
  pub fn fallback(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network fetch failed, serving cached data
  Fallback,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
