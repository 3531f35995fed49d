//! Generic caching layer for data persistence and offline support.
//!
//! This module provides a content-agnostic caching mechanism that:
//! - Caches entities by id, partitioned into families and optional scopes
//! - Reads families in freshness order with limit/offset windows
//! - Bounds each family by evicting the least-recently accessed rows
//! - Reports storage failures as values so the fetch path never fails on them

mod layer;
mod storage;
mod traits;

pub use layer::{CachedPage, LocalCache, DEFAULT_MAX_ENTRIES_PER_FAMILY};
pub use storage::{CacheStorage, CachedEntity, MemoryStorage, SqliteStorage};
pub use traits::{
  CacheRead, CacheResult, CacheSource, CacheWrite, Cacheable, FamilyKey, PageWindow, QueryKey,
};
