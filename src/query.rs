//! Per-query state machines for data fetching.
//!
//! Inspired by TanStack Query: every logical query key moves through
//! `Idle → Loading → {Success, Error}`. Each fetch takes a [`Ticket`]
//! carrying a generation number; a ticket that is no longer the latest for
//! its key is stale and its response must be discarded. Generations only
//! ever grow, including across [`QueryTracker::invalidate_all`].
//!
//! # Example
//!
//! ```ignore
//! let ticket = tracker.begin(&key, Collection::Prompts, FetchPath::Online);
//! let page = api.list::<Prompt>(&query).await?;
//! if !tracker.is_current(&ticket) {
//!     return QueryState::Superseded;
//! }
//! let paging = Paging { page: 1, limit: 20, has_more: page.items.len() >= 20 };
//! tracker.succeed(&ticket, CacheSource::Network, Some(paging));
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::cache::{CacheSource, QueryKey};
use crate::store::Collection;

/// The outcome of a fetch, as handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
  /// A newer request for the same key was issued; this response was dropped
  Superseded,
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn into_data(self) -> Option<T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Coarse phase of a query key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryPhase {
  #[default]
  Idle,
  Loading,
  Success,
  Error,
}

/// Which path a fetch took, chosen at entry from connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPath {
  Online,
  Offline,
}

/// Pagination cursor of a query key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
  pub page: u32,
  pub limit: u32,
  pub has_more: bool,
}

/// Observable status of one query key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatus {
  pub phase: QueryPhase,
  /// Store collection whose loading flag this key feeds
  pub collection: Option<Collection>,
  pub path: Option<FetchPath>,
  pub source: Option<CacheSource>,
  pub error: Option<String>,
  pub paging: Option<Paging>,
  pub generation: u64,
  pub updated_at: Option<Instant>,
}

impl Default for QueryStatus {
  fn default() -> Self {
    Self {
      phase: QueryPhase::Idle,
      collection: None,
      path: None,
      source: None,
      error: None,
      paging: None,
      generation: 0,
      updated_at: None,
    }
  }
}

impl QueryStatus {
  pub fn is_loading(&self) -> bool {
    self.phase == QueryPhase::Loading
  }
}

/// Proof that a fetch was started; checked when its response arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
  key: String,
  description: String,
  generation: u64,
}

impl Ticket {
  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn description(&self) -> &str {
    &self.description
  }
}

/// Status of every query key the orchestrator has seen.
#[derive(Default)]
pub struct QueryTracker {
  statuses: Mutex<HashMap<String, QueryStatus>>,
}

impl QueryTracker {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, QueryStatus>> {
    // A panic while holding the lock cannot leave a status half-written,
    // so a poisoned map is still usable.
    self
      .statuses
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Current status of `key` (Idle if never fetched).
  pub fn status(&self, key: &impl QueryKey) -> QueryStatus {
    self
      .lock()
      .get(&key.cache_hash())
      .cloned()
      .unwrap_or_default()
  }

  pub fn is_loading(&self, key: &impl QueryKey) -> bool {
    self.status(key).is_loading()
  }

  pub fn paging(&self, key: &impl QueryKey) -> Option<Paging> {
    self.status(key).paging
  }

  /// Enter `Loading`, clear the previous error and issue a new generation.
  pub fn begin(&self, key: &impl QueryKey, collection: Collection, path: FetchPath) -> Ticket {
    let hash = key.cache_hash();
    let mut statuses = self.lock();
    let status = statuses.entry(hash.clone()).or_default();
    status.generation += 1;
    status.phase = QueryPhase::Loading;
    status.collection = Some(collection);
    status.path = Some(path);
    status.error = None;

    Ticket {
      key: hash,
      description: key.description(),
      generation: status.generation,
    }
  }

  /// Whether `ticket` is still the latest fetch for its key.
  pub fn is_current(&self, ticket: &Ticket) -> bool {
    self
      .lock()
      .get(&ticket.key)
      .is_some_and(|s| s.generation == ticket.generation)
  }

  /// Settle as success. Returns false (and changes nothing) for a stale ticket.
  pub fn succeed(&self, ticket: &Ticket, source: CacheSource, paging: Option<Paging>) -> bool {
    self.settle(ticket, |status| {
      status.phase = QueryPhase::Success;
      status.source = Some(source);
      status.error = None;
      if paging.is_some() {
        status.paging = paging;
      }
    })
  }

  /// Settle as error. Returns false (and changes nothing) for a stale ticket.
  pub fn fail(&self, ticket: &Ticket, error: &str, paging: Option<Paging>) -> bool {
    self.settle(ticket, |status| {
      status.phase = QueryPhase::Error;
      status.source = None;
      status.error = Some(error.to_string());
      if paging.is_some() {
        status.paging = paging;
      }
    })
  }

  fn settle(&self, ticket: &Ticket, f: impl FnOnce(&mut QueryStatus)) -> bool {
    let mut statuses = self.lock();
    match statuses.get_mut(&ticket.key) {
      Some(status) if status.generation == ticket.generation => {
        f(status);
        status.updated_at = Some(Instant::now());
        true
      }
      _ => false,
    }
  }

  /// Whether any key feeding `collection` is still loading.
  pub fn collection_loading(&self, collection: Collection) -> bool {
    self
      .lock()
      .values()
      .any(|s| s.collection == Some(collection) && s.is_loading())
  }

  /// Reset every key to `Idle` and make all outstanding tickets stale.
  ///
  /// Generations are bumped rather than dropped, so a response issued
  /// before the reset can never match a ticket issued after it.
  pub fn invalidate_all(&self) {
    for status in self.lock().values_mut() {
      *status = QueryStatus {
        generation: status.generation + 1,
        ..QueryStatus::default()
      };
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Key(&'static str);

  impl QueryKey for Key {
    fn cache_hash(&self) -> String {
      self.0.to_string()
    }

    fn description(&self) -> String {
      self.0.to_string()
    }
  }

  #[test]
  fn test_unknown_key_is_idle() {
    let tracker = QueryTracker::new();
    assert_eq!(tracker.status(&Key("a")).phase, QueryPhase::Idle);
    assert!(!tracker.is_loading(&Key("a")));
  }

  #[test]
  fn test_begin_clears_previous_error() {
    let tracker = QueryTracker::new();
    let first = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);
    assert!(tracker.fail(&first, "boom", None));
    assert_eq!(tracker.status(&Key("a")).error.as_deref(), Some("boom"));

    tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Offline);
    let status = tracker.status(&Key("a"));
    assert!(status.is_loading());
    assert!(status.error.is_none());
    assert_eq!(status.path, Some(Collection::Prompts, FetchPath::Offline));
  }

  #[test]
  fn test_stale_ticket_cannot_settle() {
    let tracker = QueryTracker::new();
    let older = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);
    let newer = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);

    assert!(!tracker.is_current(&older));
    assert!(!tracker.succeed(&older, CacheSource::Network, None));
    assert!(tracker.is_loading(&Key("a")));

    assert!(tracker.succeed(&newer, CacheSource::Network, None));
    assert_eq!(tracker.status(&Key("a")).phase, QueryPhase::Success);
    assert!(!tracker.fail(&older, "late", None));
    assert_eq!(tracker.status(&Key("a")).phase, QueryPhase::Success);
  }

  #[test]
  fn test_keys_are_independent() {
    let tracker = QueryTracker::new();
    let a = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);
    let b = tracker.begin(&Key("b"), Collection::Prompts, FetchPath::Online);
    assert!(tracker.is_current(&a));
    assert!(tracker.is_current(&b));
  }

  #[test]
  fn test_paging_is_kept_when_not_supplied() {
    let tracker = QueryTracker::new();
    let ticket = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);
    let paging = Paging {
      page: 2,
      limit: 20,
      has_more: true,
    };
    tracker.succeed(&ticket, CacheSource::Network, Some(paging));

    let ticket = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);
    tracker.fail(&ticket, "boom", None);
    assert_eq!(tracker.paging(&Key("a")), Some(paging));
  }

  #[test]
  fn test_invalidate_all_keeps_generations_growing() {
    let tracker = QueryTracker::new();
    let before = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);
    tracker.invalidate_all();

    let status = tracker.status(&Key("a"));
    assert_eq!(status.phase, QueryPhase::Idle);
    assert!(status.paging.is_none());
    assert!(!tracker.is_current(&before));

    let after = tracker.begin(&Key("a"), Collection::Prompts, FetchPath::Online);
    assert!(after.generation() > before.generation());
    assert!(!tracker.succeed(&before, CacheSource::Network, None));
    assert!(tracker.is_current(&after));
  }

  #[test]
  fn test_collection_loading_spans_keys() {
    let tracker = QueryTracker::new();
    let a = tracker.begin(&Key("a"), Collection::PromptFeed, FetchPath::Online);
    let b = tracker.begin(&Key("b"), Collection::PromptFeed, FetchPath::Online);

    tracker.succeed(&a, CacheSource::Network, None);
    assert!(tracker.collection_loading(Collection::PromptFeed));
    assert!(!tracker.collection_loading(Collection::Prompts));

    tracker.fail(&b, "boom", None);
    assert!(!tracker.collection_loading(Collection::PromptFeed));
  }
}
