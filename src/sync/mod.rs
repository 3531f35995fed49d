//! Fetch orchestration: online/offline path selection, paginated merges,
//! write-through caching and read-through fallback.
//!
//! Every public fetch returns a [`Fetch`]: `Success` carries the data and
//! where it came from, `Error` is only produced when neither the network nor
//! the cache could supply anything. A response that lost a race against a
//! newer request for the same query key comes back as `Superseded` and is
//! never applied.

mod connectivity;
mod detail;
mod feeds;
mod search;
mod session;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::types::{ListQuery, Page};
use crate::api::{ApiError, ApiResult, ContentApi, FeedQueryKey};
use crate::cache::{
  CacheRead, CacheResult, CacheSource, CacheStorage, CacheWrite, Cacheable, FamilyKey,
  LocalCache, PageWindow, QueryKey,
};
use crate::config::Config;
use crate::query::{FetchPath, Paging, QueryState, QueryStatus, QueryTracker, Ticket};
use crate::store::{Collection, GlobalStore, MergeMode, StatePersistence};

pub use feeds::Listing;
pub use search::SEARCH_OFFLINE_ERROR;

/// Outcome of an orchestrated fetch.
pub type Fetch<T> = QueryState<CacheResult<T>>;

/// Tunables of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
  /// Page size used when a caller does not pick one
  pub page_size: u32,
  /// Deadline of the connectivity probe
  pub probe_timeout: Duration,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      page_size: 20,
      probe_timeout: Duration::from_secs(5),
    }
  }
}

impl From<&Config> for SyncSettings {
  fn from(config: &Config) -> Self {
    Self {
      page_size: config.api.page_size,
      probe_timeout: Duration::from_secs(config.network.probe_timeout_secs),
    }
  }
}

/// Composes the remote client, the local cache and the global store.
pub struct FetchOrchestrator<A, S, P>
where
  A: ContentApi,
  S: CacheStorage,
  P: StatePersistence,
{
  api: Arc<A>,
  cache: LocalCache<S>,
  store: Arc<GlobalStore<P>>,
  queries: QueryTracker,
  settings: SyncSettings,
}

/// Everything `run_list` needs to know about one list fetch.
struct ListPlan<T> {
  key: FeedQueryKey,
  collection: Collection,
  family: FamilyKey,
  query: ListQuery,
  mode: MergeMode,
  /// Applied to cached rows, standing in for server-side filtering
  keep: Option<fn(&ListQuery, &T) -> bool>,
}

impl<A, S, P> FetchOrchestrator<A, S, P>
where
  A: ContentApi,
  S: CacheStorage,
  P: StatePersistence,
{
  pub fn new(
    api: Arc<A>,
    cache: LocalCache<S>,
    store: Arc<GlobalStore<P>>,
    settings: SyncSettings,
  ) -> Self {
    Self {
      api,
      cache,
      store,
      queries: QueryTracker::new(),
      settings,
    }
  }

  pub fn api(&self) -> &A {
    &self.api
  }

  pub fn cache(&self) -> &LocalCache<S> {
    &self.cache
  }

  pub fn store(&self) -> &GlobalStore<P> {
    &self.store
  }

  pub fn settings(&self) -> SyncSettings {
    self.settings
  }

  /// Loading/error status of a query key.
  pub fn query_status(&self, key: &FeedQueryKey) -> QueryStatus {
    self.queries.status(key)
  }

  /// Path for a fetch starting now.
  fn entry_path(&self) -> FetchPath {
    if self.store.is_online() {
      FetchPath::Online
    } else {
      FetchPath::Offline
    }
  }

  /// Page to request for `load_more`, or `None` when it must be a no-op.
  fn next_page(&self, key: &FeedQueryKey) -> Option<u32> {
    let status = self.queries.status(key);
    if status.is_loading() {
      debug!(query = %key.description(), "load_more ignored while loading");
      return None;
    }
    match status.paging {
      Some(paging) if paging.has_more => Some(paging.page + 1),
      Some(_) => {
        debug!(query = %key.description(), "load_more ignored, no more pages");
        None
      }
      // Never fetched: nothing to continue from.
      None => None,
    }
  }

  fn begin(&self, key: &FeedQueryKey, collection: Collection) -> (Ticket, FetchPath) {
    let path = self.entry_path();
    let ticket = self.queries.begin(key, collection, path);
    self.store.set_loading(collection, true);
    debug!(
      query = ticket.description(),
      generation = ticket.generation(),
      ?path,
      "Fetch started"
    );
    (ticket, path)
  }

  /// Drop a response whose ticket is no longer current.
  fn superseded(&self, ticket: &Ticket) -> bool {
    if self.queries.is_current(ticket) {
      return false;
    }
    debug!(
      query = ticket.description(),
      generation = ticket.generation(),
      "Discarding superseded response"
    );
    true
  }

  /// Lower the collection flag once no key feeding it is in flight.
  fn sync_loading(&self, collection: Collection) {
    self
      .store
      .set_loading(collection, self.queries.collection_loading(collection));
  }

  /// Best-effort write-through; a failed cache write never fails a fetch.
  fn write_through<T: Cacheable>(&self, items: &[T]) {
    if let CacheWrite::Failed(reason) = self.cache.upsert_many(items) {
      debug!(entity_type = T::entity_type(), %reason, "Write-through skipped");
    }
  }

  /// Cached window for a list plan.
  ///
  /// With a classification filter the whole family is read in freshness
  /// order and the window is cut from the matching rows, so `total` counts
  /// matches only. An empty window of a non-empty family is still a `Hit`.
  fn read_cached_page<T: Cacheable>(
    &self,
    plan: &ListPlan<T>,
  ) -> CacheRead<(Page<T>, Option<DateTime<Utc>>)> {
    let window = PageWindow::page(plan.query.page, plan.query.limit);
    let page_of = |items: Vec<T>, total: usize| Page {
      items,
      page: plan.query.page,
      limit: plan.query.limit,
      total: total as u64,
    };

    let Some(keep) = plan.keep else {
      return self
        .cache
        .read_page::<T>(&plan.family, window)
        .map(|cached| (page_of(cached.items, self.cache.count(&plan.family)), cached.cached_at));
    };

    let everything = PageWindow::new(self.cache.max_entries_per_family(), 0);
    self
      .cache
      .read_page::<T>(&plan.family, everything)
      .map(|cached| {
        let matching: Vec<T> = cached
          .items
          .into_iter()
          .filter(|item| keep(&plan.query, item))
          .collect();
        let total = matching.len();
        let items = matching
          .into_iter()
          .skip(window.offset)
          .take(window.limit)
          .collect();
        (page_of(items, total), cached.cached_at)
      })
  }

  /// Log a failed remote call and record it in the sync status.
  fn record_failure(&self, ticket: &Ticket, error: &ApiError) {
    warn!(query = ticket.description(), error = %error, "Fetch failed, falling back to cache");
    self.store.record_sync_failure(&error.to_string());
  }

  /// Settle a fetch: apply the result unless a newer request owns the key.
  ///
  /// `apply` runs before the query is marked successful, so subscribers of
  /// the store never see a success without its data.
  fn settle<T>(
    &self,
    ticket: Ticket,
    collection: Collection,
    outcome: Result<CacheResult<T>, String>,
    paging: Option<Paging>,
    apply: impl FnOnce(&CacheResult<T>),
  ) -> Fetch<T> {
    if self.superseded(&ticket) {
      return QueryState::Superseded;
    }

    match outcome {
      Ok(result) => {
        apply(&result);
        if result.source == CacheSource::Network {
          self.store.record_sync_success();
        }
        self.queries.succeed(&ticket, result.source, paging);
        self.sync_loading(collection);
        debug!(query = ticket.description(), source = ?result.source, "Fetch settled");
        QueryState::Success(result)
      }
      Err(error) => {
        self.queries.fail(&ticket, &error, None);
        self.sync_loading(collection);
        debug!(query = ticket.description(), %error, "Fetch failed with nothing cached");
        QueryState::Error(error)
      }
    }
  }

  /// The list state machine shared by every paginated query.
  async fn run_list<T, F, Fut, Pub>(&self, plan: ListPlan<T>, fetch: F, publish: Pub) -> Fetch<Page<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
    Pub: FnOnce(Page<T>, MergeMode),
  {
    let (ticket, path) = self.begin(&plan.key, plan.collection);

    let outcome = match path {
      FetchPath::Online => match fetch().await {
        Ok(page) => Ok(CacheResult::from_network(page)),
        Err(e) => {
          self.record_failure(&ticket, &e);
          match self.read_cached_page(&plan) {
            CacheRead::Hit((page, cached_at)) if !page.items.is_empty() => {
              Ok(CacheResult::fallback(page, cached_at))
            }
            _ => Err(e.to_string()),
          }
        }
      },
      FetchPath::Offline => match self.read_cached_page(&plan) {
        CacheRead::Hit((page, cached_at)) => Ok(CacheResult::offline(page, cached_at)),
        CacheRead::Miss => Ok(CacheResult::offline(
          Page {
            items: Vec::new(),
            page: plan.query.page,
            limit: plan.query.limit,
            total: 0,
          },
          None,
        )),
        CacheRead::Unavailable(reason) => Err(reason),
      },
    };

    // Paging follows the request, whatever the server echoed back.
    let outcome = outcome.map(|result| {
      result.map(|page| Page {
        page: plan.query.page,
        limit: plan.query.limit,
        ..page
      })
    });
    // The server's page length decides for network pages; cached pages
    // know their matching total.
    let has_more = match &outcome {
      Ok(result) if result.source == CacheSource::Network => {
        plan.query.limit > 0 && result.data.items.len() >= plan.query.limit as usize
      }
      Ok(result) => {
        let seen = PageWindow::page(plan.query.page, plan.query.limit).offset + result.data.items.len();
        (seen as u64) < result.data.total
      }
      Err(_) => false,
    };
    let paging = Paging {
      page: plan.query.page,
      limit: plan.query.limit,
      has_more,
    };

    let mode = plan.mode;
    self.settle(ticket, plan.collection, outcome, Some(paging), |result| {
      publish(result.data.clone(), mode);
      if result.source == CacheSource::Network {
        self.write_through(&result.data.items);
      }
    })
  }
}
