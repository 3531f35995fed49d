//! Paginated lists, fixed feeds, cluster posts and saved prompts.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Fetch, FetchOrchestrator, ListPlan};
use crate::api::client::Remote;
use crate::api::types::{
  ClusterPost, ClusterSummary, FeedVariant, ListQuery, Page, Prompt, SavedId, ViralChat,
};
use crate::api::{ContentApi, FeedQueryKey};
use crate::cache::{
  CacheRead, CacheResult, CacheSource, CacheStorage, Cacheable, FamilyKey, PageWindow, QueryKey,
};
use crate::query::{FetchPath, QueryState};
use crate::store::{Collection, GlobalStore, MergeMode, StatePersistence};

/// A top-level list resource the orchestrator knows how to page through.
pub trait Listing: Cacheable + Remote {
  /// Loading flag raised while a page is in flight.
  const COLLECTION: Collection;

  fn query_key(query: &ListQuery) -> FeedQueryKey;

  /// Merge a settled page into the store.
  fn publish<P: StatePersistence>(store: &GlobalStore<P>, page: Page<Self>, mode: MergeMode);

  /// Stand-in for server-side filtering when serving cached rows.
  fn cache_filter() -> Option<fn(&ListQuery, &Self) -> bool> {
    None
  }
}

impl Listing for Prompt {
  const COLLECTION: Collection = Collection::Prompts;

  fn query_key(query: &ListQuery) -> FeedQueryKey {
    FeedQueryKey::Prompts {
      query: query.with_page(1),
    }
  }

  fn publish<P: StatePersistence>(store: &GlobalStore<P>, page: Page<Self>, mode: MergeMode) {
    store.apply_prompt_page(page, mode);
  }

  fn cache_filter() -> Option<fn(&ListQuery, &Self) -> bool> {
    Some(ListQuery::matches_prompt)
  }
}

impl Listing for ViralChat {
  const COLLECTION: Collection = Collection::ViralChats;

  fn query_key(query: &ListQuery) -> FeedQueryKey {
    FeedQueryKey::ViralChats {
      query: query.with_page(1),
    }
  }

  fn publish<P: StatePersistence>(store: &GlobalStore<P>, page: Page<Self>, mode: MergeMode) {
    store.apply_viral_chat_page(page, mode);
  }
}

impl Listing for ClusterSummary {
  const COLLECTION: Collection = Collection::Clusters;

  fn query_key(query: &ListQuery) -> FeedQueryKey {
    FeedQueryKey::Clusters {
      query: query.with_page(1),
    }
  }

  fn publish<P: StatePersistence>(store: &GlobalStore<P>, page: Page<Self>, mode: MergeMode) {
    store.apply_cluster_page(page, mode);
  }
}

fn keep_emerging(_query: &ListQuery, cluster: &ClusterSummary) -> bool {
  cluster.is_emerging
}

impl<A, S, P> FetchOrchestrator<A, S, P>
where
  A: ContentApi,
  S: CacheStorage,
  P: StatePersistence,
{
  /// Default first-page query.
  pub fn first_page(&self) -> ListQuery {
    ListQuery::new(1, self.settings.page_size)
  }

  // ==========================================================================
  // Top-level lists
  // ==========================================================================

  /// Fetch page 1 of a list, replacing the collection.
  pub async fn fetch_list<T: Listing>(&self, query: &ListQuery) -> Fetch<Page<T>> {
    self.list_page(query.with_page(1), MergeMode::Replace).await
  }

  /// Reset pagination to page 1 and fetch again, whatever the current state.
  pub async fn refetch_list<T: Listing>(&self, query: &ListQuery) -> Fetch<Page<T>> {
    debug!(query = %T::query_key(query).description(), "Refetch requested");
    self.fetch_list::<T>(query).await
  }

  /// Append the next page.
  ///
  /// Returns `Idle` without any request when the query is already loading,
  /// was never fetched, or reported no further pages.
  pub async fn load_more<T: Listing>(&self, query: &ListQuery) -> Fetch<Page<T>> {
    match self.next_page(&T::query_key(query)) {
      Some(page) => self.list_page(query.with_page(page), MergeMode::Append).await,
      None => QueryState::Idle,
    }
  }

  async fn list_page<T: Listing>(&self, query: ListQuery, mode: MergeMode) -> Fetch<Page<T>> {
    let plan = ListPlan {
      key: T::query_key(&query),
      collection: T::COLLECTION,
      family: FamilyKey::of::<T>(),
      query: query.clone(),
      mode,
      keep: T::cache_filter(),
    };
    let api = &self.api;
    let store = &self.store;
    self
      .run_list(
        plan,
        || async move { api.list::<T>(&query).await },
        |page, mode| T::publish(store, page, mode),
      )
      .await
  }

  /// First pages of every top-level list and feed, polled concurrently on
  /// the calling task. Returns how many of them ended in an error.
  pub async fn refresh_all(&self) -> usize {
    let query = self.first_page();
    let (prompts, chats, clusters, trending, viral, hot, emerging) = futures::join!(
      self.fetch_list::<Prompt>(&query),
      self.fetch_list::<ViralChat>(&query),
      self.fetch_list::<ClusterSummary>(&query),
      self.fetch_prompt_feed(FeedVariant::Trending),
      self.fetch_prompt_feed(FeedVariant::Viral),
      self.fetch_cluster_feed(FeedVariant::Trending),
      self.fetch_cluster_feed(FeedVariant::Emerging),
    );

    let failed = [
      prompts.is_error(),
      chats.is_error(),
      clusters.is_error(),
      trending.is_error(),
      viral.is_error(),
      hot.is_error(),
      emerging.is_error(),
    ]
    .into_iter()
    .filter(|failed| *failed)
    .count();
    debug!(failed, "Refresh finished");
    failed
  }

  // ==========================================================================
  // Fixed feeds
  // ==========================================================================

  /// Trending or viral prompts. Cached rows are shared with the prompt list.
  pub async fn fetch_prompt_feed(&self, variant: FeedVariant) -> Fetch<Page<Prompt>> {
    let query = self.first_page();
    let plan = ListPlan {
      key: FeedQueryKey::PromptFeed { variant },
      collection: Collection::PromptFeed,
      family: FamilyKey::of::<Prompt>(),
      query: query.clone(),
      mode: MergeMode::Replace,
      keep: None,
    };
    let api = &self.api;
    let store = &self.store;
    self
      .run_list(
        plan,
        || async move { api.feed::<Prompt>(variant, &query).await },
        |page, _| store.set_prompt_feed(variant, page.items),
      )
      .await
  }

  /// Trending or emerging clusters.
  pub async fn fetch_cluster_feed(&self, variant: FeedVariant) -> Fetch<Page<ClusterSummary>> {
    let query = self.first_page();
    let keep: Option<fn(&ListQuery, &ClusterSummary) -> bool> = match variant {
      FeedVariant::Emerging => Some(keep_emerging),
      _ => None,
    };
    let plan = ListPlan {
      key: FeedQueryKey::ClusterFeed { variant },
      collection: Collection::ClusterFeed,
      family: FamilyKey::of::<ClusterSummary>(),
      query: query.clone(),
      mode: MergeMode::Replace,
      keep,
    };
    let api = &self.api;
    let store = &self.store;
    self
      .run_list(
        plan,
        || async move { api.feed::<ClusterSummary>(variant, &query).await },
        |page, _| store.set_cluster_feed(variant, page.items),
      )
      .await
  }

  // ==========================================================================
  // Cluster posts
  // ==========================================================================

  /// First page of a cluster's posts.
  pub async fn fetch_cluster_posts(&self, cluster_id: &str) -> Fetch<Page<ClusterPost>> {
    self
      .cluster_post_page(cluster_id, self.first_page(), MergeMode::Replace)
      .await
  }

  pub async fn load_more_cluster_posts(&self, cluster_id: &str) -> Fetch<Page<ClusterPost>> {
    let key = FeedQueryKey::ClusterPosts {
      cluster_id: cluster_id.to_string(),
    };
    match self.next_page(&key) {
      Some(page) => {
        self
          .cluster_post_page(cluster_id, self.first_page().with_page(page), MergeMode::Append)
          .await
      }
      None => QueryState::Idle,
    }
  }

  async fn cluster_post_page(
    &self,
    cluster_id: &str,
    query: ListQuery,
    mode: MergeMode,
  ) -> Fetch<Page<ClusterPost>> {
    let plan = ListPlan {
      key: FeedQueryKey::ClusterPosts {
        cluster_id: cluster_id.to_string(),
      },
      collection: Collection::ClusterPosts,
      family: FamilyKey::scoped::<ClusterPost>(cluster_id),
      query: query.clone(),
      mode,
      keep: None,
    };
    let api = &self.api;
    let store = &self.store;
    self
      .run_list(
        plan,
        || async move { api.cluster_posts(cluster_id, &query).await },
        |page, mode| store.apply_cluster_post_page(cluster_id, page, mode),
      )
      .await
  }

  // ==========================================================================
  // Saved prompts
  // ==========================================================================

  /// Prompts saved in the current session.
  ///
  /// Server ids are merged into the local saved set, which is never pushed
  /// back. Offline, the saved-id family and the prompt cache are joined.
  pub async fn fetch_saved_prompts(&self) -> Fetch<Vec<Prompt>> {
    let namespace = self.store.read(|s| s.session_namespace());
    let key = FeedQueryKey::SavedPrompts {
      user_id: namespace.clone(),
    };
    let (ticket, path) = self.begin(&key, Collection::SavedPrompts);

    let outcome = match path {
      FetchPath::Online => {
        let query = ListQuery::new(1, self.cache.max_entries_per_family() as u32);
        match self.api.saved_prompts(&query).await {
          Ok(page) => Ok(CacheResult::from_network(page.items)),
          Err(e) => {
            self.record_failure(&ticket, &e);
            match self.cached_saved_prompts(&namespace) {
              CacheRead::Hit((prompts, cached_at)) => Ok(CacheResult::fallback(prompts, cached_at)),
              _ => Err(e.to_string()),
            }
          }
        }
      }
      FetchPath::Offline => match self.cached_saved_prompts(&namespace) {
        CacheRead::Hit((prompts, cached_at)) => Ok(CacheResult::offline(prompts, cached_at)),
        CacheRead::Miss => Ok(CacheResult::offline(Vec::new(), None)),
        CacheRead::Unavailable(reason) => Err(reason),
      },
    };

    self.settle(ticket, Collection::SavedPrompts, outcome, None, |result| {
      if result.source == CacheSource::Network {
        self.write_through(&result.data);
        let mut ids = self.store.read(|s| s.persisted.saved_ids.clone());
        ids.extend(result.data.iter().map(|p| p.id.clone()));
        self.store.set_saved_ids(ids);
        self.sync_saved_family(&namespace);
      }
      self.store.set_saved_prompts(result.data.clone());
    })
  }

  /// Join the cached saved-id family (plus local saves) with cached prompts.
  fn cached_saved_prompts(
    &self,
    namespace: &str,
  ) -> CacheRead<(Vec<Prompt>, Option<DateTime<Utc>>)> {
    let family = FamilyKey::scoped::<SavedId>(namespace);
    let window = PageWindow::new(self.cache.max_entries_per_family(), 0);
    let mut ids: Vec<String> = match self.cache.read_page::<SavedId>(&family, window) {
      CacheRead::Hit(page) => page.items.into_iter().map(|s| s.prompt_id).collect(),
      CacheRead::Miss => Vec::new(),
      CacheRead::Unavailable(reason) => return CacheRead::Unavailable(reason),
    };
    for id in self.store.read(|s| s.persisted.saved_ids.clone()) {
      if !ids.contains(&id) {
        ids.push(id);
      }
    }

    self
      .cache
      .read_many::<Prompt>(&FamilyKey::of::<Prompt>(), &ids)
      .map(|page| (page.items, page.cached_at))
  }

  /// Mirror the store's saved-id set into the session's saved-id family,
  /// keeping the original `saved_at` of ids that were already cached.
  pub(super) fn sync_saved_family(&self, namespace: &str) {
    let family = FamilyKey::scoped::<SavedId>(namespace);
    let window = PageWindow::new(self.cache.max_entries_per_family(), 0);
    let cached: Vec<SavedId> = self
      .cache
      .read_page::<SavedId>(&family, window)
      .into_option()
      .map(|page| page.items)
      .unwrap_or_default();

    let now = Utc::now();
    let saved: Vec<SavedId> = self
      .store
      .read(|s| s.persisted.saved_ids.clone())
      .into_iter()
      .map(|prompt_id| {
        cached
          .iter()
          .find(|s| s.prompt_id == prompt_id)
          .cloned()
          .unwrap_or_else(|| SavedId {
            prompt_id,
            user_id: namespace.to_string(),
            saved_at: now,
          })
      })
      .collect();

    self.cache.replace_family(&family, &saved);
  }
}
