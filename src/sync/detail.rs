//! Single-entity fetches.

use super::{Fetch, FetchOrchestrator};
use crate::api::client::Remote;
use crate::api::types::{ClusterSummary, Prompt};
use crate::api::{ContentApi, FeedQueryKey};
use crate::cache::{CacheRead, CacheResult, CacheSource, CacheStorage, Cacheable, FamilyKey};
use crate::query::FetchPath;
use crate::store::{Collection, StatePersistence};

impl<A, S, P> FetchOrchestrator<A, S, P>
where
  A: ContentApi,
  S: CacheStorage,
  P: StatePersistence,
{
  /// Prompt detail. Offline with nothing cached is `Success(None)`.
  pub async fn fetch_prompt(&self, id: &str) -> Fetch<Option<Prompt>> {
    let key = FeedQueryKey::PromptDetail { id: id.to_string() };
    let store = &self.store;
    self
      .run_detail(key, Collection::PromptDetail, id, |prompt| {
        store.set_current_prompt(prompt)
      })
      .await
  }

  /// Cluster detail.
  pub async fn fetch_cluster(&self, id: &str) -> Fetch<Option<ClusterSummary>> {
    let key = FeedQueryKey::ClusterDetail { id: id.to_string() };
    let store = &self.store;
    self
      .run_detail(key, Collection::ClusterDetail, id, |cluster| {
        store.set_current_cluster(cluster)
      })
      .await
  }

  async fn run_detail<T>(
    &self,
    key: FeedQueryKey,
    collection: Collection,
    id: &str,
    publish: impl FnOnce(Option<T>),
  ) -> Fetch<Option<T>>
  where
    T: Cacheable + Remote,
  {
    let (ticket, path) = self.begin(&key, collection);
    let family = FamilyKey::of::<T>();

    let outcome = match path {
      FetchPath::Online => match self.api.get::<T>(id).await {
        Ok(entity) => Ok(CacheResult::from_network(Some(entity))),
        Err(e) => {
          self.record_failure(&ticket, &e);
          match self.cache.read_by_id::<T>(&family, id) {
            CacheRead::Hit(cached) => Ok(CacheResult::fallback(
              Some(cached.entity),
              Some(cached.cached_at),
            )),
            _ => Err(e.to_string()),
          }
        }
      },
      FetchPath::Offline => match self.cache.read_by_id::<T>(&family, id) {
        CacheRead::Hit(cached) => Ok(CacheResult::offline(
          Some(cached.entity),
          Some(cached.cached_at),
        )),
        CacheRead::Miss => Ok(CacheResult::offline(None, None)),
        CacheRead::Unavailable(reason) => Err(reason),
      },
    };

    self.settle(ticket, collection, outcome, None, |result| {
      if result.source == CacheSource::Network {
        if let Some(entity) = &result.data {
          self.write_through(std::slice::from_ref(entity));
        }
      }
      publish(result.data.clone());
    })
  }
}
