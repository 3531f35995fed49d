//! Prompt search. Network only: there is no offline path and no fallback.

use tracing::info;

use super::{Fetch, FetchOrchestrator};
use crate::api::types::{Page, Prompt};
use crate::api::{ContentApi, FeedQueryKey};
use crate::cache::{CacheResult, CacheStorage};
use crate::query::{FetchPath, Paging, QueryState};
use crate::store::{Collection, MergeMode, StatePersistence};

/// Reported when a search is attempted without connectivity.
pub const SEARCH_OFFLINE_ERROR: &str = "Search is unavailable offline";

impl<A, S, P> FetchOrchestrator<A, S, P>
where
  A: ContentApi,
  S: CacheStorage,
  P: StatePersistence,
{
  /// First page of results for `text`, replacing the previous search.
  pub async fn search(&self, text: &str) -> Fetch<Page<Prompt>> {
    self.search_page(text, 1, MergeMode::Replace).await
  }

  /// Next page of the current search; `Idle` when there is nothing to load.
  pub async fn load_more_search(&self) -> Fetch<Page<Prompt>> {
    let text = self.store.read(|s| s.search.text.clone());
    if text.trim().is_empty() {
      return QueryState::Idle;
    }
    let key = FeedQueryKey::Search { text: text.clone() };
    match self.next_page(&key) {
      Some(page) => self.search_page(&text, page, MergeMode::Append).await,
      None => QueryState::Idle,
    }
  }

  async fn search_page(&self, text: &str, page: u32, mode: MergeMode) -> Fetch<Page<Prompt>> {
    let key = FeedQueryKey::Search {
      text: text.to_string(),
    };
    let limit = self.settings.page_size;
    let (ticket, path) = self.begin(&key, Collection::Search);
    info!(text, page, "Searching prompts");

    let outcome = match path {
      FetchPath::Offline => Err(SEARCH_OFFLINE_ERROR.to_string()),
      FetchPath::Online => match self.api.search_prompts(text, page, limit).await {
        // Paging follows the request, whatever the server echoed back.
        Ok(result) => Ok(CacheResult::from_network(Page {
          page,
          limit,
          ..result
        })),
        Err(e) => {
          self.store.record_sync_failure(&e.to_string());
          Err(e.to_string())
        }
      },
    };

    let paging = outcome.as_ref().ok().map(|result| Paging {
      page,
      limit,
      has_more: limit > 0 && result.data.items.len() >= limit as usize,
    });

    if let Err(error) = &outcome {
      if self.queries.is_current(&ticket) {
        self.store.set_search_error(text, error);
      }
    }

    self.settle(ticket, Collection::Search, outcome, paging, |result| {
      self.store.set_search_results(text, result.data.clone(), mode);
      self.write_through(&result.data.items);
    })
  }
}
