//! Fixtures shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::api::client::{ApiError, ApiResult, ContentApi, RequestOptions};
use crate::api::types::{ClusterPost, ClusterSummary, MediaType, Prompt, ViralChat};
use crate::cache::{CacheStorage, CachedEntity, Cacheable, FamilyKey, PageWindow};

/// Strictly increasing with `n`, so a larger `n` is fresher.
pub fn at(n: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(n as i64)
}

pub fn prompt(id: &str, n: u32) -> Prompt {
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
    created_at: at(n),
    updated_at: None,
  }
}

/// `p{i}` for every `i` in `range`, newest last.
pub fn prompts(range: Range<u32>) -> Vec<Prompt> {
  range.map(|i| prompt(&format!("p{}", i), i)).collect()
}

pub fn chat(id: &str, n: u32) -> ViralChat {
  ViralChat {
    id: id.to_string(),
    title: format!("Chat {}", id),
    platform: "chatgpt".into(),
    summary: None,
    share_url: None,
    message_count: 4,
    likes: 0,
    views: 0,
    category: None,
    created_at: at(n),
    updated_at: None,
  }
}

pub fn cluster(id: &str, n: u32) -> ClusterSummary {
  ClusterSummary {
    id: id.to_string(),
    title: format!("Cluster {}", id),
    summary: None,
    category: None,
    platforms: vec!["reddit".into()],
    post_count: 0,
    heat_score: 1.0,
    is_emerging: false,
    first_seen_at: None,
    last_activity_at: at(n),
    updated_at: None,
  }
}

pub fn post(id: &str, cluster_id: &str, n: u32) -> ClusterPost {
  ClusterPost {
    id: id.to_string(),
    cluster_id: cluster_id.to_string(),
    platform: "reddit".into(),
    author: None,
    content: "post".into(),
    url: None,
    score: 1,
    comments: 0,
    media_type: MediaType::Text,
    posted_at: at(n),
  }
}

/// Backend list envelope around `items`.
pub fn page_json<T: Serialize>(items: &[T], page: u32, limit: u32, total: u64) -> Value {
  json!({ "data": items, "page": page, "limit": limit, "total": total })
}

// ============================================================================
// Storage that always fails
// ============================================================================

pub struct FailingStorage;

impl CacheStorage for FailingStorage {
  fn upsert_many<T: Cacheable>(&self, _entities: &[T]) -> Result<usize> {
    Err(eyre!("disk unavailable"))
  }

  fn read_page<T: Cacheable>(
    &self,
    _family: &FamilyKey,
    _window: PageWindow,
  ) -> Result<Vec<CachedEntity<T>>> {
    Err(eyre!("disk unavailable"))
  }

  fn read_by_id<T: Cacheable>(
    &self,
    _family: &FamilyKey,
    _id: &str,
  ) -> Result<Option<CachedEntity<T>>> {
    Err(eyre!("disk unavailable"))
  }

  fn count(&self, _family: &FamilyKey) -> Result<usize> {
    Err(eyre!("disk unavailable"))
  }

  fn evict(&self, _family: &FamilyKey, _max_entries: usize) -> Result<usize> {
    Err(eyre!("disk unavailable"))
  }

  fn clear(&self, _family: &FamilyKey) -> Result<usize> {
    Err(eyre!("disk unavailable"))
  }
}

// ============================================================================
// Scripted remote
// ============================================================================

enum Canned {
  Json(Value),
  Fail(ApiError),
  /// Answer only after the gate is notified
  Gated(Value, Arc<Notify>),
  /// Never answer
  Hang,
}

/// A [`ContentApi`] answering from per-endpoint queues of canned responses.
///
/// An endpoint with an empty queue fails with a transport error.
#[derive(Default)]
pub struct FakeApi {
  queues: Mutex<HashMap<String, VecDeque<Canned>>>,
  calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
  token: Mutex<Option<String>>,
}

impl FakeApi {
  pub fn new() -> Self {
    Self::default()
  }

  fn push(&self, endpoint: &str, canned: Canned) {
    self
      .queues
      .lock()
      .unwrap()
      .entry(endpoint.to_string())
      .or_default()
      .push_back(canned);
  }

  pub fn push_json(&self, endpoint: &str, body: Value) {
    self.push(endpoint, Canned::Json(body));
  }

  pub fn push_page<T: Serialize>(&self, endpoint: &str, items: &[T], page: u32, limit: u32, total: u64) {
    self.push_json(endpoint, page_json(items, page, limit, total));
  }

  pub fn push_error(&self, endpoint: &str, error: ApiError) {
    self.push(endpoint, Canned::Fail(error));
  }

  pub fn push_gated(&self, endpoint: &str, body: Value, gate: Arc<Notify>) {
    self.push(endpoint, Canned::Gated(body, gate));
  }

  pub fn push_hang(&self, endpoint: &str) {
    self.push(endpoint, Canned::Hang);
  }

  /// Every request issued so far, with its query parameters.
  pub fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, endpoint: &str) -> usize {
    self.calls().iter().filter(|(e, _)| e == endpoint).count()
  }

  pub fn token(&self) -> Option<String> {
    self.token.lock().unwrap().clone()
  }
}

#[async_trait]
impl ContentApi for FakeApi {
  async fn request<T>(&self, endpoint: &str, options: RequestOptions) -> ApiResult<T>
  where
    T: DeserializeOwned + Send + 'static,
  {
    self
      .calls
      .lock()
      .unwrap()
      .push((endpoint.to_string(), options.query.clone()));

    let canned = self
      .queues
      .lock()
      .unwrap()
      .get_mut(endpoint)
      .and_then(|queue| queue.pop_front());

    let body = match canned {
      Some(Canned::Json(body)) => body,
      Some(Canned::Fail(error)) => return Err(error),
      Some(Canned::Gated(body, gate)) => {
        gate.notified().await;
        body
      }
      Some(Canned::Hang) => std::future::pending().await,
      None => {
        return Err(ApiError::Transport(format!(
          "no response scripted for {}",
          endpoint
        )))
      }
    };

    serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
  }

  fn set_token(&self, token: Option<String>) {
    *self.token.lock().unwrap() = token;
  }
}
