//! Domain types for remote-sourced content.
//!
//! These are also the shapes persisted in the local cache, so every type
//! round-trips through serde with the backend's camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything that lives in a fetched collection and is identified by `id`.
pub trait ContentItem {
  /// Stable identifier, unique within a collection.
  fn id(&self) -> &str;

  /// Timestamp used for the family's "most recent first" ordering.
  fn freshness(&self) -> DateTime<Utc>;
}

/// Media kind a piece of content produces or contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
  #[default]
  Text,
  Image,
  Video,
  Audio,
  #[serde(other)]
  Other,
}

impl MediaType {
  pub fn as_str(&self) -> &'static str {
    match self {
      MediaType::Text => "text",
      MediaType::Image => "image",
      MediaType::Video => "video",
      MediaType::Audio => "audio",
      MediaType::Other => "other",
    }
  }
}

/// A shareable prompt for a generative tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub content: String,
  pub description: Option<String>,
  #[serde(default)]
  pub platform: String,
  pub tool: Option<String>,
  #[serde(default)]
  pub media_type: MediaType,
  pub category: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  pub image_url: Option<String>,
  #[serde(default)]
  pub likes: u64,
  #[serde(default)]
  pub views: u64,
  #[serde(default)]
  pub copies: u64,
  #[serde(default)]
  pub saves: u64,
  pub trending_score: Option<f64>,
  #[serde(default)]
  pub approved: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: Option<DateTime<Utc>>,
}

/// A conversation that went viral on some chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViralChat {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub platform: String,
  pub summary: Option<String>,
  pub share_url: Option<String>,
  #[serde(default)]
  pub message_count: u32,
  #[serde(default)]
  pub likes: u64,
  #[serde(default)]
  pub views: u64,
  pub category: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: Option<DateTime<Utc>>,
}

/// An aggregated topic built from posts across platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
  pub id: String,
  pub title: String,
  pub summary: Option<String>,
  pub category: Option<String>,
  #[serde(default)]
  pub platforms: Vec<String>,
  #[serde(default)]
  pub post_count: u32,
  #[serde(default)]
  pub heat_score: f64,
  #[serde(default)]
  pub is_emerging: bool,
  pub first_seen_at: Option<DateTime<Utc>>,
  pub last_activity_at: DateTime<Utc>,
  pub updated_at: Option<DateTime<Utc>>,
}

/// A single source post that belongs to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPost {
  pub id: String,
  pub cluster_id: String,
  #[serde(default)]
  pub platform: String,
  pub author: Option<String>,
  #[serde(default)]
  pub content: String,
  pub url: Option<String>,
  #[serde(default)]
  pub score: i64,
  #[serde(default)]
  pub comments: u32,
  #[serde(default)]
  pub media_type: MediaType,
  pub posted_at: DateTime<Utc>,
}

/// Marker that a prompt is saved by a given user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedId {
  pub prompt_id: String,
  pub user_id: String,
  pub saved_at: DateTime<Utc>,
}

impl ContentItem for Prompt {
  fn id(&self) -> &str {
    &self.id
  }

  fn freshness(&self) -> DateTime<Utc> {
    self.created_at
  }
}

impl ContentItem for ViralChat {
  fn id(&self) -> &str {
    &self.id
  }

  fn freshness(&self) -> DateTime<Utc> {
    self.created_at
  }
}

impl ContentItem for ClusterSummary {
  fn id(&self) -> &str {
    &self.id
  }

  fn freshness(&self) -> DateTime<Utc> {
    self.last_activity_at
  }
}

impl ContentItem for ClusterPost {
  fn id(&self) -> &str {
    &self.id
  }

  fn freshness(&self) -> DateTime<Utc> {
    self.posted_at
  }
}

impl ContentItem for SavedId {
  fn id(&self) -> &str {
    &self.prompt_id
  }

  fn freshness(&self) -> DateTime<Utc> {
    self.saved_at
  }
}

/// One page of a paginated list, as returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: u32,
  pub limit: u32,
  pub total: u64,
}

/// Fixed sub-routes of the list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedVariant {
  Trending,
  Viral,
  Emerging,
}

impl FeedVariant {
  pub fn sub_route(&self) -> &'static str {
    match self {
      FeedVariant::Trending => "trending",
      FeedVariant::Viral => "viral",
      FeedVariant::Emerging => "emerging",
    }
  }
}

/// Sort orders understood by the list endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
  #[default]
  Newest,
  Popular,
  Trending,
}

impl SortOrder {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortOrder::Newest => "newest",
      SortOrder::Popular => "popular",
      SortOrder::Trending => "trending",
    }
  }
}

/// Parameters for a list request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListQuery {
  pub page: u32,
  pub limit: u32,
  /// Platform / content type (`type` query parameter)
  pub kind: Option<String>,
  pub media_type: Option<MediaType>,
  pub category: Option<String>,
  pub sort: Option<SortOrder>,
  pub approved: Option<bool>,
}

impl ListQuery {
  pub fn new(page: u32, limit: u32) -> Self {
    Self {
      page: page.max(1),
      limit,
      ..Self::default()
    }
  }

  /// Same filters, different page.
  pub fn with_page(&self, page: u32) -> Self {
    Self {
      page: page.max(1),
      ..self.clone()
    }
  }

  /// Offset of the first item of this page.
  pub fn offset(&self) -> usize {
    (self.page.max(1) as usize - 1) * self.limit as usize
  }

  /// Render as URL query parameters.
  pub fn to_params(&self) -> Vec<(String, String)> {
    let mut params = vec![
      ("page".to_string(), self.page.max(1).to_string()),
      ("limit".to_string(), self.limit.to_string()),
    ];
    if let Some(kind) = &self.kind {
      params.push(("type".to_string(), kind.clone()));
    }
    if let Some(media_type) = self.media_type {
      params.push(("mediaType".to_string(), media_type.as_str().to_string()));
    }
    if let Some(category) = &self.category {
      params.push(("category".to_string(), category.clone()));
    }
    if let Some(sort) = self.sort {
      params.push(("sort".to_string(), sort.as_str().to_string()));
    }
    if let Some(approved) = self.approved {
      params.push(("approved".to_string(), approved.to_string()));
    }
    params
  }

  /// Whether a cached prompt satisfies this query's classification filters.
  ///
  /// Used on the offline path, where the server-side filtering is unavailable.
  pub fn matches_prompt(&self, prompt: &Prompt) -> bool {
    if let Some(kind) = &self.kind {
      if !prompt.platform.eq_ignore_ascii_case(kind) {
        return false;
      }
    }
    if let Some(media_type) = self.media_type {
      if prompt.media_type != media_type {
        return false;
      }
    }
    if let Some(category) = &self.category {
      if !prompt
        .category
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case(category))
      {
        return false;
      }
    }
    if let Some(approved) = self.approved {
      if prompt.approved != approved {
        return false;
      }
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_prompt_deserializes_with_defaults() {
    let json = r#"{
      "id": "p1",
      "title": "Neon city",
      "createdAt": "2024-05-01T10:00:00Z",
      "mediaType": "image"
    }"#;
    let prompt: Prompt = serde_json::from_str(json).unwrap();
    assert_eq!(prompt.id, "p1");
    assert_eq!(prompt.media_type, MediaType::Image);
    assert_eq!(prompt.likes, 0);
    assert!(prompt.tags.is_empty());
  }

  #[test]
  fn test_unknown_media_type_is_other() {
    let media: MediaType = serde_json::from_str("\"hologram\"").unwrap();
    assert_eq!(media, MediaType::Other);
  }

  #[test]
  fn test_list_query_params() {
    let query = ListQuery {
      kind: Some("midjourney".into()),
      media_type: Some(MediaType::Video),
      sort: Some(SortOrder::Popular),
      approved: Some(true),
      ..ListQuery::new(2, 20)
    };
    let params = query.to_params();
    assert!(params.contains(&("page".into(), "2".into())));
    assert!(params.contains(&("limit".into(), "20".into())));
    assert!(params.contains(&("type".into(), "midjourney".into())));
    assert!(params.contains(&("mediaType".into(), "video".into())));
    assert!(params.contains(&("sort".into(), "popular".into())));
    assert!(params.contains(&("approved".into(), "true".into())));
    assert_eq!(query.offset(), 20);
  }

  #[test]
  fn test_page_zero_is_clamped() {
    assert_eq!(ListQuery::new(0, 10).page, 1);
    assert_eq!(ListQuery::new(0, 10).offset(), 0);
  }
}
