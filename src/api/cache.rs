//! Caching implementations for content types.

use sha2::{Digest, Sha256};

use crate::cache::{Cacheable, QueryKey};

use super::types::{
  ClusterPost, ClusterSummary, FeedVariant, ListQuery, Prompt, SavedId, ViralChat,
};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Prompt {
  fn entity_type() -> &'static str {
    "prompt"
  }
}

impl Cacheable for ViralChat {
  fn entity_type() -> &'static str {
    "viral_chat"
  }
}

impl Cacheable for ClusterSummary {
  fn entity_type() -> &'static str {
    "cluster"
  }
}

impl Cacheable for ClusterPost {
  fn entity_type() -> &'static str {
    "cluster_post"
  }

  fn scope(&self) -> Option<&str> {
    Some(&self.cluster_id)
  }
}

impl Cacheable for SavedId {
  fn entity_type() -> &'static str {
    "saved_id"
  }

  fn scope(&self) -> Option<&str> {
    Some(&self.user_id)
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Logical queries issued by the fetch orchestrator.
///
/// Paginated queries identify the whole result set, so the page number is
/// not part of the key.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedQueryKey {
  /// Prompt list with server-side filters
  Prompts { query: ListQuery },
  /// Fixed prompt feed (trending, viral)
  PromptFeed { variant: FeedVariant },
  /// A single prompt
  PromptDetail { id: String },
  /// Viral chat list
  ViralChats { query: ListQuery },
  /// Cluster list
  Clusters { query: ListQuery },
  /// Fixed cluster feed (trending, emerging)
  ClusterFeed { variant: FeedVariant },
  /// A single cluster
  ClusterDetail { id: String },
  /// Posts of one cluster
  ClusterPosts { cluster_id: String },
  /// Prompts saved by a user
  SavedPrompts { user_id: String },
  /// Prompt search
  Search { text: String },
}

impl QueryKey for FeedQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::Prompts { query } => format!("prompts:{}", normalize_filters(query)),
      Self::PromptFeed { variant } => format!("prompt_feed:{}", variant.sub_route()),
      Self::PromptDetail { id } => format!("prompt:{}", id),
      Self::ViralChats { query } => format!("viral_chats:{}", normalize_filters(query)),
      Self::Clusters { query } => format!("clusters:{}", normalize_filters(query)),
      Self::ClusterFeed { variant } => format!("cluster_feed:{}", variant.sub_route()),
      Self::ClusterDetail { id } => format!("cluster:{}", id),
      Self::ClusterPosts { cluster_id } => format!("cluster_posts:{}", cluster_id),
      Self::SavedPrompts { user_id } => format!("saved:{}", user_id),
      Self::Search { text } => format!("search:{}", normalize_text(text)),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
  }

  fn description(&self) -> String {
    match self {
      Self::Prompts { query } => format!("prompts [{}]", normalize_filters(query)),
      Self::PromptFeed { variant } => format!("{} prompts", variant.sub_route()),
      Self::PromptDetail { id } => format!("prompt {}", id),
      Self::ViralChats { query } => format!("viral chats [{}]", normalize_filters(query)),
      Self::Clusters { query } => format!("clusters [{}]", normalize_filters(query)),
      Self::ClusterFeed { variant } => format!("{} clusters", variant.sub_route()),
      Self::ClusterDetail { id } => format!("cluster {}", id),
      Self::ClusterPosts { cluster_id } => format!("cluster {} posts", cluster_id),
      Self::SavedPrompts { user_id } => format!("saved prompts of {}", user_id),
      Self::Search { text } => format!("search \"{}\"", text),
    }
  }
}

/// Filters of a list query without the page number.
fn normalize_filters(query: &ListQuery) -> String {
  query
    .to_params()
    .into_iter()
    .filter(|(k, _)| k != "page")
    .map(|(k, v)| format!("{}={}", k, normalize_text(&v)))
    .collect::<Vec<_>>()
    .join("&")
}

/// Trims whitespace and lowercases for case-insensitive matching.
fn normalize_text(text: &str) -> String {
  text.trim().to_lowercase()
}
