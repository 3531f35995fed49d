//! Shape of the global state and the pure transitions on it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::filter::{filter_prompts, FilterState};
use crate::api::types::{
  ClusterPost, ClusterSummary, ContentItem, FeedVariant, Prompt, ViralChat,
};

// ============================================================================
// Persisted subset
// ============================================================================

/// Signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
  pub id: String,
  pub display_name: Option<String>,
  pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
  #[default]
  System,
  Light,
  Dark,
}

/// Outcome of the most recent network sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
  pub last_synced_at: Option<DateTime<Utc>>,
  pub last_attempt_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

/// Everything that survives a process restart.
///
/// This type is the serialization boundary: fields added here are
/// persisted, fields on [`AppState`] outside it are not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
  pub user: Option<UserIdentity>,
  pub is_guest: bool,
  pub theme: Theme,
  pub saved_ids: BTreeSet<String>,
  /// Entity id → reaction kinds
  pub reactions: BTreeMap<String, BTreeSet<String>>,
  pub copied_ids: BTreeSet<String>,
  pub generated_ids: BTreeSet<String>,
  pub is_first_launch: bool,
  pub sync_status: SyncStatus,
}

impl Default for PersistedState {
  fn default() -> Self {
    Self {
      user: None,
      is_guest: false,
      theme: Theme::default(),
      saved_ids: BTreeSet::new(),
      reactions: BTreeMap::new(),
      copied_ids: BTreeSet::new(),
      generated_ids: BTreeSet::new(),
      is_first_launch: true,
      sync_status: SyncStatus::default(),
    }
  }
}

impl PersistedState {
  pub fn is_authenticated(&self) -> bool {
    self.user.is_some() && !self.is_guest
  }

  /// Clear identity and every session-scoped interaction set.
  pub fn clear_session(&mut self) {
    self.user = None;
    self.is_guest = false;
    self.saved_ids.clear();
    self.reactions.clear();
    self.copied_ids.clear();
    self.generated_ids.clear();
  }

  /// Returns false when the reaction was already present.
  pub fn add_reaction(&mut self, id: &str, kind: &str) -> bool {
    self
      .reactions
      .entry(id.to_string())
      .or_default()
      .insert(kind.to_string())
  }

  /// Returns false when there was nothing to remove.
  pub fn remove_reaction(&mut self, id: &str, kind: &str) -> bool {
    let Some(kinds) = self.reactions.get_mut(id) else {
      return false;
    };
    let removed = kinds.remove(kind);
    if kinds.is_empty() {
      self.reactions.remove(id);
    }
    removed
  }
}

// ============================================================================
// Runtime state
// ============================================================================

/// Whether the backend is believed reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
  pub is_online: bool,
  pub last_checked_at: Option<DateTime<Utc>>,
}

impl Default for ConnectivityState {
  fn default() -> Self {
    // Optimistic until the first probe says otherwise.
    Self {
      is_online: true,
      last_checked_at: None,
    }
  }
}

/// How a fetched page is merged into an existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
  Replace,
  Append,
}

/// A paginated collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PageState<T> {
  pub items: Vec<T>,
  pub current_page: u32,
  pub total: u64,
  pub has_more: bool,
}

impl<T> Default for PageState<T> {
  fn default() -> Self {
    Self {
      items: Vec::new(),
      current_page: 1,
      total: 0,
      has_more: true,
    }
  }
}

impl<T: ContentItem> PageState<T> {
  /// Merge one fetched page.
  ///
  /// `has_more` stays true only while the page is at least `limit` long.
  pub fn apply(&mut self, items: Vec<T>, page: u32, limit: u32, total: u64, mode: MergeMode) {
    let received = items.len();
    match mode {
      MergeMode::Replace => {
        self.items = Vec::with_capacity(received);
        merge_unique(&mut self.items, items);
      }
      MergeMode::Append => {
        merge_unique(&mut self.items, items);
      }
    }
    self.current_page = page.max(1);
    self.total = total;
    self.has_more = limit > 0 && received >= limit as usize;
  }
}

/// Append `incoming` to `existing`, dropping ids already present.
///
/// Returns how many items were added.
pub fn merge_unique<T: ContentItem>(existing: &mut Vec<T>, incoming: Vec<T>) -> usize {
  let mut seen: HashSet<String> = existing.iter().map(|i| i.id().to_string()).collect();
  let before = existing.len();
  for item in incoming {
    if seen.insert(item.id().to_string()) {
      existing.push(item);
    }
  }
  existing.len() - before
}

/// Collections that carry a loading flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Prompts,
  PromptFeed,
  PromptDetail,
  ViralChats,
  Clusters,
  ClusterFeed,
  ClusterDetail,
  ClusterPosts,
  SavedPrompts,
  Search,
}

/// Results of the most recent search.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchState {
  pub text: String,
  pub results: PageState<Prompt>,
  pub error: Option<String>,
}

/// Full process-wide state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppState {
  pub persisted: PersistedState,

  pub connectivity: ConnectivityState,
  pub prompts: PageState<Prompt>,
  /// `prompts` after applying `filters`
  pub filtered_prompts: Vec<Prompt>,
  pub filters: FilterState,
  pub prompt_feeds: HashMap<FeedVariant, Vec<Prompt>>,
  pub current_prompt: Option<Prompt>,
  pub saved_prompts: Vec<Prompt>,
  pub viral_chats: PageState<ViralChat>,
  pub clusters: PageState<ClusterSummary>,
  pub cluster_feeds: HashMap<FeedVariant, Vec<ClusterSummary>>,
  pub current_cluster: Option<ClusterSummary>,
  pub cluster_posts: HashMap<String, PageState<ClusterPost>>,
  pub search: SearchState,
  pub loading: HashSet<Collection>,
}

impl AppState {
  /// Fresh state around a hydrated persisted subset.
  pub fn with_persisted(persisted: PersistedState) -> Self {
    let mut state = Self {
      persisted,
      ..Self::default()
    };
    state.refilter();
    state
  }

  /// Recompute `filtered_prompts` from `prompts` and `filters`.
  pub fn refilter(&mut self) {
    self.filtered_prompts =
      filter_prompts(&self.prompts.items, &self.filters, &self.persisted.saved_ids);
  }

  pub fn is_loading(&self, collection: Collection) -> bool {
    self.loading.contains(&collection)
  }

  /// Cache namespace of the current session.
  pub fn session_namespace(&self) -> String {
    self
      .persisted
      .user
      .as_ref()
      .map(|u| u.id.clone())
      .unwrap_or_else(|| "guest".to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::prompt;

  fn ids<T: ContentItem>(items: &[T]) -> Vec<&str> {
    items.iter().map(|i| i.id()).collect()
  }

  #[test]
  fn test_merge_unique_drops_existing_and_repeated_ids() {
    let mut existing = vec![prompt("a", 1), prompt("b", 2)];
    let added = merge_unique(
      &mut existing,
      vec![prompt("b", 2), prompt("c", 3), prompt("c", 3)],
    );
    assert_eq!(added, 1);
    assert_eq!(ids(&existing), vec!["a", "b", "c"]);
  }

  #[test]
  fn test_page_state_has_more_tracks_page_size() {
    let mut page = PageState::default();
    page.apply(
      (0..20).map(|i| prompt(&format!("p{}", i), 1)).collect(),
      1,
      20,
      57,
      MergeMode::Replace,
    );
    assert!(page.has_more);

    page.apply(
      (20..37).map(|i| prompt(&format!("p{}", i), 1)).collect(),
      2,
      20,
      57,
      MergeMode::Append,
    );
    assert!(!page.has_more);
    assert_eq!(page.items.len(), 37);
    assert_eq!(page.current_page, 2);
  }

  #[test]
  fn test_empty_page_clears_has_more() {
    let mut page: PageState<Prompt> = PageState::default();
    page.apply(Vec::new(), 1, 20, 0, MergeMode::Replace);
    assert!(!page.has_more);
    assert_eq!(page.total, 0);
  }

  #[test]
  fn test_reactions_are_sets() {
    let mut persisted = PersistedState::default();
    assert!(persisted.add_reaction("p1", "fire"));
    assert!(!persisted.add_reaction("p1", "fire"));
    assert_eq!(persisted.reactions["p1"].len(), 1);

    assert!(persisted.remove_reaction("p1", "fire"));
    assert!(!persisted.reactions.contains_key("p1"));
    assert!(!persisted.remove_reaction("p1", "fire"));
  }

  #[test]
  fn test_persisted_state_tolerates_missing_fields() {
    let persisted: PersistedState = serde_json::from_str(r#"{ "theme": "dark" }"#).unwrap();
    assert_eq!(persisted.theme, Theme::Dark);
    assert!(persisted.is_first_launch);
    assert!(persisted.saved_ids.is_empty());
  }
}
