//! Process-wide reactive state with a persisted subset.
//!
//! Every mutation is one atomic replacement step on a `watch` channel, so
//! subscribers only ever observe committed states. Mutations that touch
//! [`PersistedState`] are written to the injected [`StatePersistence`]
//! right after they commit.

mod filter;
mod persist;
mod state;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::types::{ClusterPost, ClusterSummary, FeedVariant, Page, Prompt, ViralChat};

pub use filter::{filter_prompts, FilterState};
pub use persist::{JsonFilePersistence, MemoryPersistence, StatePersistence};
pub use state::{
  merge_unique, AppState, Collection, ConnectivityState, MergeMode, PageState, PersistedState,
  SearchState, SyncStatus, Theme, UserIdentity,
};

/// The global state container.
pub struct GlobalStore<P: StatePersistence> {
  tx: watch::Sender<AppState>,
  persistence: Arc<P>,
}

impl<P: StatePersistence> GlobalStore<P> {
  /// Build the store, hydrating the persisted subset.
  ///
  /// An unreadable saved state is logged and replaced by defaults.
  pub fn hydrate(persistence: P) -> Self {
    let persisted = match persistence.load() {
      Ok(Some(persisted)) => {
        debug!("Hydrated persisted state");
        persisted
      }
      Ok(None) => PersistedState::default(),
      Err(e) => {
        warn!(error = %e, "Failed to load persisted state, starting fresh");
        PersistedState::default()
      }
    };

    let (tx, _rx) = watch::channel(AppState::with_persisted(persisted));
    Self {
      tx,
      persistence: Arc::new(persistence),
    }
  }

  /// Receive every committed state from now on.
  pub fn subscribe(&self) -> watch::Receiver<AppState> {
    self.tx.subscribe()
  }

  /// Clone of the current state.
  pub fn snapshot(&self) -> AppState {
    self.tx.borrow().clone()
  }

  /// Read the current state without cloning it.
  pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
    f(&self.tx.borrow())
  }

  pub fn is_online(&self) -> bool {
    self.read(|s| s.connectivity.is_online)
  }

  pub fn persistence(&self) -> &P {
    &self.persistence
  }

  // ==========================================================================
  // Transition plumbing
  // ==========================================================================

  /// Runtime-only transition.
  fn update(&self, f: impl FnOnce(&mut AppState)) {
    self.tx.send_modify(f);
  }

  /// Transition that may touch the persisted subset; persists if it did.
  fn update_persisted(&self, f: impl FnOnce(&mut AppState)) {
    let mut changed = None;
    self.tx.send_modify(|state| {
      let before = state.persisted.clone();
      f(state);
      if state.persisted != before {
        changed = Some(state.persisted.clone());
      }
    });

    if let Some(persisted) = changed {
      if let Err(e) = self.persistence.save(&persisted) {
        warn!(error = %e, "Failed to persist state");
      }
    }
  }

  // ==========================================================================
  // Session
  // ==========================================================================

  /// Start an authenticated session.
  pub fn login(&self, user: UserIdentity) {
    info!(user_id = %user.id, "Session started");
    self.update_persisted(|s| {
      s.persisted.user = Some(user);
      s.persisted.is_guest = false;
    });
  }

  /// Start a guest session under a stable guest id.
  pub fn login_guest(&self, guest_id: &str) {
    info!(guest_id, "Guest session started");
    let user = UserIdentity {
      id: guest_id.to_string(),
      display_name: None,
      email: None,
    };
    self.update_persisted(|s| {
      s.persisted.user = Some(user);
      s.persisted.is_guest = true;
    });
  }

  /// End the session: identity and all interaction sets go in one step.
  pub fn logout(&self) {
    info!("Session ended");
    self.update_persisted(|s| {
      s.persisted.clear_session();
      s.saved_prompts.clear();
      s.filters.saved_only = false;
      s.refilter();
    });
  }

  pub fn set_theme(&self, theme: Theme) {
    self.update_persisted(|s| s.persisted.theme = theme);
  }

  /// Flip the saved flag of a prompt. Returns whether it is now saved.
  pub fn toggle_saved(&self, id: &str) -> bool {
    let mut saved = false;
    self.update_persisted(|s| {
      saved = if s.persisted.saved_ids.remove(id) {
        s.saved_prompts.retain(|p| p.id != id);
        false
      } else {
        s.persisted.saved_ids.insert(id.to_string());
        true
      };
      if s.filters.saved_only {
        s.refilter();
      }
    });
    saved
  }

  /// Replace the saved-id set (e.g., after syncing saved prompts).
  pub fn set_saved_ids(&self, ids: impl IntoIterator<Item = String>) {
    let ids = ids.into_iter().collect();
    self.update_persisted(|s| {
      s.persisted.saved_ids = ids;
      if s.filters.saved_only {
        s.refilter();
      }
    });
  }

  /// Add a reaction. Adding one that is already present is a no-op.
  pub fn add_reaction(&self, id: &str, kind: &str) {
    self.update_persisted(|s| {
      s.persisted.add_reaction(id, kind);
    });
  }

  pub fn remove_reaction(&self, id: &str, kind: &str) {
    self.update_persisted(|s| {
      s.persisted.remove_reaction(id, kind);
    });
  }

  pub fn mark_copied(&self, id: &str) {
    self.update_persisted(|s| {
      s.persisted.copied_ids.insert(id.to_string());
    });
  }

  pub fn mark_generated(&self, id: &str) {
    self.update_persisted(|s| {
      s.persisted.generated_ids.insert(id.to_string());
    });
  }

  pub fn complete_first_launch(&self) {
    self.update_persisted(|s| s.persisted.is_first_launch = false);
  }

  pub fn set_sync_status(&self, status: SyncStatus) {
    self.update_persisted(|s| s.persisted.sync_status = status);
  }

  /// Record a successful network sync.
  pub fn record_sync_success(&self) {
    let now = Utc::now();
    self.update_persisted(|s| {
      s.persisted.sync_status = SyncStatus {
        last_synced_at: Some(now),
        last_attempt_at: Some(now),
        last_error: None,
      };
    });
  }

  /// Record a failed network sync. Connectivity is left untouched.
  pub fn record_sync_failure(&self, error: &str) {
    let now = Utc::now();
    self.update_persisted(|s| {
      s.persisted.sync_status.last_attempt_at = Some(now);
      s.persisted.sync_status.last_error = Some(error.to_string());
    });
  }

  // ==========================================================================
  // Connectivity and loading
  // ==========================================================================

  pub fn set_connectivity(&self, is_online: bool) {
    let now = Utc::now();
    self.update(|s| {
      if s.connectivity.is_online != is_online {
        info!(is_online, "Connectivity changed");
      }
      s.connectivity = ConnectivityState {
        is_online,
        last_checked_at: Some(now),
      };
    });
  }

  pub fn set_loading(&self, collection: Collection, loading: bool) {
    self.update(|s| {
      if loading {
        s.loading.insert(collection);
      } else {
        s.loading.remove(&collection);
      }
    });
  }

  pub fn clear_loading(&self) {
    self.update(|s| s.loading.clear());
  }

  // ==========================================================================
  // Prompts
  // ==========================================================================

  /// Replace the prompt collection; the filtered view follows atomically.
  pub fn set_prompts(&self, prompts: Vec<Prompt>) {
    self.update(|s| {
      s.prompts.items.clear();
      merge_unique(&mut s.prompts.items, prompts);
      s.refilter();
    });
  }

  /// Append prompts, dropping ids already in the collection.
  pub fn add_prompts(&self, prompts: Vec<Prompt>) {
    self.update(|s| {
      merge_unique(&mut s.prompts.items, prompts);
      s.refilter();
    });
  }

  /// Merge a fetched page and its paging metadata in one step.
  pub fn apply_prompt_page(&self, page: Page<Prompt>, mode: MergeMode) {
    self.update(|s| {
      s.prompts
        .apply(page.items, page.page, page.limit, page.total, mode);
      s.refilter();
    });
  }

  pub fn set_prompt_feed(&self, variant: FeedVariant, prompts: Vec<Prompt>) {
    self.update(|s| {
      let feed = s.prompt_feeds.entry(variant).or_default();
      feed.clear();
      merge_unique(feed, prompts);
    });
  }

  pub fn set_current_prompt(&self, prompt: Option<Prompt>) {
    self.update(|s| s.current_prompt = prompt);
  }

  pub fn set_saved_prompts(&self, prompts: Vec<Prompt>) {
    self.update(|s| {
      s.saved_prompts.clear();
      merge_unique(&mut s.saved_prompts, prompts);
    });
  }

  pub fn set_filters(&self, filters: FilterState) {
    self.update(|s| {
      s.filters = filters;
      s.refilter();
    });
  }

  pub fn clear_filters(&self) {
    self.set_filters(FilterState::default());
  }

  // ==========================================================================
  // Chats, clusters, posts, search
  // ==========================================================================

  pub fn apply_viral_chat_page(&self, page: Page<ViralChat>, mode: MergeMode) {
    self.update(|s| {
      s.viral_chats
        .apply(page.items, page.page, page.limit, page.total, mode);
    });
  }

  pub fn apply_cluster_page(&self, page: Page<ClusterSummary>, mode: MergeMode) {
    self.update(|s| {
      s.clusters
        .apply(page.items, page.page, page.limit, page.total, mode);
    });
  }

  pub fn set_cluster_feed(&self, variant: FeedVariant, clusters: Vec<ClusterSummary>) {
    self.update(|s| {
      let feed = s.cluster_feeds.entry(variant).or_default();
      feed.clear();
      merge_unique(feed, clusters);
    });
  }

  pub fn set_current_cluster(&self, cluster: Option<ClusterSummary>) {
    self.update(|s| s.current_cluster = cluster);
  }

  pub fn apply_cluster_post_page(&self, cluster_id: &str, page: Page<ClusterPost>, mode: MergeMode) {
    self.update(|s| {
      s.cluster_posts
        .entry(cluster_id.to_string())
        .or_default()
        .apply(page.items, page.page, page.limit, page.total, mode);
    });
  }

  /// Store search results; an error always comes with an empty result set.
  pub fn set_search_results(&self, text: &str, page: Page<Prompt>, mode: MergeMode) {
    self.update(|s| {
      if s.search.text != text {
        s.search = SearchState::default();
      }
      s.search.text = text.to_string();
      s.search.error = None;
      s.search
        .results
        .apply(page.items, page.page, page.limit, page.total, mode);
    });
  }

  pub fn set_search_error(&self, text: &str, error: &str) {
    self.update(|s| {
      s.search = SearchState {
        text: text.to_string(),
        error: Some(error.to_string()),
        results: PageState {
          has_more: false,
          ..PageState::default()
        },
      };
    });
  }

  /// Restore the full initial shape, persisted subset included.
  pub fn reset_store(&self) {
    info!("Store reset");
    self.update_persisted(|s| *s = AppState::default());
  }
}
