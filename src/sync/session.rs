//! Session changes that touch both the remote credential and the store.

use tracing::info;

use super::FetchOrchestrator;
use crate::api::ContentApi;
use crate::cache::CacheStorage;
use crate::store::{StatePersistence, UserIdentity};

impl<A, S, P> FetchOrchestrator<A, S, P>
where
  A: ContentApi,
  S: CacheStorage,
  P: StatePersistence,
{
  /// Authenticate subsequent requests and start the session.
  pub fn sign_in(&self, user: UserIdentity, token: String) {
    self.api.set_token(Some(token));
    self.store.login(user);
  }

  pub fn sign_in_guest(&self, guest_id: &str) {
    self.api.set_token(None);
    self.store.login_guest(guest_id);
  }

  /// Drop the credential and every per-session interaction.
  ///
  /// Cached content stays; saved-id families are scoped per user.
  pub fn sign_out(&self) {
    self.api.set_token(None);
    self.store.logout();
    // Fetches still in flight settle as superseded and leave no flag raised.
    self.queries.invalidate_all();
    self.store.clear_loading();
    info!("Signed out");
  }

  /// Toggle a saved prompt and mirror the saved set into the cache.
  pub fn toggle_saved(&self, prompt_id: &str) -> bool {
    let saved = self.store.toggle_saved(prompt_id);
    let namespace = self.store.read(|s| s.session_namespace());
    self.sync_saved_family(&namespace);
    saved
  }
}
