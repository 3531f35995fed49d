//! Connectivity probing.

use tokio::time::timeout;
use tracing::{debug, info};

use super::FetchOrchestrator;
use crate::api::ContentApi;
use crate::cache::CacheStorage;
use crate::store::StatePersistence;

impl<A, S, P> FetchOrchestrator<A, S, P>
where
  A: ContentApi,
  S: CacheStorage,
  P: StatePersistence,
{
  /// Ask the backend's health route and record the answer.
  ///
  /// Any failure, including the probe deadline, counts as offline.
  pub async fn probe_connectivity(&self) -> bool {
    let online = match timeout(self.settings.probe_timeout, self.api.health()).await {
      Ok(Ok(())) => true,
      Ok(Err(e)) => {
        debug!(error = %e, "Health probe failed");
        false
      }
      Err(_) => {
        debug!(timeout = ?self.settings.probe_timeout, "Health probe timed out");
        false
      }
    };
    self.store.set_connectivity(online);
    online
  }

  /// App returned to the foreground: re-check connectivity.
  pub async fn on_foreground(&self) -> bool {
    let was_online = self.store.is_online();
    let online = self.probe_connectivity().await;
    if online && !was_online {
      info!("Back online");
    }
    online
  }

  /// Platform connectivity signal.
  pub fn set_online(&self, online: bool) {
    self.store.set_connectivity(online);
  }
}
