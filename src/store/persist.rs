//! Durable storage for the persisted subset of the global state.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::state::PersistedState;

/// Backend that survives process restarts.
pub trait StatePersistence: Send + Sync {
  /// Load the last saved state. `None` on first launch.
  fn load(&self) -> Result<Option<PersistedState>>;

  /// Replace the saved state.
  fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON document on disk, replaced atomically on every save.
pub struct JsonFilePersistence {
  path: PathBuf,
}

impl JsonFilePersistence {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// `state.json` in the application data directory.
  pub fn open_default() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(Self::new(data_dir.join("feedsync").join("state.json")))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl StatePersistence for JsonFilePersistence {
  fn load(&self) -> Result<Option<PersistedState>> {
    if !self.path.exists() {
      return Ok(None);
    }

    let contents = std::fs::read_to_string(&self.path)
      .map_err(|e| eyre!("Failed to read state file {}: {}", self.path.display(), e))?;

    let state = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse state file {}: {}", self.path.display(), e))?;

    Ok(Some(state))
  }

  fn save(&self, state: &PersistedState) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    let contents = serde_json::to_vec_pretty(state)
      .map_err(|e| eyre!("Failed to serialize state: {}", e))?;

    // Write then rename so a crash never leaves a truncated file.
    let tmp = self.path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)
      .map_err(|e| eyre!("Failed to write state file {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &self.path)
      .map_err(|e| eyre!("Failed to replace state file {}: {}", self.path.display(), e))?;

    Ok(())
  }
}

/// Process-local persistence for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryPersistence {
  slot: Mutex<Option<PersistedState>>,
}

impl MemoryPersistence {
  pub fn new() -> Self {
    Self::default()
  }

  /// Pre-seeded with a previously saved state.
  pub fn with_state(state: PersistedState) -> Self {
    Self {
      slot: Mutex::new(Some(state)),
    }
  }

  /// What a restart would hydrate from.
  pub fn saved(&self) -> Option<PersistedState> {
    self.slot.lock().ok().and_then(|slot| slot.clone())
  }
}

impl StatePersistence for MemoryPersistence {
  fn load(&self) -> Result<Option<PersistedState>> {
    let slot = self.slot.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(slot.clone())
  }

  fn save(&self, state: &PersistedState) -> Result<()> {
    let mut slot = self.slot.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *slot = Some(state.clone());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::state::Theme;

  #[test]
  fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = JsonFilePersistence::new(dir.path().join("nested").join("state.json"));
    assert!(persistence.load().unwrap().is_none());

    let mut state = PersistedState::default();
    state.theme = Theme::Dark;
    state.saved_ids.insert("p1".into());
    persistence.save(&state).unwrap();

    assert_eq!(persistence.load().unwrap(), Some(state));
  }

  #[test]
  fn test_corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let persistence = JsonFilePersistence::new(path);
    assert!(persistence.load().is_err());
  }
}
