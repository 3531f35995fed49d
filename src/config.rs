use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment override for `api.base_url`.
pub const API_URL_ENV: &str = "FEEDSYNC_API_URL";
/// Bearer token for the backend.
pub const TOKEN_ENV: &str = "FEEDSYNC_TOKEN";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Items requested per page
  pub page_size: u32,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/api".to_string(),
      page_size: 20,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  /// When false, cached data lives only as long as the process
  pub enabled: bool,
  pub max_entries_per_family: usize,
  /// SQLite file (defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_entries_per_family: crate::cache::DEFAULT_MAX_ENTRIES_PER_FAMILY,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
  pub probe_timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_timeout_secs: 5,
    }
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./feedsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/feedsync/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_env_overrides(std::env::var(API_URL_ENV).ok());
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("feedsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("feedsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty document is a valid, all-defaults config.
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn apply_env_overrides(&mut self, api_url: Option<String>) {
    if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
      self.api.base_url = url;
    }
  }

  fn validate(&self) -> Result<()> {
    if self.api.page_size == 0 {
      return Err(eyre!("api.page_size must be at least 1"));
    }
    if self.cache.max_entries_per_family == 0 {
      return Err(eyre!("cache.max_entries_per_family must be at least 1"));
    }
    url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", self.api.base_url, e))?;
    Ok(())
  }

  /// Get the backend bearer token from the environment, if any.
  ///
  /// Checks FEEDSYNC_TOKEN. Without it requests go out unauthenticated.
  pub fn get_api_token() -> Option<String> {
    std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_sections_use_defaults() {
    let config = Config::parse("api:\n  base_url: https://example.com/api\n").unwrap();
    assert_eq!(config.api.base_url, "https://example.com/api");
    assert_eq!(config.api.page_size, 20);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.max_entries_per_family, 2000);
    assert_eq!(config.network.probe_timeout_secs, 5);
  }

  #[test]
  fn test_empty_document_is_default() {
    assert_eq!(Config::parse("").unwrap(), Config::default());
  }

  #[test]
  fn test_env_override_wins_over_file() {
    let mut config = Config::parse("api:\n  base_url: https://file.example\n").unwrap();
    config.apply_env_overrides(Some("https://env.example".into()));
    assert_eq!(config.api.base_url, "https://env.example");

    config.apply_env_overrides(Some("  ".into()));
    assert_eq!(config.api.base_url, "https://env.example");
  }

  #[test]
  fn test_validate_rejects_zero_page_size() {
    let config = Config::parse("api:\n  page_size: 0\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feedsync.yaml");
    std::fs::write(
      &path,
      "cache:\n  enabled: false\n  max_entries_per_family: 50\nnetwork:\n  probe_timeout_secs: 2\n",
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.max_entries_per_family, 50);
    assert_eq!(config.network.probe_timeout_secs, 2);
  }

  #[test]
  fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }
}
