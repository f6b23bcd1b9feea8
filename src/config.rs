use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub backend: BackendConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Vessel name shown in the status header
  pub vessel: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// REST root of the hosted database, e.g. https://xyz.supabase.co/rest/v1
  #[serde(default)]
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Periodic sync while online
  pub interval_secs: u64,
  /// Reachability check
  pub probe_interval_secs: u64,
  /// How long synced items are kept before compaction
  pub retention_hours: i64,
  /// Rejections before an item is quarantined (0 = never)
  pub max_rejections: u32,
  pub backoff_base_secs: i64,
  pub backoff_max_secs: i64,
  /// Age at which cached snapshots are reported stale
  pub stale_minutes: i64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      probe_interval_secs: 15,
      retention_hours: 24,
      max_rejections: 5,
      backoff_base_secs: 30,
      backoff_max_secs: 3600,
      stale_minutes: 60,
    }
  }
}

impl SyncConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_rejections: self.max_rejections,
      backoff_base: chrono::Duration::seconds(self.backoff_base_secs.max(0)),
      backoff_max: chrono::Duration::seconds(self.backoff_max_secs.max(0)),
    }
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::hours(self.retention_hours.max(0))
  }

  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.stale_minutes.max(0))
  }

  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.max(1))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file; defaults to the platform data directory
  pub path: Option<PathBuf>,
  /// When false, nothing is persisted and the queue lives in memory
  pub enabled: bool,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      enabled: true,
    }
  }
}

fn default_timeout_secs() -> u64 {
  10
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./galley.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/galley/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/galley/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("galley.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("galley").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    if config.backend.url.is_empty() {
      return Err(eyre!("backend.url is required"));
    }
    Ok(config)
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks GALLEY_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("GALLEY_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("API key not found. Set GALLEY_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }

  /// Database file to open, if storage is enabled and a location is known.
  pub fn storage_path(&self) -> Option<PathBuf> {
    if !self.storage.enabled {
      return None;
    }
    self
      .storage
      .path
      .clone()
      .or_else(crate::store::SqliteStore::default_path)
  }

  /// Header title: vessel name, or the backend host
  pub fn title(&self) -> String {
    self.vessel.clone().unwrap_or_else(|| {
      url::Url::parse(&self.backend.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "galley".to_string())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("backend:\n  url: https://abc.supabase.co/rest/v1\n").unwrap();
    assert_eq!(config.backend.timeout_secs, 10);
    assert_eq!(config.sync.interval_secs, 30);
    assert_eq!(config.sync.max_rejections, 5);
    assert!(config.storage.enabled);
    assert_eq!(config.title(), "abc.supabase.co");
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
vessel: MV Northern Star
backend:
  url: https://abc.supabase.co/rest/v1
  timeout_secs: 5
sync:
  interval_secs: 60
  max_rejections: 0
  backoff_base_secs: 10
storage:
  path: /tmp/galley-test.db
  enabled: false
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.title(), "MV Northern Star");
    assert_eq!(config.sync.interval(), Duration::from_secs(60));
    assert_eq!(config.sync.probe_interval_secs, 15);

    let policy = config.sync.retry_policy();
    assert_eq!(policy.max_rejections, 0);
    assert_eq!(policy.backoff_base, chrono::Duration::seconds(10));
    assert_eq!(policy.backoff_max, chrono::Duration::seconds(3600));

    assert_eq!(config.storage_path(), None);
  }

  #[test]
  fn test_missing_url_is_rejected() {
    assert!(Config::parse("vessel: Test\n").is_err());
  }

  #[test]
  fn test_explicit_path_must_exist() {
    let missing = Path::new("/nonexistent/galley.yaml");
    assert!(Config::load(Some(missing)).is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("galley.yaml");
    std::fs::write(&path, "backend:\n  url: http://localhost:54321/rest/v1\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.backend.url, "http://localhost:54321/rest/v1");
  }
}
