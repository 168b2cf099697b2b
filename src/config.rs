use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::push::Notification;

/// Application name used for config/data directory paths
const APP_NAME: &str = "estate-worker";

/// Logo shown on notifications and cached as part of the shell.
pub const APP_ICON: &str = "https://i.postimg.cc/YSJdVQjb/Your-paragraph-text-1.png";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker is registered for (e.g. "https://magicai.example")
  pub origin: String,
  /// Registration scope used to recognise our own windows (defaults to origin + "/")
  pub scope: Option<String>,
  pub caches: CacheConfig,
  pub sync: SyncConfig,
  /// Template that push payloads are merged over
  pub notification: Notification,
  /// Where the cache and queue databases live (default: $XDG_DATA_HOME/estate-worker)
  pub data_dir: Option<PathBuf>,
  /// When set, logs are also written to a daily rolling file in this directory
  pub log_dir: Option<PathBuf>,
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Versioned name of the shell partition
  pub static_name: String,
  /// Versioned name of the API data partition
  pub data_name: String,
  /// Document served for offline navigations
  pub shell_document: String,
  /// Manifest carrying the deployed version
  pub manifest: String,
  /// Assets fetched all-or-nothing during install
  pub shell: Vec<String>,
  /// URL fragments that mark a request as an API call
  pub api_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub calculations_endpoint: String,
  pub chat_endpoint: String,
  pub property_updates_endpoint: String,
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      scope: None,
      caches: CacheConfig::default(),
      sync: SyncConfig::default(),
      notification: Notification::default(),
      data_dir: None,
      log_dir: None,
      request_timeout_secs: 30,
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_name: "magicai-v1.0.0".to_string(),
      data_name: "magicai-data-v1.0.0".to_string(),
      shell_document: "/index.html".to_string(),
      manifest: "/manifest.json".to_string(),
      shell: [
        "/",
        "/index.html",
        "/styles.css",
        "/script.js",
        "/manifest.json",
        APP_ICON,
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
        "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      api_prefixes: vec!["/api/".to_string(), "https://api.magicai.com/".to_string()],
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      calculations_endpoint: "/api/calculations".to_string(),
      chat_endpoint: "/api/chat".to_string(),
      property_updates_endpoint: "/api/property-updates".to_string(),
      max_attempts: 5,
      base_delay_ms: 1_000,
      max_delay_ms: 60_000,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./estate-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/estate-worker/config.yaml
  ///
  /// Falls back to built-in defaults when nothing is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("estate-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.caches.static_name == self.caches.data_name {
      return Err(eyre!(
        "Static and data partitions must have distinct names (both are '{}')",
        self.caches.static_name
      ));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path or absolute URL against the configured origin.
  pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path_or_url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path_or_url, e))
  }

  pub fn scope(&self) -> String {
    match &self.scope {
      Some(scope) => scope.clone(),
      None => format!("{}/", self.origin.trim_end_matches('/')),
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  /// Directory holding cache.db and queue.db.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_NAME))
  }
}
