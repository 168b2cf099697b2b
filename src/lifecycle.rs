//! Install, activation and update checks for the versioned cache partitions.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{partition, CacheStorage, PartitionNames};
use crate::clients::Clients;
use crate::config::Config;
use crate::messages::WorkerMessage;
use crate::net::{FetchError, Fetcher, Request, Response};

/// Version assumed when the cached manifest cannot be read.
const DEFAULT_VERSION: &str = "1.0.0";

/// Where the per-user blob posted by `cacheUserData` is stored.
const USER_DATA_PATH: &str = "/user-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Loaded, nothing attempted yet
  Parsed,
  Installing,
  /// Shell cached, waiting to activate
  Installed,
  Activating,
  /// Controlling pages and intercepting fetches
  Activated,
  /// Install failed; this worker will never activate
  Redundant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activation {
  /// Stale partitions that were deleted
  pub removed: Vec<String>,
  /// Pages newly brought under control
  pub claimed: usize,
}

pub struct Lifecycle<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  clients: Arc<Clients>,
  names: PartitionNames,
  shell: Vec<Url>,
  manifest_url: Url,
  user_data_url: Url,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
}

impl<S: CacheStorage, F: Fetcher> Lifecycle<S, F> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<F>,
    clients: Arc<Clients>,
    names: PartitionNames,
    config: &Config,
  ) -> Result<Self> {
    let shell = config
      .caches
      .shell
      .iter()
      .map(|asset| config.resolve(asset))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      storage,
      fetcher,
      clients,
      names,
      shell,
      manifest_url: config.resolve(&config.caches.manifest)?,
      user_data_url: config.resolve(USER_DATA_PATH)?,
      state: Mutex::new(WorkerState::Parsed),
      skip_waiting: AtomicBool::new(false),
    })
  }

  pub fn state(&self) -> WorkerState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  fn set_state(&self, next: WorkerState) {
    match self.state.lock() {
      Ok(mut state) => *state = next,
      Err(poisoned) => *poisoned.into_inner() = next,
    }
  }

  pub fn is_active(&self) -> bool {
    self.state() == WorkerState::Activated
  }

  /// Pick up where a previous run left off: an installed shell means we are
  /// already the active worker.
  pub fn resume(&self) -> Result<WorkerState> {
    if self.state() == WorkerState::Parsed && self.storage.has_partition(&self.names.static_name)? {
      self.set_state(WorkerState::Activated);
    }
    Ok(self.state())
  }

  /// Fetch every shell asset and store them in the static partition. Any
  /// failed fetch fails the whole install and nothing is written.
  pub async fn install(&self) -> Result<()> {
    info!("Install");
    self.set_state(WorkerState::Installing);

    match self.populate_shell().await {
      Ok(count) => {
        info!("Pre-cached {} shell assets in {}", count, self.names.static_name);
        self.set_state(WorkerState::Installed);
        self.skip_waiting.store(true, Ordering::SeqCst);
        Ok(())
      }
      Err(e) => {
        error!("Cache failed: {}", e);
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  async fn populate_shell(&self) -> Result<usize> {
    let fetches = self.shell.iter().map(|url| async move {
      let response = self
        .fetcher
        .fetch(Request::get(url.clone()))
        .await
        .map_err(|e| eyre!("Failed to fetch shell asset {}: {}", url, e))?;
      if !response.ok() {
        return Err(eyre!(
          "Shell asset {} returned status {}",
          url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((url.clone(), response))
    });

    let entries = try_join_all(fetches).await?;
    let count = entries.len();
    partition::open(self.storage.as_ref(), &self.names.static_name)?.put_all(entries)?;

    Ok(count)
  }

  /// True once install has asked to skip the waiting phase.
  pub fn should_activate(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst) && self.state() == WorkerState::Installed
  }

  /// Request activation as soon as install completes. Returns true when the
  /// worker is already installed and should activate now.
  pub fn skip_waiting(&self) -> bool {
    self.skip_waiting.store(true, Ordering::SeqCst);
    self.should_activate()
  }

  /// Delete every partition that does not belong to this release, then take
  /// control of all open pages.
  pub fn activate(&self) -> Result<Activation> {
    match self.state() {
      WorkerState::Installing | WorkerState::Redundant => {
        return Err(eyre!("Cannot activate a worker in state {:?}", self.state()));
      }
      _ => {}
    }
    info!("Activate");
    self.set_state(WorkerState::Activating);

    let mut removed = Vec::new();
    for name in self.storage.partition_names()? {
      if !self.names.contains(&name) {
        info!("Removing old cache {}", name);
        self.storage.delete_partition(&name)?;
        removed.push(name);
      }
    }

    let claimed = self.clients.claim()?;
    self.set_state(WorkerState::Activated);

    Ok(Activation { removed, claimed })
  }

  /// Version recorded in the manifest stored with the current shell.
  pub fn current_version(&self) -> String {
    let cached = partition::open(self.storage.as_ref(), &self.names.static_name)
      .and_then(|p| p.match_url(&self.manifest_url));

    let version = match cached {
      Ok(Some(response)) => manifest_version(&response),
      Ok(None) => None,
      Err(e) => {
        warn!("Version check failed: {}", e);
        None
      }
    };

    version.unwrap_or_else(|| DEFAULT_VERSION.to_string())
  }

  /// Compare the deployed manifest against the cached one and tell every
  /// controlled page when they differ. Returns the new version if announced.
  pub async fn check_for_updates(&self) -> Result<Option<String>> {
    let response = self
      .fetcher
      .fetch(Request::get(self.manifest_url.clone()).no_cache())
      .await?;
    if !response.ok() {
      return Err(FetchError::Status {
        status: response.status,
        url: self.manifest_url.to_string(),
      }
      .into());
    }

    let latest = manifest_version(&response)
      .ok_or_else(|| eyre!("Manifest at {} has no version", self.manifest_url))?;
    let current = self.current_version();
    if latest == current {
      return Ok(None);
    }

    let delivered = self.clients.post_all(&WorkerMessage::UpdateAvailable {
      version: latest.clone(),
    })?;
    info!(
      "Update {} available (running {}), notified {} page(s)",
      latest, current, delivered
    );

    Ok(Some(latest))
  }

  /// Store page-provided data in the data partition.
  pub fn cache_user_data(&self, data: &Value) -> Result<()> {
    let body = serde_json::to_vec(data)?;
    let response = Response::synthetic(200, "application/json", body);
    partition::open(self.storage.as_ref(), &self.names.data_name)?
      .put(&self.user_data_url, &response)?;
    info!("User data cached");
    Ok(())
  }

  /// Delete every partition, current ones included. Returns how many went.
  pub fn clear_caches(&self) -> Result<usize> {
    let mut cleared = 0;
    for name in self.storage.partition_names()? {
      if self.storage.delete_partition(&name)? {
        cleared += 1;
      }
    }
    info!("All caches cleared");
    Ok(cleared)
  }
}

fn manifest_version(response: &Response) -> Option<String> {
  let manifest: Value = response.json().ok()?;
  manifest.get("version")?.as_str().map(String::from)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::types::CacheMode;
  use crate::testing::StubFetcher;

  const ORIGIN: &str = "https://app.test";

  struct Fixture {
    lifecycle: Lifecycle<SqliteStorage, StubFetcher>,
    storage: Arc<SqliteStorage>,
    fetcher: Arc<StubFetcher>,
    clients: Arc<Clients>,
  }

  fn fixture(shell: &[&str]) -> Fixture {
    let mut config = Config {
      origin: ORIGIN.to_string(),
      ..Config::default()
    };
    config.caches.shell = shell.iter().map(|s| s.to_string()).collect();

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(StubFetcher::new());
    let clients = Arc::new(Clients::new());
    let names = PartitionNames {
      static_name: config.caches.static_name.clone(),
      data_name: config.caches.data_name.clone(),
    };
    let lifecycle =
      Lifecycle::new(storage.clone(), fetcher.clone(), clients.clone(), names, &config).unwrap();

    Fixture {
      lifecycle,
      storage,
      fetcher,
      clients,
    }
  }

  fn manifest(version: &str) -> Response {
    Response::new(200, format!(r#"{{"name":"Magic AI","version":"{}"}}"#, version))
  }

  fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
  }

  #[tokio::test]
  async fn test_install_caches_whole_shell() {
    let f = fixture(&["/", "/index.html", "/manifest.json"]);
    f.fetcher.respond(&url("/"), Response::new(200, "<html>"));
    f.fetcher.respond(&url("/index.html"), Response::new(200, "<html>"));
    f.fetcher.respond(&url("/manifest.json"), manifest("1.0.0"));

    f.lifecycle.install().await.unwrap();

    assert_eq!(f.lifecycle.state(), WorkerState::Installed);
    assert!(f.lifecycle.should_activate());
    assert_eq!(f.storage.urls("magicai-v1.0.0").unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let f = fixture(&["/", "/styles.css", "/script.js"]);
    f.fetcher.respond(&url("/"), Response::new(200, "<html>"));
    f.fetcher.respond(&url("/styles.css"), Response::new(200, "body{}"));
    f.fetcher.respond(&url("/script.js"), Response::new(404, "missing"));

    assert!(f.lifecycle.install().await.is_err());
    assert_eq!(f.lifecycle.state(), WorkerState::Redundant);
    assert!(!f.storage.has_partition("magicai-v1.0.0").unwrap());
    assert!(f.lifecycle.activate().is_err());
  }

  #[tokio::test]
  async fn test_activate_removes_only_stale_partitions() {
    let f = fixture(&[]);
    for name in [
      "magicai-v0.9.0",
      "magicai-v1.0.0",
      "magicai-data-v0.9.0",
      "magicai-data-v1.0.0",
      "other-app",
    ] {
      f.storage.create_partition(name).unwrap();
    }
    let (_, _rx) = f.clients.connect("https://app.test/", false).unwrap();

    let activation = f.lifecycle.activate().unwrap();

    assert_eq!(
      activation.removed,
      vec!["magicai-v0.9.0", "magicai-data-v0.9.0", "other-app"]
    );
    assert_eq!(activation.claimed, 1);
    assert_eq!(
      f.storage.partition_names().unwrap(),
      vec!["magicai-v1.0.0", "magicai-data-v1.0.0"]
    );
    assert!(f.lifecycle.is_active());
  }

  #[tokio::test]
  async fn test_update_available_sent_once_per_page() {
    let f = fixture(&[]);
    f.storage
      .put("magicai-v1.0.0", &url("/manifest.json"), &manifest("1.0.0"))
      .unwrap();
    f.fetcher.respond(&url("/manifest.json"), manifest("2.0.0"));
    let (_, mut first) = f.clients.connect("https://app.test/", false).unwrap();
    let (_, mut second) = f.clients.connect("https://app.test/?tool=roi", false).unwrap();
    f.lifecycle.activate().unwrap();

    let announced = f.lifecycle.check_for_updates().await.unwrap();

    assert_eq!(announced.as_deref(), Some("2.0.0"));
    let expected = WorkerMessage::UpdateAvailable {
      version: "2.0.0".to_string(),
    };
    for rx in [&mut first, &mut second] {
      assert_eq!(rx.try_recv().unwrap(), expected);
      assert!(rx.try_recv().is_err());
    }
  }

  #[tokio::test]
  async fn test_no_message_when_versions_match() {
    let f = fixture(&[]);
    f.storage
      .put("magicai-v1.0.0", &url("/manifest.json"), &manifest("1.0.0"))
      .unwrap();
    f.fetcher.respond(&url("/manifest.json"), manifest("1.0.0"));
    let (_, mut rx) = f.clients.connect("https://app.test/", false).unwrap();
    f.lifecycle.activate().unwrap();

    assert_eq!(f.lifecycle.check_for_updates().await.unwrap(), None);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_update_check_bypasses_cache_and_uses_default_version() {
    let f = fixture(&[]);
    f.fetcher.respond(&url("/manifest.json"), manifest("1.0.0"));

    assert_eq!(f.lifecycle.current_version(), "1.0.0");
    assert_eq!(f.lifecycle.check_for_updates().await.unwrap(), None);
    let requests = f.fetcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.as_str(), url("/manifest.json"));
    assert_eq!(requests[0].cache, CacheMode::NoCache);
  }

  #[tokio::test]
  async fn test_rejected_manifest_is_a_status_error() {
    let f = fixture(&[]);
    f.fetcher.respond(&url("/manifest.json"), Response::new(404, "missing"));

    let err = f.lifecycle.check_for_updates().await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<FetchError>(),
      Some(FetchError::Status { status: 404, .. })
    ));
  }

  #[test]
  fn test_user_data_and_clear() {
    let f = fixture(&[]);
    f.lifecycle
      .cache_user_data(&serde_json::json!({"city": "Pune"}))
      .unwrap();
    let stored = f
      .storage
      .get("magicai-data-v1.0.0", &url("/user-data"))
      .unwrap()
      .unwrap();
    assert_eq!(stored.response.text(), r#"{"city":"Pune"}"#);

    f.storage.create_partition("magicai-v1.0.0").unwrap();
    assert_eq!(f.lifecycle.clear_caches().unwrap(), 2);
    assert!(f.storage.partition_names().unwrap().is_empty());
  }
}
