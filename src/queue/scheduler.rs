//! Deferred sync: wait for connectivity, drain, retry with backoff.

use color_eyre::{eyre::eyre, Result};
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::ActionStore;
use super::sync::{drain, SyncTag};
use crate::config::{Config, SyncConfig};
use crate::net::Fetcher;

/// Exponential backoff with jitter and a capped number of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  pub base_delay: Duration,
  pub max_delay: Duration,
  pub max_attempts: u32,
}

impl RetryPolicy {
  pub fn from_config(sync: &SyncConfig) -> Self {
    Self {
      base_delay: Duration::from_millis(sync.base_delay_ms),
      max_delay: Duration::from_millis(sync.max_delay_ms),
      max_attempts: sync.max_attempts.max(1),
    }
  }

  /// Delay after `failures` consecutive failures, before jitter.
  pub fn backoff(&self, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    self
      .base_delay
      .saturating_mul(1u32 << exponent)
      .min(self.max_delay)
  }

  /// Backoff plus up to half of it again at random.
  fn jittered(&self, failures: u32) -> Duration {
    let delay = self.backoff(failures);
    let spread = (delay.as_millis() / 2) as u64;
    let jitter = if spread == 0 {
      0
    } else {
      rand::thread_rng().gen_range(0..=spread)
    };
    delay + Duration::from_millis(jitter)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  Completed { sent: usize, attempts: u32 },
  /// Gave up; the queue is left intact for the next registration
  Exhausted { attempts: u32, last_error: String },
}

/// Online/offline signal shared between the event loop and sync tasks.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn set_online(&self, online: bool) {
    self.tx.send_replace(online);
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Run `op` once connectivity is up, retrying failures per `policy`.
pub async fn run_with_retry<Op, Fut>(
  policy: &RetryPolicy,
  mut online: watch::Receiver<bool>,
  label: &str,
  mut op: Op,
) -> SyncOutcome
where
  Op: FnMut() -> Fut,
  Fut: Future<Output = Result<usize>>,
{
  let mut attempts = 0;
  loop {
    let connected = online.wait_for(|up| *up).await.is_ok();
    if !connected {
      return SyncOutcome::Exhausted {
        attempts,
        last_error: "connectivity signal closed".to_string(),
      };
    }

    attempts += 1;
    match op().await {
      Ok(sent) => return SyncOutcome::Completed { sent, attempts },
      Err(e) if attempts >= policy.max_attempts => {
        error!("{} sync failed after {} attempts: {}", label, attempts, e);
        return SyncOutcome::Exhausted {
          attempts,
          last_error: e.to_string(),
        };
      }
      Err(e) => {
        let delay = policy.jittered(attempts);
        warn!(
          "{} sync failed (attempt {}/{}), retrying in {:?}: {}",
          label, attempts, policy.max_attempts, delay, e
        );
        tokio::time::sleep(delay).await;
      }
    }
  }
}

/// Owns pending sync registrations. Registering a tag that is already
/// pending is a no-op.
pub struct SyncScheduler<F: Fetcher> {
  store: Arc<ActionStore>,
  fetcher: Arc<F>,
  config: Arc<Config>,
  policy: RetryPolicy,
  connectivity: Connectivity,
  pending: Arc<Mutex<HashSet<SyncTag>>>,
}

impl<F: Fetcher + 'static> SyncScheduler<F> {
  pub fn new(
    store: Arc<ActionStore>,
    fetcher: Arc<F>,
    config: Arc<Config>,
    connectivity: Connectivity,
  ) -> Self {
    Self {
      policy: RetryPolicy::from_config(&config.sync),
      store,
      fetcher,
      config,
      connectivity,
      pending: Arc::new(Mutex::new(HashSet::new())),
    }
  }

  pub fn register(&self, tag: SyncTag) -> Result<Option<JoinHandle<SyncOutcome>>> {
    let endpoint = tag.endpoint(&self.config)?;
    {
      let mut pending = self.pending.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      if !pending.insert(tag) {
        debug!("{} already pending", tag.as_str());
        return Ok(None);
      }
    }
    info!("Registered {}", tag.as_str());

    let store = self.store.clone();
    let fetcher = self.fetcher.clone();
    let policy = self.policy.clone();
    let online = self.connectivity.subscribe();
    let pending = self.pending.clone();

    let handle = tokio::spawn(async move {
      let outcome = run_with_retry(&policy, online, tag.as_str(), || {
        drain(&store, fetcher.as_ref(), tag.collection(), &endpoint)
      })
      .await;
      if let Ok(mut pending) = pending.lock() {
        pending.remove(&tag);
      }
      outcome
    });

    Ok(Some(handle))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Response;
  use crate::queue::store::{Calculation, Collection, QueuedAction};
  use crate::testing::StubFetcher;
  use chrono::Utc;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
      base_delay: Duration::from_millis(1),
      max_delay: Duration::from_millis(4),
      max_attempts,
    }
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy {
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(60),
      max_attempts: 5,
    };
    assert_eq!(policy.backoff(1), Duration::from_secs(1));
    assert_eq!(policy.backoff(2), Duration::from_secs(2));
    assert_eq!(policy.backoff(4), Duration::from_secs(8));
    assert_eq!(policy.backoff(10), Duration::from_secs(60));
    assert_eq!(policy.backoff(100), Duration::from_secs(60));

    let jittered = policy.jittered(3);
    assert!(jittered >= Duration::from_secs(4) && jittered <= Duration::from_secs(6));
  }

  #[tokio::test]
  async fn test_retry_until_success() {
    let calls = AtomicU32::new(0);
    let connectivity = Connectivity::new(true);

    let outcome = run_with_retry(&fast_policy(5), connectivity.subscribe(), "test", || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < 2 {
          Err(eyre!("endpoint down"))
        } else {
          Ok(4)
        }
      }
    })
    .await;

    assert_eq!(outcome, SyncOutcome::Completed { sent: 4, attempts: 3 });
  }

  #[tokio::test]
  async fn test_gives_up_after_max_attempts() {
    let calls = AtomicU32::new(0);
    let connectivity = Connectivity::new(true);

    let outcome = run_with_retry(&fast_policy(3), connectivity.subscribe(), "test", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(eyre!("endpoint down")) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(outcome, SyncOutcome::Exhausted { attempts: 3, .. }));
  }

  #[tokio::test]
  async fn test_waits_for_connectivity() {
    let connectivity = Connectivity::new(false);
    let online = connectivity.subscribe();
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();

    let task = tokio::spawn(async move {
      run_with_retry(&fast_policy(1), online, "test", move || {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Ok(0) }
      })
      .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    connectivity.set_online(true);
    let outcome = task.await.unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { sent: 0, attempts: 1 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_scheduler_drains_registered_tag_once() {
    let store = Arc::new(ActionStore::open_in_memory().unwrap());
    store
      .enqueue(
        Collection::Calculations,
        &QueuedAction::Calculation(Calculation {
          kind: "roi".to_string(),
          inputs: serde_json::json!({"price": 9_000_000, "rent": 30_000}),
          result: serde_json::json!({"yield": 4.0}),
          timestamp: Utc::now(),
        }),
      )
      .unwrap();
    let fetcher = Arc::new(StubFetcher::new());
    fetcher.respond("http://localhost:8080/api/calculations", Response::new(200, "{}"));
    let connectivity = Connectivity::new(false);
    let scheduler = SyncScheduler::new(
      store.clone(),
      fetcher.clone(),
      Arc::new(Config::default()),
      connectivity.clone(),
    );

    let handle = scheduler.register(SyncTag::Calculations).unwrap().unwrap();
    assert!(scheduler.register(SyncTag::Calculations).unwrap().is_none());

    connectivity.set_online(true);
    let outcome = handle.await.unwrap();

    assert_eq!(outcome, SyncOutcome::Completed { sent: 1, attempts: 1 });
    assert_eq!(store.count(Collection::Calculations).unwrap(), 0);
    assert_eq!(fetcher.posted().len(), 1);
    assert!(scheduler.register(SyncTag::Calculations).unwrap().is_some());
  }
}
