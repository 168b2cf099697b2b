//! The worker: one value owning the caches, the queue and the lifecycle, with
//! one entry point per runtime event.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::{CacheStorage, ResourceCache};
use crate::clients::{ClientId, Clients};
use crate::config::Config;
use crate::lifecycle::{Activation, Lifecycle, WorkerState};
use crate::messages::{PageCommand, WorkerMessage};
use crate::net::{Destination, FetchError, Fetcher, Request, Response};
use crate::push::{self, ClickOutcome, Notification, Notifier, PROPERTY_UPDATES_TAG};
use crate::queue::{
  ActionStore, Connectivity, QueuedAction, SyncOutcome, SyncScheduler, SyncTag,
};

/// What happened to an action the page tried to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
  Sent,
  /// Stored for background sync under this id
  Queued(i64),
}

pub struct Worker<S: CacheStorage + 'static, F: Fetcher + 'static> {
  config: Arc<Config>,
  fetcher: Arc<F>,
  cache: ResourceCache<S, F>,
  lifecycle: Lifecycle<S, F>,
  actions: Arc<ActionStore>,
  clients: Arc<Clients>,
  notifier: Arc<dyn Notifier>,
  connectivity: Connectivity,
  scheduler: SyncScheduler<F>,
}

impl<S: CacheStorage + 'static, F: Fetcher + 'static> Worker<S, F> {
  pub fn new(
    config: Config,
    storage: Arc<S>,
    fetcher: Arc<F>,
    actions: Arc<ActionStore>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let config = Arc::new(config);
    let clients = Arc::new(Clients::new());
    let connectivity = Connectivity::new(true);
    let cache = ResourceCache::new(storage.clone(), fetcher.clone(), &config)?;
    let names = cache.names().clone();

    Ok(Self {
      cache,
      lifecycle: Lifecycle::new(storage, fetcher.clone(), clients.clone(), names, &config)?,
      scheduler: SyncScheduler::new(
        actions.clone(),
        fetcher.clone(),
        config.clone(),
        connectivity.clone(),
      ),
      config,
      fetcher,
      actions,
      clients,
      notifier,
      connectivity,
    })
  }

  /// Connect a page. Pages that load while this worker is active are
  /// controlled from the start, others wait for the next claim.
  pub fn connect(&self, url: &str) -> Result<(ClientId, UnboundedReceiver<WorkerMessage>)> {
    self.clients.connect(url, self.lifecycle.is_active())
  }

  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  pub fn actions(&self) -> &ActionStore {
    &self.actions
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn set_online(&self, online: bool) {
    info!("Connectivity: {}", if online { "online" } else { "offline" });
    self.connectivity.set_online(online);
  }

  /// Resume as the active worker if a shell from an earlier install exists.
  pub fn start(&self) -> Result<WorkerState> {
    self.lifecycle.resume()
  }

  pub async fn install(&self) -> Result<()> {
    self.lifecycle.install().await?;
    if self.lifecycle.should_activate() {
      self.activate()?;
    }
    Ok(())
  }

  pub fn activate(&self) -> Result<Activation> {
    self.lifecycle.activate()
  }

  /// Returns the newly deployed version, if any; pages are told about it.
  pub async fn check_for_updates(&self) -> Result<Option<String>> {
    self.lifecycle.check_for_updates().await
  }

  /// Build a GET (or navigation) for a path or URL under the origin.
  pub fn request(&self, target: &str, navigate: bool, destination: Option<&str>) -> Result<Request> {
    let url = self.config.resolve(target)?;
    if navigate {
      return Ok(Request::navigate(url));
    }
    let destination = match destination {
      Some(kind) => kind.parse::<Destination>()?,
      None => Destination::Empty,
    };
    Ok(Request::get(url).with_destination(destination))
  }

  /// Intercept a request. Until the worker is active, requests go straight
  /// to the network.
  pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    if !self.lifecycle.is_active() {
      return self.fetcher.fetch(request).await;
    }
    self.cache.handle(request).await
  }

  /// Handle a message posted by a page. Failures are logged, never returned.
  pub async fn message(&self, message: &Value) {
    info!("Message received: {}", message);
    let Some(command) = PageCommand::parse(message) else {
      return;
    };

    match command {
      PageCommand::SkipWaiting => {
        if self.lifecycle.skip_waiting() {
          if let Err(e) = self.activate() {
            error!("Activation after skipWaiting failed: {}", e);
          }
        }
      }
      PageCommand::CheckForUpdates => {
        if let Err(e) = self.check_for_updates().await {
          error!("Update check failed: {}", e);
        }
      }
      PageCommand::CacheUserData { data } => {
        if let Err(e) = self.lifecycle.cache_user_data(&data) {
          error!("User data cache failed: {}", e);
        }
      }
      PageCommand::ClearCache => {
        if let Err(e) = self.lifecycle.clear_caches() {
          error!("Cache clear failed: {}", e);
        }
      }
    }
  }

  /// Run a background sync now, once.
  pub async fn sync(&self, tag: &str) -> Result<usize> {
    info!("Background Sync {}", tag);
    let tag = SyncTag::parse(tag).ok_or_else(|| eyre!("Unknown sync tag '{}'", tag))?;
    let endpoint = tag.endpoint(&self.config)?;
    crate::queue::drain(&self.actions, self.fetcher.as_ref(), tag.collection(), &endpoint).await
  }

  /// Defer a sync until connectivity allows, retrying with backoff.
  pub fn register_sync(&self, tag: &str) -> Result<Option<JoinHandle<SyncOutcome>>> {
    let tag = SyncTag::parse(tag).ok_or_else(|| eyre!("Unknown sync tag '{}'", tag))?;
    self.scheduler.register(tag)
  }

  /// Try to deliver an action right away; if that fails, queue it and
  /// register a background sync for its collection.
  pub async fn submit(&self, action: QueuedAction) -> Result<Submission> {
    let collection = action.collection();
    let tag = SyncTag::for_collection(collection);
    let endpoint = tag.endpoint(&self.config)?;

    let id = self.actions.enqueue(collection, &action)?;
    if self.connectivity.is_online() {
      match crate::queue::drain(&self.actions, self.fetcher.as_ref(), collection, &endpoint).await {
        Ok(_) => return Ok(Submission::Sent),
        Err(e) => warn!("Could not send {} right away: {}", collection.as_str(), e),
      }
    }

    self.scheduler.register(tag)?;
    Ok(Submission::Queued(id))
  }

  pub async fn periodic_sync(&self, tag: &str) -> Result<usize> {
    info!("Periodic Sync: {}", tag);
    if tag != PROPERTY_UPDATES_TAG {
      return Err(eyre!("Unknown periodic sync tag '{}'", tag));
    }
    let endpoint = self.config.resolve(&self.config.sync.property_updates_endpoint)?;
    push::fetch_property_updates(
      self.fetcher.as_ref(),
      &endpoint,
      &self.config.notification,
      self.notifier.as_ref(),
    )
    .await
  }

  /// Show a push notification built from `payload` over the template.
  pub fn push(&self, payload: Option<&[u8]>) -> Result<Notification> {
    info!("Push Received");
    let notification = push::compose(&self.config.notification, payload);
    self.notifier.show(&notification)?;
    Ok(notification)
  }

  pub fn notification_click(&self, action: Option<&str>, tag: Option<&str>) -> Result<ClickOutcome> {
    info!("Notification click received");
    let target = push::click_target(action, tag);
    push::route_click(&self.clients, &self.config.scope(), target, |path| {
      Ok(self.config.resolve(path)?.to_string())
    })
  }
}
