//! Replaying queued actions to the server.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use url::Url;

use super::store::{ActionStore, Collection};
use crate::config::Config;
use crate::net::{Fetcher, Request};

/// Background sync registrations understood by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
  Calculations,
  Chat,
}

impl SyncTag {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "background-sync-calculations" => Some(SyncTag::Calculations),
      "background-sync-chat" => Some(SyncTag::Chat),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::Calculations => "background-sync-calculations",
      SyncTag::Chat => "background-sync-chat",
    }
  }

  /// The tag whose sync drains `collection`.
  pub fn for_collection(collection: Collection) -> Self {
    match collection {
      Collection::Calculations => SyncTag::Calculations,
      Collection::ChatMessages => SyncTag::Chat,
    }
  }

  pub fn collection(&self) -> Collection {
    match self {
      SyncTag::Calculations => Collection::Calculations,
      SyncTag::Chat => Collection::ChatMessages,
    }
  }

  pub fn endpoint(&self, config: &Config) -> Result<Url> {
    match self {
      SyncTag::Calculations => config.resolve(&config.sync.calculations_endpoint),
      SyncTag::Chat => config.resolve(&config.sync.chat_endpoint),
    }
  }
}

/// Send every record in `collection` to `endpoint`, one at a time and in
/// order. The sent records are removed only when all of them went through;
/// on the first failure everything stays queued, including records that were
/// already delivered. Records queued while a drain is in flight are left for
/// the next one. Only one drain per collection runs at a time. Returns how
/// many records were sent.
pub async fn drain<F: Fetcher + ?Sized>(
  store: &ActionStore,
  fetcher: &F,
  collection: Collection,
  endpoint: &Url,
) -> Result<usize> {
  let _draining = store.lock_drain(collection).await;

  let records = store.list(collection)?;
  let Some(last_id) = records.last().map(|r| r.id) else {
    debug!("Nothing queued in {}", collection.as_str());
    return Ok(0);
  };

  for record in &records {
    let request = Request::post_json(endpoint.clone(), &record.to_json())?;
    let response = fetcher
      .fetch(request)
      .await
      .map_err(|e| eyre!("Failed to send {} #{}: {}", collection.as_str(), record.id, e))?;
    if !response.ok() {
      return Err(eyre!(
        "Server rejected {} #{} with status {}",
        collection.as_str(),
        record.id,
        response.status
      ));
    }
  }

  store.clear_through(collection, last_id)?;
  info!("{} {} synced successfully", records.len(), collection.as_str());

  Ok(records.len())
}
