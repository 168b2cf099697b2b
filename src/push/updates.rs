use color_eyre::Result;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::notification::{Notification, Notifier};
use crate::net::{FetchError, Fetcher, Request};

/// Periodic sync registration that refreshes property updates.
pub const PROPERTY_UPDATES_TAG: &str = "property-updates";

/// Fetch pending property updates and raise a summary notification when
/// there are any. Returns the number of updates.
pub async fn fetch_property_updates<F: Fetcher + ?Sized>(
  fetcher: &F,
  endpoint: &Url,
  template: &Notification,
  notifier: &dyn Notifier,
) -> Result<usize> {
  let response = fetcher.fetch(Request::get(endpoint.clone())).await?;
  if !response.ok() {
    return Err(FetchError::Status {
      status: response.status,
      url: endpoint.to_string(),
    }
    .into());
  }
  let updates: Vec<Value> = response.json()?;

  if updates.is_empty() {
    debug!("No property updates");
    return Ok(0);
  }

  notifier.show(&Notification {
    title: template.title.clone(),
    body: format!("{} new property updates available", updates.len()),
    icon: template.icon.clone(),
    badge: None,
    tag: Some(PROPERTY_UPDATES_TAG.to_string()),
    require_interaction: false,
    actions: Vec::new(),
    data: None,
  })?;

  Ok(updates.len())
}
