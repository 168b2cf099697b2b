use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::APP_ICON;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub badge: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tag: Option<String>,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
  /// Arbitrary payload data carried through to click handling
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

impl Default for Notification {
  fn default() -> Self {
    Self {
      title: "Magic AI ✦".to_string(),
      body: "You have a new notification".to_string(),
      icon: Some(APP_ICON.to_string()),
      badge: Some(APP_ICON.to_string()),
      tag: Some("magicai-notification".to_string()),
      require_interaction: true,
      actions: vec![
        NotificationAction {
          action: "open".to_string(),
          title: "Open App".to_string(),
        },
        NotificationAction {
          action: "close".to_string(),
          title: "Close".to_string(),
        },
      ],
      data: None,
    }
  }
}

/// Merge a push payload over `template`, field by field. Payloads that are
/// not a JSON object, or that produce an invalid notification, leave the
/// template as is.
pub fn compose(template: &Notification, payload: Option<&[u8]>) -> Notification {
  let Some(payload) = payload else {
    return template.clone();
  };

  let overrides = match serde_json::from_slice::<Value>(payload) {
    Ok(Value::Object(map)) => map,
    Ok(other) => {
      warn!("Ignoring non-object push payload: {}", other);
      return template.clone();
    }
    Err(e) => {
      warn!("Error parsing push data: {}", e);
      return template.clone();
    }
  };

  let mut merged = match serde_json::to_value(template) {
    Ok(Value::Object(map)) => map,
    _ => return template.clone(),
  };
  merged.extend(overrides);

  serde_json::from_value(Value::Object(merged)).unwrap_or_else(|e| {
    warn!("Push payload does not describe a notification: {}", e);
    template.clone()
  })
}

/// Where notifications are displayed.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      tag = notification.tag.as_deref().unwrap_or(""),
      "{}: {}", notification.title, notification.body
    );
    Ok(())
  }
}
