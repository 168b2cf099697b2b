use color_eyre::Result;
use tracing::debug;

use crate::clients::{ClientId, Clients};

/// Tool pages reachable straight from a notification, by notification tag.
const SHORTCUTS: &[(&str, &str)] = &[
  ("emi-calculator", "/?tool=emi-calculator"),
  ("property-match", "/?tool=property-matchmaker"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
  /// "close" action: nothing beyond closing the notification
  Dismiss,
  /// Open a specific tool page
  Shortcut(String),
  /// Bring the app forward, opening it if needed
  App,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  Dismissed,
  Focused(ClientId),
  Opened(ClientId),
}

/// Decide what a click on a notification should do.
pub fn click_target(action: Option<&str>, tag: Option<&str>) -> ClickTarget {
  if action == Some("close") {
    return ClickTarget::Dismiss;
  }
  if let Some(tag) = tag {
    if let Some((_, path)) = SHORTCUTS.iter().find(|(t, _)| *t == tag) {
      return ClickTarget::Shortcut(path.to_string());
    }
  }
  ClickTarget::App
}

/// Carry out a click. `scope` identifies our own windows; `resolve` turns a
/// path into a URL under the origin.
pub fn route_click(
  clients: &Clients,
  scope: &str,
  target: ClickTarget,
  resolve: impl Fn(&str) -> Result<String>,
) -> Result<ClickOutcome> {
  match target {
    ClickTarget::Dismiss => Ok(ClickOutcome::Dismissed),
    ClickTarget::Shortcut(path) => {
      let id = clients.open_window(&resolve(&path)?)?;
      Ok(ClickOutcome::Opened(id))
    }
    ClickTarget::App => {
      let existing = clients
        .match_all(true)?
        .into_iter()
        .find(|c| c.url.contains(scope));
      match existing {
        Some(client) => {
          clients.focus(client.id)?;
          debug!("Focused existing window {}", client.url);
          Ok(ClickOutcome::Focused(client.id))
        }
        None => Ok(ClickOutcome::Opened(clients.open_window(&resolve("/")?)?)),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SCOPE: &str = "https://app.test/";

  fn resolve(path: &str) -> Result<String> {
    Ok(format!("https://app.test{}", path))
  }

  #[test]
  fn test_click_targets() {
    assert_eq!(click_target(Some("close"), Some("emi-calculator")), ClickTarget::Dismiss);
    assert_eq!(click_target(Some("open"), None), ClickTarget::App);
    assert_eq!(click_target(None, Some("magicai-notification")), ClickTarget::App);
    assert_eq!(
      click_target(None, Some("property-match")),
      ClickTarget::Shortcut("/?tool=property-matchmaker".to_string())
    );
  }

  #[test]
  fn test_focuses_existing_window_in_scope() {
    let clients = Clients::new();
    let (_other, _a) = clients.connect("https://elsewhere.test/", false).unwrap();
    let (ours, _b) = clients.connect("https://app.test/?tool=roi", false).unwrap();

    let outcome = route_click(&clients, SCOPE, ClickTarget::App, resolve).unwrap();

    assert_eq!(outcome, ClickOutcome::Focused(ours));
    assert_eq!(clients.match_all(true).unwrap().len(), 2);
  }

  #[test]
  fn test_opens_app_when_no_window() {
    let clients = Clients::new();
    let outcome = route_click(&clients, SCOPE, ClickTarget::App, resolve).unwrap();

    let ClickOutcome::Opened(id) = outcome else {
      panic!("expected a new window, got {:?}", outcome);
    };
    let windows = clients.match_all(true).unwrap();
    assert_eq!(windows[0].id, id);
    assert_eq!(windows[0].url, "https://app.test/");
  }

  #[test]
  fn test_dismiss_touches_nothing() {
    let clients = Clients::new();
    let outcome = route_click(&clients, SCOPE, ClickTarget::Dismiss, resolve).unwrap();
    assert_eq!(outcome, ClickOutcome::Dismissed);
    assert!(clients.match_all(true).unwrap().is_empty());
  }
}
