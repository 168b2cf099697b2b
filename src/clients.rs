//! Registry of page instances connected to the worker.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::messages::WorkerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Snapshot of a connected page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: ClientId,
  pub url: String,
  pub focused: bool,
  /// Whether this worker controls the page
  pub controlled: bool,
}

struct ClientEntry {
  info: ClientInfo,
  /// None for windows we opened whose page has not connected a port yet
  port: Option<mpsc::UnboundedSender<WorkerMessage>>,
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  entries: Vec<ClientEntry>,
}

/// Connected pages. Each page receives worker messages on its own channel.
#[derive(Default)]
pub struct Clients {
  registry: Mutex<Registry>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Registry>> {
    self.registry.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn add(
    &self,
    url: &str,
    controlled: bool,
    port: Option<mpsc::UnboundedSender<WorkerMessage>>,
  ) -> Result<ClientId> {
    let mut registry = self.lock()?;
    registry.next_id += 1;
    let id = ClientId(registry.next_id);
    registry.entries.push(ClientEntry {
      info: ClientInfo {
        id,
        url: url.to_string(),
        focused: false,
        controlled,
      },
      port,
    });
    Ok(id)
  }

  /// Register a page and hand back the receiving end of its message port.
  /// Pages loaded while a worker is active start out controlled by it.
  pub fn connect(
    &self,
    url: &str,
    controlled: bool,
  ) -> Result<(ClientId, mpsc::UnboundedReceiver<WorkerMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.add(url, controlled, Some(tx))?;
    debug!("Client {:?} connected from {}", id, url);
    Ok((id, rx))
  }

  pub fn disconnect(&self, id: ClientId) -> Result<()> {
    self.lock()?.entries.retain(|e| e.info.id != id);
    Ok(())
  }

  /// Pages whose port has been dropped are pruned before listing.
  pub fn match_all(&self, include_uncontrolled: bool) -> Result<Vec<ClientInfo>> {
    let mut registry = self.lock()?;
    registry
      .entries
      .retain(|e| e.port.as_ref().map_or(true, |p| !p.is_closed()));
    Ok(
      registry
        .entries
        .iter()
        .filter(|e| include_uncontrolled || e.info.controlled)
        .map(|e| e.info.clone())
        .collect(),
    )
  }

  /// Take control of every open page. Returns how many were newly claimed.
  pub fn claim(&self) -> Result<usize> {
    let mut registry = self.lock()?;
    let mut claimed = 0;
    for entry in registry.entries.iter_mut().filter(|e| !e.info.controlled) {
      entry.info.controlled = true;
      claimed += 1;
    }
    Ok(claimed)
  }

  /// Post to every controlled page that has a port. Returns how many got it.
  pub fn post_all(&self, message: &WorkerMessage) -> Result<usize> {
    let registry = self.lock()?;
    let delivered = registry
      .entries
      .iter()
      .filter(|e| e.info.controlled)
      .filter_map(|e| e.port.as_ref())
      .filter(|port| port.send(message.clone()).is_ok())
      .count();
    Ok(delivered)
  }

  pub fn focus(&self, id: ClientId) -> Result<()> {
    let mut registry = self.lock()?;
    if !registry.entries.iter().any(|e| e.info.id == id) {
      return Err(eyre!("No client with id {:?}", id.0));
    }
    for entry in registry.entries.iter_mut() {
      entry.info.focused = entry.info.id == id;
    }
    Ok(())
  }

  /// Open a new window. It is focused and controlled by this worker.
  pub fn open_window(&self, url: &str) -> Result<ClientId> {
    let id = self.add(url, true, None)?;
    self.focus(id)?;
    debug!("Opened window {:?} at {}", id, url);
    Ok(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn update() -> WorkerMessage {
    WorkerMessage::UpdateAvailable {
      version: "2.0.0".to_string(),
    }
  }

  #[test]
  fn test_only_claimed_pages_receive_messages() {
    let clients = Clients::new();
    let (_, mut rx) = clients.connect("https://app.test/", false).unwrap();

    assert_eq!(clients.post_all(&update()).unwrap(), 0);
    assert_eq!(clients.claim().unwrap(), 1);
    assert_eq!(clients.post_all(&update()).unwrap(), 1);
    assert_eq!(rx.try_recv().unwrap(), update());
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_page_connected_under_active_worker_is_controlled() {
    let clients = Clients::new();
    let (_, mut rx) = clients.connect("https://app.test/", true).unwrap();

    assert_eq!(clients.match_all(false).unwrap().len(), 1);
    assert_eq!(clients.claim().unwrap(), 0);
    assert_eq!(clients.post_all(&update()).unwrap(), 1);
    assert_eq!(rx.try_recv().unwrap(), update());
  }

  #[test]
  fn test_dropped_ports_are_pruned() {
    let clients = Clients::new();
    let (_, rx) = clients.connect("https://app.test/", false).unwrap();
    let (_, _keep) = clients.connect("https://app.test/?tool=roi", false).unwrap();
    drop(rx);

    let all = clients.match_all(true).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].url, "https://app.test/?tool=roi");
  }

  #[test]
  fn test_open_window_is_focused_and_controlled() {
    let clients = Clients::new();
    let (first, _rx) = clients.connect("https://app.test/", false).unwrap();
    clients.focus(first).unwrap();

    let opened = clients.open_window("https://app.test/?tool=emi-calculator").unwrap();
    let all = clients.match_all(false).unwrap();

    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, opened);
    assert!(all[0].focused);
    assert!(!clients.match_all(true).unwrap()[0].focused);
  }

  #[test]
  fn test_focus_unknown_client_fails() {
    let clients = Clients::new();
    assert!(clients.focus(ClientId(42)).is_err());
  }
}
