//! Test doubles for the network and the notification display.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::net::types::Method;
use crate::net::{FetchError, Fetcher, Request, Response};
use crate::push::{Notification, Notifier};

#[derive(Default)]
pub struct StubFetcher {
  routes: Mutex<HashMap<String, Response>>,
  scripted: Mutex<HashMap<String, VecDeque<Option<Response>>>>,
  calls: Mutex<Vec<Request>>,
  offline: AtomicBool,
}

impl StubFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer every request for `url` with `response`.
  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Queue one-shot replies for `url`, consumed in order before the fixed
  /// route. `None` is a transport failure.
  pub fn script(&self, url: &str, replies: Vec<Option<Response>>) {
    self
      .scripted
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .extend(replies);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Every request received, in order.
  pub fn requests(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  /// JSON bodies of every POST, in the order they were sent.
  pub fn posted(&self) -> Vec<serde_json::Value> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.method == Method::Post)
      .filter_map(|r| r.body.as_ref())
      .filter_map(|b| serde_json::from_slice(b).ok())
      .collect()
  }
}

#[async_trait]
impl Fetcher for StubFetcher {
  async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(request);

    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::Offline(url));
    }

    let scripted = self
      .scripted
      .lock()
      .unwrap()
      .get_mut(&url)
      .and_then(|queue| queue.pop_front());
    if let Some(reply) = scripted {
      return reply.ok_or(FetchError::Offline(url));
    }

    let routed = self.routes.lock().unwrap().get(&url).cloned();
    match routed {
      Some(response) => Ok(response),
      None => Err(FetchError::Offline(url)),
    }
  }
}

/// Keeps every notification it is asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: &Notification) -> color_eyre::Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}
