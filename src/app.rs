use color_eyre::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::cache::CacheStorage;
use crate::clients::ClientId;
use crate::event::{Event, EventHandler};
use crate::net::{Fetcher, Response};
use crate::queue::QueuedAction;
use crate::worker::Worker;

/// One-line description of a response, for printing.
pub fn summarize(response: &Response) -> Value {
  json!({
    "status": response.status,
    "type": response.response_type.as_str(),
    "contentType": response.content_type(),
    "bytes": response.body.len(),
  })
}

/// Long-running mode: feeds stdin events to the worker and prints one JSON
/// report per handled event on stdout.
pub struct App<S: CacheStorage + 'static, F: Fetcher + 'static> {
  worker: Arc<Worker<S, F>>,
}

impl<S: CacheStorage + 'static, F: Fetcher + 'static> App<S, F> {
  pub fn new(worker: Arc<Worker<S, F>>) -> Self {
    Self { worker }
  }

  pub async fn run(&self) -> Result<()> {
    let state = self.worker.start()?;
    info!("Worker running in state {:?}", state);

    let mut events = EventHandler::new();
    while let Some(event) = events.next().await {
      match self.handle(event).await {
        Ok(Some(report)) => println!("{}", report),
        Ok(None) => {}
        Err(e) => error!("{}", e),
      }
    }

    info!("Input closed, shutting down");
    Ok(())
  }

  /// Dispatch one event. Returns a report for events that produce a result.
  pub async fn handle(&self, event: Event) -> Result<Option<Value>> {
    let worker = &self.worker;
    let report = match event {
      Event::Install => {
        worker.install().await?;
        json!({"event": "install", "state": format!("{:?}", worker.state())})
      }
      Event::Activate => {
        let activation = worker.activate()?;
        json!({"event": "activate", "removed": activation.removed, "claimed": activation.claimed})
      }
      Event::Fetch {
        url,
        navigate,
        destination,
      } => {
        let request = worker.request(&url, navigate, destination.as_deref())?;
        match worker.fetch(request).await {
          Ok(response) => json!({"event": "fetch", "url": url, "response": summarize(&response)}),
          Err(e) => json!({"event": "fetch", "url": url, "error": e.to_string()}),
        }
      }
      Event::Message { data } => {
        worker.message(&data).await;
        return Ok(None);
      }
      Event::Sync { tag } => {
        let sent = worker.sync(&tag).await?;
        json!({"event": "sync", "tag": tag, "sent": sent})
      }
      Event::RegisterSync { tag } => {
        let registered = worker.register_sync(&tag)?.is_some();
        json!({"event": "registerSync", "tag": tag, "registered": registered})
      }
      Event::Calculation(calculation) => {
        let submission = worker.submit(QueuedAction::Calculation(calculation)).await?;
        json!({"event": "calculation", "submission": format!("{:?}", submission)})
      }
      Event::ChatMessage(message) => {
        let submission = worker.submit(QueuedAction::ChatMessage(message)).await?;
        json!({"event": "chatMessage", "submission": format!("{:?}", submission)})
      }
      Event::PeriodicSync { tag } => {
        let updates = worker.periodic_sync(&tag).await?;
        json!({"event": "periodicSync", "tag": tag, "updates": updates})
      }
      Event::Push { data } => {
        let payload = data.map(|d| match d {
          Value::String(text) => text.into_bytes(),
          other => other.to_string().into_bytes(),
        });
        let notification = worker.push(payload.as_deref())?;
        json!({"event": "push", "notification": notification})
      }
      Event::NotificationClick { action, tag } => {
        let outcome = worker.notification_click(action.as_deref(), tag.as_deref())?;
        json!({"event": "notificationClick", "outcome": format!("{:?}", outcome)})
      }
      Event::Online => {
        worker.set_online(true);
        return Ok(None);
      }
      Event::Offline => {
        worker.set_online(false);
        return Ok(None);
      }
      Event::Connect { url } => {
        let (id, mut port) = worker.connect(&url)?;
        // Forward messages posted to this page
        tokio::spawn(async move {
          while let Some(message) = port.recv().await {
            match serde_json::to_string(&message) {
              Ok(line) => println!("{}", json!({"client": id.0, "message": line})),
              Err(e) => error!("Failed to encode message for client {}: {}", id.0, e),
            }
          }
        });
        json!({"event": "connect", "client": id.0})
      }
      Event::Disconnect { client } => {
        worker.clients().disconnect(ClientId(client))?;
        return Ok(None);
      }
    };

    Ok(Some(report))
  }
}
