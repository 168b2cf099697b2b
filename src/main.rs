mod app;
mod cache;
mod clients;
mod config;
mod event;
mod lifecycle;
mod messages;
mod net;
mod push;
mod queue;
#[cfg(test)]
mod testing;
mod worker;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::SqliteStorage;
use net::HttpFetcher;
use push::LogNotifier;
use queue::{ActionStore, Calculation, ChatMessage, Collection, QueuedAction};
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "estate-worker")]
#[command(about = "Offline caching, background sync and push handling for the Magic AI toolkit")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./estate-worker.yaml, then $XDG_CONFIG_HOME/estate-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the app shell and activate
  Install,
  /// Remove caches from older releases
  Activate,
  /// Compare the deployed manifest version with the cached one
  CheckUpdates,
  /// Run one request through the cache router
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Request destination (image, script, style, font, document, manifest)
    #[arg(long)]
    destination: Option<String>,
  },
  /// Queue an action for background sync
  Enqueue {
    #[command(subcommand)]
    action: EnqueueCommand,
  },
  /// Drain the queue behind a sync tag now
  Sync { tag: String },
  /// Run a periodic sync task
  PeriodicSync { tag: String },
  /// Inspect queued actions
  Queue {
    #[command(subcommand)]
    command: QueueCommand,
  },
  /// Show a push notification built from an optional JSON payload
  Push { payload: Option<String> },
  /// Read JSON-line events from stdin until it closes
  Run,
}

#[derive(Subcommand, Debug)]
enum EnqueueCommand {
  Calculation {
    /// Calculator kind (emi, affordability, rent-vs-buy, roi, eligibility)
    #[arg(long = "type")]
    kind: String,
    /// JSON object of inputs
    #[arg(long)]
    inputs: String,
    /// JSON object of results
    #[arg(long)]
    result: String,
  },
  Chat {
    #[arg(long, default_value = "user")]
    sender: String,
    text: String,
  },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List records in a collection (calculations or chatMessages)
  List { collection: String },
}

/// Initialize the tracing subscriber for logging. Use RUST_LOG to control the
/// level. The returned guard flushes the log file on drop.
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "estate-worker.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_ansi(false).with_writer(writer)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(file_layer)
    .with(filter)
    .init();

  guard
}

fn parse_json(label: &str, raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON for {}: {}", label, e))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(config.log_dir.as_ref());

  let data_dir = config.data_dir()?;
  info!("Using data directory {}", data_dir.display());

  let storage = Arc::new(SqliteStorage::open(&data_dir.join("cache.db"))?);
  let actions = Arc::new(ActionStore::open(&data_dir.join("queue.db"))?);
  let fetcher = Arc::new(HttpFetcher::new(config.origin_url()?, config.request_timeout())?);
  let worker = Worker::new(config, storage, fetcher, actions, Arc::new(LogNotifier))?;

  match args.command {
    Command::Install => {
      worker.install().await?;
      println!("{:?}", worker.state());
    }
    Command::Activate => {
      let activation = worker.activate()?;
      println!(
        "{}",
        json!({"removed": activation.removed, "claimed": activation.claimed})
      );
    }
    Command::CheckUpdates => match worker.check_for_updates().await? {
      Some(version) => println!("Update available: {}", version),
      None => println!("Up to date"),
    },
    Command::Fetch {
      url,
      navigate,
      destination,
    } => {
      worker.start()?;
      let request = worker.request(&url, navigate, destination.as_deref())?;
      let response = worker.fetch(request).await?;
      println!("{}", app::summarize(&response));
    }
    Command::Enqueue { action } => {
      let action = match action {
        EnqueueCommand::Calculation {
          kind,
          inputs,
          result,
        } => QueuedAction::Calculation(Calculation {
          kind,
          inputs: parse_json("inputs", &inputs)?,
          result: parse_json("result", &result)?,
          timestamp: Utc::now(),
        }),
        EnqueueCommand::Chat { sender, text } => QueuedAction::ChatMessage(ChatMessage {
          sender,
          text,
          timestamp: Utc::now(),
        }),
      };
      let id = worker.actions().enqueue(action.collection(), &action)?;
      println!("Queued {} #{}", action.collection().as_str(), id);
    }
    Command::Sync { tag } => {
      let sent = worker.sync(&tag).await?;
      println!("Sent {}", sent);
    }
    Command::PeriodicSync { tag } => {
      let updates = worker.periodic_sync(&tag).await?;
      println!("{} update(s)", updates);
    }
    Command::Queue {
      command: QueueCommand::List { collection },
    } => {
      let collection: Collection = collection.parse()?;
      for record in worker.actions().list(collection)? {
        println!("{}", record.to_json());
      }
    }
    Command::Push { payload } => {
      let notification = worker.push(payload.as_deref().map(str::as_bytes))?;
      println!("{}", serde_json::to_string(&notification)?);
    }
    Command::Run => {
      let app = app::App::new(Arc::new(worker));
      app.run().await?;
    }
  }

  Ok(())
}
