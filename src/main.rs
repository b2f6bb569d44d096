mod cache;
mod config;
mod event;
mod fetch;
mod host;
mod lifecycle;
mod push;
mod router;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use url::Url;

use cache::SqliteStorage;
use event::EventSender;
use fetch::{HttpNetwork, Network, Request};
use host::{ConsoleHost, WindowClient};
use push::{Notification, PushPayload};
use sync::PendingRequest;
use worker::{FetchOutcome, Worker};

#[derive(Parser, Debug)]
#[command(name = "barbaarintasan-sw")]
#[command(about = "Offline caching worker for the Barbaarintasan Academy web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/barbaarintasan-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the worker is registered for
  #[arg(long)]
  origin: Option<String>,

  /// App version that names the main cache
  #[arg(long = "app-version")]
  app_version: Option<String>,

  /// URL of an open application window (repeatable)
  #[arg(long = "window")]
  windows: Vec<String>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the current cache with the static assets
  Install,
  /// Remove caches from older versions
  Activate,
  /// Send a request through the worker
  Fetch {
    path: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Print the response body
    #[arg(long)]
    show_body: bool,
  },
  /// Deliver a push message (JSON or plain text)
  Push { payload: Option<String> },
  /// Click a notification
  Click {
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    body: Option<String>,
  },
  /// Fire a background sync
  Sync {
    #[arg(default_value = "sync-messages")]
    tag: String,
  },
  /// Fire a periodic sync
  PeriodicSync {
    #[arg(default_value = "refresh-courses")]
    tag: String,
  },
  /// Post a message to the worker, e.g. SKIP_WAITING
  Message { kind: String },
  /// Queue a mutation for the next background sync
  Queue {
    path: String,
    #[arg(long, default_value = "POST")]
    method: String,
    #[arg(long)]
    body: Option<String>,
    /// Header as name:value (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
  },
  /// List cache stores and their entries
  Caches,
  /// Download lesson media into a course store for offline use
  DownloadCourse {
    id: String,
    #[arg(required = true)]
    paths: Vec<String>,
  },
  /// Delete a course store
  RemoveCourse { id: String },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| format!("expected name:value, got '{}'", raw))?;
  Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Log to a daily file under the data directory; `verbose` mirrors to stderr.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "worker.log"));

  let filter = || {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("barbaarintasan_sw=info"))
  };

  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_filter(filter());
  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .with_filter(filter())
  });

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  // Load configuration, command line wins
  let config = config::Config::load(args.config.as_deref())?;
  let config = config::Config {
    origin: args.origin.unwrap_or(config.origin),
    version: args.app_version.unwrap_or(config.version),
    ..config
  };
  let origin = config.origin_url()?;

  let windows = args
    .windows
    .iter()
    .enumerate()
    .map(|(i, raw)| {
      let url = origin
        .join(raw)
        .map_err(|e| eyre!("Invalid window URL '{}': {}", raw, e))?;
      Ok(WindowClient {
        id: format!("window-{}", i + 1),
        url,
      })
    })
    .collect::<Result<Vec<_>>>()?;

  let storage = Arc::new(SqliteStorage::open()?);
  let network = Arc::new(HttpNetwork::new()?);
  let host = Arc::new(ConsoleHost::new(windows));
  let worker = Worker::new(config.clone(), storage, Arc::clone(&network), host)?;

  let (events, receiver) = event::channel();
  let runner = tokio::spawn(worker.clone().run(receiver));

  let app = App {
    config,
    origin,
    worker,
    events,
    network,
  };
  let result = app.run(args.command).await;

  // Closing the channel lets the event loop finish
  drop(app);
  runner
    .await
    .map_err(|e| eyre!("Worker event loop panicked: {}", e))?;

  result
}

struct App {
  config: config::Config,
  origin: Url,
  worker: Worker<SqliteStorage, HttpNetwork, ConsoleHost>,
  events: EventSender,
  network: Arc<HttpNetwork>,
}

impl App {
  fn url(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Install => {
        self.events.install().await?;
        println!("Installed {}", self.worker.cache_name());
      }
      Command::Activate => {
        let report = self.events.activate().await?;
        println!("Activated {}", self.worker.cache_name());
        for name in report.deleted {
          println!("  deleted {}", name);
        }
      }
      Command::Fetch {
        path,
        navigate,
        method,
        show_body,
      } => {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
          .map_err(|e| eyre!("Invalid method: {}", e))?;
        let url = self.url(&path)?;
        let request = if navigate {
          Request::navigate(url)
        } else {
          Request::get(url)
        }
        .with_method(method);

        let (response, source) = match self.events.fetch(request.clone()).await? {
          FetchOutcome::Respond(served) => (served.response, served.source.to_string()),
          FetchOutcome::Passthrough => {
            let response = self.network.fetch(&request).await?;
            (response, "passthrough".to_string())
          }
        };

        println!(
          "{} {} ({}, {}, {} bytes)",
          response.status,
          request.url,
          source,
          response.header("content-type").unwrap_or("-"),
          response.body.len()
        );
        if show_body {
          println!("{}", response.text());
        }
      }
      Command::Push { payload } => {
        let notification = self.events.push(payload.map(String::into_bytes)).await?;
        println!("Displayed \"{}\"", notification.title);
      }
      Command::Click { url, title, body } => {
        let payload = PushPayload {
          title,
          body,
          url,
          ..PushPayload::default()
        };
        let notification = Notification::from_payload(payload, &self.config.notifications);
        let outcome = self.events.notification_click(notification).await?;
        println!("{:?}", outcome);
      }
      Command::Sync { tag } => match self.events.sync(tag.as_str()).await? {
        Some(report) => println!(
          "Replayed {} queued request(s), {} failed",
          report.replayed, report.failed
        ),
        None => println!("No handler for sync tag '{}'", tag),
      },
      Command::PeriodicSync { tag } => {
        if self.events.periodic_sync(tag.as_str()).await? {
          println!("Refreshed {}", self.config.sync.courses_key);
        } else {
          println!("Nothing refreshed for '{}'", tag);
        }
      }
      Command::Message { kind } => {
        let message: Value = serde_json::json!({ "type": kind });
        self.events.message(message).await?;
      }
      Command::Queue {
        path,
        method,
        body,
        headers,
      } => {
        let queued = self.worker.queue_mutation(PendingRequest {
          url: path,
          method,
          headers: headers.into_iter().collect::<BTreeMap<_, _>>(),
          body,
        })?;
        println!("{} request(s) waiting for sync", queued);
      }
      Command::Caches => {
        let current = self.worker.cache_name();
        println!("worker state: {:?}", self.worker.state());
        for (name, entries) in self.worker.cache_summary()? {
          let marker = if name == current { " (current)" } else { "" };
          println!("{}{}", name, marker);
          for entry in entries {
            println!(
              "  {} {:>10} B  {}  {}",
              entry.status,
              entry.size,
              entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
              entry.url
            );
          }
        }
      }
      Command::DownloadCourse { id, paths } => {
        let stored = self.worker.download_course(&id, &paths).await?;
        println!("Stored {} file(s) for course {}", stored, id);
      }
      Command::RemoveCourse { id } => {
        if self.worker.remove_course(&id)? {
          println!("Removed course {}", id);
        } else {
          println!("Course {} was not downloaded", id);
        }
      }
    }

    Ok(())
  }
}
