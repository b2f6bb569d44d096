use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::fetch::Request;
use crate::lifecycle::ActivationReport;
use crate::push::{ClickOutcome, Notification};
use crate::sync::SyncReport;
use crate::worker::FetchOutcome;

/// Completion signal back to the host. The host may tear the worker down
/// once every responder for in-flight events has fired.
pub type Responder<T> = oneshot::Sender<Result<T>>;

/// Events delivered to the worker by its host
pub enum Event {
  Install(Responder<()>),
  Activate(Responder<ActivationReport>),
  Fetch {
    request: Request,
    respond: Responder<FetchOutcome>,
  },
  Push {
    data: Option<Vec<u8>>,
    done: Responder<Notification>,
  },
  NotificationClick {
    notification: Notification,
    done: Responder<ClickOutcome>,
  },
  /// Background sync; `None` when the tag is not ours
  Sync {
    tag: String,
    done: Responder<Option<SyncReport>>,
  },
  /// Periodic sync; `true` when a cached response was refreshed
  PeriodicSync {
    tag: String,
    done: Responder<bool>,
  },
  Message {
    message: Value,
    done: Responder<()>,
  },
}

impl Event {
  pub fn kind(&self) -> &'static str {
    match self {
      Event::Install(_) => "install",
      Event::Activate(_) => "activate",
      Event::Fetch { .. } => "fetch",
      Event::Push { .. } => "push",
      Event::NotificationClick { .. } => "notificationclick",
      Event::Sync { .. } => "sync",
      Event::PeriodicSync { .. } => "periodicsync",
      Event::Message { .. } => "message",
    }
  }
}

/// Create the channel between a host and its worker.
pub fn channel() -> (EventSender, EventReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (EventSender { tx }, EventReceiver { rx })
}

/// Worker side of the event channel
pub struct EventReceiver {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
  /// Receive the next event; `None` once every sender is gone
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Host side of the event channel. Each call dispatches one event and waits
/// for the worker to signal completion.
#[derive(Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
  async fn dispatch<T>(&self, build: impl FnOnce(Responder<T>) -> Event) -> Result<T> {
    let (done, rx) = oneshot::channel();
    self
      .tx
      .send(build(done))
      .map_err(|_| eyre!("Worker event loop has stopped"))?;

    rx.await
      .map_err(|_| eyre!("Worker dropped the event without completing it"))?
  }

  pub async fn install(&self) -> Result<()> {
    self.dispatch(Event::Install).await
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self.dispatch(Event::Activate).await
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    self
      .dispatch(|respond| Event::Fetch { request, respond })
      .await
  }

  pub async fn push(&self, data: Option<Vec<u8>>) -> Result<Notification> {
    self.dispatch(|done| Event::Push { data, done }).await
  }

  pub async fn notification_click(&self, notification: Notification) -> Result<ClickOutcome> {
    self
      .dispatch(|done| Event::NotificationClick { notification, done })
      .await
  }

  pub async fn sync(&self, tag: impl Into<String>) -> Result<Option<SyncReport>> {
    let tag = tag.into();
    self.dispatch(|done| Event::Sync { tag, done }).await
  }

  pub async fn periodic_sync(&self, tag: impl Into<String>) -> Result<bool> {
    let tag = tag.into();
    self.dispatch(|done| Event::PeriodicSync { tag, done }).await
  }

  pub async fn message(&self, message: Value) -> Result<()> {
    self.dispatch(|done| Event::Message { message, done }).await
  }
}
