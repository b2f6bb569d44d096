//! Scripted network and recording host shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::SqliteStorage;
use crate::config::Config;
use crate::fetch::{CacheMode, Network, NetworkError, Request, Response};
use crate::host::{Host, WindowClient};
use crate::push::Notification;
use crate::worker::Worker;

pub const ORIGIN: &str = "http://localhost:5000";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// A fetch as the network saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
  pub method: String,
  pub url: String,
  pub cache_mode: CacheMode,
  pub body: Option<Vec<u8>>,
}

/// Network that answers from a script; unscripted URLs are unreachable.
#[derive(Default)]
pub struct ScriptedNetwork {
  responses: Mutex<HashMap<String, Response>>,
  calls: Mutex<Vec<Call>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  /// Make a previously scripted URL unreachable again.
  pub fn go_offline(&self, path: &str) {
    self.responses.lock().unwrap().remove(url(path).as_str());
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self.calls().iter().filter(|c| c.url == target).count()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.lock().unwrap().push(Call {
      method: request.method.to_string(),
      url: request.url.to_string(),
      cache_mode: request.cache_mode,
      body: request.body.clone(),
    });

    self
      .responses
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| NetworkError::Unreachable {
        url: request.url.to_string(),
        reason: "offline".to_string(),
      })
  }
}

/// Something the worker asked the host to do.
#[derive(Debug, Clone, PartialEq)]
pub enum HostAction {
  Show(Notification),
  Close(String),
  Navigate(String, String),
  Focus(String),
  Open(String),
  Post(String, Value),
  SkipWaiting,
  Claim,
  Update,
}

#[derive(Default)]
pub struct RecordingHost {
  clients: Vec<WindowClient>,
  actions: Mutex<Vec<HostAction>>,
  fail_notifications: bool,
  fail_claims: bool,
}

impl RecordingHost {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_client(mut self, id: &str, url: &str) -> Self {
    self.clients.push(WindowClient {
      id: id.to_string(),
      url: Url::parse(url).unwrap(),
    });
    self
  }

  pub fn failing_notifications(mut self) -> Self {
    self.fail_notifications = true;
    self
  }

  pub fn failing_claims(mut self) -> Self {
    self.fail_claims = true;
    self
  }

  pub fn actions(&self) -> Vec<HostAction> {
    self.actions.lock().unwrap().clone()
  }

  fn record(&self, action: HostAction) {
    self.actions.lock().unwrap().push(action);
  }
}

#[async_trait]
impl Host for RecordingHost {
  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    if self.fail_notifications {
      return Err(eyre!("notifications are blocked"));
    }
    self.record(HostAction::Show(notification.clone()));
    Ok(())
  }

  async fn close_notification(&self, notification: &Notification) -> Result<()> {
    self.record(HostAction::Close(notification.title.clone()));
    Ok(())
  }

  async fn window_clients(&self) -> Result<Vec<WindowClient>> {
    Ok(self.clients.clone())
  }

  async fn navigate(&self, client_id: &str, url: &Url) -> Result<()> {
    self.record(HostAction::Navigate(client_id.to_string(), url.to_string()));
    Ok(())
  }

  async fn focus(&self, client_id: &str) -> Result<()> {
    self.record(HostAction::Focus(client_id.to_string()));
    Ok(())
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    self.record(HostAction::Open(url.to_string()));
    Ok(())
  }

  async fn post_message(&self, client_id: &str, message: &Value) -> Result<()> {
    self.record(HostAction::Post(client_id.to_string(), message.clone()));
    Ok(())
  }

  async fn skip_waiting(&self) -> Result<()> {
    self.record(HostAction::SkipWaiting);
    Ok(())
  }

  async fn claim_clients(&self) -> Result<()> {
    if self.fail_claims {
      return Err(eyre!("clients cannot be claimed"));
    }
    self.record(HostAction::Claim);
    Ok(())
  }

  async fn update_registration(&self) -> Result<()> {
    self.record(HostAction::Update);
    Ok(())
  }
}

pub fn config() -> Config {
  Config {
    origin: ORIGIN.to_string(),
    ..Config::default()
  }
}

pub type TestWorker = Worker<SqliteStorage, ScriptedNetwork, RecordingHost>;

/// Worker over in-memory storage; returns the shared doubles for assertions.
pub fn worker_with(
  host: RecordingHost,
) -> (
  TestWorker,
  Arc<SqliteStorage>,
  Arc<ScriptedNetwork>,
  Arc<RecordingHost>,
) {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let network = Arc::new(ScriptedNetwork::new());
  let host = Arc::new(host);
  let worker = Worker::new(
    config(),
    Arc::clone(&storage),
    Arc::clone(&network),
    Arc::clone(&host),
  )
  .unwrap();
  (worker, storage, network, host)
}

pub fn worker() -> (
  TestWorker,
  Arc<SqliteStorage>,
  Arc<ScriptedNetwork>,
  Arc<RecordingHost>,
) {
  worker_with(RecordingHost::new())
}

/// Script every static asset so install can succeed.
pub fn script_static_assets(network: &ScriptedNetwork) {
  for path in config().static_assets {
    network.respond(&path, Response::new(200, format!("asset {}", path)));
  }
}
