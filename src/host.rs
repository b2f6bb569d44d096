//! The hosting runtime: open windows, system notifications and registration
//! control.

use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;
use url::Url;

use crate::push::Notification;

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: Url,
}

/// Capabilities the worker needs from its host.
#[async_trait]
pub trait Host: Send + Sync {
  async fn show_notification(&self, notification: &Notification) -> Result<()>;

  async fn close_notification(&self, notification: &Notification) -> Result<()>;

  /// Window clients, including ones not yet controlled by this worker.
  async fn window_clients(&self) -> Result<Vec<WindowClient>>;

  async fn navigate(&self, client_id: &str, url: &Url) -> Result<()>;

  async fn focus(&self, client_id: &str) -> Result<()>;

  async fn open_window(&self, url: &Url) -> Result<()>;

  async fn post_message(&self, client_id: &str, message: &Value) -> Result<()>;

  /// Activate without waiting for older worker instances to finish.
  async fn skip_waiting(&self) -> Result<()>;

  /// Take control of already-open pages.
  async fn claim_clients(&self) -> Result<()>;

  /// Ask the registration to check for a newer worker script.
  async fn update_registration(&self) -> Result<()>;
}

/// Host for running the worker from a terminal: windows are the ones given
/// on the command line, and every action is printed.
pub struct ConsoleHost {
  clients: Mutex<Vec<WindowClient>>,
}

impl ConsoleHost {
  pub fn new(clients: Vec<WindowClient>) -> Self {
    Self {
      clients: Mutex::new(clients),
    }
  }

  fn clients(&self) -> Vec<WindowClient> {
    self
      .clients
      .lock()
      .map(|clients| clients.clone())
      .unwrap_or_default()
  }
}

#[async_trait]
impl Host for ConsoleHost {
  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    println!("[notification] {}: {}", notification.title, notification.body);
    Ok(())
  }

  async fn close_notification(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, "Notification closed");
    Ok(())
  }

  async fn window_clients(&self) -> Result<Vec<WindowClient>> {
    Ok(self.clients())
  }

  async fn navigate(&self, client_id: &str, url: &Url) -> Result<()> {
    println!("[window {}] navigate -> {}", client_id, url);
    if let Ok(mut clients) = self.clients.lock() {
      if let Some(client) = clients.iter_mut().find(|c| c.id == client_id) {
        client.url = url.clone();
      }
    }
    Ok(())
  }

  async fn focus(&self, client_id: &str) -> Result<()> {
    println!("[window {}] focus", client_id);
    Ok(())
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    println!("[open window] {}", url);
    Ok(())
  }

  async fn post_message(&self, client_id: &str, message: &Value) -> Result<()> {
    println!("[window {}] message {}", client_id, message);
    Ok(())
  }

  async fn skip_waiting(&self) -> Result<()> {
    info!("Skip waiting requested");
    Ok(())
  }

  async fn claim_clients(&self) -> Result<()> {
    info!("Claimed open clients");
    Ok(())
  }

  async fn update_registration(&self) -> Result<()> {
    info!("Registration update check requested");
    Ok(())
  }
}
