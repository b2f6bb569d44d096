//! Push payloads to system notifications, and notification clicks back into
//! the app.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::config::NotificationConfig;
use crate::host::Host;

/// Producer-defined push payload. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  /// Page to open when the notification is clicked
  pub url: Option<String>,
  pub actions: Vec<NotificationAction>,
  pub icon: Option<String>,
  pub tag: Option<String>,
}

impl PushPayload {
  /// Parse a push body: JSON when possible, otherwise the raw text becomes
  /// the notification body.
  ///
  /// Fields of the wrong type are ignored rather than rejecting the whole
  /// payload. A bare JSON string is used as the body.
  pub fn parse(data: Option<&[u8]>) -> Self {
    let bytes = match data {
      Some(bytes) if !bytes.is_empty() => bytes,
      _ => return Self::default(),
    };

    match serde_json::from_slice::<Value>(bytes) {
      Ok(Value::Object(fields)) => Self::from_fields(&fields),
      Ok(Value::String(text)) => Self {
        body: Some(text),
        ..Self::default()
      },
      Ok(other) => {
        debug!(payload = %other, "Push payload carries no fields, using defaults");
        Self::default()
      }
      Err(e) => {
        debug!(error = %e, "Push payload is not JSON, using it as text");
        Self {
          body: Some(String::from_utf8_lossy(bytes).into_owned()),
          ..Self::default()
        }
      }
    }
  }

  fn from_fields(fields: &Map<String, Value>) -> Self {
    let text = |name: &str| fields.get(name).and_then(Value::as_str).map(String::from);

    let actions = fields
      .get("actions")
      .and_then(Value::as_array)
      .map(|actions| {
        actions
          .iter()
          .filter_map(|action| NotificationAction::deserialize(action).ok())
          .collect()
      })
      .unwrap_or_default();

    Self {
      title: text("title"),
      body: text("body"),
      url: text("url"),
      actions,
      icon: text("icon"),
      tag: text("tag"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// What is carried on a notification for the click handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  pub url: Option<String>,
  pub title: String,
  pub body: String,
}

/// A notification ready to be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: Option<String>,
  pub actions: Vec<NotificationAction>,
  pub data: NotificationData,
}

impl Notification {
  pub fn from_payload(payload: PushPayload, defaults: &NotificationConfig) -> Self {
    let title = payload.title.unwrap_or_else(|| defaults.title.clone());
    let body = payload.body.unwrap_or_else(|| defaults.body.clone());

    Self {
      data: NotificationData {
        url: payload.url,
        title: title.clone(),
        body: body.clone(),
      },
      title,
      body,
      icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
      badge: defaults.badge.clone(),
      tag: payload.tag,
      actions: payload.actions,
    }
  }
}

/// Message posted to an open window when a notification without a target
/// URL is clicked.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum ClientMessage {
  NotificationClick { title: String, body: String },
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open window was sent to the target URL and focused
  Navigated { client_id: String, url: Url },
  /// A new window was opened
  Opened(Url),
  /// The notification content was posted to an open window
  Messaged { client_id: String },
}

/// Route a notification click back into the app.
pub async fn handle_click<H: Host>(
  host: &H,
  origin: &Url,
  notification: &Notification,
) -> Result<ClickOutcome> {
  host.close_notification(notification).await?;

  let window = host
    .window_clients()
    .await?
    .into_iter()
    .find(|client| client.url.origin() == origin.origin());

  let data = &notification.data;
  match (&data.url, window) {
    (Some(target), Some(client)) => {
      let url = resolve(origin, target)?;
      host.navigate(&client.id, &url).await?;
      host.focus(&client.id).await?;
      Ok(ClickOutcome::Navigated {
        client_id: client.id,
        url,
      })
    }
    (Some(target), None) => {
      let url = resolve(origin, target)?;
      host.open_window(&url).await?;
      Ok(ClickOutcome::Opened(url))
    }
    (None, Some(client)) => {
      let message = serde_json::to_value(ClientMessage::NotificationClick {
        title: data.title.clone(),
        body: data.body.clone(),
      })
      .map_err(|e| eyre!("Failed to encode client message: {}", e))?;
      host.post_message(&client.id, &message).await?;
      Ok(ClickOutcome::Messaged {
        client_id: client.id,
      })
    }
    (None, None) => {
      let content = serde_json::json!({ "title": data.title, "body": data.body });
      let mut url = resolve(origin, "/")?;
      url
        .query_pairs_mut()
        .append_pair("notification", &content.to_string());
      host.open_window(&url).await?;
      Ok(ClickOutcome::Opened(url))
    }
  }
}

fn resolve(origin: &Url, target: &str) -> Result<Url> {
  origin
    .join(target)
    .map_err(|e| eyre!("Invalid notification URL '{}': {}", target, e))
}
