//! Replay of mutations queued while offline, and periodic refresh of the
//! cached courses snapshot.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::fetch::{Network, Request, Response};

fn default_method() -> String {
  "GET".to_string()
}

/// A mutation that failed while offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
  pub url: String,
  #[serde(default = "default_method")]
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub body: Option<String>,
}

impl PendingRequest {
  fn to_request(&self, origin: &Url) -> Result<Request> {
    let url = origin
      .join(&self.url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", self.url, e))?;
    let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", self.method, e))?;

    let mut request = Request::get(url).with_method(method);
    for (name, value) in &self.headers {
      request = request.with_header(name.as_str(), value.as_str());
    }
    if let Some(body) = &self.body {
      request = request.with_body(body.as_bytes());
    }
    Ok(request)
  }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub replayed: usize,
  pub failed: usize,
}

/// The reserved cache entry holding queued mutations as a JSON array.
pub struct PendingQueue<'a, S: CacheStorage> {
  storage: &'a S,
  cache: String,
  key: String,
}

impl<'a, S: CacheStorage> PendingQueue<'a, S> {
  pub fn new(storage: &'a S, cache: impl Into<String>, key: &Url) -> Self {
    Self {
      storage,
      cache: cache.into(),
      key: key.to_string(),
    }
  }

  /// Queued mutations, oldest first. A missing entry is an empty queue.
  pub fn load(&self) -> Result<Vec<PendingRequest>> {
    decode(self.storage.match_url(&self.cache, &self.key)?)
  }

  /// Append a mutation. Returns the queue length afterwards.
  pub fn enqueue(&self, request: PendingRequest) -> Result<usize> {
    let mut len = 0;
    self.storage.update(&self.cache, &self.key, |current| {
      let mut pending = decode(current)?;
      pending.push(request);
      len = pending.len();
      encode(&pending)
    })?;
    Ok(len)
  }

  /// Empty the queue and return what it held. Mutations queued afterwards
  /// start a fresh queue.
  pub fn take(&self) -> Result<Vec<PendingRequest>> {
    decode(self.storage.take(&self.cache, &self.key)?)
  }
}

fn decode(entry: Option<Response>) -> Result<Vec<PendingRequest>> {
  match entry {
    Some(entry) => serde_json::from_slice(&entry.body)
      .map_err(|e| eyre!("Malformed pending sync queue: {}", e)),
    None => Ok(Vec::new()),
  }
}

fn encode(pending: &[PendingRequest]) -> Result<Response> {
  let body =
    serde_json::to_vec(pending).map_err(|e| eyre!("Failed to encode sync queue: {}", e))?;
  Ok(Response::new(200, body).with_header("Content-Type", "application/json"))
}

/// Take the queue and replay every mutation in it once, in order.
///
/// A failing entry is logged and skipped; it is not re-queued. Mutations
/// queued while the replay runs wait for the next sync.
pub async fn replay_pending<S, N>(
  queue: &PendingQueue<'_, S>,
  network: &N,
  origin: &Url,
) -> Result<SyncReport>
where
  S: CacheStorage,
  N: Network,
{
  let pending = queue.take().map_err(|e| {
    warn!(error = %e, "Dropped unreadable sync queue");
    e
  })?;

  let mut report = SyncReport::default();
  for entry in &pending {
    match replay_one(entry, network, origin).await {
      Ok(status) => {
        info!(url = %entry.url, method = %entry.method, status, "Replayed queued request");
        report.replayed += 1;
      }
      Err(e) => {
        warn!(url = %entry.url, method = %entry.method, error = %e, "Queued request failed");
        report.failed += 1;
      }
    }
  }

  Ok(report)
}

async fn replay_one<N: Network>(entry: &PendingRequest, network: &N, origin: &Url) -> Result<u16> {
  let request = entry.to_request(origin)?;
  let response = network.fetch(&request).await?;
  if !response.ok() {
    return Err(eyre!("server answered {}", response.status));
  }
  Ok(response.status)
}

/// Re-fetch `url` and overwrite its cached copy. Returns whether the cache
/// was updated; failures are logged, never retried here.
pub async fn refresh_cached<S, N>(storage: &S, network: &N, cache: &str, url: &Url) -> bool
where
  S: CacheStorage,
  N: Network,
{
  match network.fetch(&Request::get(url.clone())).await {
    Ok(response) if response.ok() => match storage.put(cache, url.as_str(), &response) {
      Ok(()) => {
        info!(url = %url, "Refreshed cached response");
        true
      }
      Err(e) => {
        warn!(url = %url, error = %e, "Failed to store refreshed response");
        false
      }
    },
    Ok(response) => {
      warn!(url = %url, status = response.status, "Refresh returned an error status");
      false
    }
    Err(e) => {
      warn!(url = %url, error = %e, "Refresh failed");
      false
    }
  }
}
