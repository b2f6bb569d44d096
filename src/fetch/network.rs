//! Network seam and its reqwest-backed implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use thiserror::Error;

use super::types::{CacheMode, Request, Response};

/// A fetch that never produced a response.
///
/// Non-2xx statuses are not errors at this level; they come back as a
/// `Response` and each caller decides what to do with them.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("request to {url} failed: {reason}")]
  Unreachable { url: String, reason: String },

  #[error("failed to read response body from {url}: {reason}")]
  Body { url: String, reason: String },
}

/// Anything that can perform a fetch on the worker's behalf.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Network access over HTTP(S).
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("barbaarintasan-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    if request.cache_mode == CacheMode::NoStore {
      builder = builder
        .header(CACHE_CONTROL, "no-store")
        .header(PRAGMA, "no-cache");
    }

    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::Unreachable {
        url: request.url.to_string(),
        reason: e.to_string(),
      })?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::Body {
        url: request.url.to_string(),
        reason: e.to_string(),
      })?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
