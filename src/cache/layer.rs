//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{Report, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::names::CacheNames;
use super::served::Served;
use super::storage::CacheStorage;
use crate::fetch::{CacheMode, Network, Request, Response};

const VIDEO_OFFLINE_MESSAGE: &str = "Video not available offline";

/// Cache layer that manages the caching strategies and network fetching.
///
/// This layer sits between intercepted requests and the network. Storage
/// failures never surface from here: a failed read is treated as a miss and
/// a failed write is logged, so the page still gets a response.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  names: CacheNames,
  /// Absolute URL of the stored offline page
  offline_page: String,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    names: CacheNames,
    offline_page: impl Into<String>,
  ) -> Self {
    Self {
      storage,
      network,
      names,
      offline_page: offline_page.into(),
    }
  }

  fn lookup(&self, cache: &str, url: &str) -> Option<Response> {
    match self.storage.match_url(cache, url) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(cache, url, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, url: &str, response: &Response) {
    let cache = self.names.current();
    if let Err(e) = self.storage.put(&cache, url, response) {
      warn!(cache = %cache, url, error = %e, "Failed to cache response");
    }
  }

  /// Page navigations: always go to the network with HTTP caching disabled.
  ///
  /// 1. Fetch with `no-store`
  /// 2. On failure, serve the stored offline page
  /// 3. Otherwise a placeholder 503 page
  pub async fn network_first_navigation(&self, request: &Request) -> Served {
    let live = request.clone().with_cache_mode(CacheMode::NoStore);

    match self.network.fetch(&live).await {
      Ok(response) => Served::from_network(response),
      Err(e) => {
        info!(url = %request.url, error = %e, "Navigation offline, serving fallback page");
        match self.lookup(&self.names.current(), &self.offline_page) {
          Some(page) => Served::from_cache(page),
          None => Served::synthesized(Response::offline_html()),
        }
      }
    }
  }

  /// API reads and everything unclassified: prefer fresh data, survive outages.
  ///
  /// 1. Fetch; successful responses are stored and returned
  /// 2. On network failure, return the cached response for this exact URL
  /// 3. Otherwise `{"error":"Offline"}` with status 503
  pub async fn network_first(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(request.cache_key(), &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed, trying cache");
        match self.lookup(&self.names.current(), request.cache_key()) {
          Some(cached) => Served::from_cache(cached),
          None => Served::synthesized(Response::offline_json()),
        }
      }
    }
  }

  /// Static assets: serve from cache when possible.
  ///
  /// 1. Cached match is returned immediately
  /// 2. Otherwise fetch, store if successful, return
  /// 3. On failure, `critical` assets (bundled scripts and styles) propagate
  ///    the error; everything else degrades to an empty 503
  pub async fn cache_first(&self, request: &Request, critical: bool) -> Result<Served> {
    if let Some(cached) = self.lookup(&self.names.current(), request.cache_key()) {
      return Ok(Served::from_cache(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(request.cache_key(), &response);
        }
        Ok(Served::from_network(response))
      }
      Err(e) if critical => {
        warn!(url = %request.url, error = %e, "Critical asset unavailable");
        Err(Report::new(e).wrap_err(format!("Failed to load {}", request.url)))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Asset unavailable, serving empty response");
        Ok(Served::synthesized(Response::empty(503)))
      }
    }
  }

  /// Lesson media: look through every downloaded course before anything else.
  ///
  /// 1. Each `offline-course-*` store, in enumeration order
  /// 2. The current main cache
  /// 3. Network; successful responses are stored in the main cache
  /// 4. Otherwise a plain-text 503
  pub async fn offline_video_first(&self, request: &Request) -> Served {
    let url = request.cache_key();

    let stores = self.storage.keys().unwrap_or_else(|e| {
      warn!(error = %e, "Failed to list cache stores");
      Vec::new()
    });

    for store in &stores {
      let Some(course_id) = self.names.course_id(store) else {
        continue;
      };
      if let Some(hit) = self.lookup(store, url) {
        debug!(url, course_id, "Serving media from offline course");
        return Served::from_offline_course(hit, course_id);
      }
    }

    if let Some(cached) = self.lookup(&self.names.current(), url) {
      return Served::from_cache(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(url, &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        info!(url, error = %e, "Media unavailable offline");
        Served::synthesized(Response::offline_text(VIDEO_OFFLINE_MESSAGE))
      }
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for CacheLayer<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      names: self.names.clone(),
      offline_page: self.offline_page.clone(),
    }
  }
}
