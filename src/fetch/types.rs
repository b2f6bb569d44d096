use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Subresource or script-initiated fetch
  #[default]
  Other,
}

/// HTTP caching behaviour requested for the outgoing fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Bypass any HTTP cache between us and the origin
  NoStore,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
  pub cache_mode: CacheMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::Other,
      cache_mode: CacheMode::Default,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A page navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
    self.cache_mode = cache_mode;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Key under which responses to this request are stored.
  pub fn cache_key(&self) -> &str {
    self.url.as_str()
  }
}

/// A response, either live from the network, read back from a cache store,
/// or synthesized locally when both are unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

const OFFLINE_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>Offline</h1><p>No internet connection. Please try again when you are back online.</p></body></html>";

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    (200..=299).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Placeholder page for navigations when neither network nor the stored
  /// offline page is available.
  pub fn offline_html() -> Self {
    Self::new(503, OFFLINE_PAGE).with_header("Content-Type", "text/html; charset=utf-8")
  }

  /// `{"error":"Offline"}` with status 503.
  pub fn offline_json() -> Self {
    Self::new(503, r#"{"error":"Offline"}"#).with_header("Content-Type", "application/json")
  }

  pub fn offline_text(message: &str) -> Self {
    Self::new(503, message).with_header("Content-Type", "text/plain")
  }

  /// Bodyless response, used where a failed asset must not break rendering.
  pub fn empty(status: u16) -> Self {
    Self::new(status, Vec::new())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ok_range() {
    assert!(Response::new(200, "").ok());
    assert!(Response::new(204, "").ok());
    assert!(!Response::new(304, "").ok());
    assert!(!Response::new(503, "").ok());
  }

  #[test]
  fn test_offline_json_body() {
    let response = Response::offline_json();
    assert_eq!(response.status, 503);
    assert_eq!(response.text(), r#"{"error":"Offline"}"#);
    assert_eq!(response.header("content-type"), Some("application/json"));
  }

  #[test]
  fn test_navigate_request() {
    let url = Url::parse("https://example.org/courses").unwrap();
    let request = Request::navigate(url);
    assert!(request.is_navigation());
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.cache_key(), "https://example.org/courses");
  }
}
