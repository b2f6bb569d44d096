//! Classifies intercepted requests into caching strategies.

use reqwest::Method;
use url::{Origin, Url};

use crate::config::RouterConfig;
use crate::fetch::Request;

/// Caching strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Lesson media: per-course downloads, then main cache, then network
  OfflineVideoFirst,
  /// API reads and anything unclassified
  NetworkFirst,
  /// Page loads, never answered from the cache unless offline
  NetworkFirstNavigation,
  /// Static assets. `critical` assets propagate fetch failures.
  CacheFirst { critical: bool },
}

pub struct Router {
  origin: Origin,
  rules: RouterConfig,
}

impl Router {
  pub fn new(origin: &Url, rules: RouterConfig) -> Self {
    Self {
      origin: origin.origin(),
      rules,
    }
  }

  /// Strategy for an intercepted request, or `None` when the request should
  /// pass straight through to the network (non-GET or cross-origin).
  pub fn route(&self, request: &Request) -> Option<Strategy> {
    if request.method != Method::GET {
      return None;
    }
    if request.url.origin() != self.origin {
      return None;
    }
    Some(self.classify(request.url.path(), request.is_navigation()))
  }

  /// First match wins.
  pub fn classify(&self, path: &str, navigate: bool) -> Strategy {
    let ext = extension(path);
    let has_ext = |list: &[String]| {
      ext
        .as_deref()
        .is_some_and(|e| list.iter().any(|candidate| candidate.eq_ignore_ascii_case(e)))
    };

    if has_ext(&self.rules.media_extensions)
      || self
        .rules
        .public_segments
        .iter()
        .any(|segment| path.contains(segment.as_str()))
    {
      return Strategy::OfflineVideoFirst;
    }

    if path.starts_with(&self.rules.api_prefix) {
      return Strategy::NetworkFirst;
    }

    if navigate {
      return Strategy::NetworkFirstNavigation;
    }

    if path.contains(&self.rules.asset_segment) && has_ext(&self.rules.script_extensions) {
      return Strategy::CacheFirst { critical: true };
    }

    if has_ext(&self.rules.static_extensions) {
      return Strategy::CacheFirst { critical: false };
    }

    Strategy::NetworkFirst
  }
}

/// Extension of the last path segment, without the dot.
fn extension(path: &str) -> Option<String> {
  let file = path.rsplit('/').next()?;
  let (stem, ext) = file.rsplit_once('.')?;
  if stem.is_empty() || ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn router() -> Router {
    Router::new(
      &Url::parse("http://localhost:5000").unwrap(),
      RouterConfig::default(),
    )
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:5000").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_media_goes_to_offline_video() {
    let router = router();
    assert_eq!(
      router.classify("/videos/lesson-1.mp4", false),
      Strategy::OfflineVideoFirst
    );
    assert_eq!(
      router.classify("/audio/sheeko.MP3", false),
      Strategy::OfflineVideoFirst
    );
    assert_eq!(
      router.classify("/public-objects/course/intro", false),
      Strategy::OfflineVideoFirst
    );
  }

  #[test]
  fn test_media_wins_over_api_and_navigation() {
    let router = router();
    assert_eq!(
      router.classify("/api/media/clip.webm", true),
      Strategy::OfflineVideoFirst
    );
  }

  #[test]
  fn test_api_is_network_first() {
    let router = router();
    assert_eq!(router.classify("/api/courses", false), Strategy::NetworkFirst);
    assert_eq!(router.classify("/api/courses", true), Strategy::NetworkFirst);
  }

  #[test]
  fn test_navigation() {
    let router = router();
    assert_eq!(
      router.classify("/lesson/12", true),
      Strategy::NetworkFirstNavigation
    );
    assert_eq!(
      router.classify("/assets/index-abc.js", true),
      Strategy::NetworkFirstNavigation
    );
  }

  #[test]
  fn test_bundled_scripts_are_critical() {
    let router = router();
    assert_eq!(
      router.classify("/assets/index-abc.js", false),
      Strategy::CacheFirst { critical: true }
    );
    assert_eq!(
      router.classify("/assets/index-abc.css", false),
      Strategy::CacheFirst { critical: true }
    );
    // Scripts outside the asset bundle are not cache-first at all
    assert_eq!(router.classify("/sw.js", false), Strategy::NetworkFirst);
  }

  #[test]
  fn test_images_and_fonts_degrade() {
    let router = router();
    assert_eq!(
      router.classify("/icon-192.png", false),
      Strategy::CacheFirst { critical: false }
    );
    assert_eq!(
      router.classify("/assets/fonts/inter.woff2", false),
      Strategy::CacheFirst { critical: false }
    );
  }

  #[test]
  fn test_fallback() {
    let router = router();
    assert_eq!(router.classify("/manifest.json", false), Strategy::NetworkFirst);
    assert_eq!(router.classify("/", false), Strategy::NetworkFirst);
  }

  #[test]
  fn test_non_get_passes_through() {
    let router = router();
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
      let request = get("/api/progress").with_method(method);
      assert_eq!(router.route(&request), None);
    }
  }

  #[test]
  fn test_cross_origin_passes_through() {
    let router = router();
    let request = Request::get(Url::parse("https://fonts.gstatic.com/s/inter.woff2").unwrap());
    assert_eq!(router.route(&request), None);
  }

  #[test]
  fn test_route_ignores_query_string() {
    let router = router();
    assert_eq!(
      router.route(&get("/videos/a.mp4?token=abc")),
      Some(Strategy::OfflineVideoFirst)
    );
  }

  #[test]
  fn test_extension() {
    assert_eq!(extension("/a/b.PNG"), Some("png".to_string()));
    assert_eq!(extension("/a.b/c"), None);
    assert_eq!(extension("/.hidden"), None);
    assert_eq!(extension("/"), None);
  }
}
