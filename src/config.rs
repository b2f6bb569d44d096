use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = "barbaarintasan-sw";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker is registered for; relative keys resolve against it
  pub origin: String,
  /// App version embedded in the main cache name
  pub version: String,
  pub cache_prefix: String,
  /// Prefix of per-course download stores, never versioned
  pub offline_course_prefix: String,
  /// Assets seeded into the main cache on install
  pub static_assets: Vec<String>,
  /// Page served to navigations when offline
  pub offline_page: String,
  pub router: RouterConfig,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5000".to_string(),
      version: "v1".to_string(),
      cache_prefix: "barbaarintasan-".to_string(),
      offline_course_prefix: "offline-course-".to_string(),
      static_assets: strings(&[
        "/offline.html",
        "/favicon.png",
        "/manifest.json",
        "/icon-192.png",
        "/icon-512.png",
      ]),
      offline_page: "/offline.html".to_string(),
      router: RouterConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

/// URL shapes used to pick a caching strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
  pub api_prefix: String,
  /// Path segment under which bundled scripts and styles live
  pub asset_segment: String,
  /// Extensions (lowercase, no dot) of bundled scripts and styles
  pub script_extensions: Vec<String>,
  pub media_extensions: Vec<String>,
  /// Segments marking uploaded public files (lesson videos, audio)
  pub public_segments: Vec<String>,
  /// Image and font extensions
  pub static_extensions: Vec<String>,
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".to_string(),
      asset_segment: "/assets/".to_string(),
      script_extensions: strings(&["js", "mjs", "css"]),
      media_extensions: strings(&[
        "mp4", "webm", "ogg", "ogv", "mp3", "m4a", "wav", "aac", "m3u8", "ts",
      ]),
      public_segments: strings(&["/public-objects/", "/objects/public/"]),
      static_extensions: strings(&[
        "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf", "otf", "eot",
      ]),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background sync tag that replays queued mutations
  pub sync_tag: String,
  /// Periodic sync tag that refreshes the courses snapshot
  pub periodic_tag: String,
  /// Reserved cache key holding the queued mutations
  pub pending_key: String,
  /// API response kept fresh by periodic sync
  pub courses_key: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      sync_tag: "sync-messages".to_string(),
      periodic_tag: "refresh-courses".to_string(),
      pending_key: "/pending-sync".to_string(),
      courses_key: "/api/courses".to_string(),
    }
  }
}

/// Fallback content for push notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Barbaarintasan Academy".to_string(),
      body: "Fariin cusub ayaa kuu timid".to_string(),
      icon: "/icon-192.png".to_string(),
      badge: "/favicon.png".to_string(),
    }
  }
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./barbaarintasan-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/barbaarintasan-sw/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("barbaarintasan-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.origin_url()?;
    Ok(config)
  }

  /// The registered origin as a URL.
  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    if url.cannot_be_a_base() {
      return Err(eyre!("Origin '{}' cannot be used as a base URL", self.origin));
    }

    Ok(url)
  }
}

/// Directory holding the cache database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join(APP_DIR))
}
