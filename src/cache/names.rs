//! Naming of the versioned main cache and the per-course download stores.

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct CacheNames {
  prefix: String,
  version: String,
  offline_course_prefix: String,
}

impl CacheNames {
  pub fn new(
    prefix: impl Into<String>,
    version: impl Into<String>,
    offline_course_prefix: impl Into<String>,
  ) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
      offline_course_prefix: offline_course_prefix.into(),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(
      config.cache_prefix.as_str(),
      config.version.as_str(),
      config.offline_course_prefix.as_str(),
    )
  }

  /// The one authoritative main cache, e.g. `barbaarintasan-v1`.
  pub fn current(&self) -> String {
    format!("{}{}", self.prefix, self.version)
  }

  pub fn is_main(&self, name: &str) -> bool {
    name.starts_with(&self.prefix)
  }

  /// A main cache from another version, eligible for deletion.
  pub fn is_stale(&self, name: &str) -> bool {
    self.is_main(name) && name != self.current()
  }

  pub fn offline_course(&self, course_id: &str) -> String {
    format!("{}{}", self.offline_course_prefix, course_id)
  }

  /// Course id of a per-course store name, if it is one.
  pub fn course_id<'a>(&self, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(self.offline_course_prefix.as_str())
  }
}
