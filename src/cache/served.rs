//! Responses handed back to the page, tagged with where they came from.

use crate::fetch::Response;

/// Result of a strategy, including the response and metadata about the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  /// The response given to the page
  pub response: Response,
  /// Where the response came from
  pub source: ServedFrom,
}

impl Served {
  /// A live response from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Network,
    }
  }

  /// A hit in the current main cache.
  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Cache,
    }
  }

  /// A hit in a per-course download store.
  pub fn from_offline_course(response: Response, course_id: impl Into<String>) -> Self {
    Self {
      response,
      source: ServedFrom::OfflineCourse(course_id.into()),
    }
  }

  /// A placeholder built locally because nothing better was available.
  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Synthesized,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fresh data from network
  Network,
  /// The current versioned main cache
  Cache,
  /// A per-course download store, by course id
  OfflineCourse(String),
  /// Offline placeholder
  Synthesized,
}

impl std::fmt::Display for ServedFrom {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Network => write!(f, "network"),
      Self::Cache => write!(f, "cache"),
      Self::OfflineCourse(id) => write!(f, "offline-course:{}", id),
      Self::Synthesized => write!(f, "synthesized"),
    }
  }
}
