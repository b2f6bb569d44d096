//! Versioned cache stores and the strategies that read and fill them.
//!
//! This module provides:
//! - Named cache stores (a versioned main cache plus per-course downloads)
//! - Four fetch strategies: network-first, network-first for navigations,
//!   cache-first, and offline-course-first for lesson media
//! - Basic offline mode (serve cached or placeholder responses when the
//!   network is unavailable)

mod layer;
mod names;
mod served;
mod storage;

pub use layer::CacheLayer;
pub use names::CacheNames;
pub use served::{Served, ServedFrom};
pub use storage::{CacheEntryInfo, CacheStorage, SqliteStorage};
