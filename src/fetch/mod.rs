//! Request/response values and the network seam the worker fetches through.

mod network;
mod types;

pub use network::{HttpNetwork, Network, NetworkError};
pub use types::{CacheMode, Request, RequestMode, Response};
