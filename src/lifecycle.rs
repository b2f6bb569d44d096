//! Install/activate lifecycle of the worker and its versioned main cache.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::try_join_all;
use std::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheNames, CacheStorage};
use crate::fetch::{Network, Request};
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this instance will never control pages
  Redundant,
}

/// Outcome of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Main caches from other versions that were removed
  pub deleted: Vec<String>,
}

/// Lifecycle of one worker instance.
///
/// Both transitions are driven by the host: `install` seeds the current
/// cache, `activate` garbage-collects caches left by older versions.
#[derive(Debug)]
pub struct Lifecycle {
  state: Mutex<LifecycleState>,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new(LifecycleState::Parsed)
  }
}

impl Lifecycle {
  pub fn new(state: LifecycleState) -> Self {
    Self {
      state: Mutex::new(state),
    }
  }

  pub fn state(&self) -> LifecycleState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(LifecycleState::Redundant)
  }

  fn set(&self, to: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *state = to;
    Ok(())
  }

  /// Move to `to` if the current state is one of `from`.
  fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !from.contains(&*state) {
      return Err(eyre!("Cannot move from {:?} to {:?}", *state, to));
    }
    *state = to;
    Ok(())
  }

  /// Seed the current cache with the static assets, all or nothing, then
  /// ask to be activated immediately. Installing again re-seeds the cache.
  pub async fn install<S, N, H>(
    &self,
    storage: &S,
    network: &N,
    host: &H,
    names: &CacheNames,
    assets: &[Url],
  ) -> Result<()>
  where
    S: CacheStorage,
    N: Network,
    H: Host,
  {
    self.transition(
      &[
        LifecycleState::Parsed,
        LifecycleState::Installed,
        LifecycleState::Redundant,
      ],
      LifecycleState::Installing,
    )?;

    let cache = names.current();
    match seed(storage, network, &cache, assets).await {
      Ok(()) => {
        info!(cache = %cache, assets = assets.len(), "Installed");
        self.set(LifecycleState::Installed)?;
      }
      Err(e) => {
        warn!(cache = %cache, error = %e, "Install failed");
        self.set(LifecycleState::Redundant)?;
        return Err(e);
      }
    }

    host.skip_waiting().await
  }

  /// Delete main caches from other versions and take control of open pages.
  /// Per-course download stores are left alone.
  pub async fn activate<S, H>(
    &self,
    storage: &S,
    host: &H,
    names: &CacheNames,
  ) -> Result<ActivationReport>
  where
    S: CacheStorage,
    H: Host,
  {
    self.transition(&[LifecycleState::Installed], LifecycleState::Activating)?;

    let deleted = match remove_stale(storage, names) {
      Ok(deleted) => deleted,
      Err(e) => {
        self.set(LifecycleState::Installed)?;
        return Err(e);
      }
    };

    if let Err(e) = host.claim_clients().await {
      self.set(LifecycleState::Installed)?;
      return Err(e);
    }
    self.set(LifecycleState::Activated)?;
    info!(cache = %names.current(), removed = deleted.len(), "Activated");

    Ok(ActivationReport { deleted })
  }
}

async fn seed<S, N>(storage: &S, network: &N, cache: &str, assets: &[Url]) -> Result<()>
where
  S: CacheStorage,
  N: Network,
{
  let fetches = assets.iter().map(|url| async move {
    let response = network
      .fetch(&Request::get(url.clone()))
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;
    if !response.ok() {
      return Err(eyre!("{} returned status {}", url, response.status));
    }
    Ok::<_, Report>((url.to_string(), response))
  });

  // Nothing is written unless every asset arrived
  let entries = try_join_all(fetches).await?;
  storage.put_all(cache, &entries)
}

fn remove_stale<S: CacheStorage>(storage: &S, names: &CacheNames) -> Result<Vec<String>> {
  let mut deleted = Vec::new();
  for name in storage.keys()? {
    if names.is_stale(&name) {
      storage.delete(&name)?;
      info!(cache = %name, "Deleted old cache");
      deleted.push(name);
    }
  }
  Ok(deleted)
}
