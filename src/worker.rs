//! The offline worker: owns the lifecycle and handles every host event.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntryInfo, CacheLayer, CacheNames, CacheStorage, Served};
use crate::config::Config;
use crate::event::{Event, EventReceiver, Responder};
use crate::fetch::{Network, Request};
use crate::host::Host;
use crate::lifecycle::{ActivationReport, Lifecycle, LifecycleState};
use crate::push::{self, ClickOutcome, Notification, PushPayload};
use crate::router::{Router, Strategy};
use crate::sync::{self, PendingQueue, PendingRequest, SyncReport};

/// What the worker did with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Not intercepted; the host sends the request to the network untouched
  Passthrough,
  Respond(Served),
}

/// Messages pages may post to the worker.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum InboundMessage {
  SkipWaiting,
  CheckUpdate,
}

/// One worker instance bound to a storage, network and host.
///
/// Cloning is cheap; clones share the same lifecycle.
pub struct Worker<S: CacheStorage, N: Network, H: Host> {
  config: Arc<Config>,
  origin: Url,
  names: CacheNames,
  router: Arc<Router>,
  layer: CacheLayer<S, N>,
  lifecycle: Arc<Lifecycle>,
  storage: Arc<S>,
  network: Arc<N>,
  host: Arc<H>,
}

impl<S: CacheStorage, N: Network, H: Host> Clone for Worker<S, N, H> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      origin: self.origin.clone(),
      names: self.names.clone(),
      router: Arc::clone(&self.router),
      layer: self.layer.clone(),
      lifecycle: Arc::clone(&self.lifecycle),
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      host: Arc::clone(&self.host),
    }
  }
}

impl<S: CacheStorage, N: Network, H: Host> Worker<S, N, H> {
  /// Create a worker instance. If the current version's cache already
  /// exists, an earlier run installed it and the instance starts out
  /// installed, waiting for activation.
  pub fn new(config: Config, storage: Arc<S>, network: Arc<N>, host: Arc<H>) -> Result<Self> {
    let origin = config.origin_url()?;
    let names = CacheNames::from_config(&config);
    let offline_page = resolve(&origin, &config.offline_page)?;
    let router = Router::new(&origin, config.router.clone());
    let layer = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      names.clone(),
      offline_page.to_string(),
    );

    let state = if storage.has(&names.current())? {
      LifecycleState::Installed
    } else {
      LifecycleState::Parsed
    };

    Ok(Self {
      config: Arc::new(config),
      origin,
      names,
      router: Arc::new(router),
      layer,
      lifecycle: Arc::new(Lifecycle::new(state)),
      storage,
      network,
      host,
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn cache_name(&self) -> String {
    self.names.current()
  }

  fn url(&self, path: &str) -> Result<Url> {
    resolve(&self.origin, path)
  }

  pub async fn install(&self) -> Result<()> {
    let assets = self
      .config
      .static_assets
      .iter()
      .map(|path| self.url(path))
      .collect::<Result<Vec<_>>>()?;

    self
      .lifecycle
      .install(
        self.storage.as_ref(),
        self.network.as_ref(),
        self.host.as_ref(),
        &self.names,
        &assets,
      )
      .await
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self
      .lifecycle
      .activate(self.storage.as_ref(), self.host.as_ref(), &self.names)
      .await
  }

  /// Route an intercepted request to its strategy.
  ///
  /// Only critical asset failures come back as errors; everything else
  /// resolves to some response.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    let Some(strategy) = self.router.route(request) else {
      return Ok(FetchOutcome::Passthrough);
    };
    debug!(url = %request.url, ?strategy, "Intercepted request");

    let served = match strategy {
      Strategy::OfflineVideoFirst => self.layer.offline_video_first(request).await,
      Strategy::NetworkFirst => self.layer.network_first(request).await,
      Strategy::NetworkFirstNavigation => self.layer.network_first_navigation(request).await,
      Strategy::CacheFirst { critical } => self.layer.cache_first(request, critical).await?,
    };

    Ok(FetchOutcome::Respond(served))
  }

  /// Show exactly one notification for a push.
  pub async fn handle_push(&self, data: Option<&[u8]>) -> Result<Notification> {
    let payload = PushPayload::parse(data);
    let mut notification = Notification::from_payload(payload, &self.config.notifications);
    notification.icon = self.url(&notification.icon)?.to_string();
    notification.badge = self.url(&notification.badge)?.to_string();

    self.host.show_notification(&notification).await?;
    info!(title = %notification.title, "Displayed notification");
    Ok(notification)
  }

  pub async fn handle_notification_click(
    &self,
    notification: &Notification,
  ) -> Result<ClickOutcome> {
    push::handle_click(self.host.as_ref(), &self.origin, notification).await
  }

  fn pending_queue(&self) -> Result<PendingQueue<'_, S>> {
    let key = self.url(&self.config.sync.pending_key)?;
    Ok(PendingQueue::new(
      self.storage.as_ref(),
      self.names.current(),
      &key,
    ))
  }

  /// Background sync. Returns `None` for tags this worker does not own.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.config.sync.sync_tag {
      debug!(tag, "Ignoring sync for unknown tag");
      return Ok(None);
    }

    let queue = self.pending_queue()?;
    let report = sync::replay_pending(&queue, self.network.as_ref(), &self.origin).await?;
    info!(
      replayed = report.replayed,
      failed = report.failed,
      "Background sync finished"
    );
    Ok(Some(report))
  }

  pub async fn handle_periodic_sync(&self, tag: &str) -> Result<bool> {
    if tag != self.config.sync.periodic_tag {
      debug!(tag, "Ignoring periodic sync for unknown tag");
      return Ok(false);
    }

    let url = self.url(&self.config.sync.courses_key)?;
    let refreshed = sync::refresh_cached(
      self.storage.as_ref(),
      self.network.as_ref(),
      &self.names.current(),
      &url,
    )
    .await;
    Ok(refreshed)
  }

  pub async fn handle_message(&self, message: &Value) -> Result<()> {
    match InboundMessage::deserialize(message) {
      Ok(InboundMessage::SkipWaiting) => self.host.skip_waiting().await,
      Ok(InboundMessage::CheckUpdate) => self.host.update_registration().await,
      Err(_) => {
        debug!(%message, "Ignoring unrecognized message");
        Ok(())
      }
    }
  }

  /// Queue a mutation for replay on the next background sync.
  pub fn queue_mutation(&self, request: PendingRequest) -> Result<usize> {
    self.pending_queue()?.enqueue(request)
  }

  /// Download media for a course into its own store, all or nothing.
  /// Returns the number of entries stored.
  pub async fn download_course(&self, course_id: &str, paths: &[String]) -> Result<usize> {
    let cache = self.names.offline_course(course_id);
    let urls = paths
      .iter()
      .map(|path| self.url(path))
      .collect::<Result<Vec<_>>>()?;

    let network = self.network.as_ref();
    let entries = try_join_all(urls.iter().map(|url| async move {
      let response = network
        .fetch(&Request::get(url.clone()))
        .await
        .map_err(|e| eyre!("Failed to download {}: {}", url, e))?;
      if !response.ok() {
        return Err(eyre!("{} returned status {}", url, response.status));
      }
      Ok::<_, Report>((url.to_string(), response))
    }))
    .await?;

    self.storage.put_all(&cache, &entries)?;
    info!(cache = %cache, entries = entries.len(), "Downloaded course for offline use");
    Ok(entries.len())
  }

  pub fn remove_course(&self, course_id: &str) -> Result<bool> {
    self.storage.delete(&self.names.offline_course(course_id))
  }

  /// Every store with its entries, in enumeration order.
  pub fn cache_summary(&self) -> Result<Vec<(String, Vec<CacheEntryInfo>)>> {
    self
      .storage
      .keys()?
      .into_iter()
      .map(|name| {
        let entries = self.storage.entries(&name)?;
        Ok((name, entries))
      })
      .collect()
  }
}

impl<S, N, H> Worker<S, N, H>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
  H: Host + 'static,
{
  /// Handle events until every sender is dropped. Each event runs in its
  /// own task so a slow fetch never holds up the others.
  pub async fn run(self, mut events: EventReceiver) {
    while let Some(event) = events.next().await {
      let worker = self.clone();
      tokio::spawn(async move { worker.dispatch(event).await });
    }
    debug!("Event channel closed, worker stopping");
  }

  async fn dispatch(&self, event: Event) {
    let kind = event.kind();
    match event {
      Event::Install(done) => complete(kind, done, self.install().await),
      Event::Activate(done) => complete(kind, done, self.activate().await),
      Event::Fetch { request, respond } => {
        complete(kind, respond, self.handle_fetch(&request).await)
      }
      Event::Push { data, done } => complete(kind, done, self.handle_push(data.as_deref()).await),
      Event::NotificationClick { notification, done } => complete(
        kind,
        done,
        self.handle_notification_click(&notification).await,
      ),
      Event::Sync { tag, done } => complete(kind, done, self.handle_sync(&tag).await),
      Event::PeriodicSync { tag, done } => {
        complete(kind, done, self.handle_periodic_sync(&tag).await)
      }
      Event::Message { message, done } => {
        complete(kind, done, self.handle_message(&message).await)
      }
    }
  }
}

fn complete<T>(kind: &str, done: Responder<T>, result: Result<T>) {
  if let Err(e) = &result {
    warn!(event = kind, error = %e, "Event handler failed");
  }
  if done.send(result).is_err() {
    debug!(event = kind, "Host stopped waiting for event");
  }
}

fn resolve(origin: &Url, path: &str) -> Result<Url> {
  origin
    .join(path)
    .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ServedFrom;
  use crate::event;
  use crate::fetch::Response;
  use crate::testing::{script_static_assets, url, worker, worker_with, HostAction, RecordingHost};
  use reqwest::Method;
  use serde_json::json;
  use std::collections::BTreeMap;

  #[tokio::test]
  async fn test_new_worker_resumes_installed_cache() {
    let (worker, storage, _network, _host) = worker();
    assert_eq!(worker.state(), LifecycleState::Parsed);

    storage.open("barbaarintasan-v1").unwrap();
    let resumed = Worker::new(
      crate::testing::config(),
      Arc::clone(&storage),
      Arc::new(crate::testing::ScriptedNetwork::new()),
      Arc::new(RecordingHost::new()),
    )
    .unwrap();
    assert_eq!(resumed.state(), LifecycleState::Installed);
  }

  #[tokio::test]
  async fn test_install_then_activate_leaves_one_main_cache() {
    let (worker, storage, network, _host) = worker();
    script_static_assets(&network);
    storage.open("barbaarintasan-v0").unwrap();
    storage.open("offline-course-3").unwrap();

    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["barbaarintasan-v0"]);
    let main: Vec<String> = storage
      .keys()
      .unwrap()
      .into_iter()
      .filter(|name| name.starts_with("barbaarintasan-"))
      .collect();
    assert_eq!(main, vec![worker.cache_name()]);
    assert!(storage.has("offline-course-3").unwrap());
    assert_eq!(worker.state(), LifecycleState::Activated);
  }

  #[tokio::test]
  async fn test_non_get_is_not_intercepted() {
    let (worker, _storage, network, _host) = worker();
    let request = Request::get(url("/api/messages"))
      .with_method(Method::POST)
      .with_body("{}");

    let outcome = worker.handle_fetch(&request).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_media_checks_offline_courses_before_main_and_network() {
    let (worker, storage, network, _host) = worker();
    let video = url("/videos/lesson.mp4");
    storage
      .put("barbaarintasan-v1", video.as_str(), &Response::new(200, "main"))
      .unwrap();
    storage
      .put("offline-course-8", video.as_str(), &Response::new(200, "course"))
      .unwrap();
    network.respond("/videos/lesson.mp4", Response::new(200, "live"));

    let FetchOutcome::Respond(served) = worker.handle_fetch(&Request::get(video)).await.unwrap()
    else {
      panic!("media should be intercepted");
    };
    assert_eq!(served.source, ServedFrom::OfflineCourse("8".to_string()));
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_critical_asset_failure_rejects() {
    let (worker, _storage, _network, _host) = worker();
    let result = worker
      .handle_fetch(&Request::get(url("/assets/index-abc.js")))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_image_failure_resolves_empty_503() {
    let (worker, _storage, _network, _host) = worker();
    let outcome = worker
      .handle_fetch(&Request::get(url("/images/parent.jpg")))
      .await
      .unwrap();

    let FetchOutcome::Respond(served) = outcome else {
      panic!("image should be intercepted");
    };
    assert_eq!(served.response.status, 503);
    assert!(served.response.body.is_empty());
  }

  #[tokio::test]
  async fn test_offline_api_returns_json_error() {
    let (worker, _storage, _network, _host) = worker();
    let outcome = worker.handle_fetch(&Request::get(url("/api/x"))).await.unwrap();

    let FetchOutcome::Respond(served) = outcome else {
      panic!("api should be intercepted");
    };
    assert_eq!(served.response.status, 503);
    assert_eq!(served.response.text(), r#"{"error":"Offline"}"#);
  }

  #[tokio::test]
  async fn test_push_plain_text() {
    let (worker, _storage, _network, host) = worker();
    let notification = worker.handle_push(Some(b"not json")).await.unwrap();

    assert_eq!(notification.body, "not json");
    assert_eq!(notification.icon, "http://localhost:5000/icon-192.png");
    assert_eq!(host.actions(), vec![HostAction::Show(notification)]);
  }

  #[tokio::test]
  async fn test_push_display_failure_surfaces() {
    let (worker, _storage, _network, _host) =
      worker_with(RecordingHost::new().failing_notifications());
    assert!(worker.handle_push(None).await.is_err());
  }

  #[tokio::test]
  async fn test_sync_replays_queue_once() {
    let (worker, storage, network, _host) = worker();
    network.respond("/api/messages", Response::new(201, ""));
    for path in ["/api/messages", "/api/offline-only"] {
      worker
        .queue_mutation(PendingRequest {
          url: path.to_string(),
          method: "POST".to_string(),
          headers: BTreeMap::new(),
          body: Some("{}".to_string()),
        })
        .unwrap();
    }

    let report = worker.handle_sync("sync-messages").await.unwrap().unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(report.failed, 1);
    assert!(storage
      .match_url("barbaarintasan-v1", url("/pending-sync").as_str())
      .unwrap()
      .is_none());

    // A second sync has nothing left to replay
    let report = worker.handle_sync("sync-messages").await.unwrap().unwrap();
    assert_eq!(report, SyncReport::default());
    assert_eq!(network.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_sync_ignores_other_tags() {
    let (worker, _storage, _network, _host) = worker();
    assert_eq!(worker.handle_sync("something-else").await.unwrap(), None);
    assert!(!worker.handle_periodic_sync("something-else").await.unwrap());
  }

  #[tokio::test]
  async fn test_periodic_sync_refreshes_courses() {
    let (worker, storage, network, _host) = worker();
    network.respond("/api/courses", Response::new(200, "[]"));

    assert!(worker.handle_periodic_sync("refresh-courses").await.unwrap());
    assert!(storage
      .match_url("barbaarintasan-v1", url("/api/courses").as_str())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_messages() {
    let (worker, _storage, _network, host) = worker();
    worker
      .handle_message(&json!({ "type": "SKIP_WAITING" }))
      .await
      .unwrap();
    worker
      .handle_message(&json!({ "type": "CHECK_UPDATE" }))
      .await
      .unwrap();
    worker
      .handle_message(&json!({ "type": "SOMETHING_ELSE" }))
      .await
      .unwrap();
    worker.handle_message(&json!("hello")).await.unwrap();

    assert_eq!(
      host.actions(),
      vec![HostAction::SkipWaiting, HostAction::Update]
    );
  }

  #[tokio::test]
  async fn test_download_and_remove_course() {
    let (worker, storage, network, _host) = worker();
    network.respond("/videos/c5-1.mp4", Response::new(200, "one"));
    network.respond("/videos/c5-2.mp4", Response::new(200, "two"));

    let stored = worker
      .download_course(
        "5",
        &["/videos/c5-1.mp4".to_string(), "/videos/c5-2.mp4".to_string()],
      )
      .await
      .unwrap();
    assert_eq!(stored, 2);
    assert_eq!(storage.entries("offline-course-5").unwrap().len(), 2);

    // Served from the course store once the network is gone
    network.go_offline("/videos/c5-1.mp4");
    let outcome = worker
      .handle_fetch(&Request::get(url("/videos/c5-1.mp4")))
      .await
      .unwrap();
    let FetchOutcome::Respond(served) = outcome else {
      panic!("media should be intercepted");
    };
    assert_eq!(served.response.text(), "one");

    assert!(worker.remove_course("5").unwrap());
    assert!(!storage.has("offline-course-5").unwrap());
  }

  #[tokio::test]
  async fn test_partial_course_download_stores_nothing() {
    let (worker, storage, network, _host) = worker();
    network.respond("/videos/c6-1.mp4", Response::new(200, "one"));

    let result = worker
      .download_course(
        "6",
        &["/videos/c6-1.mp4".to_string(), "/videos/c6-2.mp4".to_string()],
      )
      .await;
    assert!(result.is_err());
    assert!(!storage.has("offline-course-6").unwrap());
  }

  #[tokio::test]
  async fn test_event_loop_round_trip() {
    let (worker, _storage, network, host) = worker();
    script_static_assets(&network);
    network.respond("/api/courses", Response::new(200, "[]"));

    let (sender, receiver) = event::channel();
    let handle = tokio::spawn(worker.run(receiver));

    sender.install().await.unwrap();
    sender.activate().await.unwrap();

    let outcome = sender.fetch(Request::get(url("/api/courses"))).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Respond(_)));

    let critical = sender.fetch(Request::get(url("/assets/missing.js"))).await;
    assert!(critical.is_err());

    let notification = sender.push(Some(b"not json".to_vec())).await.unwrap();
    assert_eq!(notification.body, "not json");
    let click = sender.notification_click(notification).await.unwrap();
    assert!(matches!(click, ClickOutcome::Opened(_)));

    assert_eq!(
      sender.sync("sync-messages").await.unwrap(),
      Some(SyncReport::default())
    );
    assert!(sender.periodic_sync("refresh-courses").await.unwrap());
    sender.message(json!({ "type": "CHECK_UPDATE" })).await.unwrap();

    assert!(host.actions().contains(&HostAction::Claim));

    drop(sender);
    handle.await.unwrap();
  }
}
