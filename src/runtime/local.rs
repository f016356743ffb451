//! In-process route runtime
//!
//! Each route is a consumer task draining a bounded mpsc inbox. The inbox
//! outlives the consumer, so messages sent while a route is stopped wait for
//! the next start. Stopping cancels the consumer and waits for it to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RouteControlError, RouteController, RoutePolicy};
use crate::config::defaults::ROUTE_INBOX_CAPACITY;
use crate::types::{RouteId, RouteStatus};

struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct LocalRoute {
    id: RouteId,
    status: RwLock<RouteStatus>,
    sender: mpsc::Sender<String>,
    inbox: Mutex<mpsc::Receiver<String>>,
    worker: Mutex<Option<Worker>>,
    policies: Vec<Arc<dyn RoutePolicy>>,
    received: AtomicU64,
}

impl LocalRoute {
    fn status(&self) -> RouteStatus {
        *self.status.read().unwrap_or_else(|e| {
            warn!(route = %self.id, "Route status lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn set_status(&self, status: RouteStatus) {
        *self.status.write().unwrap_or_else(|e| {
            warn!(route = %self.id, "Route status lock poisoned, recovering");
            e.into_inner()
        }) = status;
    }
}

/// Consumer loop for one route. Holds the inbox for as long as it runs.
async fn consume(route: Arc<LocalRoute>, cancel: CancellationToken) {
    let mut inbox = route.inbox.lock().await;
    debug!(route = %route.id, "Consumer running");

    loop {
        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            body = inbox.recv() => match body {
                Some(body) => body,
                None => {
                    debug!(route = %route.id, "Inbox closed");
                    break;
                }
            },
        };

        for policy in &route.policies {
            policy.on_exchange(&route.id);
        }
        route.received.fetch_add(1, Ordering::Relaxed);
        info!(route = %route.id, body = %body, "Received");
    }

    debug!(route = %route.id, "Consumer finished");
}

/// Producer handle for a hosted route.
#[derive(Debug, Clone)]
pub struct RouteEndpoint {
    route: RouteId,
    sender: mpsc::Sender<String>,
}

impl RouteEndpoint {
    pub fn route(&self) -> &RouteId {
        &self.route
    }

    /// Queue a message, waiting for inbox capacity if necessary.
    pub async fn send(&self, body: impl Into<String>) -> Result<(), RouteControlError> {
        self.sender
            .send(body.into())
            .await
            .map_err(|_| RouteControlError::Failed {
                route: self.route.clone(),
                reason: "route inbox closed".to_string(),
            })
    }
}

/// Hosts routes in the current tokio runtime and exposes them to attached
/// policies through [`RouteController`].
#[derive(Default)]
pub struct LocalRouteRuntime {
    routes: DashMap<RouteId, Arc<LocalRoute>>,
}

impl LocalRouteRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a stopped route and attach `policies` to it.
    ///
    /// Each policy gets this runtime as its controller and an `on_route_init`
    /// callback for the route.
    pub fn add_route(
        self: &Arc<Self>,
        id: impl Into<RouteId>,
        policies: Vec<Arc<dyn RoutePolicy>>,
    ) -> Result<RouteEndpoint, RouteControlError> {
        let id = id.into();
        let slot = match self.routes.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RouteControlError::AlreadyExists(id)),
            Entry::Vacant(slot) => slot,
        };

        let (sender, inbox) = mpsc::channel(ROUTE_INBOX_CAPACITY);
        let route = Arc::new(LocalRoute {
            id: id.clone(),
            status: RwLock::new(RouteStatus::Stopped),
            sender: sender.clone(),
            inbox: Mutex::new(inbox),
            worker: Mutex::new(None),
            policies,
            received: AtomicU64::new(0),
        });
        // Release the shard lock before calling into the policies.
        drop(slot.insert(Arc::clone(&route)));

        let controller: Arc<dyn RouteController> = Arc::clone(self) as Arc<dyn RouteController>;
        for policy in &route.policies {
            policy.bind_controller(Arc::clone(&controller));
            policy.on_route_init(&id);
        }

        info!(route = %id, policies = route.policies.len(), "Route added");
        Ok(RouteEndpoint { route: id, sender })
    }

    pub fn endpoint(&self, id: &RouteId) -> Option<RouteEndpoint> {
        self.routes.get(id).map(|route| RouteEndpoint {
            route: route.id.clone(),
            sender: route.sender.clone(),
        })
    }

    /// Hosted route ids, sorted.
    pub fn route_ids(&self) -> Vec<RouteId> {
        let mut ids: Vec<RouteId> = self.routes.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Messages processed by a route since it was added.
    pub fn received(&self, id: &RouteId) -> Option<u64> {
        self.routes.get(id).map(|r| r.received.load(Ordering::Relaxed))
    }

    pub async fn start_all(&self) -> Result<(), RouteControlError> {
        for id in self.route_ids() {
            self.start_route(&id).await?;
        }
        Ok(())
    }

    /// Stop every route and release them. Stop failures are logged, not
    /// returned; the runtime is unusable afterwards.
    pub async fn shutdown(&self, timeout: Duration) {
        for id in self.route_ids() {
            if let Err(e) = self.stop_route(&id, timeout).await {
                warn!(route = %id, error = %e, "Route did not stop cleanly during shutdown");
            }
        }
        // Routes hold their policies and policies hold this runtime.
        self.routes.clear();
        info!("Route runtime shut down");
    }

    fn route(&self, id: &RouteId) -> Result<Arc<LocalRoute>, RouteControlError> {
        self.routes
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| RouteControlError::NotFound(id.clone()))
    }
}

#[async_trait]
impl RouteController for LocalRouteRuntime {
    fn route_status(&self, route: &RouteId) -> Option<RouteStatus> {
        self.routes.get(route).map(|r| r.status())
    }

    async fn stop_route(&self, id: &RouteId, timeout: Duration) -> Result<(), RouteControlError> {
        let route = self.route(id)?;
        let mut worker = route.worker.lock().await;
        let Some(Worker { cancel, mut task }) = worker.take() else {
            route.set_status(RouteStatus::Stopped);
            return Ok(());
        };

        route.set_status(RouteStatus::Stopping);
        cancel.cancel();
        match time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                route.set_status(RouteStatus::Stopped);
                return Err(RouteControlError::Failed {
                    route: id.clone(),
                    reason: format!("consumer task failed: {e}"),
                });
            }
            Err(_) => {
                // Keep the cancelled consumer so a retry can wait on it and a
                // start is refused while it still holds the inbox.
                *worker = Some(Worker { cancel, task });
                warn!(route = %id, timeout_ms = timeout.as_millis(), "Route did not stop in time");
                return Err(RouteControlError::Timeout {
                    route: id.clone(),
                    timeout,
                });
            }
        }

        route.set_status(RouteStatus::Stopped);
        info!(route = %id, "Route stopped");
        Ok(())
    }

    async fn start_route(&self, id: &RouteId) -> Result<(), RouteControlError> {
        let route = self.route(id)?;
        let mut worker = route.worker.lock().await;
        if let Some(current) = worker.as_ref() {
            if !current.cancel.is_cancelled() {
                debug!(route = %id, "Route already started");
                return Ok(());
            }
            if !current.task.is_finished() {
                return Err(RouteControlError::Failed {
                    route: id.clone(),
                    reason: "previous consumer is still stopping".to_string(),
                });
            }
            // A consumer that timed out on stop has since finished.
            *worker = None;
        }

        route.set_status(RouteStatus::Starting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(consume(Arc::clone(&route), cancel.clone()));
        *worker = Some(Worker { cancel, task });
        route.set_status(RouteStatus::Started);

        info!(route = %id, "Route started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::escalation_channel;
    use crate::watchdog::{InactivityStrategy, RestartPolicy};

    #[tokio::test]
    async fn messages_reach_the_consumer_and_the_policy() {
        let runtime = LocalRouteRuntime::new();
        let (escalation, _rx) = escalation_channel();
        let policy = Arc::new(RestartPolicy::new(
            InactivityStrategy::new(Duration::from_secs(1), Duration::from_secs(10)),
            Duration::from_secs(1),
            escalation,
        ));
        let endpoint = runtime
            .add_route("A", vec![policy.clone() as Arc<dyn RoutePolicy>])
            .unwrap();
        assert_eq!(policy.registered_routes(), vec![RouteId::from("A")]);
        let seeded = policy.strategy().ledger().last_activity(&"A".into()).unwrap();

        runtime.start_all().await.unwrap();
        assert_eq!(runtime.route_status(&"A".into()), Some(RouteStatus::Started));

        endpoint.send("hello").await.unwrap();
        while runtime.received(&"A".into()) != Some(1) {
            tokio::task::yield_now().await;
        }
        let seen = policy.strategy().ledger().last_activity(&"A".into()).unwrap();
        assert!(seen >= seeded);

        runtime.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn stop_then_start_keeps_queued_messages() {
        let runtime = LocalRouteRuntime::new();
        let endpoint = runtime.add_route("A", Vec::new()).unwrap();
        let id = RouteId::from("A");

        runtime.start_route(&id).await.unwrap();
        runtime.stop_route(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(runtime.route_status(&id), Some(RouteStatus::Stopped));

        endpoint.send("queued").await.unwrap();
        assert_eq!(runtime.received(&id), Some(0));

        runtime.start_route(&id).await.unwrap();
        while runtime.received(&id) != Some(1) {
            tokio::task::yield_now().await;
        }
        runtime.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn unknown_and_duplicate_routes_are_errors() {
        let runtime = LocalRouteRuntime::new();
        runtime.add_route("A", Vec::new()).unwrap();

        assert!(matches!(
            runtime.add_route("A", Vec::new()),
            Err(RouteControlError::AlreadyExists(_))
        ));
        assert!(matches!(
            runtime.start_route(&"ghost".into()).await,
            Err(RouteControlError::NotFound(_))
        ));
        assert_eq!(runtime.route_status(&"ghost".into()), None);
    }

    #[tokio::test]
    async fn stopping_a_stopped_route_is_a_no_op() {
        let runtime = LocalRouteRuntime::new();
        runtime.add_route("A", Vec::new()).unwrap();
        runtime
            .stop_route(&"A".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(runtime.route_status(&"A".into()), Some(RouteStatus::Stopped));
    }

    #[test]
    fn concurrent_adds_of_one_id_register_it_once() {
        let runtime = LocalRouteRuntime::new();
        let (escalation, _rx) = escalation_channel();
        let policy = Arc::new(RestartPolicy::new(
            InactivityStrategy::new(Duration::from_secs(1), Duration::from_secs(10)),
            Duration::from_secs(1),
            escalation,
        ));

        let added: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let runtime = Arc::clone(&runtime);
                    let policy = Arc::clone(&policy) as Arc<dyn RoutePolicy>;
                    scope.spawn(move || runtime.add_route("A", vec![policy]).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(added, 1);
        assert_eq!(runtime.route_ids(), vec![RouteId::from("A")]);
    }

    #[tokio::test]
    async fn duplicate_add_keeps_the_first_route() {
        let runtime = LocalRouteRuntime::new();
        let endpoint = runtime.add_route("A", Vec::new()).unwrap();
        assert!(runtime.add_route("A", Vec::new()).is_err());

        runtime.start_all().await.unwrap();
        endpoint.send("still wired").await.unwrap();
        while runtime.received(&"A".into()) != Some(1) {
            tokio::task::yield_now().await;
        }
        runtime.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_timeout_keeps_route_stopping_until_consumer_exits() {
        let runtime = LocalRouteRuntime::new();
        let endpoint = runtime.add_route("A", Vec::new()).unwrap();
        let id = RouteId::from("A");

        // Holding the inbox keeps the consumer from ever reaching its loop.
        let route = runtime.route(&id).unwrap();
        let inbox = route.inbox.lock().await;
        runtime.start_route(&id).await.unwrap();

        assert!(matches!(
            runtime.stop_route(&id, Duration::from_secs(1)).await,
            Err(RouteControlError::Timeout { .. })
        ));
        assert_eq!(runtime.route_status(&id), Some(RouteStatus::Stopping));
        assert!(matches!(
            runtime.start_route(&id).await,
            Err(RouteControlError::Failed { .. })
        ));

        // Retrying the stop waits on the same consumer.
        drop(inbox);
        runtime.stop_route(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(runtime.route_status(&id), Some(RouteStatus::Stopped));

        runtime.start_route(&id).await.unwrap();
        endpoint.send("after timeout").await.unwrap();
        while runtime.received(&id) != Some(1) {
            tokio::task::yield_now().await;
        }
        runtime.shutdown(Duration::from_secs(1)).await;
    }
}
