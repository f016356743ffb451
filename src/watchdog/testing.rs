//! Recording route controller for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::runtime::{RouteControlError, RouteController};
use crate::types::{RouteId, RouteStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Stop(RouteId),
    Start(RouteId),
}

#[derive(Default)]
pub struct FakeController {
    statuses: Mutex<HashMap<RouteId, RouteStatus>>,
    calls: Mutex<Vec<Call>>,
    failing_stops: Mutex<HashSet<RouteId>>,
    failing_starts: Mutex<HashSet<RouteId>>,
    hanging_stops: Mutex<HashSet<RouteId>>,
    stop_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeController {
    /// Controller knowing `routes`, all started.
    pub fn with_routes(routes: &[&str]) -> Arc<Self> {
        let controller = Self::default();
        {
            let mut statuses = controller.statuses.lock().unwrap();
            for id in routes {
                statuses.insert(RouteId::from(*id), RouteStatus::Started);
            }
        }
        Arc::new(controller)
    }

    pub fn set_status(&self, route: &str, status: RouteStatus) {
        self.statuses.lock().unwrap().insert(route.into(), status);
    }

    pub fn fail_stop(&self, route: &str) {
        self.failing_stops.lock().unwrap().insert(route.into());
    }

    pub fn fail_start(&self, route: &str) {
        self.failing_starts.lock().unwrap().insert(route.into());
    }

    pub fn hang_stop(&self, route: &str) {
        self.hanging_stops.lock().unwrap().insert(route.into());
    }

    /// Every stop takes `delay` of (tokio) time before completing.
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = delay;
    }

    /// Highest number of restarts that were between stop and start at once.
    pub fn peak_concurrent_restarts(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn restarts_of(&self, route: &str) -> usize {
        let route = RouteId::from(route);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| **call == Call::Start(route.clone()))
            .count()
    }
}

#[async_trait]
impl RouteController for FakeController {
    fn route_status(&self, route: &RouteId) -> Option<RouteStatus> {
        self.statuses.lock().unwrap().get(route).copied()
    }

    async fn stop_route(&self, route: &RouteId, _timeout: Duration) -> Result<(), RouteControlError> {
        self.calls.lock().unwrap().push(Call::Stop(route.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let hang = self.hanging_stops.lock().unwrap().contains(route);
        if hang {
            std::future::pending::<()>().await;
        }
        if self.failing_stops.lock().unwrap().contains(route) {
            return Err(RouteControlError::Failed {
                route: route.clone(),
                reason: "injected stop failure".to_string(),
            });
        }
        self.set_status(route.as_str(), RouteStatus::Stopped);
        Ok(())
    }

    async fn start_route(&self, route: &RouteId) -> Result<(), RouteControlError> {
        self.calls.lock().unwrap().push(Call::Start(route.clone()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing_starts.lock().unwrap().contains(route) {
            return Err(RouteControlError::Failed {
                route: route.clone(),
                reason: "injected start failure".to_string(),
            });
        }
        self.set_status(route.as_str(), RouteStatus::Started);
        Ok(())
    }
}
