//! Route runtime boundary
//!
//! The watchdog never manages routing internals. It talks to whatever hosts
//! the routes through [`RouteController`], and the host talks back to the
//! watchdog through [`RoutePolicy`]:
//!
//! - `on_route_init` once per route when the policy is attached
//! - `on_exchange` once per inbound message on the route (hot path)
//! - `start` / `stop` for the policy's own lifecycle

pub mod local;

pub use local::{LocalRouteRuntime, RouteEndpoint};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{RouteId, RouteStatus, RunState};
use crate::watchdog::{PolicyError, PolicyStats};

/// Errors reported by the route runtime for stop/start commands.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteControlError {
    #[error("route {0} is not known to the runtime")]
    NotFound(RouteId),
    #[error("route {0} is already registered")]
    AlreadyExists(RouteId),
    #[error("route {route} did not stop within {timeout:?}")]
    Timeout { route: RouteId, timeout: Duration },
    #[error("route {route}: {reason}")]
    Failed { route: RouteId, reason: String },
}

/// Control surface of the route runtime, as consumed by the watchdog.
#[async_trait]
pub trait RouteController: Send + Sync {
    /// Current status of a route, or `None` if the runtime does not know it.
    fn route_status(&self, route: &RouteId) -> Option<RouteStatus>;

    /// Stop a route, waiting at most `timeout` for it to wind down.
    async fn stop_route(&self, route: &RouteId, timeout: Duration) -> Result<(), RouteControlError>;

    /// Start a previously stopped route.
    async fn start_route(&self, route: &RouteId) -> Result<(), RouteControlError>;
}

/// Callbacks a route runtime drives on an attached policy.
///
/// `on_route_init` and `on_exchange` are called from the runtime's own
/// dispatch tasks and must never block or fail.
pub trait RoutePolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Hand the policy the controller of the runtime it is attached to.
    fn bind_controller(&self, controller: Arc<dyn RouteController>);

    fn on_route_init(&self, route: &RouteId);

    fn on_exchange(&self, route: &RouteId);

    fn start(&self) -> Result<(), PolicyError>;

    fn stop(&self);

    fn run_state(&self) -> RunState;

    fn stats(&self) -> PolicyStats;
}
