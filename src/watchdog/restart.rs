//! Restart command: stop a route, then start it again.
//!
//! All-or-nothing. A failed stop or start leaves the route in an unknown
//! state, so the failure is returned as [`FatalRestartFailure`] for the
//! supervisor to shut the process down. There is no retry here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, error, info, warn};

use super::lifecycle::RunStateCell;
use crate::runtime::{RouteControlError, RouteController};
use crate::types::RouteId;

/// Which half of the restart failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Stop,
    Start,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Stop => write!(f, "stop"),
            RestartPhase::Start => write!(f, "start"),
        }
    }
}

/// A route could not be stopped or started. Unrecoverable for the process.
#[derive(Debug, Clone, thiserror::Error)]
#[error("policy {policy} failed to {phase} route {route}: {source}")]
pub struct FatalRestartFailure {
    pub policy: String,
    pub route: RouteId,
    pub phase: RestartPhase,
    #[source]
    pub source: RouteControlError,
}

/// Result of a restart that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted,
    /// The owning policy was not running; nothing was touched.
    NotPermitted,
}

#[derive(Clone)]
pub struct RestartCommand {
    policy: String,
    controller: Arc<dyn RouteController>,
    state: Arc<RunStateCell>,
    stop_timeout: Duration,
}

impl fmt::Debug for RestartCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartCommand")
            .field("policy", &self.policy)
            .field("state", &self.state.get())
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl RestartCommand {
    pub fn new(
        policy: impl Into<String>,
        controller: Arc<dyn RouteController>,
        state: Arc<RunStateCell>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            policy: policy.into(),
            controller,
            state,
            stop_timeout,
        }
    }

    pub fn controller(&self) -> &dyn RouteController {
        self.controller.as_ref()
    }

    pub async fn execute(&self, route: &RouteId) -> Result<RestartOutcome, FatalRestartFailure> {
        if !self.state.is_running() {
            warn!(
                policy = %self.policy,
                route = %route,
                state = %self.state.get(),
                "Cannot restart route, route policy not running"
            );
            return Ok(RestartOutcome::NotPermitted);
        }

        self.stop(route).await?;
        self.start(route).await?;

        info!(policy = %self.policy, route = %route, "Route restarted");
        Ok(RestartOutcome::Restarted)
    }

    async fn stop(&self, route: &RouteId) -> Result<(), FatalRestartFailure> {
        debug!(route = %route, timeout_ms = self.stop_timeout.as_millis(), "Stopping route");
        let result = match time::timeout(
            self.stop_timeout,
            self.controller.stop_route(route, self.stop_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RouteControlError::Timeout {
                route: route.clone(),
                timeout: self.stop_timeout,
            }),
        };

        match result {
            Ok(()) => {
                debug!(route = %route, "Stopped route");
                Ok(())
            }
            Err(e) => Err(self.fatal(route, RestartPhase::Stop, e)),
        }
    }

    async fn start(&self, route: &RouteId) -> Result<(), FatalRestartFailure> {
        debug!(route = %route, "Starting route");
        match self.controller.start_route(route).await {
            Ok(()) => {
                debug!(route = %route, "Started route");
                Ok(())
            }
            Err(e) => Err(self.fatal(route, RestartPhase::Start, e)),
        }
    }

    fn fatal(&self, route: &RouteId, phase: RestartPhase, source: RouteControlError) -> FatalRestartFailure {
        error!(
            policy = %self.policy,
            route = %route,
            phase = %phase,
            error = %source,
            "Error restarting route, escalating for shutdown"
        );
        FatalRestartFailure {
            policy: self.policy.clone(),
            route: route.clone(),
            phase,
            source,
        }
    }
}
