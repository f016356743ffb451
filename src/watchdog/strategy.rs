//! Selection strategies: which registered routes get restarted on a cycle.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::ledger::{ActivityLedger, NEVER_ACTIVE};
use crate::config::{InactivityConfig, UnconditionalConfig};
use crate::runtime::RouteController;
use crate::types::RouteId;

/// Pluggable decision half of a [`RestartPolicy`](super::RestartPolicy).
///
/// The policy owns registration, scheduling and the restart itself; a strategy
/// only sees the callbacks and answers `should_restart` for each route once per
/// cycle.
pub trait SelectionStrategy: Send + Sync + 'static {
    /// Default policy name used in logs.
    fn kind(&self) -> &'static str;

    /// Time between cycles.
    fn period(&self) -> Duration;

    fn on_route_init(&self, _route: &RouteId) {}

    fn on_activity(&self, _route: &RouteId) {}

    fn should_restart(&self, route: &RouteId, controller: &dyn RouteController, now: Instant) -> bool;
}

// ============================================================================
// Unconditional
// ============================================================================

/// Restart every registered route on every cycle, regardless of health.
#[derive(Debug, Clone)]
pub struct Unconditional {
    interval: Duration,
}

impl Unconditional {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(config: &UnconditionalConfig) -> Self {
        Self::new(config.interval())
    }
}

impl SelectionStrategy for Unconditional {
    fn kind(&self) -> &'static str {
        "unconditional-restart"
    }

    fn period(&self) -> Duration {
        self.interval
    }

    fn should_restart(&self, _route: &RouteId, _controller: &dyn RouteController, _now: Instant) -> bool {
        true
    }
}

// ============================================================================
// Inactivity
// ============================================================================

/// Restart a started route once no message has arrived on it for
/// `inactivity_timeout`.
///
/// Routes that are not in `Started` state are skipped: a route an operator
/// stopped on purpose is down, not inactive.
#[derive(Debug)]
pub struct InactivityStrategy {
    check_interval: Duration,
    inactivity_timeout: Duration,
    ledger: ActivityLedger,
}

impl InactivityStrategy {
    pub fn new(check_interval: Duration, inactivity_timeout: Duration) -> Self {
        Self {
            check_interval,
            inactivity_timeout,
            ledger: ActivityLedger::new(),
        }
    }

    pub fn from_config(config: &InactivityConfig) -> Self {
        Self::new(config.check_interval(), config.inactivity_timeout())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    pub fn ledger(&self) -> &ActivityLedger {
        &self.ledger
    }

    /// Whether `route` has been silent for less than the timeout at `now`.
    pub fn is_receiving_messages(&self, route: &RouteId, now: Instant) -> bool {
        self.ledger.time_since_last_activity(route, now) < self.inactivity_timeout
    }
}

impl SelectionStrategy for InactivityStrategy {
    fn kind(&self) -> &'static str {
        "inactivity-restart"
    }

    fn period(&self) -> Duration {
        self.check_interval
    }

    fn on_route_init(&self, route: &RouteId) {
        // Seed so a fresh route gets a full timeout before its first message.
        self.ledger.record_activity(route, Instant::now());
    }

    fn on_activity(&self, route: &RouteId) {
        self.ledger.record_activity(route, Instant::now());
    }

    fn should_restart(&self, route: &RouteId, controller: &dyn RouteController, now: Instant) -> bool {
        match controller.route_status(route) {
            Some(status) if status.is_started() => {}
            Some(status) => {
                trace!(route = %route, status = %status, "Route not started, skipping activity check");
                return false;
            }
            None => {
                debug!(route = %route, "Route unknown to runtime, skipping activity check");
                return false;
            }
        }

        let silent_for = self.ledger.time_since_last_activity(route, now);
        if silent_for < self.inactivity_timeout {
            debug!(route = %route, silent_ms = silent_for.as_millis(), "Route is receiving messages");
            return false;
        }

        if silent_for == NEVER_ACTIVE {
            warn!(route = %route, "Route has never received a message. Restarting...");
        } else {
            warn!(
                route = %route,
                silent_ms = silent_for.as_millis(),
                timeout_ms = self.inactivity_timeout.as_millis(),
                "Route is not receiving messages. Restarting..."
            );
        }
        true
    }
}
