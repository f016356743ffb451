//! Restart policy: registration, lifecycle and scheduling shared by every
//! selection strategy.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::lifecycle::{schedule_repeating, RunStateCell, ScheduleHandle};
use super::restart::{RestartCommand, RestartOutcome};
use super::registry::RouteRegistry;
use super::strategy::{InactivityStrategy, SelectionStrategy, Unconditional};
use crate::runtime::{RouteController, RoutePolicy};
use crate::supervisor::Escalation;
use crate::types::{RouteId, RunState};

pub type UnconditionalRestartPolicy = RestartPolicy<Unconditional>;
pub type InactivityRestartPolicy = RestartPolicy<InactivityStrategy>;

/// Policy lifecycle errors. All are raised from `start`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyError {
    #[error("policy {policy}: no route controller bound")]
    ControllerNotBound { policy: String },
    #[error("policy {policy}: must be started from within a tokio runtime")]
    NoRuntime { policy: String },
    #[error("policy {policy}: cannot start while {state}")]
    InvalidState { policy: String, state: RunState },
}

/// Counters for one policy, as of the moment of the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyStats {
    /// Completed or attempted check cycles
    pub check_cycles: u64,
    /// Routes stopped and started again
    pub restarts: u64,
    /// Restarts skipped because the policy was no longer running
    pub refused_restarts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    check_cycles: AtomicU64,
    restarts: AtomicU64,
    refused_restarts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PolicyStats {
        PolicyStats {
            check_cycles: self.check_cycles.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            refused_restarts: self.refused_restarts.load(Ordering::Relaxed),
        }
    }
}

struct PolicyCore<S> {
    name: String,
    strategy: S,
    routes: RouteRegistry,
    state: Arc<RunStateCell>,
    controller: OnceLock<Arc<dyn RouteController>>,
    stop_timeout: Duration,
    escalation: Escalation,
    counters: Counters,
}

impl<S: SelectionStrategy> PolicyCore<S> {
    /// One pass over every registered route. `Break` ends the schedule after a
    /// fatal restart failure has been escalated.
    ///
    /// A cancelled cycle finishes the route it is on and skips the rest.
    async fn run_cycle(&self, command: &RestartCommand, cancel: &CancellationToken) -> ControlFlow<()> {
        self.counters.check_cycles.fetch_add(1, Ordering::Relaxed);

        let routes = self.routes.snapshot();
        if routes.is_empty() {
            trace!(policy = %self.name, "No routes registered");
            return ControlFlow::Continue(());
        }

        for route in &routes {
            if cancel.is_cancelled() {
                debug!(policy = %self.name, route = %route, "Cycle cancelled, skipping remaining routes");
                break;
            }
            if !self.strategy.should_restart(route, command.controller(), Instant::now()) {
                continue;
            }

            match command.execute(route).await {
                Ok(RestartOutcome::Restarted) => {
                    self.counters.restarts.fetch_add(1, Ordering::Relaxed);
                }
                Ok(RestartOutcome::NotPermitted) => {
                    self.counters.refused_restarts.fetch_add(1, Ordering::Relaxed);
                }
                Err(failure) => {
                    self.escalation.raise(failure);
                    return ControlFlow::Break(());
                }
            }
        }

        ControlFlow::Continue(())
    }
}

/// A route policy that restarts the routes selected by its strategy on a
/// fixed schedule.
///
/// Registration and activity callbacks work in any state. Restarts only happen
/// while the policy is running, and all of them are issued from the single
/// scheduler task the policy owns.
pub struct RestartPolicy<S> {
    core: Arc<PolicyCore<S>>,
    schedule: Mutex<Option<ScheduleHandle>>,
}

impl<S: SelectionStrategy> RestartPolicy<S> {
    pub fn new(strategy: S, stop_timeout: Duration, escalation: Escalation) -> Self {
        let name = strategy.kind().to_string();
        Self {
            core: Arc::new(PolicyCore {
                name,
                strategy,
                routes: RouteRegistry::new(),
                state: Arc::new(RunStateCell::new()),
                controller: OnceLock::new(),
                stop_timeout,
                escalation,
                counters: Counters::default(),
            }),
            schedule: Mutex::new(None),
        }
    }

    /// Override the name used in logs and failure reports.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.name = name.into();
        }
        self
    }

    pub fn strategy(&self) -> &S {
        &self.core.strategy
    }

    pub fn registered_routes(&self) -> Vec<RouteId> {
        self.core.routes.snapshot()
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Option<ScheduleHandle>> {
        self.schedule.lock().unwrap_or_else(|e| {
            warn!("Schedule mutex poisoned, recovering");
            e.into_inner()
        })
    }
}

impl<S: SelectionStrategy> RoutePolicy for RestartPolicy<S> {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn bind_controller(&self, controller: Arc<dyn RouteController>) {
        if self.core.controller.set(controller).is_err() {
            // Expected when one policy is attached to several routes.
            debug!(policy = %self.core.name, "Route controller already bound, keeping the first");
        }
    }

    fn on_route_init(&self, route: &RouteId) {
        if self.core.routes.register(route) {
            debug!(policy = %self.core.name, route = %route, "Route registered");
        }
        self.core.strategy.on_route_init(route);
    }

    fn on_exchange(&self, route: &RouteId) {
        self.core.strategy.on_activity(route);
    }

    fn start(&self) -> Result<(), PolicyError> {
        let core = &self.core;
        let controller = core
            .controller
            .get()
            .cloned()
            .ok_or_else(|| PolicyError::ControllerNotBound {
                policy: core.name.clone(),
            })?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PolicyError::NoRuntime {
                policy: core.name.clone(),
            });
        }
        core.state
            .transition(RunState::Stopped, RunState::Running)
            .map_err(|state| PolicyError::InvalidState {
                policy: core.name.clone(),
                state,
            })?;

        let command = RestartCommand::new(
            core.name.clone(),
            controller,
            Arc::clone(&core.state),
            core.stop_timeout,
        );
        let period = core.strategy.period();
        let cycle_core = Arc::clone(core);
        let handle = schedule_repeating(core.name.clone(), period, move |cancel| {
            let core = Arc::clone(&cycle_core);
            let command = command.clone();
            async move { core.run_cycle(&command, &cancel).await }
        });

        if let Some(stale) = self.lock_schedule().replace(handle) {
            stale.cancel();
        }

        info!(
            policy = %core.name,
            routes = core.routes.len(),
            period_ms = period.as_millis(),
            "Route policy started"
        );
        Ok(())
    }

    /// Cancel the schedule. The policy stays `Stopping` until a cycle still in
    /// flight has returned, and `start` is refused until then.
    fn stop(&self) {
        let core = &self.core;
        if let Err(state) = core.state.transition(RunState::Running, RunState::Stopping) {
            debug!(policy = %core.name, state = %state, "Route policy not running, nothing to stop");
            return;
        }

        let state = Arc::clone(&core.state);
        let name = core.name.clone();
        let finish = move || {
            if state.transition(RunState::Stopping, RunState::Stopped).is_ok() {
                info!(policy = %name, "Route policy stopped");
            }
        };

        match self.lock_schedule().take() {
            Some(handle) => handle.cancel_and_then(finish),
            None => finish(),
        }
    }

    fn run_state(&self) -> RunState {
        self.core.state.get()
    }

    fn stats(&self) -> PolicyStats {
        self.core.counters.snapshot()
    }
}
