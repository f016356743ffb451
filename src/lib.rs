//! Route Watchdog: liveness restarts for managed message routes
//!
//! Two restart policies share one restart primitive and one lifecycle:
//!
//! - **Unconditional**: stop and start every registered route on a fixed
//!   interval, regardless of health
//! - **Inactivity**: stop and start a started route once no message has
//!   arrived on it for the configured timeout
//!
//! ## Architecture
//!
//! - [`runtime`]: boundary to the route host ([`RouteController`],
//!   [`RoutePolicy`]) plus an in-process host, [`LocalRouteRuntime`]
//! - [`watchdog`]: activity ledger, restart command, policies and strategies
//! - [`supervisor`]: turns a fatal restart failure into a controlled shutdown
//! - [`config`]: TOML configuration with validation

pub mod config;
pub mod runtime;
pub mod supervisor;
pub mod types;
pub mod watchdog;

pub use config::WatchdogConfig;

pub use types::{RouteId, RouteStatus, RunState};

pub use runtime::{LocalRouteRuntime, RouteControlError, RouteController, RouteEndpoint, RoutePolicy};

pub use supervisor::{escalation_channel, Escalation, ShutdownReason, Supervisor};

pub use watchdog::{
    ActivityLedger, FatalRestartFailure, InactivityRestartPolicy, InactivityStrategy, PolicyError,
    PolicyStats, RestartCommand, RestartOutcome, RestartPhase, RestartPolicy, SelectionStrategy,
    Unconditional, UnconditionalRestartPolicy,
};
