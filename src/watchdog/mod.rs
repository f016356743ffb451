//! Route watchdog: restart policies and their building blocks
//!
//! - [`ActivityLedger`]: last message time per route
//! - [`RestartCommand`]: stop-then-start with fail-fast escalation
//! - [`RestartPolicy`]: lifecycle and single-task scheduling, generic over a
//!   [`SelectionStrategy`] ([`Unconditional`] or [`InactivityStrategy`])

pub mod ledger;
pub mod lifecycle;
pub mod policy;
pub mod registry;
pub mod restart;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use ledger::{ActivityLedger, NEVER_ACTIVE};
pub use lifecycle::{schedule_repeating, RunStateCell, ScheduleHandle};
pub use policy::{
    InactivityRestartPolicy, PolicyError, PolicyStats, RestartPolicy, UnconditionalRestartPolicy,
};
pub use registry::RouteRegistry;
pub use restart::{FatalRestartFailure, RestartCommand, RestartOutcome, RestartPhase};
pub use strategy::{InactivityStrategy, SelectionStrategy, Unconditional};
