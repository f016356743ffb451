//! Supervisor for restart policies
//!
//! A failed stop/start leaves a route in an unknown state. Policies do not
//! exit the process themselves; they raise a [`FatalRestartFailure`] on an
//! [`Escalation`] channel and end their own schedule. The [`Supervisor`]
//! receives it, stops every policy and hands the failure back to `main`, which
//! exits non-zero so the process supervisor can bring up a clean instance.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::runtime::RoutePolicy;
use crate::watchdog::FatalRestartFailure;

/// Sending half of the escalation channel, cloned into every policy.
#[derive(Debug, Clone)]
pub struct Escalation {
    tx: mpsc::UnboundedSender<FatalRestartFailure>,
}

impl Escalation {
    pub fn raise(&self, failure: FatalRestartFailure) {
        if let Err(mpsc::error::SendError(failure)) = self.tx.send(failure) {
            error!(
                error = %failure,
                "Fatal restart failure raised with no supervisor listening"
            );
        }
    }
}

pub fn escalation_channel() -> (Escalation, mpsc::UnboundedReceiver<FatalRestartFailure>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Escalation { tx }, rx)
}

/// Why the supervisor returned without a fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The cancellation token fired (Ctrl+C or a caller).
    Cancelled,
}

pub struct Supervisor {
    policies: Vec<Arc<dyn RoutePolicy>>,
    fatal_rx: mpsc::UnboundedReceiver<FatalRestartFailure>,
}

impl Supervisor {
    pub fn new(
        policies: Vec<Arc<dyn RoutePolicy>>,
        fatal_rx: mpsc::UnboundedReceiver<FatalRestartFailure>,
    ) -> Self {
        Self { policies, fatal_rx }
    }

    /// Wait for cancellation or the first fatal restart failure, then stop
    /// every policy.
    ///
    /// On a fatal failure `cancel` is triggered too, so other tasks sharing the
    /// token wind down with the policies.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ShutdownReason, FatalRestartFailure> {
        info!(policies = self.policies.len(), "Supervisor: monitoring route policies");

        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                info!("Supervisor: shutdown signal received");
                Ok(ShutdownReason::Cancelled)
            }
            failure = self.fatal_rx.recv() => match failure {
                Some(failure) => {
                    error!(
                        policy = %failure.policy,
                        route = %failure.route,
                        error = %failure,
                        "Supervisor: unrecoverable route restart failure, shutting down"
                    );
                    cancel.cancel();
                    Err(failure)
                }
                None => {
                    info!("Supervisor: escalation channel closed, waiting for shutdown signal");
                    cancel.cancelled().await;
                    Ok(ShutdownReason::Cancelled)
                }
            },
        };

        self.stop_policies();
        outcome
    }

    fn stop_policies(&self) {
        for policy in &self.policies {
            policy.stop();
            let stats = policy.stats();
            info!(
                policy = policy.name(),
                check_cycles = stats.check_cycles,
                restarts = stats.restarts,
                refused_restarts = stats.refused_restarts,
                "Supervisor: policy stopped"
            );
        }
    }
}
