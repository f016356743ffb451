//! Policy lifecycle state and the repeating-timer primitive.
//!
//! Each running policy owns exactly one [`ScheduleHandle`]: a single tokio task
//! that ticks on a fixed delay and runs the policy's cycle to completion before
//! waiting for the next tick. Cancelling the handle drops pending ticks; a tick
//! already running is left to finish.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::RunState;

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

fn encode(state: RunState) -> u8 {
    match state {
        RunState::Stopped => STOPPED,
        RunState::Running => RUNNING,
        RunState::Stopping => STOPPING,
    }
}

fn decode(raw: u8) -> RunState {
    match raw {
        RUNNING => RunState::Running,
        STOPPING => RunState::Stopping,
        _ => RunState::Stopped,
    }
}

/// Atomic tri-state shared between a policy and its restart command.
#[derive(Debug)]
pub struct RunStateCell(AtomicU8);

impl Default for RunStateCell {
    fn default() -> Self {
        Self(AtomicU8::new(STOPPED))
    }
}

impl RunStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> RunState {
        decode(self.0.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.get() == RunState::Running
    }

    /// Move from `from` to `to`. Returns the observed state on mismatch.
    pub fn transition(&self, from: RunState, to: RunState) -> Result<(), RunState> {
        self.0
            .compare_exchange(encode(from), encode(to), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(decode)
    }

    pub fn set(&self, state: RunState) {
        self.0.store(encode(state), Ordering::Release);
    }
}

/// Handle to a repeating task started by [`schedule_repeating`].
#[derive(Debug)]
pub struct ScheduleHandle {
    name: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    runtime: Handle,
}

impl ScheduleHandle {
    /// Stop scheduling further ticks. Does not wait for an in-flight tick.
    pub fn cancel(self) {
        debug!(schedule = %self.name, "Cancelling schedule");
        self.cancel.cancel();
    }

    /// Cancel, then run `on_finished` once the task has actually exited,
    /// after any in-flight tick. Runs inline when the task is already done.
    pub fn cancel_and_then<F>(self, on_finished: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Self {
            name,
            cancel,
            task,
            runtime,
        } = self;
        debug!(schedule = %name, "Cancelling schedule");
        cancel.cancel();

        if task.is_finished() {
            on_finished();
            return;
        }
        runtime.spawn(async move {
            if let Err(e) = task.await {
                warn!(schedule = %name, error = %e, "Schedule task did not exit cleanly");
            }
            on_finished();
        });
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `action` every `period`, first after one full period.
///
/// Fixed-delay: a tick that overruns pushes the following ticks back rather
/// than firing a burst. The schedule ends when the handle is cancelled or when
/// `action` returns `ControlFlow::Break`. `action` gets the schedule's
/// cancellation token so a long tick can stop early.
///
/// Must be called from within a tokio runtime.
pub fn schedule_repeating<F, Fut>(name: impl Into<String>, period: Duration, mut action: F) -> ScheduleHandle
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send,
{
    let name = name.into();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task_name = name.clone();

    let runtime = Handle::current();
    let task = runtime.spawn(async move {
        info!(schedule = %task_name, period_ms = period.as_millis(), "Schedule started");
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(schedule = %task_name, "Schedule cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if action(token.clone()).await.is_break() {
                info!(schedule = %task_name, "Schedule terminated by its action");
                break;
            }
        }
    });

    ScheduleHandle {
        name,
        cancel,
        task,
        runtime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn run_state_transitions_are_checked() {
        let cell = RunStateCell::new();
        assert_eq!(cell.get(), RunState::Stopped);

        assert!(cell.transition(RunState::Stopped, RunState::Running).is_ok());
        assert!(cell.is_running());
        assert_eq!(
            cell.transition(RunState::Stopped, RunState::Running),
            Err(RunState::Running)
        );

        assert!(cell.transition(RunState::Running, RunState::Stopping).is_ok());
        assert!(!cell.is_running());
        cell.set(RunState::Stopped);
        assert_eq!(cell.get(), RunState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period_after_initial_delay() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = schedule_repeating("test", Duration::from_millis(500), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        time::sleep(Duration::from_millis(499)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(1_751)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);

        handle.cancel();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn break_ends_the_schedule() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = schedule_repeating("test", Duration::from_secs(1), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        });

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_in_flight_tick_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let handle = schedule_repeating("test", Duration::from_secs(1), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                time::sleep(Duration::from_secs(3)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        // First tick at 1s, busy until 4s.
        time::sleep(Duration::from_secs(2)).await;
        handle.cancel();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_then_waits_for_in_flight_tick() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let handle = schedule_repeating("test", Duration::from_secs(1), move |cancel| {
            let counter = Arc::clone(&counter);
            async move {
                time::sleep(Duration::from_secs(3)).await;
                assert!(cancel.is_cancelled(), "tick sees the cancellation");
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        time::sleep(Duration::from_secs(2)).await;
        let exited = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&exited);
        handle.cancel_and_then(move || {
            flag.store(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(exited.load(Ordering::SeqCst), 0, "tick still running");

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(exited.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_then_runs_inline_when_already_finished() {
        let handle = schedule_repeating("test", Duration::from_secs(1), move |_| async {
            ControlFlow::Break(())
        });
        time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());

        let exited = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&exited);
        handle.cancel_and_then(move || {
            flag.store(1, Ordering::SeqCst);
        });
        assert_eq!(exited.load(Ordering::SeqCst), 1);
    }
}
