//! Poll loop: fixed-interval driver for mailbox sweeps.
//!
//! Timer-based loop:
//! 1. Wait for the next tick (the first fires immediately)
//! 2. `DecisionEngine::sweep()` → login, process unseen, logout
//! 3. Log the outcome and go back to sleep
//!
//! Sweeps never overlap: a slow sweep delays the next tick instead of
//! stacking them. Neither a failed sweep nor a panicking one ends the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::pipeline::processor::{DecisionEngine, panic_reason};
use crate::pipeline::types::SweepReport;

/// Spawn the poll loop as a background task.
///
/// Returns a `JoinHandle` and shutdown flag. Setting the flag stops the
/// loop at its next tick.
pub fn spawn_poll_loop(
    engine: Arc<DecisionEngine>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(run_poll_loop(engine, interval, shutdown));

    (handle, shutdown_flag)
}

/// Run sweeps every `interval` until `shutdown` is set.
pub async fn run_poll_loop(engine: Arc<DecisionEngine>, interval: Duration, shutdown: Arc<AtomicBool>) {
    info!("Poll loop started, sweeping every {}s", interval.as_secs_f64());

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;

        if shutdown.load(Ordering::Relaxed) {
            info!("Poll loop shutting down");
            return;
        }

        run_sweep(&engine).await;
    }
}

/// One guarded sweep. Failures and panics are logged, never propagated.
pub async fn run_sweep(engine: &DecisionEngine) -> Option<SweepReport> {
    match AssertUnwindSafe(engine.sweep()).catch_unwind().await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            error!(error = %e, "Sweep failed, will retry on the next poll");
            None
        }
        Err(panic) => {
            error!(
                severity = "critical",
                reason = %panic_reason(panic.as_ref()),
                "Unexpected error in poll loop, continuing"
            );
            None
        }
    }
}
