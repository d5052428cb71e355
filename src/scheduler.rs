/// Check scheduler
/// Runs each check forever: `repeat` after a success, `retry` after a
/// failure, or only on request for checks marked `skip`.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::check::{Check, Harness, Observer, RunOutcome};
use crate::config::CallConfig;

/// Delay before the next run, given the consecutive failure count
pub fn next_delay(fail_count: u32, config: &CallConfig) -> Duration {
    if fail_count > 0 {
        config.retry
    } else {
        config.repeat
    }
}

/// Format duration for logging
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

/// A pending wait `request_start` can wake. Disarmed when dropped, so a
/// wait abandoned at shutdown no longer counts as pending.
struct StartWait<'a> {
    check: &'a Check,
    started: Instant,
}

impl<'a> StartWait<'a> {
    fn arm(check: &'a Check) -> (Self, oneshot::Receiver<()>) {
        let wake = check.arm_start();
        (Self { check, started: Instant::now() }, wake)
    }
}

impl Drop for StartWait<'_> {
    fn drop(&mut self) {
        self.check.disarm_start();
        self.check.add_wait(self.started.elapsed());
    }
}

/// Sleep for `delay` unless `request_start` cuts it short.
/// Returns true when woken early.
pub async fn pause(check: &Check, delay: Duration) -> bool {
    let (_armed, wake) = StartWait::arm(check);
    tokio::select! {
        _ = sleep(delay) => false,
        res = wake => res.is_ok(),
    }
}

/// Block until `request_start`
pub async fn wait_for_start(check: &Check) {
    let (_armed, wake) = StartWait::arm(check);
    let _ = wake.await;
}

/// Run the scheduler loop for one check
pub async fn run_loop(check: &Check, harness: &Harness, observer: &dyn Observer) {
    if check.config.skip {
        info!("{}: scheduler started (manual start only)", check.name);
    } else {
        info!(
            "{}: scheduler started (repeat {}, retry {})",
            check.name,
            format_duration(check.config.repeat),
            format_duration(check.config.retry)
        );
    }

    loop {
        observer.on_update(check.snapshot());
        if check.config.skip {
            wait_for_start(check).await;
        }

        let outcome = check.run_once(harness, observer).await;
        observer.on_update(check.snapshot());

        if !check.config.skip {
            let delay = next_delay(check.fail_count(), &check.config);
            match outcome {
                RunOutcome::Failed(_) => info!("{}: retry in {}", check.name, format_duration(delay)),
                _ => debug!("{}: next run in {}", check.name, format_duration(delay)),
            }
            if pause(check, delay).await {
                debug!("{}: woken early", check.name);
            }
        }
    }
}
