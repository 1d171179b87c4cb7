//! Watch mode: one cycle per interval, retryable failures retried with
//! exponential backoff until the tick's retry budget runs out.
//!
//! ```text
//!   tick ──► run_now ──► ok ───────────────────────────────► wait for tick
//!                   └──► failed, retryable ──► backoff ──► run_now ...
//!                   └──► failed, fatal / budget spent ─────► wait for tick
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ksef_sync::config::ScheduleSettings;
use ksef_sync::SyncTrigger;

/// Retry schedule for one tick.
pub fn create_backoff(schedule: &ScheduleSettings) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(schedule.initial_backoff_ms),
        max_interval: Duration::from_secs(schedule.max_backoff_secs),
        multiplier: 2.0,
        max_elapsed_time: Some(Duration::from_secs(schedule.max_retry_elapsed_secs)),
        ..Default::default()
    }
}

/// Runs cycles forever. Cancel by dropping the future.
pub async fn run(trigger: &SyncTrigger, schedule: &ScheduleSettings) {
    info!(interval_secs = schedule.interval_secs, "Watch mode started");

    let mut ticker = tokio::time::interval(Duration::from_secs(schedule.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_tick(trigger, schedule).await;
    }
}

async fn run_tick(trigger: &SyncTrigger, schedule: &ScheduleSettings) {
    let mut backoff = create_backoff(schedule);
    let mut attempt = 1u32;

    loop {
        let report = trigger.run_now().await;

        if report.success {
            let count = report
                .outcome
                .as_ref()
                .map(|o| o.new_invoice_count)
                .unwrap_or(0);
            info!(attempt, count, "Tick complete");
            return;
        }

        if !report.is_retryable() {
            error!(
                kind = ?report.error_kind,
                "Sync failed with a non-retryable error, waiting for next tick"
            );
            return;
        }

        match backoff.next_backoff() {
            Some(delay) => {
                debug!(?delay, attempt, "Retrying sync after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            None => {
                warn!(attempt, "Retry budget exhausted, waiting for next tick");
                return;
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping watch mode");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_follows_schedule() {
        let schedule = ScheduleSettings {
            interval_secs: 60,
            max_retry_elapsed_secs: 30,
            initial_backoff_ms: 200,
            max_backoff_secs: 5,
        };
        let backoff = create_backoff(&schedule);

        assert_eq!(backoff.initial_interval, Duration::from_millis(200));
        assert_eq!(backoff.max_interval, Duration::from_secs(5));
        assert_eq!(backoff.max_elapsed_time, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_backoff_stays_under_max_interval() {
        let mut backoff = create_backoff(&ScheduleSettings::default());
        for _ in 0..20 {
            match backoff.next_backoff() {
                // randomization can stretch an interval by up to 50%
                Some(delay) => assert!(delay <= Duration::from_secs(90)),
                None => break,
            }
        }
    }
}
