//! Sweep scheduling.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::processor::NotificationQueueProcessor;

/// Drives queue sweeps: once immediately, then on a fixed interval.
pub struct SweepScheduler {
    processor: NotificationQueueProcessor,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(processor: NotificationQueueProcessor, interval_secs: u64) -> Self {
        Self {
            processor,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Sweep until `shutdown` turns true. A running sweep is never
    /// interrupted; the signal is only observed between sweeps. A tick that
    /// arrives while a sweep is still running is dropped rather than queued.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let limit = self.processor.config().sweep_limit;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            sweep_limit = limit,
            "Push sweeps scheduled"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // The first tick completes immediately.
            let stop = tokio::select! {
                _ = ticker.tick() => false,
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            };
            if stop {
                break;
            }

            if let Err(e) = self.processor.process_batch(limit).await {
                tracing::error!(error = %e, "Push sweep failed, retrying on next tick");
            }
        }

        tracing::info!("Push sweeps stopped");
    }
}
