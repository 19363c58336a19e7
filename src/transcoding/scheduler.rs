//! Periodic drivers for the queue and the reaper.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::queue::JobQueue;
use super::reaper::Reaper;
use crate::config::ScheduleConfig;

/// Start the queue driver, the stuck-job sweep and the cleanup sweep.
///
/// All three stop when `cancel` fires.
pub fn spawn_background_tasks(
    queue: Arc<JobQueue>,
    reaper: Arc<Reaper>,
    schedule: &ScheduleConfig,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let queue_driver = spawn_queue_driver(queue, schedule.queue_poll_interval(), cancel.clone());

    let sweeper = {
        let reaper = Arc::clone(&reaper);
        spawn_ticker(
            "stuck-sweep",
            schedule.stuck_sweep_interval(),
            cancel.clone(),
            move || {
                if let Err(e) = reaper.sweep_stuck_jobs(Utc::now()) {
                    tracing::error!("Stuck-job sweep failed: {}", e);
                }
            },
        )
    };

    let cleanup = spawn_ticker("cleanup", schedule.cleanup_interval(), cancel, move || {
        if let Err(e) = reaper.cleanup_finished_jobs(Utc::now()) {
            tracing::error!("Job cleanup failed: {}", e);
        }
    });

    vec![queue_driver, sweeper, cleanup]
}

/// Backfill free capacity on every tick and whenever a supervised job ends.
fn spawn_queue_driver(
    queue: Arc<JobQueue>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let finished = queue.finished_signal();

    tokio::spawn(async move {
        tracing::info!(task = "queue-advance", "Background task started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
                _ = finished.notified() => {}
            }
            if let Err(e) = queue.advance_all() {
                tracing::error!("Queue advance failed: {}", e);
            }
        }
        tracing::info!(task = "queue-advance", "Background task stopped");
    })
}

fn spawn_ticker<F>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(task = name, "Background task started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => step(),
            }
        }
        tracing::info!(task = name, "Background task stopped");
    })
}
