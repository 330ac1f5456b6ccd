//! Background timers for the batch research export and the deadline sweep.
//!
//! Jobs run on the blocking pool; a failing run is logged and the timer keeps
//! going. The export scheduler may be started once per process.

use crate::research::ResearchExporter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

static EXPORT_SCHEDULER_STARTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("the export scheduler is already running in this process")]
    AlreadyStarted,
}

/// Handle to a running periodic job.
pub struct JobHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl JobHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the timer and wait for an in-flight run to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(job = self.name, error = %e, "scheduler task ended abnormally");
        }
    }
}

/// Run `job` every `period`, first immediately when `run_immediately` is set.
pub fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    run_immediately: bool,
    job: F,
) -> JobHandle
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    let (tx, mut rx) = watch::channel(false);
    let job = Arc::new(job);

    let handle = tokio::spawn(async move {
        let start = if run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = rx.changed() => {
                    info!(job = name, "scheduler stopped");
                    break;
                }
            }

            let job = Arc::clone(&job);
            match tokio::task::spawn_blocking(move || job()).await {
                Ok(Ok(())) => debug!(job = name, "scheduled run finished"),
                Ok(Err(e)) => error!(job = name, error = %e, "scheduled run failed"),
                Err(e) => error!(job = name, error = %e, "scheduled run panicked"),
            }
        }
    });

    info!(job = name, period_secs = period.as_secs(), "scheduler started");
    JobHandle {
        name,
        shutdown: tx,
        handle,
    }
}

/// Start the process-wide batch export timer.
pub fn start_export_scheduler(
    exporter: ResearchExporter,
    period: Duration,
    run_immediately: bool,
) -> Result<JobHandle, SchedulerError> {
    if EXPORT_SCHEDULER_STARTED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(SchedulerError::AlreadyStarted);
    }

    Ok(spawn_periodic(
        "research_export",
        period,
        run_immediately,
        move || exporter.run_batch().map(|_| ()),
    ))
}
