//! Deadline sweeper.
//!
//! Moves assignments through active, warned and failed states against the
//! wall clock. Each task is handled in its own IMMEDIATE transaction with
//! conditional updates, so overlapping sweeps never notify twice and a
//! second run right after the first changes nothing.

use crate::db::notifications::{NewNotification, insert_notification_internal};
use crate::db::tasks::{
    assignments_internal, claim_warning_internal, fail_assignment_internal, get_task_internal,
};
use crate::db::users::preferences_internal;
use crate::db::{Database, now_ms};
use crate::error::{ServiceError, ServiceResult};
use crate::preferences::NotificationGate;
use crate::types::{NotificationKind, TaskId};
use anyhow::Result;
use serde::Serialize;
use tracing::{error, info};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub warned_tasks: usize,
    pub warning_notifications: usize,
    pub failed_assignments: usize,
    pub expiry_notifications: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone)]
pub struct DeadlineSweeper {
    db: Database,
    warning_window_ms: i64,
}

impl DeadlineSweeper {
    pub fn new(db: Database, warning_window_ms: i64) -> Self {
        Self {
            db,
            warning_window_ms,
        }
    }

    pub fn sweep(&self) -> ServiceResult<SweepReport> {
        self.sweep_at(now_ms())
    }

    /// Run both phases as of `now`. Per-task work already committed stays
    /// committed if a later task fails.
    pub fn sweep_at(&self, now: i64) -> ServiceResult<SweepReport> {
        let report = self.run(now).map_err(|e| {
            error!(error = %e, "deadline sweep failed");
            ServiceError::from(e)
        })?;
        if !report.is_empty() {
            info!(
                warned_tasks = report.warned_tasks,
                warning_notifications = report.warning_notifications,
                failed_assignments = report.failed_assignments,
                expiry_notifications = report.expiry_notifications,
                "deadline sweep"
            );
        }
        Ok(report)
    }

    fn run(&self, now: i64) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let window_end = now + self.warning_window_ms;

        for task_id in self.db.warning_candidates(now, window_end)? {
            if let Some(sent) = self.warn_task(task_id, now, window_end)? {
                report.warned_tasks += 1;
                report.warning_notifications += sent;
            }
        }

        for task_id in self.db.expired_candidates(now)? {
            let (failed, sent) = self.expire_task(task_id)?;
            report.failed_assignments += failed;
            report.expiry_notifications += sent;
        }

        Ok(report)
    }

    /// Returns the notifications sent, or `None` if another sweep got there first.
    fn warn_task(&self, task_id: TaskId, now: i64, window_end: i64) -> Result<Option<usize>> {
        self.db.with_write_tx(|tx| {
            if !claim_warning_internal(tx, task_id, now, window_end)? {
                return Ok(None);
            }
            let Some(task) = get_task_internal(tx, task_id)? else {
                return Ok(None);
            };

            let mut sent = 0;
            for assignment in assignments_internal(tx, task_id)? {
                if assignment.is_completed {
                    continue;
                }
                if !preferences_internal(tx, assignment.user_id)?
                    .allows(NotificationGate::DeadlineWarning)
                {
                    continue;
                }
                insert_notification_internal(
                    tx,
                    &NewNotification {
                        user_id: assignment.user_id,
                        task_id: Some(task_id),
                        title: "One Hour Left".to_string(),
                        message: format!("Less than an hour is left for '{}'.", task.title),
                        kind: NotificationKind::DeadlineWarning,
                    },
                )?;
                sent += 1;
            }
            Ok(Some(sent))
        })
    }

    /// Returns (assignments failed, notifications sent).
    fn expire_task(&self, task_id: TaskId) -> Result<(usize, usize)> {
        self.db.with_write_tx(|tx| {
            let Some(task) = get_task_internal(tx, task_id)? else {
                return Ok((0, 0));
            };

            let mut failed = 0;
            let mut sent = 0;
            for assignment in assignments_internal(tx, task_id)? {
                if !fail_assignment_internal(tx, assignment.id)? {
                    continue;
                }
                failed += 1;

                if !preferences_internal(tx, assignment.user_id)?.allows(NotificationGate::Deadline)
                {
                    continue;
                }
                insert_notification_internal(
                    tx,
                    &NewNotification {
                        user_id: assignment.user_id,
                        task_id: Some(task_id),
                        title: "Time Is Up".to_string(),
                        message: format!("'{}' has expired and is now closed.", task.title),
                        kind: NotificationKind::Deadline,
                    },
                )?;
                sent += 1;
            }
            Ok((failed, sent))
        })
    }
}
