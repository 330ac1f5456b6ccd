//! Notification inbox operations.

use super::{Database, now_ms};
use crate::error::ServiceError;
use crate::types::{Notification, NotificationKind, Outcome, TaskId, UserId};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// A notification about to be written.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: UserId,
    pub task_id: Option<TaskId>,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

fn parse_notification_row(row: &Row) -> rusqlite::Result<Notification> {
    let kind: String = row.get("kind")?;
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        task_id: row.get("task_id")?,
        title: row.get("title")?,
        message: row.get("message")?,
        kind: NotificationKind::from_str(&kind).unwrap_or(NotificationKind::Assignment),
        is_read: row.get("is_read")?,
        created_at: row.get("created_at")?,
    })
}

/// Insert using an existing connection, so callers can keep it inside their transaction.
pub(crate) fn insert_notification_internal(
    conn: &Connection,
    notification: &NewNotification,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO notifications (user_id, task_id, title, message, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            notification.user_id,
            notification.task_id,
            &notification.title,
            &notification.message,
            notification.kind.as_str(),
            now_ms(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    pub fn insert_notification(&self, notification: &NewNotification) -> Result<i64> {
        self.with_conn(|conn| insert_notification_internal(conn, notification))
    }

    /// The user's notifications, newest first.
    pub fn list_notifications(&self, user_id: UserId) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM notifications WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )?;
            let notifications = stmt
                .query_map(params![user_id], parse_notification_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(notifications)
        })
    }

    /// Notifications for one task, in insertion order.
    pub fn notifications_for_task(&self, task_id: TaskId) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM notifications WHERE task_id = ?1 ORDER BY id")?;
            let notifications = stmt
                .query_map(params![task_id], parse_notification_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(notifications)
        })
    }

    /// Mark one of the user's notifications read.
    pub fn mark_notification_read(&self, user_id: UserId, notification_id: i64) -> Result<Outcome> {
        self.with_conn(|conn| {
            let is_read: Option<bool> = conn
                .query_row(
                    "SELECT is_read FROM notifications WHERE id = ?1 AND user_id = ?2",
                    params![notification_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            match is_read {
                None => Err(ServiceError::notification_not_found(notification_id).into()),
                Some(true) => Ok(Outcome::Unchanged),
                Some(false) => {
                    conn.execute(
                        "UPDATE notifications SET is_read = 1 WHERE id = ?1",
                        params![notification_id],
                    )?;
                    Ok(Outcome::Applied)
                }
            }
        })
    }

    /// Returns how many were marked.
    pub fn mark_all_notifications_read(&self, user_id: UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
            )?;
            Ok(updated)
        })
    }

    /// Delete all of the user's notifications. Returns how many were deleted.
    pub fn clear_notifications(&self, user_id: UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM notifications WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(deleted)
        })
    }

    pub fn unread_notification_count(&self, user_id: UserId) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}
