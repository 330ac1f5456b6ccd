//! Attachment metadata. File bytes live in the blob store.

use super::{Database, now_ms};
use crate::error::ServiceError;
use crate::types::{Attachment, AttachmentKind, TaskId, UserId};
use anyhow::Result;
use rusqlite::{Row, params};

fn parse_attachment_row(row: &Row) -> rusqlite::Result<Attachment> {
    let kind: String = row.get("file_type")?;
    Ok(Attachment {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        uploaded_by: row.get("uploaded_by")?,
        file_path: row.get("file_path")?,
        file_name: row.get("file_name")?,
        file_type: AttachmentKind::from_str(&kind).unwrap_or_default(),
        created_at: row.get("created_at")?,
    })
}

impl Database {
    /// Record an attachment whose bytes were saved at `file_path`.
    pub fn add_attachment(
        &self,
        task_id: TaskId,
        uploaded_by: UserId,
        file_path: &str,
        file_name: &str,
        kind: AttachmentKind,
    ) -> Result<Attachment> {
        let now = now_ms();
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
                params![task_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(ServiceError::task_not_found(task_id).into());
            }

            conn.execute(
                "INSERT INTO attachments (task_id, uploaded_by, file_path, file_name, file_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![task_id, uploaded_by, file_path, file_name, kind.as_str(), now],
            )?;

            Ok(Attachment {
                id: conn.last_insert_rowid(),
                task_id,
                uploaded_by,
                file_path: file_path.to_string(),
                file_name: file_name.to_string(),
                file_type: kind,
                created_at: now,
            })
        })
    }

    pub fn list_attachments(&self, task_id: TaskId) -> Result<Vec<Attachment>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM attachments WHERE task_id = ?1 ORDER BY created_at, id")?;
            let attachments = stmt
                .query_map(params![task_id], parse_attachment_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(attachments)
        })
    }

    /// Delete a task's attachment rows and mark the task completed, in one transaction.
    pub fn archive_task_rows(&self, task_id: TaskId) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM attachments WHERE task_id = ?1", params![task_id])?;
            let updated = tx.execute(
                "UPDATE tasks SET status = 'completed', updated_at = ?1 WHERE id = ?2",
                params![now_ms(), task_id],
            )?;
            if updated == 0 {
                return Err(ServiceError::task_not_found(task_id).into());
            }
            tx.commit()?;
            Ok(removed)
        })
    }
}
