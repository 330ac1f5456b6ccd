//! Task comments.

use super::{Database, now_ms};
use crate::error::ServiceError;
use crate::types::{Comment, TaskId, UserId};
use anyhow::Result;
use rusqlite::{Row, params};

fn parse_comment_row(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        created_at: row.get("created_at")?,
    })
}

impl Database {
    pub fn insert_comment(&self, task_id: TaskId, user_id: UserId, content: &str) -> Result<Comment> {
        if content.trim().is_empty() {
            return Err(ServiceError::missing_field("content").into());
        }
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (task_id, user_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![task_id, user_id, content, now],
            )?;
            Ok(Comment {
                id: conn.last_insert_rowid(),
                task_id,
                user_id,
                content: content.to_string(),
                created_at: now,
            })
        })
    }

    /// Comments on a task, oldest first.
    pub fn list_comments(&self, task_id: TaskId) -> Result<Vec<Comment>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM comments WHERE task_id = ?1 ORDER BY created_at, id")?;
            let comments = stmt
                .query_map(params![task_id], parse_comment_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(comments)
        })
    }
}
