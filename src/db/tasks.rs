//! Task CRUD, assignments and canvas nodes.

use super::users::{get_profile_internal, get_user_internal};
use super::{Database, now_ms};
use crate::error::ServiceError;
use crate::types::{
    Assignment, Outcome, Task, TaskDetail, TaskId, TaskNode, TaskPriority, TaskStatus, UserId,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Epoch milliseconds.
    pub due_date: Option<i64>,
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub assignee_ids: Vec<UserId>,
    /// Creator's canvas position for the new task.
    #[serde(default)]
    pub position_x: f64,
    #[serde(default)]
    pub position_y: f64,
}

/// Result of creating a task.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedTask {
    pub task: Task,
    pub assignee_ids: Vec<UserId>,
    /// Requested assignees that do not exist.
    pub skipped_assignee_ids: Vec<UserId>,
}

/// Result of completing one user's share of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub outcome: Outcome,
    /// True only for the completion that made every assignment complete.
    pub all_done_now: bool,
}

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        created_by: row.get("created_by")?,
        tenant_id: row.get("tenant_id")?,
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Active),
        priority: TaskPriority::from_str(&priority).unwrap_or_default(),
        due_date: row.get("due_date")?,
        parent_id: row.get("parent_id")?,
        is_pipeline_task: row.get("is_pipeline_task")?,
        pipeline_stage_id: row.get("pipeline_stage_id")?,
        warning_sent: row.get("warning_sent")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn parse_assignment_row(row: &Row) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        user_id: row.get("user_id")?,
        is_completed: row.get("is_completed")?,
        completed_at: row.get("completed_at")?,
        is_read: row.get("is_read")?,
        is_failed: row.get("is_failed")?,
    })
}

fn parse_node_row(row: &Row) -> rusqlite::Result<TaskNode> {
    Ok(TaskNode {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        user_id: row.get("user_id")?,
        position_x: row.get("position_x")?,
        position_y: row.get("position_y")?,
        is_pinned: row.get("is_pinned")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(conn: &Connection, task_id: TaskId) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

pub(crate) fn assignments_internal(conn: &Connection, task_id: TaskId) -> Result<Vec<Assignment>> {
    let mut stmt = conn.prepare("SELECT * FROM assignments WHERE task_id = ?1 ORDER BY id")?;
    let assignments = stmt
        .query_map(params![task_id], parse_assignment_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(assignments)
}

/// Set `warning_sent` if the task is still active, un-warned and due in
/// `(now, window_end]`. Returns whether this call set it.
pub(crate) fn claim_warning_internal(
    conn: &Connection,
    task_id: TaskId,
    now: i64,
    window_end: i64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE tasks SET warning_sent = 1, updated_at = ?1
         WHERE id = ?2 AND warning_sent = 0 AND status = 'active'
         AND due_date > ?1 AND due_date <= ?3",
        params![now, task_id, window_end],
    )?;
    Ok(updated > 0)
}

/// Mark an open assignment failed. Returns whether this call failed it.
pub(crate) fn fail_assignment_internal(conn: &Connection, assignment_id: i64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE assignments SET is_failed = 1
         WHERE id = ?1 AND is_failed = 0 AND is_completed = 0",
        params![assignment_id],
    )?;
    Ok(updated > 0)
}

fn upsert_node_internal(
    conn: &Connection,
    task_id: TaskId,
    user_id: UserId,
    x: f64,
    y: f64,
) -> Result<TaskNode> {
    conn.execute(
        "INSERT INTO task_nodes (task_id, user_id, position_x, position_y) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(task_id, user_id) DO UPDATE SET
             position_x = excluded.position_x,
             position_y = excluded.position_y",
        params![task_id, user_id, x, y],
    )?;
    let node = conn.query_row(
        "SELECT * FROM task_nodes WHERE task_id = ?1 AND user_id = ?2",
        params![task_id, user_id],
        parse_node_row,
    )?;
    Ok(node)
}

impl Database {
    /// Create a task, its assignments and the canvas nodes of everyone involved.
    ///
    /// The task is scoped to the creator's tenant. Assignee ids that do not
    /// resolve to a user are skipped and reported back.
    pub fn create_task(&self, creator_id: UserId, input: &NewTask) -> Result<CreatedTask> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(ServiceError::missing_field("title").into());
        }
        if !input.position_x.is_finite() || !input.position_y.is_finite() {
            return Err(
                ServiceError::invalid_value("position", "coordinates must be finite numbers")
                    .into(),
            );
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if get_user_internal(&tx, creator_id)?.is_none() {
                return Err(ServiceError::user_not_found(creator_id).into());
            }
            let tenant_id = get_profile_internal(&tx, creator_id)?.and_then(|p| p.tenant_id);

            if let Some(parent_id) = input.parent_id
                && get_task_internal(&tx, parent_id)?.is_none()
            {
                return Err(ServiceError::task_not_found(parent_id).into());
            }

            let now = now_ms();
            tx.execute(
                "INSERT INTO tasks (
                    title, description, created_by, tenant_id, status, priority,
                    due_date, parent_id, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?8, ?8)",
                params![
                    title,
                    &input.description,
                    creator_id,
                    tenant_id,
                    input.priority.as_str(),
                    input.due_date,
                    input.parent_id,
                    now,
                ],
            )?;
            let task_id = tx.last_insert_rowid();

            upsert_node_internal(&tx, task_id, creator_id, input.position_x, input.position_y)?;

            let mut assigned = Vec::new();
            let mut skipped = Vec::new();
            for &user_id in &input.assignee_ids {
                if assigned.contains(&user_id) {
                    continue;
                }
                if get_user_internal(&tx, user_id)?.is_none() {
                    skipped.push(user_id);
                    continue;
                }
                let assignee_tenant =
                    get_profile_internal(&tx, user_id)?.and_then(|p| p.tenant_id);
                if assignee_tenant != tenant_id {
                    let reason = format!("User {} belongs to a different company", user_id);
                    return Err(ServiceError::forbidden(&reason).into());
                }
                tx.execute(
                    "INSERT OR IGNORE INTO assignments (task_id, user_id) VALUES (?1, ?2)",
                    params![task_id, user_id],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO task_nodes (task_id, user_id) VALUES (?1, ?2)",
                    params![task_id, user_id],
                )?;
                assigned.push(user_id);
            }

            let task = get_task_internal(&tx, task_id)?
                .ok_or_else(|| ServiceError::task_not_found(task_id))?;
            tx.commit()?;

            Ok(CreatedTask {
                task,
                assignee_ids: assigned,
                skipped_assignee_ids: skipped,
            })
        })
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Get a task or fail with a not-found error.
    pub fn require_task(&self, task_id: TaskId) -> Result<Task> {
        self.get_task(task_id)?
            .ok_or_else(|| ServiceError::task_not_found(task_id).into())
    }

    pub fn get_assignment(&self, task_id: TaskId, user_id: UserId) -> Result<Option<Assignment>> {
        self.with_conn(|conn| {
            let assignment = conn
                .query_row(
                    "SELECT * FROM assignments WHERE task_id = ?1 AND user_id = ?2",
                    params![task_id, user_id],
                    parse_assignment_row,
                )
                .optional()?;
            Ok(assignment)
        })
    }

    pub fn get_assignments(&self, task_id: TaskId) -> Result<Vec<Assignment>> {
        self.with_conn(|conn| assignments_internal(conn, task_id))
    }

    /// True if the user created the task or is assigned to it.
    pub fn can_access_task(&self, task_id: TaskId, user_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let allowed: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1 AND created_by = ?2)
                     OR EXISTS(SELECT 1 FROM assignments WHERE task_id = ?1 AND user_id = ?2)",
                params![task_id, user_id],
                |row| row.get(0),
            )?;
            Ok(allowed)
        })
    }

    /// Tasks the user created or is assigned to, newest first.
    pub fn list_tasks_for_user(&self, user_id: UserId) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT t.* FROM tasks t
                 LEFT JOIN assignments a ON a.task_id = t.id
                 WHERE t.created_by = ?1 OR a.user_id = ?1
                 ORDER BY t.created_at DESC, t.id DESC",
            )?;
            let tasks = stmt
                .query_map(params![user_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Task with assignments, attachments and the viewer's node.
    pub fn task_detail(&self, task_id: TaskId, viewer_id: UserId) -> Result<TaskDetail> {
        let task = self.require_task(task_id)?;
        let assignments = self.get_assignments(task_id)?;
        let attachments = self.list_attachments(task_id)?;
        let node = self.get_node(task_id, viewer_id)?;
        Ok(TaskDetail {
            task,
            assignments,
            attachments,
            node,
        })
    }

    /// Change priority. Returns the previous priority.
    pub fn update_priority(&self, task_id: TaskId, priority: TaskPriority) -> Result<TaskPriority> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task = get_task_internal(&tx, task_id)?
                .ok_or_else(|| ServiceError::task_not_found(task_id))?;
            tx.execute(
                "UPDATE tasks SET priority = ?1, updated_at = ?2 WHERE id = ?3",
                params![priority.as_str(), now_ms(), task_id],
            )?;
            tx.commit()?;
            Ok(task.priority)
        })
    }

    pub fn set_task_status(&self, task_id: TaskId, status: TaskStatus) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now_ms(), task_id],
            )?;
            if updated == 0 {
                return Err(ServiceError::task_not_found(task_id).into());
            }
            Ok(())
        })
    }

    /// Complete the user's assignment on a task.
    ///
    /// Runs under the write lock so exactly one completion observes the
    /// "everyone is done" edge.
    pub fn complete_assignment(
        &self,
        task_id: TaskId,
        user_id: UserId,
        now: i64,
    ) -> Result<Completion> {
        self.with_write_tx(|tx| {
            if get_task_internal(tx, task_id)?.is_none() {
                return Err(ServiceError::task_not_found(task_id).into());
            }
            let assignment = tx
                .query_row(
                    "SELECT * FROM assignments WHERE task_id = ?1 AND user_id = ?2",
                    params![task_id, user_id],
                    parse_assignment_row,
                )
                .optional()?
                .ok_or_else(|| ServiceError::forbidden("This task is not assigned to you"))?;

            if assignment.is_completed {
                return Ok(Completion {
                    outcome: Outcome::Unchanged,
                    all_done_now: false,
                });
            }

            tx.execute(
                "UPDATE assignments SET is_completed = 1, completed_at = ?1 WHERE id = ?2",
                params![now, assignment.id],
            )?;

            let assignments = assignments_internal(tx, task_id)?;
            Ok(Completion {
                outcome: Outcome::Applied,
                all_done_now: crate::types::all_done(&assignments),
            })
        })
    }

    /// Mark the user's assignment read.
    pub fn mark_assignment_read(&self, task_id: TaskId, user_id: UserId) -> Result<Outcome> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE assignments SET is_read = 1
                 WHERE task_id = ?1 AND user_id = ?2 AND is_read = 0",
                params![task_id, user_id],
            )?;
            Ok(if updated > 0 {
                Outcome::Applied
            } else {
                Outcome::Unchanged
            })
        })
    }

    /// Write the user's canvas position for a task, creating the node if needed.
    pub fn upsert_node(&self, task_id: TaskId, user_id: UserId, x: f64, y: f64) -> Result<TaskNode> {
        if !x.is_finite() || !y.is_finite() {
            return Err(
                ServiceError::invalid_value("position", "coordinates must be finite numbers")
                    .into(),
            );
        }
        self.with_conn(|conn| upsert_node_internal(conn, task_id, user_id, x, y))
    }

    pub fn set_node_pinned(&self, task_id: TaskId, user_id: UserId, pinned: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_nodes (task_id, user_id, is_pinned) VALUES (?1, ?2, ?3)
                 ON CONFLICT(task_id, user_id) DO UPDATE SET is_pinned = excluded.is_pinned",
                params![task_id, user_id, pinned],
            )?;
            Ok(())
        })
    }

    pub fn get_node(&self, task_id: TaskId, user_id: UserId) -> Result<Option<TaskNode>> {
        self.with_conn(|conn| {
            let node = conn
                .query_row(
                    "SELECT * FROM task_nodes WHERE task_id = ?1 AND user_id = ?2",
                    params![task_id, user_id],
                    parse_node_row,
                )
                .optional()?;
            Ok(node)
        })
    }

    /// Active tasks not yet warned whose due date is in `(now, window_end]`.
    pub fn warning_candidates(&self, now: i64, window_end: i64) -> Result<Vec<TaskId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM tasks
                 WHERE status = 'active' AND warning_sent = 0
                 AND due_date IS NOT NULL AND due_date > ?1 AND due_date <= ?2
                 ORDER BY due_date, id",
            )?;
            let ids = stmt
                .query_map(params![now, window_end], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<TaskId>>>()?;
            Ok(ids)
        })
    }

    /// Active tasks whose due date has passed.
    pub fn expired_candidates(&self, now: i64) -> Result<Vec<TaskId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM tasks
                 WHERE status = 'active' AND due_date IS NOT NULL AND due_date <= ?1
                 ORDER BY due_date, id",
            )?;
            let ids = stmt
                .query_map(params![now], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<TaskId>>>()?;
            Ok(ids)
        })
    }
}
