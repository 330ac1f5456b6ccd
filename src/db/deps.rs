//! Dependency operations and cycle detection.

use super::Database;
use super::tasks::get_task_internal;
use crate::error::ServiceError;
use crate::types::{Dependency, Outcome, TaskId};
use anyhow::Result;
use rusqlite::{Connection, params};
use std::collections::{HashSet, VecDeque};

/// True if `to` can already reach `from`, so adding `from -> to` closes a cycle.
fn would_create_cycle(conn: &Connection, from: TaskId, to: TaskId) -> Result<bool> {
    let mut visited: HashSet<TaskId> = HashSet::new();
    let mut queue: VecDeque<TaskId> = VecDeque::new();
    queue.push_back(to);

    let mut stmt = conn.prepare("SELECT target_task_id FROM dependencies WHERE source_task_id = ?1")?;

    while let Some(current) = queue.pop_front() {
        if current == from {
            return Ok(true);
        }
        if !visited.insert(current) {
            continue;
        }

        let next = stmt
            .query_map(params![current], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<TaskId>>>()?;
        for id in next {
            if !visited.contains(&id) {
                queue.push_back(id);
            }
        }
    }

    Ok(false)
}

impl Database {
    /// Add `source -> target` (source precedes target).
    ///
    /// Rejects self edges and cycles. When neither task is a pipeline task and
    /// both have due dates, the source must not be due after the target.
    pub fn add_dependency(&self, source: TaskId, target: TaskId) -> Result<Dependency> {
        if source == target {
            return Err(
                ServiceError::invalid_value("target_task_id", "A task cannot depend on itself")
                    .into(),
            );
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let source_task =
                get_task_internal(&tx, source)?.ok_or_else(|| ServiceError::task_not_found(source))?;
            let target_task =
                get_task_internal(&tx, target)?.ok_or_else(|| ServiceError::task_not_found(target))?;

            if !source_task.is_pipeline_task
                && !target_task.is_pipeline_task
                && let (Some(source_due), Some(target_due)) =
                    (source_task.due_date, target_task.due_date)
                && source_due > target_due
            {
                return Err(ServiceError::dependency_order(source, target).into());
            }

            if would_create_cycle(&tx, source, target)? {
                return Err(ServiceError::dependency_cycle(source, target).into());
            }

            tx.execute(
                "INSERT OR IGNORE INTO dependencies (source_task_id, target_task_id) VALUES (?1, ?2)",
                params![source, target],
            )?;
            let id: i64 = tx.query_row(
                "SELECT id FROM dependencies WHERE source_task_id = ?1 AND target_task_id = ?2",
                params![source, target],
                |row| row.get(0),
            )?;
            tx.commit()?;

            Ok(Dependency {
                id,
                source_task_id: source,
                target_task_id: target,
            })
        })
    }

    pub fn remove_dependency(&self, source: TaskId, target: TaskId) -> Result<Outcome> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM dependencies WHERE source_task_id = ?1 AND target_task_id = ?2",
                params![source, target],
            )?;
            Ok(if removed > 0 {
                Outcome::Applied
            } else {
                Outcome::Unchanged
            })
        })
    }

    /// Edges touching the task in either direction.
    pub fn list_dependencies(&self, task_id: TaskId) -> Result<Vec<Dependency>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_task_id, target_task_id FROM dependencies
                 WHERE source_task_id = ?1 OR target_task_id = ?1
                 ORDER BY id",
            )?;
            let deps = stmt
                .query_map(params![task_id], |row| {
                    Ok(Dependency {
                        id: row.get(0)?,
                        source_task_id: row.get(1)?,
                        target_task_id: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(deps)
        })
    }
}
