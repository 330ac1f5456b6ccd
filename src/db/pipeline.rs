//! Onboarding pipeline templates, stages and generated tasks.

use super::tasks::parse_task_row;
use super::{Database, now_ms};
use crate::error::ServiceError;
use crate::types::{
    Assignment, PeriodId, PipelineStage, PipelineTemplate, Task, TaskId, TenantId, UserId,
};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

fn parse_stage_row(row: &Row) -> rusqlite::Result<PipelineStage> {
    Ok(PipelineStage {
        id: row.get("id")?,
        template_id: row.get("template_id")?,
        order: row.get("stage_order")?,
        title: row.get("title")?,
        description: row.get("description")?,
        is_final: row.get("is_final")?,
    })
}

fn parse_template_row(row: &Row) -> rusqlite::Result<PipelineTemplate> {
    Ok(PipelineTemplate {
        id: row.get("id")?,
        period_id: row.get("period_id")?,
        name: row.get("name")?,
    })
}

/// A user's pipeline task with its stage and the user's assignment.
#[derive(Debug, Clone)]
pub struct PipelineRow {
    pub task: Task,
    pub stage: Option<PipelineStage>,
    pub assignment: Option<Assignment>,
}

impl Database {
    pub fn create_template(&self, period_id: PeriodId, name: &str) -> Result<PipelineTemplate> {
        if name.trim().is_empty() {
            return Err(ServiceError::missing_field("name").into());
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pipeline_templates (period_id, name, created_at) VALUES (?1, ?2, ?3)",
                params![period_id, name.trim(), now_ms()],
            )?;
            Ok(PipelineTemplate {
                id: conn.last_insert_rowid(),
                period_id,
                name: name.trim().to_string(),
            })
        })
    }

    pub fn add_stage(
        &self,
        template_id: i64,
        order: i32,
        title: &str,
        description: Option<&str>,
        is_final: bool,
    ) -> Result<PipelineStage> {
        if title.trim().is_empty() {
            return Err(ServiceError::missing_field("title").into());
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pipeline_stages (template_id, stage_order, title, description, is_final)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![template_id, order, title.trim(), description, is_final],
            )?;
            Ok(PipelineStage {
                id: conn.last_insert_rowid(),
                template_id,
                order,
                title: title.trim().to_string(),
                description: description.map(str::to_string),
                is_final,
            })
        })
    }

    pub fn get_template(&self, template_id: i64) -> Result<Option<PipelineTemplate>> {
        self.with_conn(|conn| {
            let template = conn
                .query_row(
                    "SELECT * FROM pipeline_templates WHERE id = ?1",
                    params![template_id],
                    parse_template_row,
                )
                .optional()?;
            Ok(template)
        })
    }

    /// First template attached to the period (lowest id).
    pub fn first_template_for_period(&self, period_id: PeriodId) -> Result<Option<PipelineTemplate>> {
        self.with_conn(|conn| {
            let template = conn
                .query_row(
                    "SELECT * FROM pipeline_templates WHERE period_id = ?1 ORDER BY id LIMIT 1",
                    params![period_id],
                    parse_template_row,
                )
                .optional()?;
            Ok(template)
        })
    }

    pub fn stages_for_template(&self, template_id: i64) -> Result<Vec<PipelineStage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM pipeline_stages WHERE template_id = ?1 ORDER BY stage_order, id",
            )?;
            let stages = stmt
                .query_map(params![template_id], parse_stage_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(stages)
        })
    }

    pub fn get_stage(&self, stage_id: i64) -> Result<Option<PipelineStage>> {
        self.with_conn(|conn| {
            let stage = conn
                .query_row(
                    "SELECT * FROM pipeline_stages WHERE id = ?1",
                    params![stage_id],
                    parse_stage_row,
                )
                .optional()?;
            Ok(stage)
        })
    }

    pub fn user_has_pipeline_tasks(&self, user_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM tasks t
                     INNER JOIN assignments a ON a.task_id = t.id
                     WHERE a.user_id = ?1 AND t.is_pipeline_task = 1
                 )",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Superuser whose profile is in the tenant.
    pub fn find_tenant_superuser(&self, tenant_id: TenantId) -> Result<Option<UserId>> {
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT u.id FROM users u
                     INNER JOIN profiles p ON p.user_id = u.id
                     WHERE u.is_superuser = 1 AND p.tenant_id = ?1
                     ORDER BY u.id LIMIT 1",
                    params![tenant_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
    }

    /// A rank-10 member of the tenant.
    pub fn find_tenant_top_rank(&self, tenant_id: TenantId) -> Result<Option<UserId>> {
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT user_id FROM profiles
                     WHERE tenant_id = ?1 AND rank = 10
                     ORDER BY user_id LIMIT 1",
                    params![tenant_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
    }

    pub fn find_any_superuser(&self) -> Result<Option<UserId>> {
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT id FROM users WHERE is_superuser = 1 ORDER BY id LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
    }

    /// Create one pipeline task and assignment per stage for the user.
    ///
    /// Returns the new task ids, or an empty list when the user already holds
    /// pipeline tasks (checked under the write lock).
    pub fn create_pipeline_tasks(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        creator_id: UserId,
        stages: &[PipelineStage],
    ) -> Result<Vec<TaskId>> {
        self.with_write_tx(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM tasks t
                     INNER JOIN assignments a ON a.task_id = t.id
                     WHERE a.user_id = ?1 AND t.is_pipeline_task = 1
                 )",
                params![user_id],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(Vec::new());
            }

            let now = now_ms();
            let mut ids = Vec::with_capacity(stages.len());
            for stage in stages {
                tx.execute(
                    "INSERT INTO tasks (
                        title, description, created_by, tenant_id, is_pipeline_task,
                        pipeline_stage_id, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
                    params![
                        &stage.title,
                        &stage.description,
                        creator_id,
                        tenant_id,
                        stage.id,
                        now,
                    ],
                )?;
                let task_id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO assignments (task_id, user_id) VALUES (?1, ?2)",
                    params![task_id, user_id],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO task_nodes (task_id, user_id) VALUES (?1, ?2)",
                    params![task_id, user_id],
                )?;
                ids.push(task_id);
            }
            Ok(ids)
        })
    }

    /// The user's pipeline tasks ordered by stage order.
    pub fn pipeline_rows_for_user(&self, user_id: UserId) -> Result<Vec<PipelineRow>> {
        let tasks: Vec<Task> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.* FROM tasks t
                 INNER JOIN assignments a ON a.task_id = t.id
                 LEFT JOIN pipeline_stages s ON s.id = t.pipeline_stage_id
                 WHERE a.user_id = ?1 AND t.is_pipeline_task = 1
                 ORDER BY COALESCE(s.stage_order, 0), t.id",
            )?;
            let tasks = stmt
                .query_map(params![user_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })?;

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let stage = match task.pipeline_stage_id {
                Some(stage_id) => self.get_stage(stage_id)?,
                None => None,
            };
            let assignment = self.get_assignment(task.id, user_id)?;
            rows.push(PipelineRow {
                task,
                stage,
                assignment,
            });
        }
        Ok(rows)
    }
}
