//! Onboarding pipeline engine.
//!
//! An approved user gets one task per stage of their tenant's current
//! template. Stage N is unlocked once stage N-1 is completed; the first stage
//! is always unlocked.

use crate::db::Database;
use crate::db::pipeline::PipelineRow;
use crate::error::{ServiceError, ServiceResult};
use crate::events::EventLogger;
use crate::types::{EventType, PresentationPeriod, StageView, TaskId, TenantId, UserId};
use anyhow::Result;
use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

/// Build the stage view from rows already sorted by stage order.
pub fn stage_views(rows: &[PipelineRow]) -> Vec<StageView> {
    let mut previous_completed = true;
    rows.iter()
        .map(|row| {
            let is_completed = row.assignment.as_ref().is_some_and(|a| a.is_completed);
            let view = StageView {
                task_id: row.task.id,
                stage_id: row.stage.as_ref().map(|s| s.id),
                title: row.task.title.clone(),
                description: row.task.description.clone(),
                status: row.task.status,
                is_completed,
                unlocked: previous_completed,
                order: row.stage.as_ref().map(|s| s.order).unwrap_or(0),
                is_final_stage: row.stage.as_ref().is_some_and(|s| s.is_final),
            };
            previous_completed = is_completed;
            view
        })
        .collect()
}

/// The tenant's period covering `today`, else the most recently started one.
/// `periods` must be ordered by start date, newest first.
pub fn select_period(periods: &[PresentationPeriod], today: NaiveDate) -> Option<&PresentationPeriod> {
    periods
        .iter()
        .find(|p| p.contains(today))
        .or_else(|| periods.first())
}

#[derive(Clone)]
pub struct PipelineEngine {
    db: Database,
    events: EventLogger,
}

impl PipelineEngine {
    pub fn new(db: Database, events: EventLogger) -> Self {
        Self { db, events }
    }

    /// Superuser in the tenant, else a rank-10 member, else any superuser.
    fn select_creator(&self, tenant_id: TenantId) -> Result<Option<UserId>> {
        if let Some(id) = self.db.find_tenant_superuser(tenant_id)? {
            return Ok(Some(id));
        }
        if let Some(id) = self.db.find_tenant_top_rank(tenant_id)? {
            return Ok(Some(id));
        }
        self.db.find_any_superuser()
    }

    /// Generate the user's pipeline tasks if they have none yet.
    ///
    /// Returns the created task ids; empty when the user is inactive, has no
    /// tenant, already has pipeline tasks, or no template applies.
    pub fn onboard(&self, user_id: UserId, today: NaiveDate) -> Result<Vec<TaskId>> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| ServiceError::user_not_found(user_id))?;
        if !user.is_active {
            return Ok(Vec::new());
        }
        let Some(tenant_id) = self.db.get_profile(user_id)?.and_then(|p| p.tenant_id) else {
            return Ok(Vec::new());
        };
        if self.db.user_has_pipeline_tasks(user_id)? {
            return Ok(Vec::new());
        }

        let periods = self.db.periods_for_tenant(tenant_id)?;
        let Some(period) = select_period(&periods, today) else {
            return Ok(Vec::new());
        };
        let Some(template) = self.db.first_template_for_period(period.id)? else {
            return Ok(Vec::new());
        };
        let stages = self.db.stages_for_template(template.id)?;
        if stages.is_empty() {
            return Ok(Vec::new());
        }

        let Some(creator_id) = self.select_creator(tenant_id)? else {
            warn!(user_id, tenant_id, "no pipeline creator available, onboarding skipped");
            return Ok(Vec::new());
        };

        let ids = self
            .db
            .create_pipeline_tasks(user_id, tenant_id, creator_id, &stages)?;
        if !ids.is_empty() {
            info!(
                user_id,
                template_id = template.id,
                stages = ids.len(),
                "onboarding pipeline created"
            );
        }
        Ok(ids)
    }

    pub fn my_stages(&self, user_id: UserId) -> Result<Vec<StageView>> {
        let rows = self.db.pipeline_rows_for_user(user_id)?;
        Ok(stage_views(&rows))
    }

    /// Complete the caller's pipeline stage and return the refreshed view.
    ///
    /// Completing an already completed stage is a no-op.
    pub fn complete_stage(
        &self,
        user_id: UserId,
        task_id: TaskId,
        session_id: &str,
    ) -> ServiceResult<Vec<StageView>> {
        let task = self
            .db
            .get_task(task_id)?
            .filter(|t| t.is_pipeline_task)
            .ok_or_else(|| ServiceError::task_not_found(task_id))?;

        let assignment = self
            .db
            .get_assignment(task_id, user_id)?
            .ok_or_else(|| ServiceError::forbidden("This stage is not assigned to you"))?;
        if assignment.is_completed {
            return Ok(self.my_stages(user_id)?);
        }

        let completion = self
            .db
            .complete_assignment(task_id, user_id, crate::db::now_ms())?;
        if completion.outcome == crate::types::Outcome::Unchanged {
            return Ok(self.my_stages(user_id)?);
        }

        let stage = match task.pipeline_stage_id {
            Some(stage_id) => self.db.get_stage(stage_id)?,
            None => None,
        };
        self.events.log(
            Some(user_id),
            session_id,
            EventType::StageCompleted,
            json!({
                "stage_title": task.title,
                "stage_order": stage.as_ref().map(|s| s.order).unwrap_or(0),
                "task_id": task.id,
            }),
        );

        if let Some(stage) = stage.filter(|s| s.is_final) {
            let template_name = self
                .db
                .get_template(stage.template_id)?
                .map(|t| t.name)
                .unwrap_or_default();
            self.events.log(
                Some(user_id),
                session_id,
                EventType::FinalStageReached,
                json!({ "template_name": template_name }),
            );
        }

        Ok(self.my_stages(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Assignment, PipelineStage, Task, TaskPriority, TaskStatus};

    fn row(order: i32, completed: bool) -> PipelineRow {
        PipelineRow {
            task: Task {
                id: order as i64 + 100,
                title: format!("Stage {}", order),
                description: None,
                created_by: 1,
                tenant_id: Some(1),
                status: TaskStatus::Active,
                priority: TaskPriority::Normal,
                due_date: None,
                parent_id: None,
                is_pipeline_task: true,
                pipeline_stage_id: Some(order as i64),
                warning_sent: false,
                created_at: 0,
                updated_at: 0,
            },
            stage: Some(PipelineStage {
                id: order as i64,
                template_id: 1,
                order,
                title: format!("Stage {}", order),
                description: None,
                is_final: order == 2,
            }),
            assignment: Some(Assignment {
                id: order as i64,
                task_id: order as i64 + 100,
                user_id: 2,
                is_completed: completed,
                completed_at: None,
                is_read: false,
                is_failed: false,
            }),
        }
    }

    #[test]
    fn unlocking_follows_previous_completion() {
        let views = stage_views(&[row(0, true), row(1, false), row(2, false)]);
        let unlocked: Vec<bool> = views.iter().map(|v| v.unlocked).collect();
        assert_eq!(unlocked, vec![true, true, false]);
        assert!(views[2].is_final_stage);
    }

    #[test]
    fn first_stage_is_always_unlocked() {
        let views = stage_views(&[row(0, false), row(1, false)]);
        assert!(views[0].unlocked);
        assert!(!views[1].unlocked);
    }

    #[test]
    fn period_selection_prefers_covering_period() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let periods = vec![
            PresentationPeriod {
                id: 2,
                name: "Spring".into(),
                start_date: d("2025-03-01"),
                end_date: d("2025-05-31"),
            },
            PresentationPeriod {
                id: 1,
                name: "Fall".into(),
                start_date: d("2024-09-01"),
                end_date: d("2024-12-31"),
            },
        ];
        assert_eq!(select_period(&periods, d("2024-10-10")).map(|p| p.id), Some(1));
        assert_eq!(select_period(&periods, d("2026-01-01")).map(|p| p.id), Some(2));
        assert!(select_period(&[], d("2026-01-01")).is_none());
    }
}
