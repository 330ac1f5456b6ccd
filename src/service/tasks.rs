//! Task, assignment, attachment and dependency operations.

use super::TaskDesk;
use crate::db::now_ms;
use crate::db::tasks::{Completion, CreatedTask, NewTask};
use crate::deadlines::SweepReport;
use crate::error::{ServiceError, ServiceResult};
use crate::types::{
    Attachment, AttachmentKind, Dependency, EventType, Outcome, Task, TaskDetail, TaskId,
    TaskNode, TaskPriority, UserId,
};
use serde_json::json;
use tracing::{info, warn};

impl TaskDesk {
    /// Create a task, log `task_created` and notify the assignees.
    pub fn create_task(
        &self,
        creator_id: UserId,
        input: &NewTask,
        session_id: &str,
    ) -> ServiceResult<CreatedTask> {
        let created = self.db.create_task(creator_id, input)?;
        let task = &created.task;

        if !created.skipped_assignee_ids.is_empty() {
            warn!(
                task_id = task.id,
                skipped = ?created.skipped_assignee_ids,
                "unknown assignees skipped"
            );
        }
        info!(task_id = task.id, creator_id, "task created");

        self.events.log(
            Some(creator_id),
            session_id,
            EventType::TaskCreated,
            json!({ "task_id": task.id, "parent_task_id": task.parent_id }),
        );
        self.notifier.task_created(task, &created.assignee_ids);

        Ok(created)
    }

    pub fn list_tasks(&self, user_id: UserId) -> ServiceResult<Vec<Task>> {
        Ok(self.db.list_tasks_for_user(user_id)?)
    }

    pub fn task_detail(&self, task_id: TaskId, user_id: UserId) -> ServiceResult<TaskDetail> {
        self.accessible_task(task_id, user_id)?;
        Ok(self.db.task_detail(task_id, user_id)?)
    }

    /// Complete the caller's share. Notifies the creator, and again when the
    /// whole task just became complete.
    pub fn complete_assignment(
        &self,
        task_id: TaskId,
        user_id: UserId,
        session_id: &str,
    ) -> ServiceResult<Completion> {
        let task = self.require_task(task_id)?;
        let completion = self.db.complete_assignment(task_id, user_id, now_ms())?;
        if completion.outcome == Outcome::Unchanged {
            return Ok(completion);
        }

        self.events.log(
            Some(user_id),
            session_id,
            EventType::TaskCompleted,
            json!({ "task_id": task_id }),
        );
        self.notifier
            .assignment_completed(&task, user_id, completion.all_done_now);
        Ok(completion)
    }

    pub fn update_priority(
        &self,
        task_id: TaskId,
        actor_id: UserId,
        priority: TaskPriority,
    ) -> ServiceResult<Outcome> {
        let task = self.accessible_task(task_id, actor_id)?;
        if task.priority == priority {
            return Ok(Outcome::Unchanged);
        }

        let previous = self.db.update_priority(task_id, priority)?;
        if previous == priority {
            return Ok(Outcome::Unchanged);
        }
        self.notifier.priority_changed(&task, actor_id, priority);
        Ok(Outcome::Applied)
    }

    pub fn mark_task_read(&self, task_id: TaskId, user_id: UserId) -> ServiceResult<Outcome> {
        self.require_task(task_id)?;
        Ok(self.db.mark_assignment_read(task_id, user_id)?)
    }

    /// Creator-only: drop attachments and close the task.
    pub fn archive_task(&self, task_id: TaskId, actor_id: UserId) -> ServiceResult<()> {
        let task = self.require_task(task_id)?;
        if task.created_by != actor_id {
            return Err(ServiceError::forbidden("Only the creator can archive this task"));
        }

        for attachment in self.db.list_attachments(task_id)? {
            if let Err(e) = self.blobs.delete(&attachment.file_path) {
                warn!(task_id, path = %attachment.file_path, error = %e, "failed to delete attachment file");
            }
        }
        let removed = self.db.archive_task_rows(task_id)?;
        info!(task_id, attachments_removed = removed, "task archived");
        Ok(())
    }

    pub fn update_position(
        &self,
        task_id: TaskId,
        user_id: UserId,
        x: f64,
        y: f64,
    ) -> ServiceResult<TaskNode> {
        self.accessible_task(task_id, user_id)?;
        Ok(self.db.upsert_node(task_id, user_id, x, y)?)
    }

    /// Pin or unpin the task on the caller's own canvas.
    pub fn set_pinned(
        &self,
        task_id: TaskId,
        user_id: UserId,
        pinned: bool,
    ) -> ServiceResult<TaskNode> {
        self.accessible_task(task_id, user_id)?;
        self.db.set_node_pinned(task_id, user_id, pinned)?;
        self.db
            .get_node(task_id, user_id)?
            .ok_or_else(|| ServiceError::task_not_found(task_id))
    }

    pub fn upload_attachment(
        &self,
        task_id: TaskId,
        user_id: UserId,
        file_name: &str,
        bytes: &[u8],
        kind: AttachmentKind,
    ) -> ServiceResult<Attachment> {
        if file_name.trim().is_empty() {
            return Err(ServiceError::missing_field("file_name"));
        }
        let task = self.accessible_task(task_id, user_id)?;

        let path = self.blobs.save(file_name, bytes).map_err(ServiceError::internal)?;
        let attachment = match self
            .db
            .add_attachment(task_id, user_id, &path, file_name, kind)
        {
            Ok(attachment) => attachment,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&path) {
                    warn!(path = %path, error = %cleanup, "orphaned attachment file");
                }
                return Err(e.into());
            }
        };

        self.notifier.file_uploaded(&task, user_id);
        Ok(attachment)
    }

    pub fn add_dependency(
        &self,
        actor_id: UserId,
        source: TaskId,
        target: TaskId,
    ) -> ServiceResult<Dependency> {
        self.accessible_task(source, actor_id)?;
        self.accessible_task(target, actor_id)?;
        Ok(self.db.add_dependency(source, target)?)
    }

    pub fn remove_dependency(
        &self,
        actor_id: UserId,
        source: TaskId,
        target: TaskId,
    ) -> ServiceResult<Outcome> {
        self.accessible_task(source, actor_id)?;
        Ok(self.db.remove_dependency(source, target)?)
    }

    pub fn list_dependencies(&self, task_id: TaskId, user_id: UserId) -> ServiceResult<Vec<Dependency>> {
        self.accessible_task(task_id, user_id)?;
        Ok(self.db.list_dependencies(task_id)?)
    }

    /// Run one deadline sweep now.
    pub fn check_deadlines(&self) -> ServiceResult<SweepReport> {
        self.sweeper.sweep()
    }
}
