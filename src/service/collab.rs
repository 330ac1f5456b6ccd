//! Comments and the notification inbox.

use super::TaskDesk;
use crate::error::ServiceResult;
use crate::events::text_metrics;
use crate::types::{Comment, EventType, Notification, Outcome, TaskId, UserId};
use serde_json::json;

impl TaskDesk {
    /// Post a comment, log `comment_sent` and notify everyone else on the task.
    pub fn post_comment(
        &self,
        task_id: TaskId,
        user_id: UserId,
        content: &str,
        session_id: &str,
    ) -> ServiceResult<Comment> {
        let task = self.accessible_task(task_id, user_id)?;
        let comment = self.db.insert_comment(task_id, user_id, content)?;

        let (word_count, char_count) = text_metrics(content);
        self.events.log(
            Some(user_id),
            session_id,
            EventType::CommentSent,
            json!({
                "task_id": task_id,
                "word_count": word_count,
                "char_count": char_count,
            }),
        );
        self.notifier.comment_posted(&task, user_id);

        Ok(comment)
    }

    pub fn list_comments(&self, task_id: TaskId, user_id: UserId) -> ServiceResult<Vec<Comment>> {
        self.accessible_task(task_id, user_id)?;
        Ok(self.db.list_comments(task_id)?)
    }

    pub fn list_notifications(&self, user_id: UserId) -> ServiceResult<Vec<Notification>> {
        Ok(self.db.list_notifications(user_id)?)
    }

    pub fn mark_notification_read(
        &self,
        user_id: UserId,
        notification_id: i64,
    ) -> ServiceResult<Outcome> {
        Ok(self.db.mark_notification_read(user_id, notification_id)?)
    }

    pub fn mark_all_notifications_read(&self, user_id: UserId) -> ServiceResult<usize> {
        Ok(self.db.mark_all_notifications_read(user_id)?)
    }

    pub fn clear_notifications(&self, user_id: UserId) -> ServiceResult<usize> {
        Ok(self.db.clear_notifications(user_id)?)
    }
}
