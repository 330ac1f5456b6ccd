//! Notification fan-out.
//!
//! Recipient sets are pure functions of the task's people and the actor; the
//! `Notifier` then filters each recipient through their preferences and writes
//! one row per recipient. Nothing here ever fails the caller.

use crate::db::Database;
use crate::db::notifications::NewNotification;
use crate::preferences::NotificationGate;
use crate::types::{NotificationKind, Task, TaskPriority, UserId};
use tracing::{debug, warn};

/// Everyone except `actor`, deduplicated, in first-seen order.
fn without_actor(people: impl IntoIterator<Item = UserId>, actor: UserId) -> Vec<UserId> {
    let mut out = Vec::new();
    for id in people {
        if id != actor && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Assignees of a new task, minus the creator.
pub fn task_created_recipients(creator: UserId, assignees: &[UserId]) -> Vec<UserId> {
    without_actor(assignees.iter().copied(), creator)
}

/// Assignees plus creator, minus the actor.
pub fn involved_recipients(creator: UserId, assignees: &[UserId], actor: UserId) -> Vec<UserId> {
    without_actor(assignees.iter().copied().chain([creator]), actor)
}

/// The creator uploading notifies the assignees; anyone else notifies the creator.
pub fn file_upload_recipients(creator: UserId, assignees: &[UserId], actor: UserId) -> Vec<UserId> {
    if actor == creator {
        without_actor(assignees.iter().copied(), actor)
    } else {
        vec![creator]
    }
}

/// The creator, unless they completed their own share.
pub fn completion_recipients(creator: UserId, actor: UserId) -> Vec<UserId> {
    if actor == creator {
        Vec::new()
    } else {
        vec![creator]
    }
}

#[derive(Clone)]
pub struct Notifier {
    db: Database,
}

impl Notifier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write one notification per recipient whose preferences allow `gate`.
    /// Returns how many were written.
    fn deliver(
        &self,
        recipients: &[UserId],
        gate: NotificationGate,
        task: &Task,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> usize {
        let mut sent = 0;
        for &user_id in recipients {
            let allowed = match self.db.notification_preferences(user_id) {
                Ok(prefs) => prefs.allows(gate),
                Err(e) => {
                    warn!(user_id, error = %e, "could not read notification preferences");
                    continue;
                }
            };
            if !allowed {
                debug!(user_id, kind = kind.as_str(), "notification muted by preferences");
                continue;
            }

            let notification = NewNotification {
                user_id,
                task_id: Some(task.id),
                title: title.to_string(),
                message: message.to_string(),
                kind,
            };
            match self.db.insert_notification(&notification) {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(user_id, task_id = task.id, error = %e, "failed to write notification")
                }
            }
        }
        sent
    }

    fn display_name(&self, user_id: UserId) -> String {
        let user = match self.db.get_user(user_id) {
            Ok(Some(user)) => user,
            _ => return format!("User {}", user_id),
        };
        let gender = self
            .db
            .get_profile(user_id)
            .ok()
            .flatten()
            .and_then(|p| p.gender);
        user.display_name(gender.as_deref())
    }

    fn assignee_ids(&self, task: &Task) -> Vec<UserId> {
        match self.db.get_assignments(task.id) {
            Ok(assignments) => assignments.into_iter().map(|a| a.user_id).collect(),
            Err(e) => {
                warn!(task_id = task.id, error = %e, "could not list assignees");
                Vec::new()
            }
        }
    }

    pub fn task_created(&self, task: &Task, assignees: &[UserId]) -> usize {
        let recipients = task_created_recipients(task.created_by, assignees);
        let message = format!(
            "{} assigned you the task '{}'.",
            self.display_name(task.created_by),
            task.title
        );
        self.deliver(
            &recipients,
            NotificationGate::Assignment,
            task,
            NotificationKind::Assignment,
            "New Task",
            &message,
        )
    }

    pub fn priority_changed(&self, task: &Task, actor: UserId, priority: TaskPriority) -> usize {
        let recipients = involved_recipients(task.created_by, &self.assignee_ids(task), actor);
        let message = format!(
            "Priority of '{}' is now '{}'.",
            task.title,
            priority.as_str()
        );
        self.deliver(
            &recipients,
            NotificationGate::Always,
            task,
            NotificationKind::PriorityChanged,
            "Priority Changed",
            &message,
        )
    }

    pub fn file_uploaded(&self, task: &Task, actor: UserId) -> usize {
        let recipients = file_upload_recipients(task.created_by, &self.assignee_ids(task), actor);
        let message = format!(
            "{} added a new file to '{}'.",
            self.display_name(actor),
            task.title
        );
        self.deliver(
            &recipients,
            NotificationGate::FileUpload,
            task,
            NotificationKind::FileUploaded,
            "File Added",
            &message,
        )
    }

    pub fn comment_posted(&self, task: &Task, actor: UserId) -> usize {
        let recipients = involved_recipients(task.created_by, &self.assignee_ids(task), actor);
        let message = format!("{} commented on '{}'.", self.display_name(actor), task.title);
        self.deliver(
            &recipients,
            NotificationGate::Comments,
            task,
            NotificationKind::NewComment,
            "New Comment",
            &message,
        )
    }

    /// Notify the creator of a completed share, and of the whole task when
    /// `all_done_now` marks the all-complete transition.
    pub fn assignment_completed(&self, task: &Task, actor: UserId, all_done_now: bool) -> usize {
        let recipients = completion_recipients(task.created_by, actor);
        if recipients.is_empty() {
            return 0;
        }

        let message = format!(
            "{} finished their part of '{}'.",
            self.display_name(actor),
            task.title
        );
        let mut sent = self.deliver(
            &recipients,
            NotificationGate::TaskComplete,
            task,
            NotificationKind::TaskCompleted,
            "Part Completed",
            &message,
        );

        if all_done_now {
            let message = format!(
                "'{}' was completed by the whole team. You can archive it.",
                task.title
            );
            sent += self.deliver(
                &recipients,
                NotificationGate::TaskComplete,
                task,
                NotificationKind::AllCompleted,
                "Task Ready",
                &message,
            );
        }
        sent
    }
}
