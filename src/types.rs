//! Core types for the taskdesk backend.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::preferences::NotificationPreferences;

pub type TenantId = i64;
pub type UserId = i64;
pub type TaskId = i64;
pub type PeriodId = i64;

/// A company boundary. Scopes users and tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// External code users type at login; also the research group code.
    pub code: String,
    pub is_kanban: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: i64,
}

impl User {
    /// Name shown to other users: first name (or username) plus an honorific
    /// derived from the profile's gender.
    pub fn display_name(&self, gender: Option<&str>) -> String {
        let name = if self.first_name.is_empty() {
            &self.username
        } else {
            &self.first_name
        };
        let suffix = match gender {
            Some("male") => "Bey",
            Some("female") => "Hanım",
            _ => "",
        };
        format!("{} {}", name, suffix).trim().to_string()
    }
}

/// Presence status chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Busy,
    Away,
    Offline,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Busy => "busy",
            UserStatus::Away => "away",
            UserStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(UserStatus::Online),
            "busy" => Some(UserStatus::Busy),
            "away" => Some(UserStatus::Away),
            "offline" => Some(UserStatus::Offline),
            _ => None,
        }
    }
}

/// Per-user profile. Exactly one per user, created at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    /// Unset until an admin approves the user into a tenant.
    pub tenant_id: Option<TenantId>,
    pub department: Option<String>,
    /// Seniority, 1 to 10.
    pub rank: i32,
    pub title: Option<String>,
    pub gender: Option<String>,
    pub current_status: UserStatus,
    pub last_activity: Option<i64>,
    pub notification_settings: Map<String, Value>,
    pub privacy_settings: Map<String, Value>,
}

impl Profile {
    pub fn notification_preferences(&self) -> NotificationPreferences {
        NotificationPreferences::from_settings(&self.notification_settings)
    }

    /// Status as seen by teammates: offline when the user said so or has been
    /// idle longer than `idle_timeout_ms`.
    pub fn effective_status(&self, now_ms: i64, idle_timeout_ms: i64) -> UserStatus {
        if self.current_status == UserStatus::Offline {
            return UserStatus::Offline;
        }
        match self.last_activity {
            Some(seen) if now_ms - seen <= idle_timeout_ms => self.current_status,
            _ => UserStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TaskStatus::Active),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "urgent" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub created_by: UserId,
    pub tenant_id: Option<TenantId>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Epoch milliseconds.
    pub due_date: Option<i64>,
    pub parent_id: Option<TaskId>,
    pub is_pipeline_task: bool,
    pub pipeline_stage_id: Option<i64>,
    pub warning_sent: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One user's share of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub is_completed: bool,
    pub completed_at: Option<i64>,
    pub is_read: bool,
    pub is_failed: bool,
}

/// True iff the task has at least one assignment and every one is completed.
pub fn all_done(assignments: &[Assignment]) -> bool {
    !assignments.is_empty() && assignments.iter().all(|a| a.is_completed)
}

/// Per-user canvas position of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: i64,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub position_x: f64,
    pub position_y: f64,
    pub is_pinned: bool,
}

/// Directed edge: the source task precedes the target task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub id: i64,
    pub source_task_id: TaskId,
    pub target_task_id: TaskId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    #[default]
    Instruction,
    Delivery,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Instruction => "instruction",
            AttachmentKind::Delivery => "delivery",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "instruction" => Some(AttachmentKind::Instruction),
            "delivery" => Some(AttachmentKind::Delivery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub task_id: TaskId,
    pub uploaded_by: UserId,
    /// Path returned by the blob store.
    pub file_path: String,
    pub file_name: String,
    pub file_type: AttachmentKind,
    pub created_at: i64,
}

/// Why a notification was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Assignment,
    TaskCompleted,
    AllCompleted,
    FileUploaded,
    PriorityChanged,
    NewComment,
    DeadlineWarning,
    Deadline,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Assignment => "assignment",
            NotificationKind::TaskCompleted => "task_completed",
            NotificationKind::AllCompleted => "all_completed",
            NotificationKind::FileUploaded => "file_uploaded",
            NotificationKind::PriorityChanged => "priority_changed",
            NotificationKind::NewComment => "new_comment",
            NotificationKind::DeadlineWarning => "deadline_warning",
            NotificationKind::Deadline => "deadline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "assignment" => Some(NotificationKind::Assignment),
            "task_completed" => Some(NotificationKind::TaskCompleted),
            "all_completed" => Some(NotificationKind::AllCompleted),
            "file_uploaded" => Some(NotificationKind::FileUploaded),
            "priority_changed" => Some(NotificationKind::PriorityChanged),
            "new_comment" => Some(NotificationKind::NewComment),
            "deadline_warning" => Some(NotificationKind::DeadlineWarning),
            "deadline" => Some(NotificationKind::Deadline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: UserId,
    pub task_id: Option<TaskId>,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: i64,
}

/// Type of an activity log event.
///
/// Server-side events have fixed names; anything else a client reports is kept
/// verbatim in `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskCreated,
    TaskCompleted,
    CommentSent,
    UserApproved,
    ExperimentCompleted,
    SurveyCompleted,
    StageCompleted,
    FinalStageReached,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskCompleted => "task_completed",
            EventType::CommentSent => "comment_sent",
            EventType::UserApproved => "user_approved",
            EventType::ExperimentCompleted => "experiment_completed",
            EventType::SurveyCompleted => "survey_completed",
            EventType::StageCompleted => "stage_completed",
            EventType::FinalStageReached => "final_stage_reached",
            EventType::Custom(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "task_created" => EventType::TaskCreated,
            "task_completed" => EventType::TaskCompleted,
            "comment_sent" => EventType::CommentSent,
            "user_approved" => EventType::UserApproved,
            "experiment_completed" => EventType::ExperimentCompleted,
            "survey_completed" => EventType::SurveyCompleted,
            "stage_completed" => EventType::StageCompleted,
            "final_stage_reached" => EventType::FinalStageReached,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventType::parse(&s))
    }
}

/// An append-only research event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: i64,
    /// Cleared when the user is deleted.
    pub user_id: Option<UserId>,
    /// Client-supplied; not globally unique.
    pub session_id: String,
    pub event_type: EventType,
    pub metadata: Map<String, Value>,
    pub created_at: i64,
}

/// Named date range that scopes exports and onboarding templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationPeriod {
    pub id: PeriodId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl PresentationPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub id: i64,
    pub text: String,
    pub order: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub id: i64,
    pub user_id: UserId,
    pub question_id: i64,
    /// 1 to 5.
    pub answer: i32,
    pub time_on_question_ms: i64,
    pub is_suspicious: bool,
    pub session_id: String,
    pub period_id: Option<PeriodId>,
    pub created_at: i64,
}

/// One answer in a survey submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyAnswer {
    pub question_id: i64,
    pub answer: i32,
    #[serde(default)]
    pub time_on_question_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTemplate {
    pub id: i64,
    pub period_id: PeriodId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: i64,
    pub template_id: i64,
    pub order: i32,
    pub title: String,
    pub description: Option<String>,
    pub is_final: bool,
}

/// One row of a user's onboarding pipeline view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageView {
    pub task_id: TaskId,
    pub stage_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub is_completed: bool,
    pub unlocked: bool,
    pub order: i32,
    pub is_final_stage: bool,
}

/// A task with the pieces a detail screen needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub assignments: Vec<Assignment>,
    pub attachments: Vec<Attachment>,
    /// The requesting user's canvas node, if any.
    pub node: Option<TaskNode>,
}

/// Aggregate counts for a user's dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub total_created: i64,
    pub total_assigned: i64,
    pub total_completed: i64,
    pub total_failed: i64,
}

/// Result status of an idempotent operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The operation changed state.
    Applied,
    /// The state was already what was asked for; nothing was written.
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(is_completed: bool) -> Assignment {
        Assignment {
            id: 1,
            task_id: 1,
            user_id: 1,
            is_completed,
            completed_at: None,
            is_read: false,
            is_failed: false,
        }
    }

    #[test]
    fn all_done_requires_at_least_one_assignment() {
        assert!(!all_done(&[]));
        assert!(all_done(&[assignment(true)]));
        assert!(!all_done(&[assignment(true), assignment(false)]));
    }

    #[test]
    fn event_type_keeps_custom_names() {
        assert_eq!(EventType::parse("stage_completed"), EventType::StageCompleted);
        let custom = EventType::parse("canvas_zoom");
        assert_eq!(custom.as_str(), "canvas_zoom");
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"canvas_zoom\"");
    }

    #[test]
    fn effective_status_goes_offline_when_idle() {
        let profile = Profile {
            user_id: 1,
            tenant_id: None,
            department: None,
            rank: 1,
            title: None,
            gender: None,
            current_status: UserStatus::Busy,
            last_activity: Some(1_000),
            notification_settings: Map::new(),
            privacy_settings: Map::new(),
        };
        assert_eq!(profile.effective_status(20_000, 30_000), UserStatus::Busy);
        assert_eq!(profile.effective_status(40_000, 30_000), UserStatus::Offline);
    }

    #[test]
    fn display_name_uses_honorific() {
        let user = User {
            id: 1,
            username: "ayse".into(),
            first_name: "Ayşe".into(),
            last_name: String::new(),
            is_active: true,
            is_superuser: false,
            created_at: 0,
        };
        assert_eq!(user.display_name(Some("female")), "Ayşe Hanım");
        assert_eq!(user.display_name(None), "Ayşe");
    }
}
