//! Integration tests for the task lifecycle through the service layer.
//!
//! Covers creation, shared completion, dependencies, comments, attachments
//! and the notification fan-out each of them triggers.

use chrono::NaiveDate;
use std::sync::Arc;
use taskdesk::blob::FsBlobStore;
use taskdesk::config::Config;
use taskdesk::db::tasks::NewTask;
use taskdesk::db::users::NewUser;
use taskdesk::db::{Database, date_start_ms};
use taskdesk::error::ErrorCode;
use taskdesk::service::TaskDesk;
use taskdesk::types::{
    AttachmentKind, EventType, NotificationKind, Outcome, TaskId, TaskPriority, TaskStatus,
    UserId,
};
use tempfile::TempDir;

const SESSION: &str = "sess-1";

/// Helper to create a service over an in-memory database and a temp media dir.
fn setup_desk() -> (TaskDesk, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let mut config = Config::default();
    config.export.dir = dir.path().join("exports");
    config.server.media_dir = dir.path().join("media");
    let blobs = Arc::new(FsBlobStore::new(dir.path().join("media")));
    (TaskDesk::new(db, config, blobs), dir)
}

fn active_user(desk: &TaskDesk, username: &str) -> UserId {
    let mut new_user = NewUser::new(username);
    new_user.first_name = username.to_string();
    new_user.last_name = "Tester".to_string();
    new_user.is_active = true;
    desk.db.create_user(&new_user).expect("Failed to create user").id
}

fn create(desk: &TaskDesk, creator: UserId, title: &str, assignees: Vec<UserId>) -> TaskId {
    desk.create_task(
        creator,
        &NewTask {
            title: title.to_string(),
            assignee_ids: assignees,
            ..Default::default()
        },
        SESSION,
    )
    .expect("Failed to create task")
    .task
    .id
}

fn kinds(desk: &TaskDesk, user_id: UserId) -> Vec<NotificationKind> {
    desk.list_notifications(user_id)
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect()
}

fn due_on(desk: &TaskDesk, creator: UserId, title: &str, y: i32, m: u32, d: u32) -> TaskId {
    let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
    desk.create_task(
        creator,
        &NewTask {
            title: title.to_string(),
            due_date: Some(date_start_ms(date, desk.config.utc_offset())),
            ..Default::default()
        },
        SESSION,
    )
    .unwrap()
    .task
    .id
}

mod create_tests {
    use super::*;

    #[test]
    fn assignees_are_notified_and_creator_is_not() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        let b = active_user(&desk, "bob");

        let created = desk
            .create_task(
                boss,
                &NewTask {
                    title: "Plan offsite".to_string(),
                    assignee_ids: vec![a, b, boss],
                    position_x: 120.0,
                    position_y: 40.0,
                    ..Default::default()
                },
                SESSION,
            )
            .unwrap();

        assert_eq!(created.task.status, TaskStatus::Active);
        assert_eq!(kinds(&desk, a), vec![NotificationKind::Assignment]);
        assert_eq!(kinds(&desk, b), vec![NotificationKind::Assignment]);
        assert!(kinds(&desk, boss).is_empty());

        let node = desk.db.get_node(created.task.id, boss).unwrap().unwrap();
        assert_eq!((node.position_x, node.position_y), (120.0, 40.0));
        let node = desk.db.get_node(created.task.id, a).unwrap().unwrap();
        assert_eq!((node.position_x, node.position_y), (0.0, 0.0));

        assert_eq!(
            desk.db.count_events(boss, &EventType::TaskCreated).unwrap(),
            1
        );
    }

    #[test]
    fn unknown_assignees_are_skipped() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");

        let created = desk
            .create_task(
                boss,
                &NewTask {
                    title: "Inventory".to_string(),
                    assignee_ids: vec![a, 9999],
                    ..Default::default()
                },
                SESSION,
            )
            .unwrap();

        assert_eq!(created.assignee_ids, vec![a]);
        assert_eq!(created.skipped_assignee_ids, vec![9999]);
        assert_eq!(desk.db.get_assignments(created.task.id).unwrap().len(), 1);
    }

    #[test]
    fn assignee_from_another_tenant_is_rejected() {
        let (desk, _dir) = setup_desk();
        let acme = desk.db.create_tenant("Acme", "ACME", false).unwrap();
        let other = desk.db.create_tenant("Other", "OTHER", false).unwrap();
        let boss = active_user(&desk, "boss");
        let colleague = active_user(&desk, "alice");
        let stranger = active_user(&desk, "stranger");
        desk.db.approve_user(boss, acme.id).unwrap();
        desk.db.approve_user(colleague, acme.id).unwrap();
        desk.db.approve_user(stranger, other.id).unwrap();

        let err = desk
            .create_task(
                boss,
                &NewTask {
                    title: "Cross company".to_string(),
                    assignee_ids: vec![colleague, stranger],
                    ..Default::default()
                },
                SESSION,
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert!(desk.list_tasks(boss).unwrap().is_empty());
        assert!(kinds(&desk, colleague).is_empty());
        assert!(kinds(&desk, stranger).is_empty());

        let created = desk
            .create_task(
                boss,
                &NewTask {
                    title: "Same company".to_string(),
                    assignee_ids: vec![colleague],
                    ..Default::default()
                },
                SESSION,
            )
            .unwrap();
        assert_eq!(created.task.tenant_id, Some(acme.id));
        assert_eq!(created.assignee_ids, vec![colleague]);
    }

    #[test]
    fn blank_title_is_rejected() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");

        let err = desk
            .create_task(
                boss,
                &NewTask {
                    title: "   ".to_string(),
                    ..Default::default()
                },
                SESSION,
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRequiredField);
    }

    #[test]
    fn outsiders_cannot_read_task() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let outsider = active_user(&desk, "eve");
        let task_id = create(&desk, boss, "Secret", vec![]);

        let err = desk.task_detail(task_id, outsider).unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert!(desk.list_tasks(outsider).unwrap().is_empty());
    }

    #[test]
    fn pin_is_per_user_and_keeps_position() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let worker = active_user(&desk, "alice");
        let outsider = active_user(&desk, "eve");
        let task_id = create(&desk, boss, "Pinned", vec![worker]);
        desk.update_position(task_id, boss, 120.0, 40.0).unwrap();

        let node = desk.set_pinned(task_id, boss, true).unwrap();
        assert!(node.is_pinned);
        assert_eq!((node.position_x, node.position_y), (120.0, 40.0));
        assert!(!desk.db.get_node(task_id, worker).unwrap().unwrap().is_pinned);

        let node = desk.set_pinned(task_id, boss, false).unwrap();
        assert!(!node.is_pinned);

        let err = desk.set_pinned(task_id, outsider, true).unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert!(desk.db.get_node(task_id, outsider).unwrap().is_none());
    }
}

mod completion_tests {
    use super::*;

    #[test]
    fn all_completed_fires_exactly_once() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        let b = active_user(&desk, "bob");
        let task_id = create(&desk, boss, "Ship it", vec![a, b]);

        let first = desk.complete_assignment(task_id, a, SESSION).unwrap();
        assert_eq!(first.outcome, Outcome::Applied);
        assert!(!first.all_done_now);

        let second = desk.complete_assignment(task_id, b, SESSION).unwrap();
        assert_eq!(second.outcome, Outcome::Applied);
        assert!(second.all_done_now);

        let repeat = desk.complete_assignment(task_id, b, SESSION).unwrap();
        assert_eq!(repeat.outcome, Outcome::Unchanged);
        assert!(!repeat.all_done_now);

        let boss_kinds = kinds(&desk, boss);
        let all_completed = boss_kinds
            .iter()
            .filter(|k| **k == NotificationKind::AllCompleted)
            .count();
        let parts = boss_kinds
            .iter()
            .filter(|k| **k == NotificationKind::TaskCompleted)
            .count();
        assert_eq!(all_completed, 1);
        assert_eq!(parts, 2);
        assert_eq!(desk.db.count_events(b, &EventType::TaskCompleted).unwrap(), 1);
    }

    #[test]
    fn non_assignee_cannot_complete() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        let task_id = create(&desk, boss, "Ship it", vec![a]);

        let err = desk.complete_assignment(task_id, boss, SESSION).unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[test]
    fn muted_completion_notifications_are_not_written() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        desk.update_preferences(boss, Some(serde_json::json!({ "task_complete": false })), None)
            .unwrap();
        let task_id = create(&desk, boss, "Quiet", vec![a]);

        let done = desk.complete_assignment(task_id, a, SESSION).unwrap();
        assert!(done.all_done_now);
        assert!(kinds(&desk, boss).is_empty());
    }

    #[test]
    fn priority_change_notifies_everyone_else() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        let b = active_user(&desk, "bob");
        let task_id = create(&desk, boss, "Fix prod", vec![a, b]);

        let outcome = desk.update_priority(task_id, a, TaskPriority::Urgent).unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert!(kinds(&desk, boss).contains(&NotificationKind::PriorityChanged));
        assert!(kinds(&desk, b).contains(&NotificationKind::PriorityChanged));
        assert!(!kinds(&desk, a).contains(&NotificationKind::PriorityChanged));

        let again = desk.update_priority(task_id, a, TaskPriority::Urgent).unwrap();
        assert_eq!(again, Outcome::Unchanged);
    }

    #[test]
    fn only_creator_archives() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        let task_id = create(&desk, boss, "Wrap up", vec![a]);

        let err = desk.archive_task(task_id, a).unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);

        desk.archive_task(task_id, boss).unwrap();
        let task = desk.db.get_task(task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }
}

mod dependency_tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn later_task_cannot_precede_earlier_task() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let late = due_on(&desk, boss, "Late", 2024, 1, 10);
        let early = due_on(&desk, boss, "Early", 2024, 1, 5);

        let err = desk.add_dependency(boss, late, early).unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyOrder);

        let dep = desk.add_dependency(boss, early, late).unwrap();
        assert_eq!(dep.source_task_id, early);
        assert_eq!(dep.target_task_id, late);
    }

    #[test]
    fn pipeline_tasks_skip_date_check() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let tenant = desk.db.create_tenant("Acme", "ACME", false).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let period = desk.db.create_period("Winter", start, end, &[tenant.id]).unwrap();
        let template = desk.db.create_template(period.id, "Onboarding").unwrap();
        let stage = desk.db.add_stage(template.id, 1, "Intro", None, false).unwrap();
        let ids = desk
            .db
            .create_pipeline_tasks(boss, tenant.id, boss, &[stage])
            .unwrap();
        let pipeline_task = ids[0];
        let due = date_start_ms(
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            desk.config.utc_offset(),
        );
        desk.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE tasks SET due_date = ?1 WHERE id = ?2",
                    params![due, pipeline_task],
                )?;
                Ok(())
            })
            .unwrap();
        let early = due_on(&desk, boss, "Early", 2024, 1, 5);

        let dep = desk.add_dependency(boss, pipeline_task, early).unwrap();
        assert_eq!(dep.source_task_id, pipeline_task);
    }

    #[test]
    fn cycles_and_self_edges_are_rejected() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = create(&desk, boss, "A", vec![]);
        let b = create(&desk, boss, "B", vec![]);
        let c = create(&desk, boss, "C", vec![]);

        desk.add_dependency(boss, a, b).unwrap();
        desk.add_dependency(boss, b, c).unwrap();

        let err = desk.add_dependency(boss, c, a).unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyCycle);

        let err = desk.add_dependency(boss, a, a).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldValue);
    }

    #[test]
    fn duplicate_edge_returns_existing_and_remove_is_idempotent() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = create(&desk, boss, "A", vec![]);
        let b = create(&desk, boss, "B", vec![]);

        let first = desk.add_dependency(boss, a, b).unwrap();
        let second = desk.add_dependency(boss, a, b).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(desk.list_dependencies(a, boss).unwrap().len(), 1);

        assert_eq!(desk.remove_dependency(boss, a, b).unwrap(), Outcome::Applied);
        assert_eq!(desk.remove_dependency(boss, a, b).unwrap(), Outcome::Unchanged);
    }
}

mod collab_tests {
    use super::*;

    #[test]
    fn comment_notifies_others_and_logs_metrics() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        let task_id = create(&desk, boss, "Review", vec![a]);

        desk.post_comment(task_id, a, "looks good to me", SESSION)
            .unwrap();

        assert!(kinds(&desk, boss).contains(&NotificationKind::NewComment));
        assert!(!kinds(&desk, a).contains(&NotificationKind::NewComment));

        let log = desk
            .db
            .user_activity(a)
            .unwrap()
            .into_iter()
            .find(|l| l.event_type == EventType::CommentSent)
            .expect("comment_sent logged");
        assert_eq!(log.metadata["word_count"], 4);
        assert_eq!(log.metadata["char_count"], 16);

        let comments = desk.list_comments(task_id, boss).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].content, "looks good to me");
    }

    #[test]
    fn notification_inbox_read_and_clear() {
        let (desk, _dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        create(&desk, boss, "One", vec![a]);
        create(&desk, boss, "Two", vec![a]);

        let inbox = desk.list_notifications(a).unwrap();
        assert_eq!(inbox.len(), 2);

        let id = inbox[0].id;
        assert_eq!(desk.mark_notification_read(a, id).unwrap(), Outcome::Applied);
        assert_eq!(desk.mark_notification_read(a, id).unwrap(), Outcome::Unchanged);

        let err = desk.mark_notification_read(boss, id).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotificationNotFound);

        assert_eq!(desk.mark_all_notifications_read(a).unwrap(), 1);
        assert_eq!(desk.clear_notifications(a).unwrap(), 2);
        assert!(desk.list_notifications(a).unwrap().is_empty());
    }

    #[test]
    fn attachments_are_stored_and_removed_on_archive() {
        let (desk, dir) = setup_desk();
        let boss = active_user(&desk, "boss");
        let a = active_user(&desk, "alice");
        let task_id = create(&desk, boss, "Deliverable", vec![a]);

        let attachment = desk
            .upload_attachment(task_id, a, "report.pdf", b"%PDF", AttachmentKind::Delivery)
            .unwrap();
        let stored = dir.path().join("media").join(&attachment.file_path);
        assert!(stored.exists());
        assert!(kinds(&desk, boss).contains(&NotificationKind::FileUploaded));

        let detail = desk.task_detail(task_id, boss).unwrap();
        assert_eq!(detail.attachments.len(), 1);
        assert_eq!(detail.attachments[0].file_name, "report.pdf");

        desk.archive_task(task_id, boss).unwrap();
        assert!(!stored.exists());
        assert!(desk.db.list_attachments(task_id).unwrap().is_empty());
    }
}
