//! Integration tests for the deadline sweeper.
//!
//! Sweeps are driven with explicit timestamps so the warning window and the
//! expiry boundary can be checked to the minute.

use serde_json::json;
use taskdesk::db::Database;
use taskdesk::db::tasks::NewTask;
use taskdesk::db::users::NewUser;
use taskdesk::deadlines::DeadlineSweeper;
use taskdesk::types::{NotificationKind, TaskId, UserId};
use tempfile::TempDir;

const MINUTE: i64 = 60_000;
const NOW: i64 = 1_735_732_800_000;

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn sweeper(db: &Database) -> DeadlineSweeper {
    DeadlineSweeper::new(db.clone(), 60 * MINUTE)
}

fn active_user(db: &Database, username: &str) -> UserId {
    let mut new_user = NewUser::new(username);
    new_user.first_name = username.to_string();
    new_user.is_active = true;
    db.create_user(&new_user).expect("Failed to create user").id
}

fn task_due(db: &Database, creator: UserId, assignees: Vec<UserId>, due: i64) -> TaskId {
    db.create_task(
        creator,
        &NewTask {
            title: "Quarterly report".to_string(),
            due_date: Some(due),
            assignee_ids: assignees,
            ..Default::default()
        },
    )
    .expect("Failed to create task")
    .task
    .id
}

fn kinds(db: &Database, user_id: UserId) -> Vec<NotificationKind> {
    db.list_notifications(user_id)
        .expect("Failed to list notifications")
        .into_iter()
        .map(|n| n.kind)
        .collect()
}

mod warning_tests {
    use super::*;

    #[test]
    fn task_due_inside_window_is_warned_once() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let worker = active_user(&db, "worker");
        let task_id = task_due(&db, creator, vec![worker], NOW + 59 * MINUTE);

        let report = sweeper(&db).sweep_at(NOW).unwrap();
        assert_eq!(report.warned_tasks, 1);
        assert_eq!(report.warning_notifications, 1);
        assert_eq!(kinds(&db, worker), vec![NotificationKind::DeadlineWarning]);
        assert!(kinds(&db, creator).is_empty());
        assert!(db.get_task(task_id).unwrap().unwrap().warning_sent);

        let again = sweeper(&db).sweep_at(NOW + MINUTE).unwrap();
        assert!(again.is_empty());
        assert_eq!(kinds(&db, worker).len(), 1);
    }

    #[test]
    fn task_due_outside_window_is_not_warned() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let worker = active_user(&db, "worker");
        let task_id = task_due(&db, creator, vec![worker], NOW + 61 * MINUTE);

        let report = sweeper(&db).sweep_at(NOW).unwrap();
        assert!(report.is_empty());
        assert!(kinds(&db, worker).is_empty());
        assert!(!db.get_task(task_id).unwrap().unwrap().warning_sent);
    }

    #[test]
    fn completed_assignees_are_not_warned() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let done = active_user(&db, "done");
        let pending = active_user(&db, "pending");
        let task_id = task_due(&db, creator, vec![done, pending], NOW + 30 * MINUTE);
        db.complete_assignment(task_id, done, NOW).unwrap();

        let report = sweeper(&db).sweep_at(NOW).unwrap();
        assert_eq!(report.warned_tasks, 1);
        assert_eq!(report.warning_notifications, 1);
        assert!(kinds(&db, done).is_empty());
        assert_eq!(kinds(&db, pending), vec![NotificationKind::DeadlineWarning]);
    }

    #[test]
    fn muted_warning_still_marks_task() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let worker = active_user(&db, "worker");
        let patch = json!({ "deadline_warning": false });
        db.update_settings(worker, patch.as_object().cloned(), None)
            .unwrap();
        let task_id = task_due(&db, creator, vec![worker], NOW + 10 * MINUTE);

        let report = sweeper(&db).sweep_at(NOW).unwrap();
        assert_eq!(report.warned_tasks, 1);
        assert_eq!(report.warning_notifications, 0);
        assert!(kinds(&db, worker).is_empty());
        assert!(db.get_task(task_id).unwrap().unwrap().warning_sent);
    }
}

mod expiry_tests {
    use super::*;

    #[test]
    fn overdue_assignment_fails_and_notifies_once() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let worker = active_user(&db, "worker");
        let due = NOW + 59 * MINUTE;
        let task_id = task_due(&db, creator, vec![worker], due);

        sweeper(&db).sweep_at(NOW).unwrap();

        let report = sweeper(&db).sweep_at(due + MINUTE).unwrap();
        assert_eq!(report.failed_assignments, 1);
        assert_eq!(report.expiry_notifications, 1);
        assert_eq!(report.warned_tasks, 0);

        let assignment = db.get_assignment(task_id, worker).unwrap().unwrap();
        assert!(assignment.is_failed);
        assert!(!assignment.is_completed);
        assert_eq!(
            kinds(&db, worker),
            vec![NotificationKind::Deadline, NotificationKind::DeadlineWarning]
        );

        let rerun = sweeper(&db).sweep_at(due + 2 * MINUTE).unwrap();
        assert!(rerun.is_empty());
        assert_eq!(kinds(&db, worker).len(), 2);
    }

    #[test]
    fn completed_assignments_never_fail() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let worker = active_user(&db, "worker");
        let due = NOW - MINUTE;
        let task_id = task_due(&db, creator, vec![worker], due);
        db.complete_assignment(task_id, worker, due - MINUTE).unwrap();

        let report = sweeper(&db).sweep_at(NOW).unwrap();
        assert_eq!(report.failed_assignments, 0);
        assert!(!db.get_assignment(task_id, worker).unwrap().unwrap().is_failed);
    }

    #[test]
    fn muted_expiry_still_fails_assignment() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let worker = active_user(&db, "worker");
        let patch = json!({ "deadline": false });
        db.update_settings(worker, patch.as_object().cloned(), None)
            .unwrap();
        let task_id = task_due(&db, creator, vec![worker], NOW - MINUTE);

        let report = sweeper(&db).sweep_at(NOW).unwrap();
        assert_eq!(report.failed_assignments, 1);
        assert_eq!(report.expiry_notifications, 0);
        assert!(db.get_assignment(task_id, worker).unwrap().unwrap().is_failed);
    }

    #[test]
    fn tasks_without_due_date_are_ignored() {
        let db = setup_db();
        let creator = active_user(&db, "boss");
        let worker = active_user(&db, "worker");
        db.create_task(
            creator,
            &NewTask {
                title: "Open ended".to_string(),
                assignee_ids: vec![worker],
                ..Default::default()
            },
        )
        .unwrap();

        assert!(sweeper(&db).sweep_at(NOW).unwrap().is_empty());
    }
}

mod concurrency_tests {
    use super::*;

    const WORKERS: usize = 3;
    const TASKS_PER_KIND: usize = 4;

    #[test]
    fn concurrent_sweeps_notify_each_assignee_once() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("desk.db");
        let first = Database::open(&path).expect("Failed to open database");
        let second = Database::open(&path).expect("Failed to open second handle");

        let creator = active_user(&first, "boss");
        let workers: Vec<UserId> = (0..WORKERS)
            .map(|i| active_user(&first, &format!("worker{}", i)))
            .collect();
        for _ in 0..TASKS_PER_KIND {
            task_due(&first, creator, workers.clone(), NOW + 30 * MINUTE);
            task_due(&first, creator, workers.clone(), NOW - MINUTE);
        }

        let reports = std::thread::scope(|s| {
            let handles: Vec<_> = [&first, &second, &first, &second]
                .into_iter()
                .map(|db| s.spawn(move || sweeper(db).sweep_at(NOW).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let warned: usize = reports.iter().map(|r| r.warned_tasks).sum();
        let warnings: usize = reports.iter().map(|r| r.warning_notifications).sum();
        let failed: usize = reports.iter().map(|r| r.failed_assignments).sum();
        let expiries: usize = reports.iter().map(|r| r.expiry_notifications).sum();
        assert_eq!(warned, TASKS_PER_KIND);
        assert_eq!(warnings, TASKS_PER_KIND * WORKERS);
        assert_eq!(failed, TASKS_PER_KIND * WORKERS);
        assert_eq!(expiries, TASKS_PER_KIND * WORKERS);

        for &worker in &workers {
            let seen = kinds(&second, worker);
            let warning_count = seen
                .iter()
                .filter(|k| **k == NotificationKind::DeadlineWarning)
                .count();
            let expiry_count = seen
                .iter()
                .filter(|k| **k == NotificationKind::Deadline)
                .count();
            assert_eq!(warning_count, TASKS_PER_KIND);
            assert_eq!(expiry_count, TASKS_PER_KIND);
        }
        assert!(kinds(&first, creator).is_empty());
    }
}
