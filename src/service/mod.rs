//! API-facing operations.
//!
//! Each operation validates and authorizes, mutates the store, then logs the
//! research event and fans out notifications. Side-channel failures after the
//! mutation are logged and never change the result.

pub mod accounts;
pub mod collab;
pub mod research;
pub mod tasks;

use crate::blob::{BlobStore, FsBlobStore};
use crate::config::Config;
use crate::db::{Database, local_date};
use crate::deadlines::DeadlineSweeper;
use crate::error::{ServiceError, ServiceResult};
use crate::events::EventLogger;
use crate::notify::Notifier;
use crate::pipeline::PipelineEngine;
use crate::research::ResearchExporter;
use crate::types::{Task, TaskId, User, UserId};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

/// Shared handle to every engine, cheap to clone.
#[derive(Clone)]
pub struct TaskDesk {
    pub db: Database,
    pub config: Arc<Config>,
    pub events: EventLogger,
    pub notifier: Notifier,
    pub sweeper: DeadlineSweeper,
    pub pipeline: PipelineEngine,
    pub exporter: ResearchExporter,
    pub blobs: Arc<dyn BlobStore>,
}

impl TaskDesk {
    pub fn new(db: Database, config: Config, blobs: Arc<dyn BlobStore>) -> Self {
        let events = EventLogger::new(db.clone());
        Self {
            notifier: Notifier::new(db.clone()),
            sweeper: DeadlineSweeper::new(db.clone(), config.warning_window_ms()),
            pipeline: PipelineEngine::new(db.clone(), events.clone()),
            exporter: ResearchExporter::new(
                db.clone(),
                config.export.dir.clone(),
                config.utc_offset(),
            ),
            events,
            db,
            config: Arc::new(config),
            blobs,
        }
    }

    /// Open the configured database and media directory.
    pub fn open(config: Config) -> Result<Self> {
        config.ensure_db_dir()?;
        let db = Database::open(&config.server.db_path)?;
        let blobs = Arc::new(FsBlobStore::new(config.server.media_dir.clone()));
        Ok(Self::new(db, config, blobs))
    }

    /// Today in the configured local calendar.
    pub fn today(&self) -> NaiveDate {
        local_date(Utc::now(), self.config.utc_offset())
    }

    fn require_user(&self, user_id: UserId) -> ServiceResult<User> {
        self.db
            .get_user(user_id)?
            .ok_or_else(|| ServiceError::user_not_found(user_id))
    }

    fn require_superuser(&self, user_id: UserId) -> ServiceResult<User> {
        let user = self.require_user(user_id)?;
        if !user.is_superuser {
            return Err(ServiceError::forbidden("Administrator rights required"));
        }
        Ok(user)
    }

    fn require_task(&self, task_id: TaskId) -> ServiceResult<Task> {
        self.db
            .get_task(task_id)?
            .ok_or_else(|| ServiceError::task_not_found(task_id))
    }

    /// The task, if the user created it or is assigned to it.
    fn accessible_task(&self, task_id: TaskId, user_id: UserId) -> ServiceResult<Task> {
        let task = self.require_task(task_id)?;
        if !self.db.can_access_task(task_id, user_id)? {
            return Err(ServiceError::forbidden("You are not part of this task"));
        }
        Ok(task)
    }
}
