//! Best-effort research event logging.
//!
//! Logging an event never fails the caller: storage errors are reported with
//! `tracing::warn!` and dropped.

use crate::db::Database;
use crate::types::{EventType, UserId};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Session id used when a server-side operation has no client session.
pub const SYSTEM_SESSION: &str = "system";

#[derive(Clone)]
pub struct EventLogger {
    db: Database,
}

impl EventLogger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an event. Returns the new row id, or `None` if the write failed.
    pub fn log(
        &self,
        user_id: Option<UserId>,
        session_id: &str,
        event_type: EventType,
        metadata: Value,
    ) -> Option<i64> {
        let metadata = match metadata {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        match self
            .db
            .insert_activity(user_id, session_id, &event_type, &metadata)
        {
            Ok(log) => {
                debug!(
                    log_id = log.id,
                    user_id,
                    event_type = event_type.as_str(),
                    "activity logged"
                );
                Some(log.id)
            }
            Err(e) => {
                warn!(
                    user_id,
                    event_type = event_type.as_str(),
                    error = %e,
                    "failed to write activity log"
                );
                None
            }
        }
    }
}

/// Whitespace-separated word count and character count of a text.
pub fn text_metrics(text: &str) -> (usize, usize) {
    (text.split_whitespace().count(), text.chars().count())
}
