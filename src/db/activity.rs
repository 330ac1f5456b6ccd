//! Append-only activity log.

use super::{Database, now_ms, parse_json_map};
use crate::types::{ActivityLog, EventType, Outcome, UserId};
use anyhow::Result;
use rusqlite::{Connection, Row, params};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// First `survey_completed` timestamp per (user, session).
pub type SurveyCompletions = HashMap<(UserId, String), i64>;

fn parse_activity_row(row: &Row) -> rusqlite::Result<ActivityLog> {
    let event_type: String = row.get("event_type")?;
    Ok(ActivityLog {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        event_type: EventType::parse(&event_type),
        metadata: parse_json_map(row.get("metadata")?),
        created_at: row.get("created_at")?,
    })
}

fn insert_activity_internal(
    conn: &Connection,
    user_id: Option<UserId>,
    session_id: &str,
    event_type: &EventType,
    metadata: &Map<String, Value>,
    created_at: i64,
) -> Result<ActivityLog> {
    conn.execute(
        "INSERT INTO activity_logs (user_id, session_id, event_type, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            session_id,
            event_type.as_str(),
            serde_json::to_string(metadata)?,
            created_at,
        ],
    )?;
    Ok(ActivityLog {
        id: conn.last_insert_rowid(),
        user_id,
        session_id: session_id.to_string(),
        event_type: event_type.clone(),
        metadata: metadata.clone(),
        created_at,
    })
}

fn query_logs(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ActivityLog>> {
    let mut stmt = conn.prepare(sql)?;
    let logs = stmt
        .query_map(params, parse_activity_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(logs)
}

impl Database {
    pub fn insert_activity(
        &self,
        user_id: Option<UserId>,
        session_id: &str,
        event_type: &EventType,
        metadata: &Map<String, Value>,
    ) -> Result<ActivityLog> {
        self.with_conn(|conn| {
            insert_activity_internal(conn, user_id, session_id, event_type, metadata, now_ms())
        })
    }

    /// Insert with an explicit timestamp.
    pub fn insert_activity_at(
        &self,
        user_id: Option<UserId>,
        session_id: &str,
        event_type: &EventType,
        metadata: &Map<String, Value>,
        created_at: i64,
    ) -> Result<ActivityLog> {
        self.with_conn(|conn| {
            insert_activity_internal(conn, user_id, session_id, event_type, metadata, created_at)
        })
    }

    /// Log `experiment_completed` for the user unless one already exists.
    ///
    /// The existence check and the insert share one IMMEDIATE transaction, so
    /// concurrent callers produce exactly one row.
    pub fn record_experiment_completed(
        &self,
        user_id: UserId,
        session_id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<Outcome> {
        self.with_write_tx(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM activity_logs WHERE user_id = ?1 AND event_type = ?2
                 )",
                params![user_id, EventType::ExperimentCompleted.as_str()],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(Outcome::Unchanged);
            }
            insert_activity_internal(
                tx,
                Some(user_id),
                session_id,
                &EventType::ExperimentCompleted,
                metadata,
                now_ms(),
            )?;
            Ok(Outcome::Applied)
        })
    }

    /// All of a user's events, oldest first.
    pub fn user_activity(&self, user_id: UserId) -> Result<Vec<ActivityLog>> {
        self.with_conn(|conn| {
            query_logs(
                conn,
                "SELECT * FROM activity_logs WHERE user_id = ?1 ORDER BY created_at, id",
                params![user_id],
            )
        })
    }

    /// Events with `start_ms <= created_at < end_ms`, oldest first.
    pub fn activity_between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<ActivityLog>> {
        self.with_conn(|conn| {
            query_logs(
                conn,
                "SELECT * FROM activity_logs
                 WHERE created_at >= ?1 AND created_at < ?2
                 ORDER BY created_at, id",
                params![start_ms, end_ms],
            )
        })
    }

    /// Every event, newest first.
    pub fn all_activity(&self) -> Result<Vec<ActivityLog>> {
        self.with_conn(|conn| {
            query_logs(
                conn,
                "SELECT * FROM activity_logs ORDER BY created_at DESC, id DESC",
                [],
            )
        })
    }

    pub fn count_events(&self, user_id: UserId, event_type: &EventType) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM activity_logs WHERE user_id = ?1 AND event_type = ?2",
                params![user_id, event_type.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Earliest `survey_completed` per (user, session), optionally for one user.
    pub fn survey_completions(&self, user_id: Option<UserId>) -> Result<SurveyCompletions> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, session_id, MIN(created_at) FROM activity_logs
                 WHERE event_type = ?1 AND user_id IS NOT NULL
                 AND (?2 IS NULL OR user_id = ?2)
                 GROUP BY user_id, session_id",
            )?;
            let rows = stmt
                .query_map(
                    params![EventType::SurveyCompleted.as_str(), user_id],
                    |row| {
                        Ok((
                            (row.get::<_, UserId>(0)?, row.get::<_, String>(1)?),
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().collect())
        })
    }
}
