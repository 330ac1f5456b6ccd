//! Survey questions and responses.

use super::{Database, now_ms};
use crate::error::ServiceError;
use crate::types::{PeriodId, SurveyQuestion, SurveyResponse, UserId};
use anyhow::Result;
use rusqlite::{Row, params};

/// A validated response ready for insertion.
#[derive(Debug, Clone)]
pub struct NewSurveyResponse {
    pub question_id: i64,
    pub answer: i32,
    pub time_on_question_ms: i64,
    pub is_suspicious: bool,
}

fn parse_question_row(row: &Row) -> rusqlite::Result<SurveyQuestion> {
    Ok(SurveyQuestion {
        id: row.get("id")?,
        text: row.get("text")?,
        order: row.get("question_order")?,
        is_active: row.get("is_active")?,
    })
}

fn parse_response_row(row: &Row) -> rusqlite::Result<SurveyResponse> {
    Ok(SurveyResponse {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        question_id: row.get("question_id")?,
        answer: row.get("answer")?,
        time_on_question_ms: row.get("time_on_question_ms")?,
        is_suspicious: row.get("is_suspicious")?,
        session_id: row.get("session_id")?,
        period_id: row.get("period_id")?,
        created_at: row.get("created_at")?,
    })
}

impl Database {
    pub fn create_question(&self, text: &str, order: i32, is_active: bool) -> Result<SurveyQuestion> {
        if text.trim().is_empty() {
            return Err(ServiceError::missing_field("text").into());
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO survey_questions (text, question_order, is_active) VALUES (?1, ?2, ?3)",
                params![text, order, is_active],
            )?;
            Ok(SurveyQuestion {
                id: conn.last_insert_rowid(),
                text: text.to_string(),
                order,
                is_active,
            })
        })
    }

    /// Active questions in display order.
    pub fn active_questions(&self) -> Result<Vec<SurveyQuestion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM survey_questions WHERE is_active = 1 ORDER BY question_order, id",
            )?;
            let questions = stmt
                .query_map([], parse_question_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(questions)
        })
    }

    /// Every question, active or not.
    pub fn all_questions(&self) -> Result<Vec<SurveyQuestion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM survey_questions ORDER BY question_order, id")?;
            let questions = stmt
                .query_map([], parse_question_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(questions)
        })
    }

    /// Insert a whole submission in one transaction.
    pub fn insert_survey_responses(
        &self,
        user_id: UserId,
        session_id: &str,
        period_id: Option<PeriodId>,
        responses: &[NewSurveyResponse],
    ) -> Result<usize> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO survey_responses (
                        user_id, question_id, answer, time_on_question_ms, is_suspicious,
                        session_id, period_id, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for r in responses {
                    stmt.execute(params![
                        user_id,
                        r.question_id,
                        r.answer,
                        r.time_on_question_ms,
                        r.is_suspicious,
                        session_id,
                        period_id,
                        now,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(responses.len())
        })
    }

    pub fn list_survey_responses(&self, user_id: UserId) -> Result<Vec<SurveyResponse>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM survey_responses WHERE user_id = ?1 ORDER BY created_at, id",
            )?;
            let responses = stmt
                .query_map(params![user_id], parse_response_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(responses)
        })
    }
}
