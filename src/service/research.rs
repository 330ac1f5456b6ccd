//! Surveys, client interaction logging, onboarding stages and exports.

use super::TaskDesk;
use crate::db::surveys::NewSurveyResponse;
use crate::error::{ServiceError, ServiceResult};
use crate::research::{ActivityExport, BatchSummary};
use crate::types::{
    EventType, StageView, SurveyAnswer, SurveyQuestion, SurveyResponse, TaskId, UserId,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;

/// Result of a survey submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SurveySubmission {
    pub saved: usize,
    pub suspicious_count: usize,
}

/// Answered faster than `ms_per_char` per character of the question.
pub fn is_suspicious(question_text: &str, time_ms: i64, ms_per_char: i64) -> bool {
    let threshold = (question_text.chars().count() as i64).saturating_mul(ms_per_char);
    time_ms < threshold
}

impl TaskDesk {
    pub fn survey_questions(&self) -> ServiceResult<Vec<SurveyQuestion>> {
        Ok(self.db.active_questions()?)
    }

    /// Store a survey submission and log `survey_completed`.
    ///
    /// Answers to unknown questions are skipped. Any answer outside 1..=5
    /// rejects the whole submission.
    pub fn submit_survey(
        &self,
        user_id: UserId,
        session_id: &str,
        answers: &[SurveyAnswer],
    ) -> ServiceResult<SurveySubmission> {
        if answers.is_empty() {
            return Err(ServiceError::missing_field("responses"));
        }
        self.require_user(user_id)?;

        let questions: HashMap<i64, SurveyQuestion> = self
            .db
            .all_questions()?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();
        let ms_per_char = self.config.survey.ms_per_char;

        let mut responses = Vec::new();
        for answer in answers {
            let Some(question) = questions.get(&answer.question_id) else {
                continue;
            };
            if !(1..=5).contains(&answer.answer) {
                return Err(ServiceError::invalid_value(
                    "answer",
                    "answer must be between 1 and 5",
                ));
            }
            if answer.time_on_question_ms < 0 {
                return Err(ServiceError::invalid_value(
                    "time_on_question_ms",
                    "time must not be negative",
                ));
            }
            responses.push(NewSurveyResponse {
                question_id: question.id,
                answer: answer.answer,
                time_on_question_ms: answer.time_on_question_ms,
                is_suspicious: is_suspicious(&question.text, answer.time_on_question_ms, ms_per_char),
            });
        }

        if responses.is_empty() {
            return Err(ServiceError::invalid_value(
                "responses",
                "No valid answers were found",
            ));
        }

        let period_id = self
            .db
            .period_covering(self.today())?
            .map(|p| p.id);
        let saved = self
            .db
            .insert_survey_responses(user_id, session_id, period_id, &responses)?;

        let suspicious_count = responses.iter().filter(|r| r.is_suspicious).count();
        let total_ms = responses
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.time_on_question_ms));
        self.events.log(
            Some(user_id),
            session_id,
            EventType::SurveyCompleted,
            json!({
                "question_count": saved,
                "is_suspicious": suspicious_count > 0,
                "avg_response_ms": total_ms as f64 / saved as f64,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );

        Ok(SurveySubmission {
            saved,
            suspicious_count,
        })
    }

    pub fn list_survey_responses(&self, user_id: UserId) -> ServiceResult<Vec<SurveyResponse>> {
        Ok(self.db.list_survey_responses(user_id)?)
    }

    /// Record a client-side interaction event.
    pub fn log_interaction(
        &self,
        user_id: UserId,
        session_id: &str,
        event_type: &str,
        metadata: Value,
    ) -> ServiceResult<()> {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(ServiceError::missing_field("event_type"));
        }
        if !(metadata.is_object() || metadata.is_null()) {
            return Err(ServiceError::invalid_value("metadata", "must be a JSON object"));
        }
        self.events
            .log(Some(user_id), session_id, EventType::parse(event_type), metadata);
        Ok(())
    }

    pub fn my_stages(&self, user_id: UserId) -> ServiceResult<Vec<StageView>> {
        Ok(self.pipeline.my_stages(user_id)?)
    }

    pub fn complete_stage(
        &self,
        user_id: UserId,
        task_id: TaskId,
        session_id: &str,
    ) -> ServiceResult<Vec<StageView>> {
        self.pipeline.complete_stage(user_id, task_id, session_id)
    }

    /// Run the batch export now.
    pub fn run_research_export(&self) -> ServiceResult<BatchSummary> {
        Ok(self.exporter.run_batch()?)
    }

    pub fn export_user(&self, user_id: UserId) -> ServiceResult<PathBuf> {
        self.require_user(user_id)?;
        Ok(self.exporter.export_user(user_id)?)
    }

    /// Admin download of the whole activity log.
    pub fn export_activity_log(&self, admin_id: UserId) -> ServiceResult<ActivityExport> {
        self.require_superuser(admin_id)?;
        Ok(self.exporter.export_activity_log(Utc::now())?)
    }
}
