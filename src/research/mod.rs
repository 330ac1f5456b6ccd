//! Anonymized research exports of the activity log.
//!
//! Three exports share one row shape:
//! - the batch export, partitioned by period, tenant and user, plus a master file;
//! - the single-user export written when a user goes offline or leaves;
//! - the ad-hoc full-log export an admin downloads.

pub mod anonymize;
pub mod csv;

pub use anonymize::anonymize;

use self::csv::{meta_field, write_csv};
use crate::db::activity::SurveyCompletions;
use crate::db::{Database, date_start_ms, ms_to_datetime};
use crate::types::{ActivityLog, EventType, PresentationPeriod, Tenant, TenantId, UserId};
use anyhow::Result;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const BATCH_HEADERS: &[&str] = &[
    "anonymous_user_id",
    "group_code",
    "session_id",
    "event_type",
    "task_id",
    "word_count",
    "char_count",
    "hour_of_day",
    "day_of_week",
    "timestamp",
    "survey_completed_at",
];

pub const USER_HEADERS: &[&str] = &[
    "anonymous_user_id",
    "group_code",
    "session_id",
    "event_type",
    "task_id",
    "word_count",
    "char_count",
    "hour_of_day",
    "day_of_week",
    "timestamp",
    "survey_completed_at",
    "is_suspicious",
];

pub const ACTIVITY_HEADERS: &[&str] = &[
    "session_id",
    "event_type",
    "group_code",
    "task_id",
    "word_count",
    "char_count",
    "hour_of_day",
    "day_of_week",
    "created_at",
    "anonymous_user_id",
    "survey_suspicious_count",
    "survey_avg_response_ms",
];

/// Group code for users without a tenant.
pub const NO_GROUP: &str = "N/A";

pub const MASTER_FILE: &str = "MASTER_all_groups.csv";
pub const COMBINED_FILE: &str = "ALL_combined.csv";

fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// `1` / `0` for a boolean `is_suspicious` in metadata, empty otherwise.
fn suspicious_flag(log: &ActivityLog) -> String {
    match log.metadata.get("is_suspicious").and_then(|v| v.as_bool()) {
        Some(true) => "1".to_string(),
        Some(false) => "0".to_string(),
        None => String::new(),
    }
}

/// One batch-schema row. `completions` is computed once per export.
pub fn format_row(log: &ActivityLog, group_code: &str, completions: &SurveyCompletions) -> Vec<String> {
    let at = ms_to_datetime(log.created_at);
    let anon = log.user_id.map(anonymize).unwrap_or_default();
    let survey_completed_at = log
        .user_id
        .and_then(|uid| completions.get(&(uid, log.session_id.clone())))
        .map(|ms| iso_timestamp(ms_to_datetime(*ms)))
        .unwrap_or_default();

    vec![
        anon,
        group_code.to_string(),
        log.session_id.clone(),
        log.event_type.as_str().to_string(),
        meta_field(&log.metadata, "task_id"),
        meta_field(&log.metadata, "word_count"),
        meta_field(&log.metadata, "char_count"),
        at.hour().to_string(),
        at.format("%A").to_string(),
        iso_timestamp(at),
        survey_completed_at,
    ]
}

/// Batch row plus `is_suspicious`, filled only on `survey_completed` rows.
pub fn format_user_row(
    log: &ActivityLog,
    group_code: &str,
    completions: &SurveyCompletions,
) -> Vec<String> {
    let mut row = format_row(log, group_code, completions);
    let flag = if log.event_type == EventType::SurveyCompleted {
        suspicious_flag(log)
    } else {
        String::new()
    };
    row.push(flag);
    row
}

fn format_activity_row(log: &ActivityLog, group_code: &str) -> Vec<String> {
    let at = ms_to_datetime(log.created_at);
    vec![
        log.session_id.clone(),
        log.event_type.as_str().to_string(),
        group_code.to_string(),
        meta_field(&log.metadata, "task_id"),
        meta_field(&log.metadata, "word_count"),
        meta_field(&log.metadata, "char_count"),
        at.hour().to_string(),
        at.format("%A").to_string(),
        iso_timestamp(at),
        log.user_id.map(anonymize).unwrap_or_default(),
        suspicious_flag(log),
        meta_field(&log.metadata, "avg_response_ms"),
    ]
}

/// Keep names usable as a single path component.
fn path_component(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

/// `<name>_<MonYY>` of the period start, e.g. `Spring_Mar25`.
pub fn period_folder_name(period: &PresentationPeriod) -> String {
    format!(
        "{}_{}",
        path_component(&period.name),
        period.start_date.format("%b%y")
    )
}

/// Counts from one batch export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub periods: usize,
    pub user_files: usize,
    pub combined_files: usize,
    pub master_rows: usize,
    pub master_path: PathBuf,
}

/// Output of the ad-hoc full-log export.
#[derive(Debug, Clone)]
pub struct ActivityExport {
    pub path: PathBuf,
    pub csv: String,
}

#[derive(Clone)]
pub struct ResearchExporter {
    db: Database,
    root: PathBuf,
    /// Period dates are local calendar days at this offset.
    offset: FixedOffset,
}

impl ResearchExporter {
    pub fn new(db: Database, root: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            db,
            root: root.into(),
            offset,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_of(&self, cache: &mut HashMap<UserId, Option<TenantId>>, user_id: UserId) -> Result<Option<TenantId>> {
        if let Some(t) = cache.get(&user_id) {
            return Ok(*t);
        }
        let tenant = self.db.get_profile(user_id)?.and_then(|p| p.tenant_id);
        cache.insert(user_id, tenant);
        Ok(tenant)
    }

    /// Rewrite every period's per-user and combined files and the master file.
    pub fn run_batch(&self) -> Result<BatchSummary> {
        let completions = self.db.survey_completions(None)?;
        let tenants: HashMap<TenantId, Tenant> = self
            .db
            .list_tenants()?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        let mut all_tenant_ids: Vec<TenantId> = tenants.keys().copied().collect();
        all_tenant_ids.sort_unstable();

        let mut user_tenants: HashMap<UserId, Option<TenantId>> = HashMap::new();
        let mut summary = BatchSummary::default();
        let mut master_rows: Vec<Vec<String>> = Vec::new();

        let periods = self.db.list_periods()?;
        for period in &periods {
            let start = date_start_ms(period.start_date, self.offset);
            let end = date_start_ms(
                period.end_date.succ_opt().unwrap_or(period.end_date),
                self.offset,
            );
            let logs = self.db.activity_between(start, end)?;

            let mut tenant_ids = self.db.tenant_ids_for_period(period.id)?;
            if tenant_ids.is_empty() {
                tenant_ids = all_tenant_ids.clone();
            }

            // tenant -> anon user -> rows
            let mut partitions: BTreeMap<TenantId, BTreeMap<String, Vec<Vec<String>>>> =
                BTreeMap::new();
            for log in &logs {
                let Some(user_id) = log.user_id else {
                    continue;
                };
                let Some(tenant_id) = self.tenant_of(&mut user_tenants, user_id)? else {
                    continue;
                };
                if !tenant_ids.contains(&tenant_id) {
                    continue;
                }
                let Some(tenant) = tenants.get(&tenant_id) else {
                    continue;
                };
                partitions
                    .entry(tenant_id)
                    .or_default()
                    .entry(anonymize(user_id))
                    .or_default()
                    .push(format_row(log, &tenant.code, &completions));
            }

            let period_dir = self.root.join(period_folder_name(period));
            for (tenant_id, users) in partitions {
                let Some(tenant) = tenants.get(&tenant_id) else {
                    continue;
                };
                let tenant_dir = period_dir.join(path_component(&tenant.code));
                let mut combined = Vec::new();
                for (anon, rows) in users {
                    write_csv(
                        &tenant_dir.join(format!("user_{}.csv", anon)),
                        BATCH_HEADERS,
                        &rows,
                    )?;
                    summary.user_files += 1;
                    combined.extend(rows);
                }
                write_csv(&tenant_dir.join(COMBINED_FILE), BATCH_HEADERS, &combined)?;
                summary.combined_files += 1;
                master_rows.extend(combined);
            }

            debug!(period = %period.name, logs = logs.len(), "period exported");
        }

        let master_path = self.root.join(MASTER_FILE);
        write_csv(&master_path, BATCH_HEADERS, &master_rows)?;

        summary.periods = periods.len();
        summary.master_rows = master_rows.len();
        summary.master_path = master_path;
        info!(
            periods = summary.periods,
            user_files = summary.user_files,
            master_rows = summary.master_rows,
            "research export completed"
        );
        Ok(summary)
    }

    /// Write the user's whole history to `<root>/<group_code>/<anon>.csv`.
    pub fn export_user(&self, user_id: UserId) -> Result<PathBuf> {
        let group_code = match self.db.get_profile(user_id)?.and_then(|p| p.tenant_id) {
            Some(tenant_id) => self
                .db
                .get_tenant(tenant_id)?
                .map(|t| t.code)
                .unwrap_or_else(|| NO_GROUP.to_string()),
            None => NO_GROUP.to_string(),
        };

        let completions = self.db.survey_completions(Some(user_id))?;
        let rows: Vec<Vec<String>> = self
            .db
            .user_activity(user_id)?
            .iter()
            .map(|log| format_user_row(log, &group_code, &completions))
            .collect();

        let path = self
            .root
            .join(path_component(&group_code))
            .join(format!("{}.csv", anonymize(user_id)));
        write_csv(&path, USER_HEADERS, &rows)?;
        debug!(user_id, rows = rows.len(), path = %path.display(), "user export written");
        Ok(path)
    }

    /// Full log, newest first, saved as `export_<YYYY-MM-DD_HH-MM>.csv`.
    pub fn export_activity_log(&self, now: DateTime<Utc>) -> Result<ActivityExport> {
        let mut group_codes: HashMap<UserId, String> = HashMap::new();
        let mut rows = Vec::new();
        for log in self.db.all_activity()? {
            let group_code = match log.user_id {
                Some(user_id) => match group_codes.get(&user_id) {
                    Some(code) => code.clone(),
                    None => {
                        let code = match self.db.get_profile(user_id)?.and_then(|p| p.tenant_id) {
                            Some(tenant_id) => self
                                .db
                                .get_tenant(tenant_id)?
                                .map(|t| t.code)
                                .unwrap_or_else(|| NO_GROUP.to_string()),
                            None => NO_GROUP.to_string(),
                        };
                        group_codes.insert(user_id, code.clone());
                        code
                    }
                },
                None => NO_GROUP.to_string(),
            };
            rows.push(format_activity_row(&log, &group_code));
        }

        let path = self
            .root
            .join(format!("export_{}.csv", now.format("%Y-%m-%d_%H-%M")));
        write_csv(&path, ACTIVITY_HEADERS, &rows)?;
        Ok(ActivityExport {
            path,
            csv: csv::render(ACTIVITY_HEADERS, &rows),
        })
    }
}
