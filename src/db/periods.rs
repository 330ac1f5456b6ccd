//! Presentation period operations.

use super::{Database, parse_date};
use crate::error::ServiceError;
use crate::types::{PeriodId, PresentationPeriod, TenantId};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};

fn parse_period_row(row: &Row) -> rusqlite::Result<PresentationPeriod> {
    let start: String = row.get("start_date")?;
    let end: String = row.get("end_date")?;
    Ok(PresentationPeriod {
        id: row.get("id")?,
        name: row.get("name")?,
        start_date: parse_date(&start)?,
        end_date: parse_date(&end)?,
    })
}

pub(crate) fn periods_for_tenant_internal(
    conn: &Connection,
    tenant_id: TenantId,
) -> Result<Vec<PresentationPeriod>> {
    let mut stmt = conn.prepare(
        "SELECT p.* FROM presentation_periods p
         INNER JOIN period_tenants pt ON pt.period_id = p.id
         WHERE pt.tenant_id = ?1
         ORDER BY p.start_date DESC, p.id DESC",
    )?;
    let periods = stmt
        .query_map(params![tenant_id], parse_period_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(periods)
}

impl Database {
    /// Create a period and link it to the given tenants.
    pub fn create_period(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        tenant_ids: &[TenantId],
    ) -> Result<PresentationPeriod> {
        if name.trim().is_empty() {
            return Err(ServiceError::missing_field("name").into());
        }
        if end_date < start_date {
            return Err(
                ServiceError::invalid_value("end_date", "end_date must not precede start_date")
                    .into(),
            );
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO presentation_periods (name, start_date, end_date) VALUES (?1, ?2, ?3)",
                params![
                    name.trim(),
                    start_date.format("%Y-%m-%d").to_string(),
                    end_date.format("%Y-%m-%d").to_string(),
                ],
            )?;
            let period_id = tx.last_insert_rowid();
            for tenant_id in tenant_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO period_tenants (period_id, tenant_id) VALUES (?1, ?2)",
                    params![period_id, tenant_id],
                )?;
            }
            tx.commit()?;

            Ok(PresentationPeriod {
                id: period_id,
                name: name.trim().to_string(),
                start_date,
                end_date,
            })
        })
    }

    pub fn list_periods(&self) -> Result<Vec<PresentationPeriod>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM presentation_periods ORDER BY start_date, id")?;
            let periods = stmt
                .query_map([], parse_period_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(periods)
        })
    }

    /// Periods the tenant belongs to, most recently started first.
    pub fn periods_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<PresentationPeriod>> {
        self.with_conn(|conn| periods_for_tenant_internal(conn, tenant_id))
    }

    pub fn tenant_ids_for_period(&self, period_id: PeriodId) -> Result<Vec<TenantId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tenant_id FROM period_tenants WHERE period_id = ?1 ORDER BY tenant_id",
            )?;
            let ids = stmt
                .query_map(params![period_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<TenantId>>>()?;
            Ok(ids)
        })
    }

    /// First period (by start date) whose range covers `date`, regardless of tenant.
    pub fn period_covering(&self, date: NaiveDate) -> Result<Option<PresentationPeriod>> {
        let day = date.format("%Y-%m-%d").to_string();
        self.with_conn(|conn| {
            let period = conn
                .query_row(
                    "SELECT * FROM presentation_periods
                     WHERE start_date <= ?1 AND end_date >= ?1
                     ORDER BY start_date, id LIMIT 1",
                    params![day],
                    parse_period_row,
                )
                .optional()?;
            Ok(period)
        })
    }

    /// The tenant's period with the earliest end date on or after `today`.
    pub fn upcoming_period_for_tenant(
        &self,
        tenant_id: TenantId,
        today: NaiveDate,
    ) -> Result<Option<PresentationPeriod>> {
        let periods = self.periods_for_tenant(tenant_id)?;
        Ok(periods
            .into_iter()
            .filter(|p| p.end_date >= today)
            .min_by_key(|p| (p.end_date, p.id)))
    }
}
