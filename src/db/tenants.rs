//! Tenant operations.

use super::{Database, now_ms};
use crate::error::ServiceError;
use crate::types::{Tenant, TenantId};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

fn parse_tenant_row(row: &Row) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get("id")?,
        name: row.get("name")?,
        code: row.get("code")?,
        is_kanban: row.get("is_kanban")?,
        created_at: row.get("created_at")?,
    })
}

impl Database {
    /// Create a tenant. The external code must be unique.
    pub fn create_tenant(&self, name: &str, code: &str, is_kanban: bool) -> Result<Tenant> {
        let name = name.trim();
        let code = code.trim();
        if name.is_empty() {
            return Err(ServiceError::missing_field("name").into());
        }
        if code.is_empty() {
            return Err(ServiceError::missing_field("code").into());
        }

        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM tenants WHERE code = ?1)",
                params![code],
                |row| row.get(0),
            )?;
            if exists {
                return Err(ServiceError::already_exists("Tenant code").into());
            }

            let now = now_ms();
            conn.execute(
                "INSERT INTO tenants (name, code, is_kanban, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, code, is_kanban, now],
            )?;

            Ok(Tenant {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                code: code.to_string(),
                is_kanban,
                created_at: now,
            })
        })
    }

    pub fn get_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>> {
        self.with_conn(|conn| {
            let tenant = conn
                .query_row(
                    "SELECT * FROM tenants WHERE id = ?1",
                    params![tenant_id],
                    parse_tenant_row,
                )
                .optional()?;
            Ok(tenant)
        })
    }

    pub fn get_tenant_by_code(&self, code: &str) -> Result<Option<Tenant>> {
        self.with_conn(|conn| {
            let tenant = conn
                .query_row(
                    "SELECT * FROM tenants WHERE code = ?1",
                    params![code.trim()],
                    parse_tenant_row,
                )
                .optional()?;
            Ok(tenant)
        })
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM tenants ORDER BY id")?;
            let tenants = stmt
                .query_map([], parse_tenant_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tenants)
        })
    }
}
