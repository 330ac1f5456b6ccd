//! User and profile operations.

use super::{Database, now_ms, parse_json_map};
use crate::error::ServiceError;
use crate::preferences::{NotificationPreferences, merge_settings};
use crate::types::{Profile, TenantId, User, UserId, UserStats, UserStatus};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};

/// Fields for inserting a user and its profile.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub gender: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        is_active: row.get("is_active")?,
        is_superuser: row.get("is_superuser")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_profile_row(row: &Row) -> rusqlite::Result<Profile> {
    let status: String = row.get("current_status")?;
    Ok(Profile {
        user_id: row.get("user_id")?,
        tenant_id: row.get("tenant_id")?,
        department: row.get("department")?,
        rank: row.get("rank")?,
        title: row.get("title")?,
        gender: row.get("gender")?,
        current_status: UserStatus::from_str(&status).unwrap_or(UserStatus::Offline),
        last_activity: row.get("last_activity")?,
        notification_settings: parse_json_map(row.get("notification_settings")?),
        privacy_settings: parse_json_map(row.get("privacy_settings")?),
    })
}

pub(crate) fn get_user_internal(conn: &Connection, user_id: UserId) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT * FROM users WHERE id = ?1",
            params![user_id],
            parse_user_row,
        )
        .optional()?;
    Ok(user)
}

pub(crate) fn get_profile_internal(conn: &Connection, user_id: UserId) -> Result<Option<Profile>> {
    let profile = conn
        .query_row(
            "SELECT * FROM profiles WHERE user_id = ?1",
            params![user_id],
            parse_profile_row,
        )
        .optional()?;
    Ok(profile)
}

/// Preferences for a recipient; a missing profile means all defaults.
pub(crate) fn preferences_internal(
    conn: &Connection,
    user_id: UserId,
) -> Result<NotificationPreferences> {
    Ok(get_profile_internal(conn, user_id)?
        .map(|p| p.notification_preferences())
        .unwrap_or_default())
}

impl Database {
    /// Insert a user together with an empty profile (no tenant yet).
    pub fn create_user(&self, new_user: &NewUser) -> Result<User> {
        let username = new_user.username.trim();
        if username.is_empty() {
            return Err(ServiceError::missing_field("username").into());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                params![username],
                |row| row.get(0),
            )?;
            if exists {
                return Err(ServiceError::already_exists("Username").into());
            }

            let now = now_ms();
            tx.execute(
                "INSERT INTO users (username, first_name, last_name, is_active, is_superuser, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    username,
                    &new_user.first_name,
                    &new_user.last_name,
                    new_user.is_active,
                    new_user.is_superuser,
                    now,
                ],
            )?;
            let user_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO profiles (user_id, title, gender) VALUES (?1, ?2, ?3)",
                params![user_id, &new_user.title, &new_user.gender],
            )?;

            tx.commit()?;

            Ok(User {
                id: user_id,
                username: username.to_string(),
                first_name: new_user.first_name.clone(),
                last_name: new_user.last_name.clone(),
                is_active: new_user.is_active,
                is_superuser: new_user.is_superuser,
                created_at: now,
            })
        })
    }

    pub fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        self.with_conn(|conn| get_user_internal(conn, user_id))
    }

    pub fn get_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        self.with_conn(|conn| get_profile_internal(conn, user_id))
    }

    pub fn notification_preferences(&self, user_id: UserId) -> Result<NotificationPreferences> {
        self.with_conn(|conn| preferences_internal(conn, user_id))
    }

    /// Activate the user and place them in a tenant, atomically.
    pub fn approve_user(&self, user_id: UserId, tenant_id: TenantId) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE users SET is_active = 1 WHERE id = ?1",
                params![user_id],
            )?;
            if updated == 0 {
                return Err(ServiceError::user_not_found(user_id).into());
            }
            tx.execute(
                "INSERT INTO profiles (user_id, tenant_id) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET tenant_id = excluded.tenant_id",
                params![user_id, tenant_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn set_user_active(&self, user_id: UserId, is_active: bool) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET is_active = ?1 WHERE id = ?2",
                params![is_active, user_id],
            )?;
            if updated == 0 {
                return Err(ServiceError::user_not_found(user_id).into());
            }
            Ok(())
        })
    }

    pub fn set_profile_rank(&self, user_id: UserId, rank: i32) -> Result<()> {
        if !(1..=10).contains(&rank) {
            return Err(ServiceError::invalid_value("rank", "rank must be between 1 and 10").into());
        }
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE profiles SET rank = ?1 WHERE user_id = ?2",
                params![rank, user_id],
            )?;
            if updated == 0 {
                return Err(ServiceError::user_not_found(user_id).into());
            }
            Ok(())
        })
    }

    pub fn set_profile_department(&self, user_id: UserId, department: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles SET department = ?1 WHERE user_id = ?2",
                params![department, user_id],
            )?;
            Ok(())
        })
    }

    pub fn set_user_status(&self, user_id: UserId, status: UserStatus) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE profiles SET current_status = ?1 WHERE user_id = ?2",
                params![status.as_str(), user_id],
            )?;
            if updated == 0 {
                return Err(ServiceError::user_not_found(user_id).into());
            }
            Ok(())
        })
    }

    pub fn touch_activity(&self, user_id: UserId, at_ms: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles SET last_activity = ?1 WHERE user_id = ?2",
                params![at_ms, user_id],
            )?;
            Ok(())
        })
    }

    /// Shallow-merge patches into the stored notification and privacy maps.
    pub fn update_settings(
        &self,
        user_id: UserId,
        notification_patch: Option<Map<String, Value>>,
        privacy_patch: Option<Map<String, Value>>,
    ) -> Result<Profile> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut profile = get_profile_internal(&tx, user_id)?
                .ok_or_else(|| ServiceError::user_not_found(user_id))?;

            if let Some(patch) = notification_patch {
                merge_settings(&mut profile.notification_settings, patch);
            }
            if let Some(patch) = privacy_patch {
                merge_settings(&mut profile.privacy_settings, patch);
            }

            tx.execute(
                "UPDATE profiles SET notification_settings = ?1, privacy_settings = ?2
                 WHERE user_id = ?3",
                params![
                    serde_json::to_string(&profile.notification_settings)?,
                    serde_json::to_string(&profile.privacy_settings)?,
                    user_id,
                ],
            )?;
            tx.commit()?;
            Ok(profile)
        })
    }

    /// Users whose profile belongs to the tenant.
    pub fn list_tenant_users(&self, tenant_id: TenantId) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.* FROM users u
                 INNER JOIN profiles p ON p.user_id = u.id
                 WHERE p.tenant_id = ?1
                 ORDER BY u.id",
            )?;
            let users = stmt
                .query_map(params![tenant_id], parse_user_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }

    /// Dashboard counts. Failed counts assignments marked failed by the sweep.
    pub fn user_stats(&self, user_id: UserId) -> Result<UserStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> rusqlite::Result<i64> {
                conn.query_row(sql, params![user_id], |row| row.get(0))
            };
            Ok(UserStats {
                total_created: count("SELECT COUNT(*) FROM tasks WHERE created_by = ?1")?,
                total_assigned: count("SELECT COUNT(*) FROM assignments WHERE user_id = ?1")?,
                total_completed: count(
                    "SELECT COUNT(*) FROM assignments WHERE user_id = ?1 AND is_completed = 1",
                )?,
                total_failed: count(
                    "SELECT COUNT(*) FROM assignments WHERE user_id = ?1 AND is_failed = 1",
                )?,
            })
        })
    }
}
