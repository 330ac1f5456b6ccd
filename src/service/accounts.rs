//! Registration, approval, login, presence and account lifecycle.

use super::TaskDesk;
use crate::auth::{Authenticator, LoginSession};
use crate::db::now_ms;
use crate::db::users::NewUser;
use crate::error::{ServiceError, ServiceResult};
use crate::types::{
    EventType, Outcome, PresentationPeriod, Profile, TaskId, TenantId, User, UserId, UserStats,
    UserStatus,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

/// Self-registration request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub gender: Option<String>,
}

/// Result of approving a user.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    /// Onboarding tasks generated by the approval.
    pub pipeline_task_ids: Vec<TaskId>,
}

/// A teammate as shown in the team panel.
#[derive(Debug, Clone, Serialize)]
pub struct TeamMember {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub title: Option<String>,
    pub department: Option<String>,
    pub rank: i32,
    pub status: UserStatus,
    pub is_me: bool,
}

/// Upper-case the first letter of each word, lower-case the rest.
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl TaskDesk {
    /// Create an inactive user waiting for tenant approval.
    pub fn register_user(&self, registration: &Registration) -> ServiceResult<User> {
        if registration.first_name.trim().is_empty() {
            return Err(ServiceError::missing_field("first_name"));
        }
        if registration.last_name.trim().is_empty() {
            return Err(ServiceError::missing_field("last_name"));
        }

        let new_user = NewUser {
            username: registration.username.trim().to_string(),
            first_name: title_case(&registration.first_name),
            last_name: title_case(&registration.last_name),
            title: registration.title.clone(),
            gender: registration.gender.clone(),
            is_active: false,
            is_superuser: false,
        };
        let user = self.db.create_user(&new_user)?;
        info!(user_id = user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Activate a user into a tenant, then run pipeline onboarding.
    pub fn approve_user(
        &self,
        admin_id: UserId,
        user_id: UserId,
        tenant_id: TenantId,
        session_id: &str,
    ) -> ServiceResult<Approval> {
        self.require_superuser(admin_id)?;
        self.require_user(user_id)?;
        if self.db.get_tenant(tenant_id)?.is_none() {
            return Err(ServiceError::tenant_not_found(tenant_id));
        }

        self.db.approve_user(user_id, tenant_id)?;
        info!(user_id, tenant_id, admin_id, "user approved");

        self.events.log(
            Some(admin_id),
            session_id,
            EventType::UserApproved,
            json!({ "approved_user_id": user_id }),
        );

        let pipeline_task_ids = match self.pipeline.onboard(user_id, self.today()) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(user_id, error = %e, "pipeline onboarding failed");
                Vec::new()
            }
        };

        Ok(Approval {
            user_id,
            tenant_id,
            pipeline_task_ids,
        })
    }

    /// Set a member's rank and department. Superusers only.
    pub fn update_member_profile(
        &self,
        admin_id: UserId,
        user_id: UserId,
        rank: Option<i32>,
        department: Option<&str>,
    ) -> ServiceResult<Profile> {
        self.require_superuser(admin_id)?;
        self.require_user(user_id)?;

        if let Some(rank) = rank {
            self.db.set_profile_rank(user_id, rank)?;
        }
        if let Some(department) = department {
            let department = department.trim();
            self.db
                .set_profile_department(user_id, (!department.is_empty()).then_some(department))?;
        }
        info!(user_id, admin_id, ?rank, "member profile updated");

        self.db
            .get_profile(user_id)?
            .ok_or_else(|| ServiceError::user_not_found(user_id))
    }

    pub fn login(
        &self,
        auth: &dyn Authenticator,
        tenant_code: &str,
        username: &str,
        password: &str,
    ) -> ServiceResult<LoginSession> {
        let user_id = auth
            .authenticate(username, password)
            .ok_or_else(|| ServiceError::unauthorized("Invalid username or password"))?;
        let user = self.require_user(user_id)?;
        if !user.is_active {
            return Err(ServiceError::unauthorized("Account is not active"));
        }

        let tenant_id = self
            .db
            .get_profile(user_id)?
            .and_then(|p| p.tenant_id)
            .ok_or_else(|| ServiceError::forbidden("Account is not assigned to a company yet"))?;
        let tenant = self
            .db
            .get_tenant(tenant_id)?
            .ok_or_else(|| ServiceError::tenant_not_found(tenant_id))?;
        if tenant.code.trim() != tenant_code.trim() {
            return Err(ServiceError::forbidden(
                "Company code does not belong to this user",
            ));
        }

        Ok(LoginSession {
            user_id,
            username: user.username,
            tenant_name: tenant.name,
            token: auth.issue_session_token(user_id),
            is_kanban: tenant.is_kanban,
        })
    }

    /// Set presence. Going offline also writes the user's research export.
    pub fn update_status(&self, user_id: UserId, status: &str) -> ServiceResult<UserStatus> {
        let status = UserStatus::from_str(status)
            .ok_or_else(|| ServiceError::invalid_value("status", "Unknown status"))?;
        self.db.set_user_status(user_id, status)?;

        if status == UserStatus::Offline
            && let Err(e) = self.exporter.export_user(user_id)
        {
            warn!(user_id, error = %e, "offline export failed");
        }
        Ok(status)
    }

    pub fn touch_activity(&self, user_id: UserId) -> ServiceResult<()> {
        self.db.touch_activity(user_id, now_ms())?;
        Ok(())
    }

    /// Members of the caller's tenant with their effective presence.
    pub fn team_members(&self, user_id: UserId) -> ServiceResult<Vec<TeamMember>> {
        let Some(tenant_id) = self.db.get_profile(user_id)?.and_then(|p| p.tenant_id) else {
            return Ok(Vec::new());
        };

        let now = now_ms();
        let idle = self.config.idle_timeout_ms();
        let mut members = Vec::new();
        for user in self.db.list_tenant_users(tenant_id)? {
            let Some(profile) = self.db.get_profile(user.id)? else {
                continue;
            };
            members.push(TeamMember {
                user_id: user.id,
                display_name: user.display_name(profile.gender.as_deref()),
                username: user.username,
                title: profile.title.clone(),
                department: profile.department.clone(),
                rank: profile.rank,
                status: profile.effective_status(now, idle),
                is_me: user.id == user_id,
            });
        }
        Ok(members)
    }

    /// Merge JSON object patches into the stored preference maps.
    pub fn update_preferences(
        &self,
        user_id: UserId,
        notification_settings: Option<Value>,
        privacy_settings: Option<Value>,
    ) -> ServiceResult<Profile> {
        fn as_patch(field: &str, value: Option<Value>) -> ServiceResult<Option<Map<String, Value>>> {
            match value {
                None => Ok(None),
                Some(Value::Object(map)) => Ok(Some(map)),
                Some(_) => Err(ServiceError::invalid_value(field, "must be a JSON object")),
            }
        }

        let notification = as_patch("notification_settings", notification_settings)?;
        let privacy = as_patch("privacy_settings", privacy_settings)?;
        Ok(self.db.update_settings(user_id, notification, privacy)?)
    }

    pub fn user_stats(&self, user_id: UserId) -> ServiceResult<UserStats> {
        self.require_user(user_id)?;
        Ok(self.db.user_stats(user_id)?)
    }

    /// End the user's participation.
    ///
    /// The first call logs `experiment_completed`, writes the user's export,
    /// deactivates the account and refreshes the batch export. Later calls
    /// return `Outcome::Unchanged` and do nothing.
    pub fn deactivate_user(&self, user_id: UserId, session_id: &str) -> ServiceResult<Outcome> {
        let user = self.require_user(user_id)?;

        let mut metadata = Map::new();
        metadata.insert("username".to_string(), json!(user.username));
        metadata.insert("deactivated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let outcome = self
            .db
            .record_experiment_completed(user_id, session_id, &metadata)?;
        if outcome == Outcome::Unchanged {
            return Ok(Outcome::Unchanged);
        }

        if let Err(e) = self.exporter.export_user(user_id) {
            warn!(user_id, error = %e, "deactivation export failed");
        }

        self.db.set_user_active(user_id, false)?;
        info!(user_id, "user deactivated");

        if let Err(e) = self.exporter.run_batch() {
            warn!(user_id, error = %e, "final batch export failed");
        }

        Ok(Outcome::Applied)
    }

    /// The tenant's period with the earliest end date not in the past.
    pub fn current_presentation(&self, user_id: UserId) -> ServiceResult<Option<PresentationPeriod>> {
        let Some(tenant_id) = self.db.get_profile(user_id)?.and_then(|p| p.tenant_id) else {
            return Ok(None);
        };
        Ok(self
            .db
            .upcoming_period_for_tenant(tenant_id, self.today())?)
    }
}
