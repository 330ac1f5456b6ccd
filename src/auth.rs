//! Credential checking and session tokens live outside this crate.

use crate::types::UserId;
use serde::Serialize;

/// External identity provider.
pub trait Authenticator: Send + Sync {
    /// Resolve credentials to a user, or `None` if they are wrong.
    fn authenticate(&self, username: &str, password: &str) -> Option<UserId>;

    /// Issue an opaque session token for an authenticated user.
    fn issue_session_token(&self, user_id: UserId) -> String;
}

/// Successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginSession {
    pub user_id: UserId,
    pub username: String,
    pub tenant_name: String,
    pub token: String,
    pub is_kanban: bool,
}
