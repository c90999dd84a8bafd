use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use std::fmt;

use crate::error::AppError;

use super::{Permission, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Banned,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Banned => "banned",
            UserStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            "banned" => Ok(UserStatus::Banned),
            "deleted" => Ok(UserStatus::Deleted),
            _ => Err(AppError::Validation(format!("Unknown user status: {}", s))),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The authenticated principal. Role and status always come from the store,
/// never from the session cookie.
#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: UserStatus,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(user: DbUser) -> Result<Self, Self::Error> {
        let role = user.role.unwrap_or_default();
        let status = user.status.unwrap_or_else(|| "active".to_string());

        Ok(Self {
            id: user.id.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            display_name: user.display_name.unwrap_or_default(),
            phone: user.phone.filter(|p| !p.is_empty()),
            role: Role::from_str(&role)
                .map_err(|e| AppError::Internal(format!("Corrupt user row: {}", e)))?,
            status: UserStatus::from_str(&status)?,
        })
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                email = %self.email,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "Role {} lacks permission {:?}",
                self.role, permission
            )))
        }
    }

    /// Suspended, banned and deleted accounts may not change anything.
    pub fn require_active(&self) -> Result<(), AppError> {
        match self.status {
            UserStatus::Active => Ok(()),
            status => {
                tracing::warn!(email = %self.email, status = %status, "Inactive account attempted a mutation");
                Err(AppError::Authorization(format!("Account is {}", status)))
            }
        }
    }

    /// Moderation rule: never yourself, super admins may act on anyone else,
    /// center admins only on users and instructors.
    pub fn can_moderate(&self, target: &User) -> bool {
        if self.id == target.id {
            return false;
        }

        self.has_authority_over(target.role)
    }

    /// Center admins reach users and instructors, super admins everyone.
    pub fn has_authority_over(&self, role: Role) -> bool {
        self.role
            .moderation_ceiling()
            .is_some_and(|ceiling| ceiling.has_minimum_role(role))
    }

    pub fn require_can_moderate(&self, target: &User) -> Result<(), AppError> {
        self.require_active()?;
        self.require_permission(Permission::ModerateUsers)?;

        if self.id == target.id {
            return Err(AppError::Authorization(
                "Moderation actions cannot target your own account".to_string(),
            ));
        }

        if !self.can_moderate(target) {
            tracing::warn!(
                actor = %self.email,
                actor_role = %self.role,
                target = %target.email,
                target_role = %target.role,
                "Moderation denied"
            );
            return Err(AppError::Authorization(format!(
                "A {} cannot act on a {} account",
                self.role, target.role
            )));
        }

        Ok(())
    }

    pub fn require_owner(&self, owner_id: i64) -> Result<(), AppError> {
        if self.id == owner_id {
            Ok(())
        } else {
            Err(AppError::Authorization(
                "Registration belongs to another user".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<DbUserSession> for UserSession {
    fn from(session: DbUserSession) -> Self {
        Self {
            id: session.id.unwrap_or_default(),
            user_id: session.user_id.unwrap_or_default(),
            token: session.token.unwrap_or_default(),
            created_at: session.created_at.unwrap_or_else(Utc::now),
            // A row without an expiry is treated as already expired
            expires_at: session.expires_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}
