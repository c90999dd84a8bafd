use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{Permission, Role, User, UserStatus};
use crate::db::{create_user, get_user, update_user_role, update_user_status};
use crate::error::AppError;
use crate::validation::is_valid_phone;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Self-service sign-up. New accounts always start as active `user`s.
#[instrument(skip(pool, password))]
pub async fn sign_up(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    display_name: &str,
    phone: Option<&str>,
) -> Result<User, AppError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let phone = phone.map(str::trim).filter(|p| !p.is_empty());
    if let Some(phone) = phone {
        if !is_valid_phone(phone) {
            return Err(AppError::Validation(format!("Invalid phone number: {}", phone)));
        }
    }

    let id = create_user(pool, email, password, display_name, phone, Role::User).await?;
    info!(user_id = id, "Account created");

    get_user(pool, id).await
}

#[instrument(skip(pool, actor), fields(actor = %actor.email))]
pub async fn set_user_status(
    pool: &Pool<Sqlite>,
    actor: &User,
    target_id: i64,
    status: UserStatus,
) -> Result<User, AppError> {
    let target = get_user(pool, target_id).await?;
    actor.require_can_moderate(&target)?;

    update_user_status(pool, target.id, status).await?;
    info!(target = %target.email, %status, "Account status changed");

    get_user(pool, target.id).await
}

/// Changes a role. Both the target's current role and the new one must be
/// within the actor's moderation reach.
#[instrument(skip(pool, actor), fields(actor = %actor.email))]
pub async fn set_user_role(
    pool: &Pool<Sqlite>,
    actor: &User,
    target_id: i64,
    role: Role,
) -> Result<User, AppError> {
    let target = get_user(pool, target_id).await?;
    actor.require_can_moderate(&target)?;
    actor.require_permission(Permission::EditUserRoles)?;

    match actor.role.moderation_ceiling() {
        Some(ceiling) if role <= ceiling => {}
        _ => {
            return Err(AppError::Authorization(format!(
                "A {} cannot grant the {} role",
                actor.role, role
            )));
        }
    }

    update_user_role(pool, target.id, role).await?;
    info!(target = %target.email, %role, "Account role changed");

    get_user(pool, target.id).await
}
