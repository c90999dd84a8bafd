//! `current_participants` only changes through single conditional statements
//! here, so `0 <= current <= max` holds under concurrent registrants.

use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::auth::{Permission, User};
use crate::db::get_program;
use crate::error::AppError;
use crate::models::Program;

/// Runs on the caller's transaction so the seat commits with the registration.
#[instrument(skip(conn))]
pub async fn try_reserve_seat(conn: &mut SqliteConnection, program_id: i64) -> Result<bool, AppError> {
    let res = sqlx::query(
        "UPDATE programs
         SET current_participants = current_participants + 1
         WHERE id = ? AND current_participants < max_participants",
    )
    .bind(program_id)
    .execute(&mut *conn)
    .await?;

    let reserved = res.rows_affected() == 1;
    info!(reserved, "Seat reservation attempted");
    Ok(reserved)
}

/// Gives one seat back, never going below zero.
#[instrument(skip(conn))]
pub async fn release_seat(conn: &mut SqliteConnection, program_id: i64) -> Result<(), AppError> {
    let res = sqlx::query(
        "UPDATE programs
         SET current_participants = current_participants - 1
         WHERE id = ? AND current_participants > 0",
    )
    .bind(program_id)
    .execute(&mut *conn)
    .await?;

    if res.rows_affected() == 0 {
        warn!("Seat release found the counter already at zero");
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Reconciliation {
    pub program_id: i64,
    pub before: i64,
    pub after: i64,
}

/// Recomputes the cached counter from the active registrations.
#[instrument(skip(pool, actor), fields(actor = %actor.email))]
pub async fn reconcile_participants(
    pool: &Pool<Sqlite>,
    actor: &User,
    program_id: i64,
) -> Result<Reconciliation, AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::ManagePrograms)?;

    let mut tx = pool.begin().await?;

    let (before, max): (i64, i64) =
        sqlx::query_as("SELECT current_participants, max_participants FROM programs WHERE id = ?")
            .bind(program_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Program {} not found", program_id)))?;

    let (active,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM registrations
         WHERE program_id = ? AND status NOT IN ('cancelled', 'rejected')",
    )
    .bind(program_id)
    .fetch_one(&mut *tx)
    .await?;

    if active > max {
        warn!(active, max, "More active registrations than seats; clamping counter");
    }
    let after = active.clamp(0, max);

    sqlx::query("UPDATE programs SET current_participants = ? WHERE id = ?")
        .bind(after)
        .bind(program_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if before != after {
        info!(before, after, "Participant counter drift corrected");
    }

    Ok(Reconciliation {
        program_id,
        before,
        after,
    })
}

/// Changes a program's seat limit. The new limit can't be lower than the
/// seats already held.
#[instrument(skip(pool, actor), fields(actor = %actor.email))]
pub async fn update_capacity(
    pool: &Pool<Sqlite>,
    actor: &User,
    program_id: i64,
    max_participants: i64,
) -> Result<Program, AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::ManagePrograms)?;

    if max_participants < 1 {
        return Err(AppError::Validation(
            "max_participants must be at least 1".to_string(),
        ));
    }

    let res = sqlx::query(
        "UPDATE programs SET max_participants = ?
         WHERE id = ? AND current_participants <= ?",
    )
    .bind(max_participants)
    .bind(program_id)
    .bind(max_participants)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        let program = get_program(pool, program_id).await?;
        return Err(AppError::PreconditionFailed(format!(
            "Program already holds {} participants, cannot lower the limit to {}",
            program.current_participants, max_participants
        )));
    }

    let program = get_program(pool, program_id).await?;
    info!(max_participants, seats_left = program.seats_left(), "Program capacity changed");

    Ok(program)
}
