use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{Permission, User};
use crate::db::{NewProgram, create_program, get_program, list_programs, set_program_visibility};
use crate::error::AppError;
use crate::models::Program;

#[instrument(skip(pool, actor, program), fields(actor = %actor.email, title = %program.title))]
pub async fn add_program(
    pool: &Pool<Sqlite>,
    actor: &User,
    program: &NewProgram<'_>,
) -> Result<Program, AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::ManagePrograms)?;

    if program.title.trim().is_empty() {
        return Err(AppError::Validation("Program title is required".to_string()));
    }
    if program.max_participants < 1 {
        return Err(AppError::Validation(
            "max_participants must be at least 1".to_string(),
        ));
    }

    let id = create_program(pool, program).await?;
    info!(program_id = id, "Program created");

    get_program(pool, id).await
}

/// Programs the actor may see. Hidden programs only show up for staff.
pub async fn visible_programs(pool: &Pool<Sqlite>, actor: &User) -> Result<Vec<Program>, AppError> {
    list_programs(pool, actor.has_permission(Permission::ViewAllPrograms)).await
}

pub async fn find_program(
    pool: &Pool<Sqlite>,
    actor: &User,
    program_id: i64,
) -> Result<Program, AppError> {
    let program = get_program(pool, program_id).await?;

    if !program.is_visible && !actor.has_permission(Permission::ViewAllPrograms) {
        return Err(AppError::NotFound(format!("Program {} not found", program_id)));
    }

    Ok(program)
}

#[instrument(skip(pool, actor), fields(actor = %actor.email))]
pub async fn change_visibility(
    pool: &Pool<Sqlite>,
    actor: &User,
    program_id: i64,
    visible: bool,
) -> Result<Program, AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::ManagePrograms)?;

    set_program_visibility(pool, program_id, visible).await?;

    get_program(pool, program_id).await
}
