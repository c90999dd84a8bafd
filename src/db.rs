use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession, UserStatus},
    error::AppError,
    models::{
        DbInAppNotification, DbProgram, DbRegistration, DeliveryChannel, DeliveryStatus, InAppNotification,
        PaymentStatus, Program, Registration, RegistrationStatus,
    },
    notifications::NotificationEnvelope,
};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

const USER_COLUMNS: &str = "id, email, display_name, phone, role, status";

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash: Option<(i64, String)> =
        sqlx::query_as("SELECT id, password FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(pool)
            .await?;

    match hash {
        Some((id, hash)) => match bcrypt::verify(password, &hash) {
            Ok(true) => Ok(Some(get_user(pool, id).await?)),
            _ => Ok(None),
        },
        None => Ok(None),
    }
}

#[instrument(skip_all, fields(email, role = %role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    display_name: &str,
    phone: Option<&str>,
    role: Role,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (email, password, display_name, phone, role, status, created_at)
         VALUES (?, ?, ?, ?, ?, 'active', ?)",
    )
    .bind(email)
    .bind(hashed_password)
    .bind(display_name)
    .bind(phone)
    .bind(role.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Validation(format!("An account for '{}' already exists", email))
        }
        e => AppError::from(e),
    })?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_all_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users ORDER BY email",
        USER_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(User::try_from).collect()
}

#[instrument]
pub async fn get_users_by_roles(pool: &Pool<Sqlite>, roles: &[Role]) -> Result<Vec<User>, AppError> {
    info!("Getting users by role");

    if roles.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; roles.len()].join(", ");
    let query = format!(
        "SELECT {} FROM users WHERE role IN ({}) ORDER BY id",
        USER_COLUMNS, placeholders
    );

    let mut q = sqlx::query_as::<_, DbUser>(&query);
    for role in roles {
        q = q.bind(role.as_str());
    }

    let rows = q.fetch_all(pool).await?;

    rows.into_iter().map(User::try_from).collect()
}

#[instrument]
pub async fn update_user_status(
    pool: &Pool<Sqlite>,
    user_id: i64,
    status: UserStatus,
) -> Result<(), AppError> {
    info!("Updating user status");
    sqlx::query("UPDATE users SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument]
pub async fn update_user_role(pool: &Pool<Sqlite>, user_id: i64, role: Role) -> Result<(), AppError> {
    info!("Updating user role");
    sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query(
        "INSERT INTO user_sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(Utc::now())
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub struct NewProgram<'a> {
    pub title: &'a str,
    pub category: &'a str,
    pub duration: &'a str,
    pub instructor: &'a str,
    pub max_participants: i64,
    pub is_visible: bool,
}

#[instrument(skip(pool, program), fields(title = %program.title))]
pub async fn create_program(pool: &Pool<Sqlite>, program: &NewProgram<'_>) -> Result<i64, AppError> {
    info!("Creating program");
    let res = sqlx::query(
        "INSERT INTO programs
         (title, category, duration, instructor, max_participants, current_participants, is_visible, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(program.title)
    .bind(program.category)
    .bind(program.duration)
    .bind(program.instructor)
    .bind(program.max_participants)
    .bind(program.is_visible)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_program(pool: &Pool<Sqlite>, id: i64) -> Result<Program, AppError> {
    info!("Getting program");
    let row = sqlx::query_as::<_, DbProgram>("SELECT * FROM programs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Program::from)
        .ok_or_else(|| AppError::NotFound(format!("Program {} not found", id)))
}

#[instrument]
pub async fn list_programs(pool: &Pool<Sqlite>, include_hidden: bool) -> Result<Vec<Program>, AppError> {
    info!(include_hidden = %include_hidden, "Listing programs");

    let query = if include_hidden {
        "SELECT * FROM programs ORDER BY created_at DESC, id DESC"
    } else {
        "SELECT * FROM programs WHERE is_visible = 1 ORDER BY created_at DESC, id DESC"
    };

    let rows = sqlx::query_as::<_, DbProgram>(query).fetch_all(pool).await?;

    Ok(rows.into_iter().map(Program::from).collect())
}

#[instrument]
pub async fn set_program_visibility(
    pool: &Pool<Sqlite>,
    program_id: i64,
    visible: bool,
) -> Result<(), AppError> {
    info!("Setting program visibility");
    let res = sqlx::query("UPDATE programs SET is_visible = ? WHERE id = ?")
        .bind(visible)
        .bind(program_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Program {} not found", program_id)));
    }

    Ok(())
}

pub struct NewRegistration<'a> {
    pub program_id: i64,
    pub user_id: i64,
    pub user_name: &'a str,
    pub user_email: &'a str,
    pub user_phone: Option<&'a str>,
    pub notes: &'a str,
}

#[instrument(skip(conn))]
pub async fn find_active_registration(
    conn: &mut SqliteConnection,
    user_id: i64,
    program_id: i64,
) -> Result<Option<Registration>, AppError> {
    info!("Looking for an active registration");
    let row = sqlx::query_as::<_, DbRegistration>(
        "SELECT * FROM registrations
         WHERE user_id = ? AND program_id = ? AND status NOT IN ('cancelled', 'rejected')
         LIMIT 1",
    )
    .bind(user_id)
    .bind(program_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Registration::try_from).transpose()
}

#[instrument(skip(conn, registration), fields(program_id = registration.program_id, user_id = registration.user_id))]
pub async fn insert_registration(
    conn: &mut SqliteConnection,
    registration: &NewRegistration<'_>,
) -> Result<i64, AppError> {
    info!("Inserting pending registration");
    let now = Utc::now();
    let res = sqlx::query(
        "INSERT INTO registrations
         (program_id, user_id, user_name, user_email, user_phone, status, payment_status, applied_at, notes, updated_at)
         VALUES (?, ?, ?, ?, ?, 'pending', 'unpaid', ?, ?, ?)",
    )
    .bind(registration.program_id)
    .bind(registration.user_id)
    .bind(registration.user_name)
    .bind(registration.user_email)
    .bind(registration.user_phone)
    .bind(now)
    .bind(registration.notes)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        // idx_registrations_one_active
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::PreconditionFailed("Already registered for this program".to_string())
        }
        e => AppError::from(e),
    })?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_registration(pool: &Pool<Sqlite>, id: i64) -> Result<Registration, AppError> {
    info!("Getting registration");
    let row = sqlx::query_as::<_, DbRegistration>("SELECT * FROM registrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Registration::try_from(row),
        None => Err(AppError::PreconditionFailed(format!(
            "Registration {} not found",
            id
        ))),
    }
}

#[instrument]
pub async fn get_registrations_for_program(
    pool: &Pool<Sqlite>,
    program_id: i64,
    status: Option<RegistrationStatus>,
) -> Result<Vec<Registration>, AppError> {
    info!("Getting registrations for program");
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, DbRegistration>(
                "SELECT * FROM registrations WHERE program_id = ? AND status = ? ORDER BY applied_at, id",
            )
            .bind(program_id)
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, DbRegistration>(
                "SELECT * FROM registrations WHERE program_id = ? ORDER BY applied_at, id",
            )
            .bind(program_id)
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(Registration::try_from).collect()
}

#[instrument]
pub async fn get_registrations_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Registration>, AppError> {
    info!("Getting registrations for user");
    let rows = sqlx::query_as::<_, DbRegistration>(
        "SELECT * FROM registrations WHERE user_id = ? ORDER BY applied_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Registration::try_from).collect()
}

/// Moves a registration from `from` to `to` only if it is still in `from`.
/// Returns false when another writer got there first.
#[instrument(skip(conn))]
pub async fn transition_registration_status(
    conn: &mut SqliteConnection,
    id: i64,
    from: RegistrationStatus,
    to: RegistrationStatus,
    reviewed_by: Option<i64>,
) -> Result<bool, AppError> {
    info!("Updating registration status");
    let now = Utc::now();
    let reviewed_at = reviewed_by.map(|_| now);

    let res = sqlx::query(
        "UPDATE registrations
         SET status = ?,
             reviewed_at = COALESCE(?, reviewed_at),
             reviewed_by = COALESCE(?, reviewed_by),
             updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(reviewed_at)
    .bind(reviewed_by)
    .bind(now)
    .bind(id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected() == 1)
}

#[instrument(skip(pool, notes))]
pub async fn update_registration_notes(
    pool: &Pool<Sqlite>,
    id: i64,
    notes: &str,
) -> Result<(), AppError> {
    info!("Updating registration notes");
    let res = sqlx::query("UPDATE registrations SET notes = ?, updated_at = ? WHERE id = ?")
        .bind(notes)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::PreconditionFailed(format!(
            "Registration {} not found",
            id
        )));
    }

    Ok(())
}

#[instrument(skip(conn))]
pub async fn set_payment_status(
    conn: &mut SqliteConnection,
    id: i64,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool, AppError> {
    info!("Updating payment status");
    let res = sqlx::query(
        "UPDATE registrations SET payment_status = ?, updated_at = ?
         WHERE id = ? AND payment_status = ?",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected() == 1)
}

#[instrument(skip(pool, envelope, error), fields(recipient = %envelope.recipient_email, kind = envelope.kind.as_str()))]
pub async fn insert_notification_log(
    pool: &Pool<Sqlite>,
    envelope: &NotificationEnvelope,
    channel: DeliveryChannel,
    delivery_status: DeliveryStatus,
    error: Option<&str>,
) -> Result<i64, AppError> {
    let metadata = serde_json::to_string(&envelope.metadata)?;

    let res = sqlx::query(
        "INSERT INTO notifications
         (user_id, user_email, title, message, notification_type, status_before, status_after,
          sent_via, delivery_status, error, action_url, related_program_id, related_program_name,
          metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(envelope.recipient_id)
    .bind(&envelope.recipient_email)
    .bind(&envelope.title)
    .bind(&envelope.message)
    .bind(envelope.kind.as_str())
    .bind(envelope.status_before.map(|s| s.as_str()))
    .bind(envelope.status_after.map(|s| s.as_str()))
    .bind(channel.as_str())
    .bind(delivery_status.as_str())
    .bind(error)
    .bind(envelope.action_url.as_deref())
    .bind(envelope.related_program_id)
    .bind(envelope.related_program_name.as_deref())
    .bind(metadata)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, envelope), fields(kind = envelope.kind.as_str()))]
pub async fn insert_in_app_notification(
    pool: &Pool<Sqlite>,
    user_id: i64,
    envelope: &NotificationEnvelope,
) -> Result<i64, AppError> {
    let res = sqlx::query(
        "INSERT INTO user_notifications (user_id, title, message, kind, action_url, is_read, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(user_id)
    .bind(&envelope.title)
    .bind(&envelope.message)
    .bind(envelope.kind.as_str())
    .bind(envelope.action_url.as_deref())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_in_app_notifications(
    pool: &Pool<Sqlite>,
    user_id: i64,
    limit: i64,
) -> Result<Vec<InAppNotification>, AppError> {
    info!("Getting in-app notifications");
    let rows = sqlx::query_as::<_, DbInAppNotification>(
        "SELECT * FROM user_notifications WHERE user_id = ?
         ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(InAppNotification::from).collect())
}

#[instrument]
pub async fn count_unread_notifications(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_notifications WHERE user_id = ? AND is_read = 0",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

#[instrument]
pub async fn mark_notification_read(
    pool: &Pool<Sqlite>,
    notification_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    info!("Marking notification read");
    let res = sqlx::query("UPDATE user_notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }

    Ok(())
}

#[instrument]
pub async fn mark_all_notifications_read(pool: &Pool<Sqlite>, user_id: i64) -> Result<u64, AppError> {
    info!("Marking all notifications read");
    let res = sqlx::query("UPDATE user_notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}
