use chrono::Utc;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::accounts::{set_user_role, set_user_status, sign_up};
use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession, UserStatus};
use crate::capacity::{Reconciliation, reconcile_participants, update_capacity};
use crate::db::{
    NewProgram, authenticate_user, count_unread_notifications, create_user_session, get_all_users,
    get_in_app_notifications, get_registrations_for_program, get_registrations_for_user,
    invalidate_session, mark_all_notifications_read, mark_notification_read,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{InAppNotification, Program, Registration, RegistrationStatus};
use crate::notifications::NotificationDispatcher;
use crate::programs::{add_program, change_visibility, find_program, visible_programs};
use crate::registrations::{
    self, BulkOutcome, CancellationOutcome, RegistrationInput, ReviewDecision,
};
use crate::validation::{AppErrorExt, ApiError, JsonValidateExt, ValidationResponse, validate_phone};

type Db = State<Pool<Sqlite>>;
type Notifier = State<NotificationDispatcher>;

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub status: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            phone: user.phone,
            role: user.role.to_string(),
            status: user.status.to_string(),
        }
    }
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email address"))]
    email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(length(min = 1, max = 100, message = "Display name is required"))]
    display_name: String,
    #[validate(custom(function = "validate_phone"))]
    phone: Option<String>,
}

#[post("/signup", data = "<signup>")]
pub async fn api_signup(
    signup: Json<SignupRequest>,
    db: &Db,
) -> Result<Custom<Json<UserData>>, ApiError> {
    let validated = signup.validate_custom()?;

    let user = sign_up(
        db,
        validated.email.trim(),
        &validated.password,
        validated.display_name.trim(),
        validated.phone.as_deref(),
    )
    .await
    .validate_custom()?;

    Ok(Custom(Status::Created, Json(UserData::from(user))))
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &Db,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    let Some(user) = authenticate_user(db, validated.email.trim(), &validated.password)
        .await
        .validate_custom()?
    else {
        return Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid email or password".to_string()),
        }));
    };

    if user.status != UserStatus::Active {
        return Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some(format!("Account is {}", user.status)),
        }));
    }

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(config.session_hours);

    create_user_session(db, user.id, &token, expires_at)
        .await
        .validate_custom()?;

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(config.session_hours)),
    );

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        error: None,
    }))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &Db) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/programs")]
pub async fn api_list_programs(user: User, db: &Db) -> Result<Json<Vec<Program>>, ApiError> {
    let programs = visible_programs(db, &user).await.validate_custom()?;
    Ok(Json(programs))
}

#[derive(Deserialize, Validate)]
pub struct CreateProgramRequest {
    #[validate(length(min = 1, max = 200, message = "Title is required"))]
    title: String,
    #[validate(length(max = 100))]
    category: Option<String>,
    #[validate(length(max = 100))]
    duration: Option<String>,
    #[validate(length(max = 100))]
    instructor: Option<String>,
    #[validate(range(min = 1, message = "max_participants must be at least 1"))]
    max_participants: i64,
    is_visible: Option<bool>,
}

#[post("/programs", data = "<program>")]
pub async fn api_create_program(
    program: Json<CreateProgramRequest>,
    user: User,
    db: &Db,
) -> Result<Custom<Json<Program>>, ApiError> {
    let validated = program.validate_custom()?;

    let created = add_program(
        db,
        &user,
        &NewProgram {
            title: validated.title.trim(),
            category: validated.category.as_deref().unwrap_or_default(),
            duration: validated.duration.as_deref().unwrap_or_default(),
            instructor: validated.instructor.as_deref().unwrap_or_default(),
            max_participants: validated.max_participants,
            is_visible: validated.is_visible.unwrap_or(true),
        },
    )
    .await
    .validate_custom()?;

    Ok(Custom(Status::Created, Json(created)))
}

#[get("/programs/<id>")]
pub async fn api_get_program(id: i64, user: User, db: &Db) -> Result<Json<Program>, ApiError> {
    let program = find_program(db, &user, id).await.validate_custom()?;
    Ok(Json(program))
}

#[derive(Deserialize)]
pub struct VisibilityRequest {
    visible: bool,
}

#[put("/programs/<id>/visibility", data = "<request>")]
pub async fn api_set_visibility(
    id: i64,
    request: Json<VisibilityRequest>,
    user: User,
    db: &Db,
) -> Result<Json<Program>, ApiError> {
    let program = change_visibility(db, &user, id, request.visible)
        .await
        .validate_custom()?;
    Ok(Json(program))
}

#[derive(Deserialize, Validate)]
pub struct CapacityRequest {
    #[validate(range(min = 1, message = "max_participants must be at least 1"))]
    max_participants: i64,
}

#[put("/programs/<id>/capacity", data = "<request>")]
pub async fn api_set_capacity(
    id: i64,
    request: Json<CapacityRequest>,
    user: User,
    db: &Db,
) -> Result<Json<Program>, ApiError> {
    let validated = request.validate_custom()?;

    let program = update_capacity(db, &user, id, validated.max_participants)
        .await
        .validate_custom()?;
    Ok(Json(program))
}

#[post("/programs/<id>/reconcile")]
pub async fn api_reconcile(id: i64, user: User, db: &Db) -> Result<Json<Reconciliation>, ApiError> {
    let result = reconcile_participants(db, &user, id).await.validate_custom()?;
    Ok(Json(result))
}

#[derive(Deserialize, Validate, Default)]
pub struct RegisterRequest {
    #[validate(custom(function = "validate_phone"))]
    phone: Option<String>,
    #[validate(length(max = 2000, message = "Notes are too long"))]
    notes: Option<String>,
}

#[post("/programs/<id>/register", data = "<request>")]
pub async fn api_register(
    id: i64,
    request: Option<Json<RegisterRequest>>,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Custom<Json<Registration>>, ApiError> {
    let validated = match request {
        Some(body) => body.validate_custom()?,
        None => RegisterRequest::default(),
    };

    let registration = registrations::register(
        db,
        notifier,
        &user,
        id,
        RegistrationInput {
            phone: validated.phone,
            notes: validated.notes,
        },
    )
    .await
    .validate_custom()?;

    Ok(Custom(Status::Created, Json(registration)))
}

#[get("/programs/<id>/registrations?<status>")]
pub async fn api_program_registrations(
    id: i64,
    status: Option<&str>,
    user: User,
    db: &Db,
) -> Result<Json<Vec<Registration>>, ApiError> {
    user.require_permission(Permission::ViewProgramRegistrations)
        .validate_custom()?;
    let program = find_program(db, &user, id).await.validate_custom()?;

    let status = status
        .map(RegistrationStatus::from_str)
        .transpose()
        .map_err(|_| AppError::Validation("Unknown registration status".to_string()))
        .validate_custom()?;

    let registrations = get_registrations_for_program(db, program.id, status)
        .await
        .validate_custom()?;
    Ok(Json(registrations))
}

#[derive(Deserialize, Default)]
pub struct BulkReviewRequest {
    /// Omitted means every pending registration of the program.
    registration_ids: Option<Vec<i64>>,
}

async fn bulk_review(
    id: i64,
    request: Option<Json<BulkReviewRequest>>,
    user: User,
    db: &Db,
    notifier: &Notifier,
    decision: ReviewDecision,
) -> Result<Json<BulkOutcome>, ApiError> {
    let request = request.map(Json::into_inner).unwrap_or_default();

    let outcome = registrations::bulk_review(
        db,
        notifier,
        &user,
        id,
        request.registration_ids.as_deref(),
        decision,
    )
    .await
    .validate_custom()?;

    Ok(Json(outcome))
}

#[post("/programs/<id>/registrations/bulk-accept", data = "<request>")]
pub async fn api_bulk_accept(
    id: i64,
    request: Option<Json<BulkReviewRequest>>,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<BulkOutcome>, ApiError> {
    bulk_review(id, request, user, db, notifier, ReviewDecision::Accept).await
}

#[post("/programs/<id>/registrations/bulk-reject", data = "<request>")]
pub async fn api_bulk_reject(
    id: i64,
    request: Option<Json<BulkReviewRequest>>,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<BulkOutcome>, ApiError> {
    bulk_review(id, request, user, db, notifier, ReviewDecision::Reject).await
}

#[get("/registrations/mine")]
pub async fn api_my_registrations(user: User, db: &Db) -> Result<Json<Vec<Registration>>, ApiError> {
    user.require_permission(Permission::ViewOwnRegistrations)
        .validate_custom()?;

    let registrations = get_registrations_for_user(db, user.id)
        .await
        .validate_custom()?;
    Ok(Json(registrations))
}

#[post("/registrations/<id>/withdraw")]
pub async fn api_withdraw(
    id: i64,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<Registration>, ApiError> {
    let registration = registrations::withdraw(db, notifier, &user, id)
        .await
        .validate_custom()?;
    Ok(Json(registration))
}

#[post("/registrations/<id>/cancel")]
pub async fn api_cancel(
    id: i64,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<CancellationOutcome>, ApiError> {
    let outcome = registrations::cancel(db, notifier, &user, id)
        .await
        .validate_custom()?;
    Ok(Json(outcome))
}

#[post("/registrations/<id>/accept")]
pub async fn api_accept(
    id: i64,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<Registration>, ApiError> {
    let registration = registrations::accept(db, notifier, &user, id)
        .await
        .validate_custom()?;
    Ok(Json(registration))
}

#[post("/registrations/<id>/reject")]
pub async fn api_reject(
    id: i64,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<Registration>, ApiError> {
    let registration = registrations::reject(db, notifier, &user, id)
        .await
        .validate_custom()?;
    Ok(Json(registration))
}

#[post("/registrations/<id>/enroll")]
pub async fn api_enroll(
    id: i64,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<Registration>, ApiError> {
    let registration = registrations::enroll(db, notifier, &user, id)
        .await
        .validate_custom()?;
    Ok(Json(registration))
}

#[post("/registrations/<id>/complete")]
pub async fn api_complete(
    id: i64,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<Registration>, ApiError> {
    let registration = registrations::complete(db, notifier, &user, id)
        .await
        .validate_custom()?;
    Ok(Json(registration))
}

#[post("/registrations/<id>/payment")]
pub async fn api_record_payment(
    id: i64,
    user: User,
    db: &Db,
    notifier: &Notifier,
) -> Result<Json<Registration>, ApiError> {
    let registration = registrations::record_payment(db, notifier, &user, id)
        .await
        .validate_custom()?;
    Ok(Json(registration))
}

#[derive(Deserialize, Validate)]
pub struct NotesRequest {
    #[validate(length(max = 2000, message = "Notes are too long"))]
    notes: String,
}

#[put("/registrations/<id>/notes", data = "<request>")]
pub async fn api_update_notes(
    id: i64,
    request: Json<NotesRequest>,
    user: User,
    db: &Db,
) -> Result<Json<Registration>, ApiError> {
    let validated = request.validate_custom()?;

    let registration = registrations::update_notes(db, &user, id, &validated.notes)
        .await
        .validate_custom()?;
    Ok(Json(registration))
}

#[get("/notifications?<limit>")]
pub async fn api_notifications(
    limit: Option<i64>,
    user: User,
    db: &Db,
) -> Result<Json<Vec<InAppNotification>>, ApiError> {
    let limit = limit.unwrap_or(50).clamp(1, 200);

    let notifications = get_in_app_notifications(db, user.id, limit)
        .await
        .validate_custom()?;
    Ok(Json(notifications))
}

#[derive(Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[get("/notifications/unread")]
pub async fn api_unread_count(user: User, db: &Db) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread = count_unread_notifications(db, user.id)
        .await
        .validate_custom()?;
    Ok(Json(UnreadCountResponse { unread }))
}

#[post("/notifications/<id>/read")]
pub async fn api_mark_read(id: i64, user: User, db: &Db) -> Result<Status, ApiError> {
    mark_notification_read(db, id, user.id)
        .await
        .validate_custom()?;
    Ok(Status::Ok)
}

#[derive(Serialize, Deserialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

#[post("/notifications/read-all")]
pub async fn api_mark_all_read(user: User, db: &Db) -> Result<Json<MarkAllReadResponse>, ApiError> {
    let updated = mark_all_notifications_read(db, user.id)
        .await
        .validate_custom()?;
    Ok(Json(MarkAllReadResponse { updated }))
}

#[get("/admin/users")]
pub async fn api_get_all_users(user: User, db: &Db) -> Result<Json<Vec<UserData>>, ApiError> {
    user.require_permission(Permission::ModerateUsers)
        .validate_custom()?;

    let users = get_all_users(db).await.validate_custom()?;
    Ok(Json(users.into_iter().map(UserData::from).collect()))
}

#[derive(Deserialize)]
pub struct UserStatusRequest {
    status: String,
}

#[put("/admin/users/<id>/status", data = "<request>")]
pub async fn api_set_user_status(
    id: i64,
    request: Json<UserStatusRequest>,
    user: User,
    db: &Db,
) -> Result<Json<UserData>, ApiError> {
    let status = UserStatus::from_str(&request.status).validate_custom()?;

    let updated = set_user_status(db, &user, id, status)
        .await
        .validate_custom()?;
    Ok(Json(UserData::from(updated)))
}

#[derive(Deserialize)]
pub struct UserRoleRequest {
    role: String,
}

#[put("/admin/users/<id>/role", data = "<request>")]
pub async fn api_set_user_role(
    id: i64,
    request: Json<UserRoleRequest>,
    user: User,
    db: &Db,
) -> Result<Json<UserData>, ApiError> {
    let Ok(role) = Role::from_str(&request.role) else {
        return Err(Custom(
            Status::BadRequest,
            Json(ValidationResponse::with_error("role", "Unknown role")),
        ));
    };

    let updated = set_user_role(db, &user, id, role)
        .await
        .validate_custom()?;
    Ok(Json(UserData::from(updated)))
}
