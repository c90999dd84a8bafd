//! Gate checks run before any write; notifications go out after commit.

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::auth::{Permission, User};
use crate::capacity::{release_seat, try_reserve_seat};
use crate::db::{
    NewRegistration, find_active_registration, get_program, get_registration,
    get_registrations_for_program, get_user, insert_registration, set_payment_status,
    transition_registration_status, update_registration_notes,
};
use crate::error::AppError;
use crate::models::{NotificationType, PaymentStatus, Program, Registration, RegistrationStatus};
use crate::notifications::{NotificationDispatcher, NotificationEnvelope, Outbox};
use crate::validation::is_valid_phone;

pub const MAX_NOTES_LEN: usize = 2000;

pub const REFUND_NOTICE: &str =
    "Your payment has been received. Please contact the center to arrange a manual refund.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationInput {
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub registration: Registration,
    pub refund_notice: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub registration_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<i64>,
    pub skipped: Vec<i64>,
    pub failed: Vec<BulkFailure>,
}

fn registration_link(registration_id: i64) -> String {
    format!("/registrations/{}", registration_id)
}

fn applicant_name(registration: &Registration) -> &str {
    if registration.user_name.is_empty() {
        &registration.user_email
    } else {
        &registration.user_name
    }
}

fn require_status(registration: &Registration, expected: RegistrationStatus) -> Result<(), AppError> {
    if registration.status == expected {
        Ok(())
    } else {
        Err(AppError::PreconditionFailed(format!(
            "Registration {} is {}, expected {}",
            registration.id, registration.status, expected
        )))
    }
}

async fn require_authority_over_applicant(
    pool: &Pool<Sqlite>,
    actor: &User,
    registration: &Registration,
) -> Result<(), AppError> {
    let applicant = get_user(pool, registration.user_id).await?;
    if actor.has_authority_over(applicant.role) {
        return Ok(());
    }

    warn!(
        actor = %actor.email,
        actor_role = %actor.role,
        applicant_role = %applicant.role,
        "Registration belongs to an account outside the actor's reach"
    );
    Err(AppError::Authorization(format!(
        "A {} cannot act on a {}'s registration",
        actor.role, applicant.role
    )))
}

async fn require_reviewer(
    pool: &Pool<Sqlite>,
    actor: &User,
    registration: &Registration,
) -> Result<(), AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::ReviewRegistrations)?;

    if actor.id == registration.user_id {
        return Err(AppError::PreconditionFailed(
            "You cannot review your own registration".to_string(),
        ));
    }

    require_authority_over_applicant(pool, actor, registration).await
}

/// The status update is conditional on the status we read, so a concurrent
/// transition fails here instead of applying twice.
#[instrument(skip(pool, registration), fields(registration_id = registration.id, from = %registration.status))]
async fn apply_transition(
    pool: &Pool<Sqlite>,
    registration: &Registration,
    to: RegistrationStatus,
    reviewed_by: Option<i64>,
) -> Result<Registration, AppError> {
    let from = registration.status;

    if !from.can_transition_to(to) {
        return Err(AppError::PreconditionFailed(format!(
            "Cannot move a {} registration to {}",
            from, to
        )));
    }

    let mut tx = pool.begin().await?;

    let moved =
        transition_registration_status(&mut tx, registration.id, from, to, reviewed_by).await?;
    if !moved {
        return Err(AppError::PreconditionFailed(format!(
            "Registration {} was changed by someone else",
            registration.id
        )));
    }

    if from.releases_seat(to) {
        release_seat(&mut tx, registration.program_id).await?;
    }

    tx.commit().await?;

    info!(%from, %to, "Registration status changed");

    get_registration(pool, registration.id).await
}

fn status_envelope(
    program: &Program,
    registration: &Registration,
    before: RegistrationStatus,
    kind: NotificationType,
    title: &str,
    message: String,
) -> NotificationEnvelope {
    NotificationEnvelope::new(kind, title, message)
        .for_program(program)
        .transition(Some(before), registration.status)
        .action_url(registration_link(registration.id))
        .meta("registration_id", registration.id)
}

#[instrument(skip(pool, notifier, actor, input), fields(actor = %actor.email))]
pub async fn register(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    program_id: i64,
    input: RegistrationInput,
) -> Result<Registration, AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::RegisterForPrograms)?;

    let phone = input
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or(actor.phone.as_deref());
    if let Some(phone) = phone {
        if !is_valid_phone(phone) {
            return Err(AppError::Validation(format!("Invalid phone number: {}", phone)));
        }
    }

    let notes = input.notes.as_deref().unwrap_or_default();
    if notes.len() > MAX_NOTES_LEN {
        return Err(AppError::Validation("Notes are too long".to_string()));
    }

    let program = get_program(pool, program_id).await?;
    if !program.is_visible && !actor.has_permission(Permission::ViewAllPrograms) {
        return Err(AppError::NotFound(format!("Program {} not found", program_id)));
    }

    let user_name = if actor.display_name.is_empty() {
        actor.email.as_str()
    } else {
        actor.display_name.as_str()
    };

    let mut tx = pool.begin().await?;

    if let Some(existing) = find_active_registration(&mut tx, actor.id, program_id).await? {
        return Err(AppError::PreconditionFailed(format!(
            "Already registered with status {}",
            existing.status
        )));
    }

    if !try_reserve_seat(&mut tx, program_id).await? {
        return Err(AppError::PreconditionFailed(format!(
            "Program {} is full",
            program.title
        )));
    }

    let registration_id = insert_registration(
        &mut tx,
        &NewRegistration {
            program_id,
            user_id: actor.id,
            user_name,
            user_email: &actor.email,
            user_phone: phone,
            notes,
        },
    )
    .await?;

    tx.commit().await?;

    info!(registration_id, program_id, "Registration created");

    let registration = get_registration(pool, registration_id).await?;

    let mut outbox = Outbox::new();
    outbox.to_user(
        NotificationEnvelope::new(
            NotificationType::BookingCreated,
            "Registration submitted",
            format!(
                "Your registration for {} was submitted and is pending review.",
                program.title
            ),
        )
        .addressed_to(actor)
        .for_program(&program)
        .transition(None, RegistrationStatus::Pending)
        .action_url(registration_link(registration.id))
        .meta("registration_id", registration.id),
    );
    outbox.to_admins(
        NotificationEnvelope::new(
            NotificationType::BookingCreated,
            "New registration request",
            format!(
                "{} ({}) applied for {}.",
                user_name, actor.email, program.title
            ),
        )
        .for_program(&program)
        .transition(None, RegistrationStatus::Pending)
        .action_url(registration_link(registration.id))
        .meta("registration_id", registration.id)
        .meta("applicant_id", actor.id),
    );
    notifier.flush(outbox).await;

    Ok(registration)
}

#[instrument(skip(pool, notifier, actor), fields(actor = %actor.email))]
pub async fn withdraw(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
) -> Result<Registration, AppError> {
    actor.require_active()?;

    let registration = get_registration(pool, registration_id).await?;
    actor.require_owner(registration.user_id)?;
    require_status(&registration, RegistrationStatus::Pending)?;

    let program = get_program(pool, registration.program_id).await?;
    let updated = apply_transition(pool, &registration, RegistrationStatus::Cancelled, None).await?;

    let mut outbox = Outbox::new();
    outbox.to_user(
        status_envelope(
            &program,
            &updated,
            registration.status,
            NotificationType::BookingUpdated,
            "Registration withdrawn",
            format!("Your registration for {} was withdrawn.", program.title),
        )
        .addressed_to(actor),
    );
    outbox.to_admins(status_envelope(
        &program,
        &updated,
        registration.status,
        NotificationType::BookingUpdated,
        "Registration withdrawn",
        format!(
            "{} withdrew their registration for {}.",
            applicant_name(&updated),
            program.title
        ),
    ));
    notifier.flush(outbox).await;

    Ok(updated)
}

/// Refunds are never automatic; a paid registration gets the refund notice.
#[instrument(skip(pool, notifier, actor), fields(actor = %actor.email))]
pub async fn cancel(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
) -> Result<CancellationOutcome, AppError> {
    actor.require_active()?;

    let registration = get_registration(pool, registration_id).await?;
    actor.require_owner(registration.user_id)?;

    require_status(&registration, RegistrationStatus::Accepted)?;

    let program = get_program(pool, registration.program_id).await?;
    let updated = apply_transition(pool, &registration, RegistrationStatus::Cancelled, None).await?;

    let refund_notice = match updated.payment_status {
        PaymentStatus::Paid => Some(REFUND_NOTICE.to_string()),
        PaymentStatus::Unpaid => None,
    };

    let mut message = format!("Your registration for {} was cancelled.", program.title);
    if let Some(notice) = &refund_notice {
        message.push(' ');
        message.push_str(notice);
    }

    let mut outbox = Outbox::new();
    outbox.to_user(
        status_envelope(
            &program,
            &updated,
            registration.status,
            NotificationType::BookingUpdated,
            "Registration cancelled",
            message,
        )
        .addressed_to(actor)
        .meta("refund_required", refund_notice.is_some()),
    );
    outbox.to_admins(
        status_envelope(
            &program,
            &updated,
            registration.status,
            NotificationType::BookingUpdated,
            "Registration cancelled",
            format!(
                "{} cancelled their accepted registration for {}.",
                applicant_name(&updated),
                program.title
            ),
        )
        .meta("refund_required", refund_notice.is_some()),
    );
    notifier.flush(outbox).await;

    Ok(CancellationOutcome {
        registration: updated,
        refund_notice,
    })
}

struct ReviewStep {
    from: RegistrationStatus,
    to: RegistrationStatus,
    title: &'static str,
    message: fn(&Program) -> String,
}

const ACCEPT: ReviewStep = ReviewStep {
    from: RegistrationStatus::Pending,
    to: RegistrationStatus::Accepted,
    title: "Registration accepted",
    message: |program| {
        format!(
            "Your registration for {} was accepted. Please proceed with payment.",
            program.title
        )
    },
};

const REJECT: ReviewStep = ReviewStep {
    from: RegistrationStatus::Pending,
    to: RegistrationStatus::Rejected,
    title: "Registration declined",
    message: |program| {
        format!(
            "We're sorry, your registration for {} was not accepted.",
            program.title
        )
    },
};

const ENROLL: ReviewStep = ReviewStep {
    from: RegistrationStatus::Accepted,
    to: RegistrationStatus::Enrolled,
    title: "Enrollment confirmed",
    message: |program| format!("Congratulations! You are now enrolled in {}.", program.title),
};

const COMPLETE: ReviewStep = ReviewStep {
    from: RegistrationStatus::Enrolled,
    to: RegistrationStatus::Completed,
    title: "Program completed",
    message: |program| format!("You have completed {}. Well done!", program.title),
};

async fn review_transition(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
    step: &ReviewStep,
) -> Result<Registration, AppError> {
    let registration = get_registration(pool, registration_id).await?;
    require_reviewer(pool, actor, &registration).await?;
    require_status(&registration, step.from)?;

    let program = get_program(pool, registration.program_id).await?;
    let updated = apply_transition(pool, &registration, step.to, Some(actor.id)).await?;

    let mut outbox = Outbox::new();
    outbox.to_user(
        status_envelope(
            &program,
            &updated,
            registration.status,
            NotificationType::StatusChange,
            step.title,
            (step.message)(&program),
        )
        .addressed_to_applicant(&updated),
    );
    outbox.to_admins(
        status_envelope(
            &program,
            &updated,
            registration.status,
            NotificationType::StatusChange,
            step.title,
            format!(
                "{} moved {}'s registration for {} from {} to {}.",
                actor.display_name,
                applicant_name(&updated),
                program.title,
                registration.status,
                step.to
            ),
        )
        .meta("reviewed_by", actor.id),
    );
    notifier.flush(outbox).await;

    Ok(updated)
}

#[instrument(skip(pool, notifier, actor), fields(actor = %actor.email))]
pub async fn accept(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
) -> Result<Registration, AppError> {
    review_transition(pool, notifier, actor, registration_id, &ACCEPT).await
}

#[instrument(skip(pool, notifier, actor), fields(actor = %actor.email))]
pub async fn reject(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
) -> Result<Registration, AppError> {
    review_transition(pool, notifier, actor, registration_id, &REJECT).await
}

#[instrument(skip(pool, notifier, actor), fields(actor = %actor.email))]
pub async fn enroll(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
) -> Result<Registration, AppError> {
    review_transition(pool, notifier, actor, registration_id, &ENROLL).await
}

#[instrument(skip(pool, notifier, actor), fields(actor = %actor.email))]
pub async fn complete(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
) -> Result<Registration, AppError> {
    review_transition(pool, notifier, actor, registration_id, &COMPLETE).await
}

#[instrument(skip(pool, notifier, actor), fields(actor = %actor.email))]
pub async fn record_payment(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    registration_id: i64,
) -> Result<Registration, AppError> {
    let registration = get_registration(pool, registration_id).await?;
    require_reviewer(pool, actor, &registration).await?;

    if !matches!(
        registration.status,
        RegistrationStatus::Accepted | RegistrationStatus::Enrolled
    ) {
        return Err(AppError::PreconditionFailed(format!(
            "Cannot record payment for a {} registration",
            registration.status
        )));
    }

    let mut tx = pool.begin().await?;
    let marked = set_payment_status(
        &mut tx,
        registration.id,
        PaymentStatus::Unpaid,
        PaymentStatus::Paid,
    )
    .await?;
    if !marked {
        return Err(AppError::PreconditionFailed(format!(
            "Registration {} is already paid",
            registration.id
        )));
    }
    tx.commit().await?;

    let program = get_program(pool, registration.program_id).await?;
    let updated = get_registration(pool, registration.id).await?;

    let mut outbox = Outbox::new();
    outbox.to_user(
        NotificationEnvelope::new(
            NotificationType::Payment,
            "Payment received",
            format!("Your payment for {} has been recorded.", program.title),
        )
        .addressed_to_applicant(&updated)
        .for_program(&program)
        .action_url(registration_link(updated.id))
        .meta("registration_id", updated.id),
    );
    outbox.to_admins(
        NotificationEnvelope::new(
            NotificationType::Payment,
            "Payment recorded",
            format!(
                "{} recorded payment from {} for {}.",
                actor.display_name,
                applicant_name(&updated),
                program.title
            ),
        )
        .for_program(&program)
        .action_url(registration_link(updated.id))
        .meta("registration_id", updated.id),
    );
    notifier.flush(outbox).await;

    Ok(updated)
}

#[instrument(skip(pool, actor, notes), fields(actor = %actor.email))]
pub async fn update_notes(
    pool: &Pool<Sqlite>,
    actor: &User,
    registration_id: i64,
    notes: &str,
) -> Result<Registration, AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::EditRegistrationNotes)?;

    if notes.len() > MAX_NOTES_LEN {
        return Err(AppError::Validation("Notes are too long".to_string()));
    }

    let registration = get_registration(pool, registration_id).await?;
    require_authority_over_applicant(pool, actor, &registration).await?;

    update_registration_notes(pool, registration.id, notes).await?;

    get_registration(pool, registration.id).await
}

/// Items are independent: one failure does not stop or undo the others.
/// With no ids given, every pending registration of the program is selected.
#[instrument(skip(pool, notifier, actor, registration_ids), fields(actor = %actor.email))]
pub async fn bulk_review(
    pool: &Pool<Sqlite>,
    notifier: &NotificationDispatcher,
    actor: &User,
    program_id: i64,
    registration_ids: Option<&[i64]>,
    decision: ReviewDecision,
) -> Result<BulkOutcome, AppError> {
    actor.require_active()?;
    actor.require_permission(Permission::ReviewRegistrations)?;
    get_program(pool, program_id).await?;

    let mut outcome = BulkOutcome::default();

    let selected: Vec<Registration> = match registration_ids {
        Some(ids) => {
            let mut selected = Vec::with_capacity(ids.len());
            for id in ids {
                match get_registration(pool, *id).await {
                    Ok(registration) => selected.push(registration),
                    Err(AppError::PreconditionFailed(reason)) => {
                        outcome.failed.push(BulkFailure {
                            registration_id: *id,
                            reason,
                        })
                    }
                    Err(e) => return Err(e),
                }
            }
            selected
        }
        None => {
            get_registrations_for_program(pool, program_id, Some(RegistrationStatus::Pending))
                .await?
        }
    };

    for registration in selected {
        if registration.program_id != program_id
            || registration.status != RegistrationStatus::Pending
        {
            outcome.skipped.push(registration.id);
            continue;
        }

        let result = match decision {
            ReviewDecision::Accept => accept(pool, notifier, actor, registration.id).await,
            ReviewDecision::Reject => reject(pool, notifier, actor, registration.id).await,
        };

        match result {
            Ok(_) => outcome.succeeded.push(registration.id),
            Err(err) => {
                warn!(registration_id = registration.id, error = %err, "Bulk review item failed");
                outcome.failed.push(BulkFailure {
                    registration_id: registration.id,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        succeeded = outcome.succeeded.len(),
        skipped = outcome.skipped.len(),
        failed = outcome.failed.len(),
        "Bulk review finished"
    );

    Ok(outcome)
}
