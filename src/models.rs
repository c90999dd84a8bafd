use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub duration: String,
    pub instructor: String,
    pub max_participants: i64,
    pub current_participants: i64,
    pub is_visible: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbProgram {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub duration: Option<String>,
    pub instructor: Option<String>,
    pub max_participants: Option<i64>,
    pub current_participants: Option<i64>,
    pub is_visible: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<DbProgram> for Program {
    fn from(program: DbProgram) -> Self {
        Self {
            id: program.id.unwrap_or_default(),
            title: program.title.unwrap_or_default(),
            category: program.category.unwrap_or_default(),
            duration: program.duration.unwrap_or_default(),
            instructor: program.instructor.unwrap_or_default(),
            max_participants: program.max_participants.unwrap_or_default(),
            current_participants: program.current_participants.unwrap_or_default(),
            is_visible: program.is_visible.unwrap_or(true),
            created_at: program.created_at.unwrap_or_else(Utc::now),
        }
    }
}

impl Program {
    pub fn seats_left(&self) -> i64 {
        (self.max_participants - self.current_participants).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Accepted,
    Rejected,
    Enrolled,
    Cancelled,
    Completed,
}

impl RegistrationStatus {
    /// Active registrations hold a seat and block a second registration for
    /// the same user.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            RegistrationStatus::Cancelled | RegistrationStatus::Rejected
        )
    }

    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        use RegistrationStatus::*;

        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Accepted, Enrolled)
                | (Accepted, Cancelled)
                | (Enrolled, Completed)
        )
    }

    /// Whether moving into `next` gives the held seat back to the program.
    pub fn releases_seat(&self, next: RegistrationStatus) -> bool {
        self.is_active() && !next.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Accepted => "accepted",
            RegistrationStatus::Rejected => "rejected",
            RegistrationStatus::Enrolled => "enrolled",
            RegistrationStatus::Cancelled => "cancelled",
            RegistrationStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "pending" => Ok(RegistrationStatus::Pending),
            "accepted" => Ok(RegistrationStatus::Accepted),
            "rejected" => Ok(RegistrationStatus::Rejected),
            "enrolled" => Ok(RegistrationStatus::Enrolled),
            "cancelled" => Ok(RegistrationStatus::Cancelled),
            "completed" => Ok(RegistrationStatus::Completed),
            _ => Err(AppError::Internal(format!(
                "Unknown registration status: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "unpaid" | "" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            _ => Err(AppError::Internal(format!("Unknown payment status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub program_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub user_phone: Option<String>,
    pub status: RegistrationStatus,
    pub payment_status: PaymentStatus,
    pub applied_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<i64>,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbRegistration {
    pub id: Option<i64>,
    pub program_id: Option<i64>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_phone: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<i64>,
    pub notes: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbRegistration> for Registration {
    type Error = AppError;

    fn try_from(db: DbRegistration) -> Result<Self, Self::Error> {
        let applied_at = db.applied_at.unwrap_or_else(Utc::now);

        Ok(Self {
            id: db.id.unwrap_or_default(),
            program_id: db.program_id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            user_name: db.user_name.unwrap_or_default(),
            user_email: db.user_email.unwrap_or_default(),
            user_phone: db.user_phone.filter(|p| !p.is_empty()),
            status: RegistrationStatus::from_str(db.status.as_deref().unwrap_or("pending"))?,
            payment_status: PaymentStatus::from_str(db.payment_status.as_deref().unwrap_or(""))?,
            applied_at,
            reviewed_at: db.reviewed_at,
            reviewed_by: db.reviewed_by,
            notes: db.notes.unwrap_or_default(),
            updated_at: db.updated_at.unwrap_or(applied_at),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    StatusChange,
    BookingCreated,
    BookingUpdated,
    Payment,
    System,
    Announcement,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::StatusChange => "status_change",
            NotificationType::BookingCreated => "booking_created",
            NotificationType::BookingUpdated => "booking_updated",
            NotificationType::Payment => "payment",
            NotificationType::System => "system",
            NotificationType::Announcement => "announcement",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "status_change" => NotificationType::StatusChange,
            "booking_created" => NotificationType::BookingCreated,
            "booking_updated" => NotificationType::BookingUpdated,
            "payment" => NotificationType::Payment,
            "announcement" => NotificationType::Announcement,
            _ => NotificationType::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    Sms,
    Both,
    None,
}

impl DeliveryChannel {
    pub fn wants_email(&self) -> bool {
        matches!(self, DeliveryChannel::Email | DeliveryChannel::Both)
    }

    pub fn wants_sms(&self) -> bool {
        matches!(self, DeliveryChannel::Sms | DeliveryChannel::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Sms => "sms",
            DeliveryChannel::Both => "both",
            DeliveryChannel::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "email" => Some(DeliveryChannel::Email),
            "sms" => Some(DeliveryChannel::Sms),
            "both" => Some(DeliveryChannel::Both),
            "none" => Some(DeliveryChannel::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

/// Read/unread inbox entry shown inside the app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppNotification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: NotificationType,
    pub action_url: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbInAppNotification {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub kind: Option<String>,
    pub action_url: Option<String>,
    pub is_read: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<DbInAppNotification> for InAppNotification {
    fn from(db: DbInAppNotification) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            title: db.title.unwrap_or_default(),
            message: db.message.unwrap_or_default(),
            kind: NotificationType::parse(db.kind.as_deref().unwrap_or_default()),
            action_url: db.action_url,
            is_read: db.is_read.unwrap_or_default(),
            created_at: db.created_at.unwrap_or_else(Utc::now),
        }
    }
}
