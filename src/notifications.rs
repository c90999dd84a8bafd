use serde_json::{Map, Value};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::auth::{Permission, Role, User};
use crate::db::{get_users_by_roles, insert_in_app_notification, insert_notification_log};
use crate::models::{
    DeliveryChannel, DeliveryStatus, NotificationType, Program, Registration, RegistrationStatus,
};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("No phone number on file for {0}")]
    MissingPhone(String),
}

#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub recipient_email: String,
    pub recipient_id: Option<i64>,
    pub recipient_phone: Option<String>,
    pub title: String,
    pub message: String,
    pub kind: NotificationType,
    pub channel: Option<DeliveryChannel>,
    pub status_before: Option<RegistrationStatus>,
    pub status_after: Option<RegistrationStatus>,
    pub action_url: Option<String>,
    pub related_program_id: Option<i64>,
    pub related_program_name: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NotificationEnvelope {
    pub fn new(kind: NotificationType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recipient_email: String::new(),
            recipient_id: None,
            recipient_phone: None,
            title: title.into(),
            message: message.into(),
            kind,
            channel: None,
            status_before: None,
            status_after: None,
            action_url: None,
            related_program_id: None,
            related_program_name: None,
            metadata: Map::new(),
        }
    }

    pub fn addressed_to(mut self, user: &User) -> Self {
        self.recipient_email = user.email.clone();
        self.recipient_id = Some(user.id);
        self.recipient_phone = user.phone.clone();
        self
    }

    /// Addresses the applicant using the snapshot taken at application time.
    pub fn addressed_to_applicant(mut self, registration: &Registration) -> Self {
        self.recipient_email = registration.user_email.clone();
        self.recipient_id = Some(registration.user_id);
        self.recipient_phone = registration.user_phone.clone();
        self
    }

    pub fn for_program(mut self, program: &Program) -> Self {
        self.related_program_id = Some(program.id);
        self.related_program_name = Some(program.title.clone());
        self
    }

    pub fn transition(mut self, before: Option<RegistrationStatus>, after: RegistrationStatus) -> Self {
        self.status_before = before;
        self.status_after = Some(after);
        self
    }

    pub fn via(mut self, channel: DeliveryChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[rocket::async_trait]
pub trait NotificationTransport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send_email(&self, to: &str, envelope: &NotificationEnvelope) -> Result<(), NotificationError>;
    async fn send_sms(&self, to: &str, envelope: &NotificationEnvelope) -> Result<(), NotificationError>;
}

/// Used when no mail or SMS gateway is configured.
#[derive(Debug, Clone, Default)]
pub struct LogTransport {
    public_base_url: String,
}

impl LogTransport {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
        }
    }

    fn link(&self, envelope: &NotificationEnvelope) -> Option<String> {
        envelope
            .action_url
            .as_ref()
            .map(|url| format!("{}{}", self.public_base_url, url))
    }
}

#[rocket::async_trait]
impl NotificationTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_email(&self, to: &str, envelope: &NotificationEnvelope) -> Result<(), NotificationError> {
        info!(
            to = %to,
            title = %envelope.title,
            kind = envelope.kind.as_str(),
            link = ?self.link(envelope),
            "Email notification"
        );
        Ok(())
    }

    async fn send_sms(&self, to: &str, envelope: &NotificationEnvelope) -> Result<(), NotificationError> {
        info!(to = %to, message = %envelope.message, "SMS notification");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DeliveryReport {
    fn record(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Sent => self.sent += 1,
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Skipped => self.skipped += 1,
        }
    }

    fn merge(&mut self, other: DeliveryReport) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.sent + self.failed + self.skipped
    }
}

#[derive(Debug, Clone)]
pub enum OutboxMessage {
    User(NotificationEnvelope),
    Admins(NotificationEnvelope),
}

/// Notifications produced by a workflow step, held until its transaction
/// has committed.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    messages: Vec<OutboxMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_user(&mut self, envelope: NotificationEnvelope) {
        self.messages.push(OutboxMessage::User(envelope));
    }

    pub fn to_admins(&mut self, template: NotificationEnvelope) {
        self.messages.push(OutboxMessage::Admins(template));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    pool: Pool<Sqlite>,
    transport: Arc<dyn NotificationTransport>,
    default_channel: DeliveryChannel,
}

impl NotificationDispatcher {
    pub fn new(
        pool: Pool<Sqlite>,
        transport: Arc<dyn NotificationTransport>,
        default_channel: DeliveryChannel,
    ) -> Self {
        Self {
            pool,
            transport,
            default_channel,
        }
    }

    /// Only call after the transaction that produced the outbox has committed.
    #[instrument(skip_all, fields(messages = outbox.len()))]
    pub async fn flush(&self, outbox: Outbox) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if outbox.is_empty() {
            return report;
        }

        for message in outbox.messages {
            match message {
                OutboxMessage::User(envelope) => report.record(self.dispatch(envelope).await),
                OutboxMessage::Admins(template) => {
                    report.merge(self.broadcast_to_admins(template).await)
                }
            }
        }

        if report.failed > 0 {
            warn!(sent = report.sent, failed = report.failed, "Some notifications were not delivered");
        } else {
            debug!(total = report.total(), "Outbox flushed");
        }

        report
    }

    #[instrument(skip_all, fields(recipient = %envelope.recipient_email, kind = envelope.kind.as_str()))]
    pub async fn dispatch(&self, envelope: NotificationEnvelope) -> DeliveryStatus {
        let channel = envelope.channel.unwrap_or(self.default_channel);

        let (status, error) = match self.deliver(&envelope, channel).await {
            Ok(status) => (status, None),
            Err(err) => {
                warn!(error = %err, transport = self.transport.name(), "Notification delivery failed");
                (DeliveryStatus::Failed, Some(err.to_string()))
            }
        };

        if let Err(err) = insert_notification_log(&self.pool, &envelope, channel, status, error.as_deref()).await {
            warn!(error = %err, "Failed to write notification log");
        }

        if let Some(user_id) = envelope.recipient_id {
            if let Err(err) = insert_in_app_notification(&self.pool, user_id, &envelope).await {
                warn!(error = %err, user_id, "Failed to write in-app notification");
            }
        }

        status
    }

    async fn deliver(
        &self,
        envelope: &NotificationEnvelope,
        channel: DeliveryChannel,
    ) -> Result<DeliveryStatus, NotificationError> {
        if channel == DeliveryChannel::None {
            debug!("Channel is none, recording only");
            return Ok(DeliveryStatus::Skipped);
        }

        if channel.wants_email() {
            self.transport
                .send_email(&envelope.recipient_email, envelope)
                .await?;
        }

        if channel.wants_sms() {
            let phone = envelope
                .recipient_phone
                .as_deref()
                .ok_or_else(|| NotificationError::MissingPhone(envelope.recipient_email.clone()))?;
            self.transport.send_sms(phone, envelope).await?;
        }

        Ok(DeliveryStatus::Sent)
    }

    #[instrument(skip_all, fields(kind = template.kind.as_str()))]
    pub async fn broadcast_to_admins(&self, template: NotificationEnvelope) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let roles = Role::with_permission(Permission::ReceiveAdminNotifications);
        let admins = match get_users_by_roles(&self.pool, &roles).await {
            Ok(admins) => admins,
            Err(err) => {
                warn!(error = %err, "Could not look up admin recipients");
                return report;
            }
        };

        debug!(admins = admins.len(), "Broadcasting to admins");

        for admin in &admins {
            let envelope = template.clone().addressed_to(admin);
            report.record(self.dispatch(envelope).await);
        }

        report
    }
}
