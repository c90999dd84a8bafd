#[macro_use]
extern crate rocket;

mod accounts;
mod api;
mod auth;
mod capacity;
mod database;
mod db;
mod env;
mod error;
mod models;
mod notifications;
mod programs;
mod registrations;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use std::sync::Arc;

use api::{
    api_accept, api_bulk_accept, api_bulk_reject, api_cancel, api_complete, api_create_program,
    api_enroll, api_get_all_users, api_get_program, api_list_programs, api_login, api_logout,
    api_mark_all_read, api_mark_read, api_me, api_my_registrations, api_notifications,
    api_program_registrations, api_reconcile, api_record_payment, api_register, api_reject,
    api_set_capacity, api_set_user_role, api_set_user_status, api_set_visibility, api_signup,
    api_unread_count, api_update_notes, api_withdraw, health,
};
use auth::{forbidden_api, unauthorized_api};
use database::apply_schema;
use db::clean_expired_sessions;
use env::{AppConfig, load_environment};
use error::AppError;
use notifications::{LogTransport, NotificationDispatcher};
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use telemetry::{TelemetryFairing, init_telemetry};
use thiserror::Error;
use tracing::{error, info};

const SESSION_SWEEP_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    load_environment()?;
    let otel_guard = init_telemetry()?;
    if otel_guard.is_exporting() {
        info!("Exporting spans over OTLP");
    }

    let config = AppConfig::from_env()?;

    let pool = SqlitePool::connect(&config.database_url).await?;
    apply_schema(&pool).await?;

    spawn_session_sweeper(pool.clone());

    let dispatcher = NotificationDispatcher::new(
        pool.clone(),
        Arc::new(LogTransport::new(config.public_base_url.clone())),
        config.notify_channel,
    );

    let _rocket = init_rocket(pool, dispatcher, config).launch().await?;

    Ok(())
}

fn spawn_session_sweeper(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
        }
    });
}

pub fn init_rocket(
    pool: SqlitePool,
    dispatcher: NotificationDispatcher,
    config: AppConfig,
) -> Rocket<Build> {
    info!(
        channel = config.notify_channel.as_str(),
        "Starting training registrations"
    );

    rocket::build()
        .manage(pool)
        .manage(dispatcher)
        .manage(config)
        .mount(
            "/api",
            routes![
                health,
                api_signup,
                api_login,
                api_logout,
                api_me,
                api_list_programs,
                api_create_program,
                api_get_program,
                api_set_visibility,
                api_set_capacity,
                api_reconcile,
                api_register,
                api_program_registrations,
                api_bulk_accept,
                api_bulk_reject,
                api_my_registrations,
                api_withdraw,
                api_cancel,
                api_accept,
                api_reject,
                api_enroll,
                api_complete,
                api_record_payment,
                api_update_notes,
                api_notifications,
                api_unread_count,
                api_mark_read,
                api_mark_all_read,
                api_get_all_users,
                api_set_user_status,
                api_set_user_role,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
