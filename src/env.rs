use std::path::Path;

use anyhow::{Context, anyhow};
use tracing::{info, warn};

use crate::models::DeliveryChannel;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://registrations.db?mode=rwc";
pub const DEFAULT_SESSION_HOURS: i64 = 12;

pub fn load_environment() -> anyhow::Result<()> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> anyhow::Result<()> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)
        .with_context(|| format!("Failed to load environment file {}", path))?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Service settings that aren't Rocket's own. Rocket reads its figment
/// configuration (`ROCKET_*`) separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub session_hours: i64,
    pub notify_channel: DeliveryChannel,
    /// Prefix for the relative links carried in notifications.
    pub public_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            dotenvy::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let session_hours = match dotenvy::var("SESSION_HOURS") {
            Ok(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("SESSION_HOURS is not a number: {}", raw))?,
            Err(_) => DEFAULT_SESSION_HOURS,
        };
        if session_hours < 1 {
            return Err(anyhow!("SESSION_HOURS must be at least 1"));
        }

        let notify_channel = match dotenvy::var("NOTIFY_CHANNEL") {
            Ok(raw) => DeliveryChannel::parse(&raw)
                .ok_or_else(|| anyhow!("NOTIFY_CHANNEL must be email, sms, both or none, got {}", raw))?,
            Err(_) => DeliveryChannel::Email,
        };

        let public_base_url = dotenvy::var("PUBLIC_BASE_URL")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            database_url,
            session_hours,
            notify_channel,
            public_base_url,
        })
    }
}
