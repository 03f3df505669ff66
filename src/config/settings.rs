//! Application settings loaded from `mentor_booking.toml` plus environment overrides.
//!
//! Every field has a default so an empty (or missing) file yields a runnable
//! configuration for local development. Secrets (gateway keys, database URL)
//! are expected to come from the environment, typically via `.env`.

use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default settings file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "mentor_booking.toml";

/// Root of the settings file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `SeaORM` connection URL
    pub database_url: String,
    /// Upper bound for the connection pool
    pub max_connections: u32,
    /// Booking policy
    pub booking: BookingSettings,
    /// Background job cadence
    pub scheduler: SchedulerSettings,
    /// Payment gateway credentials and behavior
    pub gateway: GatewaySettings,
    /// Side-effect dispatch
    pub notifications: NotificationSettings,
    /// Static user directory for the worker binary
    pub users: Vec<UserEntry>,
}

/// Booking policy constants
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookingSettings {
    /// ISO currency code for booking payments
    pub currency: String,
    /// Fraction of the price paid to the mentor on completion
    pub mentor_payout_share: Decimal,
    /// Learners may cancel only this many hours before the start
    pub cancel_cutoff_hours: i64,
    /// Pending bookings older than this are auto-cancelled
    pub auto_cancel_after_hours: i64,
    /// Reminder email lead time before the session start
    pub reminder_lead_minutes: i64,
    /// Base URL of the video meeting service
    pub meeting_base_url: String,
    /// Room name prefix for generated meeting links
    pub meeting_room_prefix: String,
    /// Web portal base URL used in email links
    pub portal_base_url: String,
}

/// Scheduler cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between scheduler passes
    pub interval_secs: u64,
    /// Maximum rows handled per pass and job type
    pub batch_size: u64,
}

/// Payment gateway (PayOS) settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// API base URL
    pub base_url: String,
    /// `x-client-id` header value
    pub client_id: String,
    /// `x-api-key` header value
    pub api_key: String,
    /// HMAC key for request and webhook signatures
    pub checksum_key: String,
    /// HTTP timeout for gateway calls
    pub timeout_secs: u64,
    /// Gateway references the provider uses for its own test webhooks
    pub sandbox_test_references: Vec<String>,
}

/// Notification/email dispatch settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Upper bound for a single notification or email dispatch
    pub timeout_secs: u64,
}

/// One entry of the static user directory
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    /// User id
    pub id: i64,
    /// Email address for booking emails
    pub email: String,
    /// Name shown in emails
    pub display_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/mentor_booking.sqlite?mode=rwc".to_string(),
            max_connections: 5,
            booking: BookingSettings::default(),
            scheduler: SchedulerSettings::default(),
            gateway: GatewaySettings::default(),
            notifications: NotificationSettings::default(),
            users: Vec::new(),
        }
    }
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            currency: "VND".to_string(),
            mentor_payout_share: dec!(0.80),
            cancel_cutoff_hours: 24,
            auto_cancel_after_hours: 24,
            reminder_lead_minutes: 15,
            meeting_base_url: "https://meet.jit.si".to_string(),
            meeting_room_prefix: "MentorSession".to_string(),
            portal_base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            batch_size: 100,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "https://api-merchant.payos.vn".to_string(),
            client_id: String::new(),
            api_key: String::new(),
            checksum_key: String::new(),
            timeout_secs: 15,
            sandbox_test_references: vec!["123".to_string()],
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl GatewaySettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether `reference` is one the provider sends in its own test webhooks.
    #[must_use]
    pub fn is_sandbox_reference(&self, reference: &str) -> bool {
        self.sandbox_test_references.iter().any(|r| r == reference)
    }
}

impl NotificationSettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Parses settings from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse settings: {e}"),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Overrides secrets and endpoints from environment-style variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(v) = lookup("PAYOS_BASE_URL") {
            self.gateway.base_url = v;
        }
        if let Some(v) = lookup("PAYOS_CLIENT_ID") {
            self.gateway.client_id = v;
        }
        if let Some(v) = lookup("PAYOS_API_KEY") {
            self.gateway.api_key = v;
        }
        if let Some(v) = lookup("PAYOS_CHECKSUM_KEY") {
            self.gateway.checksum_key = v;
        }
    }

    fn validate(&self) -> Result<()> {
        let share = self.booking.mentor_payout_share;
        if share < Decimal::ZERO || share > Decimal::ONE {
            return Err(Error::Config {
                message: format!("mentor_payout_share must be within [0, 1], got {share}"),
            });
        }
        if self.scheduler.interval_secs == 0 {
            return Err(Error::Config {
                message: "scheduler.interval_secs must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads settings from a TOML file, falling back to defaults if the file is absent,
/// then applies process environment overrides.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load settings from: {:?}", path_ref);

    let mut settings = if path_ref.exists() {
        let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
            message: format!("Failed to read settings file {path_ref:?}: {e}"),
        })?;
        Settings::from_toml(&contents)?
    } else {
        tracing::warn!("Settings file {:?} not found, using defaults", path_ref);
        Settings::default()
    };

    settings.apply_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}
