//! Shared test utilities for the mentor booking core.
//!
//! This module provides an in-memory database, a fully wired
//! `ServiceContext` with in-process fakes for the gateway and the
//! notification ports, and seed helpers with sensible defaults.
#![allow(clippy::unwrap_used)]

use crate::{
    config::{Settings, settings::UserEntry, users::StaticUserDirectory},
    core::{booking::BookingRequest, context::ServiceContext, wallet},
    entities::mentor_profile,
    errors::{Error, Result},
    gateway::{
        CheckoutIntent, CheckoutRequest, PaymentGateway, WebhookEvent, WebhookPayload,
        payos::parse_webhook_with_key,
    },
    notify::{Email, Mailer, Notification, NotificationKind, Notifier},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const MENTOR: i64 = 1;
pub const LEARNER: i64 = 2;
pub const OTHER_LEARNER: i64 = 3;
pub const OTHER_MENTOR: i64 = 4;

/// Checksum key the fake gateway validates webhooks with
pub const TEST_CHECKSUM_KEY: &str = "test-checksum-key";

/// Creates an in-memory `SQLite` database with all tables initialized.
///
/// The pool is pinned to a single connection: every connection to
/// `sqlite::memory:` would otherwise see its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Default settings plus a contact for every test user.
#[must_use]
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.database_url = "sqlite::memory:".to_string();
    settings.gateway.checksum_key = TEST_CHECKSUM_KEY.to_string();
    settings.notifications.timeout_secs = 1;
    settings.users = [
        (MENTOR, "mentor@example.com", "Mentor One"),
        (LEARNER, "learner@example.com", "Learner Two"),
        (OTHER_LEARNER, "other.learner@example.com", "Learner Three"),
        (OTHER_MENTOR, "other.mentor@example.com", "Mentor Four"),
    ]
    .into_iter()
    .map(|(id, email, name)| UserEntry {
        id,
        email: email.to_string(),
        display_name: name.to_string(),
    })
    .collect();
    settings
}

#[derive(Debug, Default)]
struct FakeGatewayState {
    created: Vec<CheckoutRequest>,
    statuses: HashMap<String, String>,
    fail_create: bool,
    fail_verify: bool,
}

/// In-process gateway. The gateway reference is the order code.
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<FakeGatewayState>,
}

impl FakeGateway {
    /// Checkout requests received so far.
    pub fn created(&self) -> Vec<CheckoutRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn fail_verify(&self, fail: bool) {
        self.state.lock().unwrap().fail_verify = fail;
    }

    /// Status returned by `verify` for `gateway_reference` (default `PENDING`).
    pub fn set_status(&self, gateway_reference: &str, status: &str) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(gateway_reference.to_string(), status.to_string());
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, request: &CheckoutRequest) -> Result<CheckoutIntent> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(Error::Gateway {
                message: "checkout service unavailable".to_string(),
            });
        }
        state.created.push(request.clone());
        Ok(CheckoutIntent {
            checkout_url: format!("https://pay.test/checkout/{}", request.order_code),
            gateway_reference: request.order_code.to_string(),
        })
    }

    async fn verify(&self, gateway_reference: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        if state.fail_verify {
            return Err(Error::Gateway {
                message: "status endpoint timed out".to_string(),
            });
        }
        Ok(state
            .statuses
            .get(gateway_reference)
            .cloned()
            .unwrap_or_else(|| "PENDING".to_string()))
    }

    fn parse_webhook(&self, payload: &WebhookPayload) -> Result<WebhookEvent> {
        parse_webhook_with_key(TEST_CHECKSUM_KEY, payload)
    }
}

/// Notifier that keeps everything it was asked to deliver
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Kinds delivered to `user_id`, in order.
    pub fn kinds_for(&self, user_id: i64) -> Vec<NotificationKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Mailer that keeps every email
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Wired context plus typed handles on the fakes behind it
pub struct TestHarness {
    pub ctx: ServiceContext,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub mailer: Arc<RecordingMailer>,
}

/// Sets up a complete test environment: fresh database, fakes, static directory.
pub async fn setup_test_context(settings: Settings) -> Result<TestHarness> {
    let db = setup_test_db().await?;
    let gateway = Arc::new(FakeGateway::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let mailer = Arc::new(RecordingMailer::default());
    let directory = Arc::new(StaticUserDirectory::from_entries(&settings.users));

    let ctx = ServiceContext {
        db,
        settings: Arc::new(settings),
        gateway: Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
        mailer: Arc::clone(&mailer) as Arc<dyn Mailer>,
        directory,
    };

    Ok(TestHarness {
        ctx,
        gateway,
        notifier,
        mailer,
    })
}

/// Deposits `amount` into the user's wallet under a fresh correlation id.
pub async fn fund_wallet(db: &DatabaseConnection, user_id: i64, amount: i64) -> Result<()> {
    let correlation = format!("TEST_FUNDING_{}", uuid::Uuid::new_v4().simple());
    wallet::deposit(db, user_id, amount, &correlation, "Test funding").await?;
    Ok(())
}

/// Creates an empty gamification profile for a mentor.
pub async fn seed_mentor_profile(db: &DatabaseConnection, mentor_id: i64) -> Result<mentor_profile::Model> {
    let profile = mentor_profile::ActiveModel {
        user_id: Set(mentor_id),
        skill_points: Set(0),
        current_level: Set(0),
        badges: Set("[]".to_string()),
        rating_count: Set(0),
        rating_average: Set(0.0),
        updated_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;
    Ok(profile)
}

/// One-hour session with `mentor_id` starting `days` from now.
///
/// # Arguments
/// * `mentor_id` - Mentor to book
/// * `days` - Days until the session starts
/// * `price` - Agreed price
#[must_use]
pub fn request_in_days(mentor_id: i64, days: i64, price: i64) -> BookingRequest {
    BookingRequest {
        mentor_id,
        start_time: Utc::now() + Duration::days(days),
        duration_minutes: 60,
        price,
    }
}
