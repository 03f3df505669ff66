//! Outbound side-effect ports: in-app notifications, email, and contact lookup.
//!
//! Dispatch is best effort. The core commits first and only then calls these
//! ports through `ServiceContext`, which bounds each call with a timeout and
//! logs failures instead of returning them.

pub mod logging;
pub mod templates;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Category of an in-app notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BookingCreated,
    BookingConfirmed,
    BookingRejected,
    BookingCancelled,
    BookingStarted,
    BookingCompleted,
    ReviewReceived,
    LevelUp,
    BadgeEarned,
}

/// In-app notification addressed to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    /// Business reference the client can link to, e.g. `BOOKING_42`
    pub correlation_ref: Option<String>,
}

impl Notification {
    #[must_use]
    pub fn new(
        user_id: i64,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            body: body.into(),
            kind,
            correlation_ref: None,
        }
    }

    #[must_use]
    pub fn with_ref(mut self, correlation_ref: impl Into<String>) -> Self {
        self.correlation_ref = Some(correlation_ref.into());
        self
    }
}

/// File attached to an email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Rendered email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachment: Option<Attachment>,
}

/// Who to address for a user id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContact {
    pub user_id: i64,
    pub email: String,
    pub display_name: String,
}

/// Delivers in-app notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Sends emails
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Resolves user ids to contact details. `Ok(None)` means unknown user.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn contact(&self, user_id: i64) -> Result<Option<UserContact>>;
}
