//! Shared handles for the core operations.
//!
//! Collaborator calls made through the helpers here are bounded by the
//! notification timeout and never fail the caller; by the time they run the
//! financial transition has already committed.

use crate::config::Settings;
use crate::gateway::PaymentGateway;
use crate::notify::{Email, Mailer, Notification, Notifier, UserContact, UserDirectory};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::warn;

/// Database plus external collaborators
#[derive(Clone)]
pub struct ServiceContext {
    pub db: DatabaseConnection,
    pub settings: Arc<Settings>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub mailer: Arc<dyn Mailer>,
    pub directory: Arc<dyn UserDirectory>,
}

impl ServiceContext {
    /// Sends one notification, logging and swallowing any failure.
    pub async fn notify(&self, notification: Notification) {
        let timeout = self.settings.notifications.timeout();
        match tokio::time::timeout(timeout, self.notifier.notify(&notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                user_id = notification.user_id,
                "Notification '{}' failed: {e}", notification.title
            ),
            Err(_) => warn!(
                user_id = notification.user_id,
                "Notification '{}' timed out", notification.title
            ),
        }
    }

    pub async fn notify_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.notify(notification).await;
        }
    }

    /// Looks up a contact; lookup failures are logged and treated as unknown.
    pub async fn contact(&self, user_id: i64) -> Option<UserContact> {
        let timeout = self.settings.notifications.timeout();
        match tokio::time::timeout(timeout, self.directory.contact(user_id)).await {
            Ok(Ok(Some(contact))) => Some(contact),
            Ok(Ok(None)) => {
                warn!(user_id, "No contact details for user, email skipped");
                None
            }
            Ok(Err(e)) => {
                warn!(user_id, "Contact lookup failed: {e}");
                None
            }
            Err(_) => {
                warn!(user_id, "Contact lookup timed out");
                None
            }
        }
    }

    /// Sends one email, logging and swallowing any failure.
    pub async fn send_email(&self, email: Email) {
        let timeout = self.settings.notifications.timeout();
        match tokio::time::timeout(timeout, self.mailer.send(&email)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(to = %email.to, "Email '{}' failed: {e}", email.subject),
            Err(_) => warn!(to = %email.to, "Email '{}' timed out", email.subject),
        }
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("db", &self.db)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
