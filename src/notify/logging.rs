//! Default adapters that write notifications and emails to the log.
//!
//! The worker binary uses these until a real push/email provider is wired in.

use super::{Email, Mailer, Notification, Notifier};
use crate::errors::Result;
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            user_id = notification.user_id,
            kind = ?notification.kind,
            correlation_ref = notification.correlation_ref.as_deref().unwrap_or(""),
            "Notification: {}",
            notification.title
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        info!(
            to = %email.to,
            attachment = email.attachment.as_ref().map_or("", |a| a.filename.as_str()),
            "Email: {}",
            email.subject
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;

    #[tokio::test]
    async fn test_log_adapters_never_fail() -> Result<()> {
        let notification = Notification::new(1, NotificationKind::BookingCreated, "t", "b")
            .with_ref("BOOKING_1");
        LogNotifier.notify(&notification).await?;

        let email = Email {
            to: "a@example.com".to_string(),
            subject: "s".to_string(),
            html: "<p>x</p>".to_string(),
            attachment: None,
        };
        LogMailer.send(&email).await?;
        Ok(())
    }
}
