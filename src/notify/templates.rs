//! Minimal email bodies for booking events.

use super::{Attachment, Email, UserContact};
use crate::entities::BookingModel;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// Escapes text for use in HTML element content and quoted attributes.
fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn meeting_line(booking: &BookingModel) -> String {
    booking.meeting_link.as_deref().map_or_else(String::new, |link| {
        let link = escape_html(link);
        format!("<p>Meeting room: <a href=\"{link}\">{link}</a></p>")
    })
}

/// Plain-text invoice attached to the booking success email.
#[must_use]
pub fn invoice_text(booking: &BookingModel, currency: &str) -> String {
    format!(
        "INVOICE booking #{id}\n\
         Mentor: {mentor}\n\
         Learner: {learner}\n\
         Session: {start} ({minutes} minutes)\n\
         Funding: {funding:?}\n\
         Amount: {price} {currency}\n",
        id = booking.id,
        mentor = booking.mentor_id,
        learner = booking.learner_id,
        start = booking.start_time.format(DATE_FORMAT),
        minutes = booking.duration_minutes,
        funding = booking.funding,
        price = booking.price,
    )
}

/// Sent to the learner once a booking exists (wallet or gateway path).
#[must_use]
pub fn booking_success(
    learner: &UserContact,
    booking: &BookingModel,
    currency: &str,
    portal_base_url: &str,
) -> Email {
    let html = format!(
        "<p>Hi {name},</p>\
         <p>Your mentoring session #{id} on {start} is booked and waiting for the mentor's approval.</p>\
         {meeting}\
         <p><a href=\"{portal}/bookings/{id}\">View booking</a></p>",
        name = escape_html(&learner.display_name),
        id = booking.id,
        start = booking.start_time.format(DATE_FORMAT),
        meeting = meeting_line(booking),
        portal = escape_html(portal_base_url),
    );
    Email {
        to: learner.email.clone(),
        subject: "Mentor booking successful".to_string(),
        html,
        attachment: Some(Attachment {
            filename: format!("invoice_booking_{}.txt", booking.id),
            content_type: "text/plain".to_string(),
            content: invoice_text(booking, currency).into_bytes(),
        }),
    }
}

/// Sent to both participants when the mentor approves.
#[must_use]
pub fn booking_approved(recipient: &UserContact, booking: &BookingModel) -> Email {
    let html = format!(
        "<p>Hi {name},</p>\
         <p>Session #{id} on {start} is confirmed.</p>\
         {meeting}",
        name = escape_html(&recipient.display_name),
        id = booking.id,
        start = booking.start_time.format(DATE_FORMAT),
        meeting = meeting_line(booking),
    );
    Email {
        to: recipient.email.clone(),
        subject: format!("Booking #{} confirmed", booking.id),
        html,
        attachment: None,
    }
}

/// Sent to both participants shortly before the session starts.
#[must_use]
pub fn booking_reminder(recipient: &UserContact, booking: &BookingModel) -> Email {
    let html = format!(
        "<p>Hi {name},</p>\
         <p>Your session #{id} starts at {start}.</p>\
         {meeting}",
        name = escape_html(&recipient.display_name),
        id = booking.id,
        start = booking.start_time.format(DATE_FORMAT),
        meeting = meeting_line(booking),
    );
    Email {
        to: recipient.email.clone(),
        subject: format!("Reminder: session #{} starts soon", booking.id),
        html,
        attachment: None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::{BookingStatus, Funding};
    use chrono::{TimeZone, Utc};

    fn sample_booking() -> BookingModel {
        let start = Utc.with_ymd_and_hms(2030, 1, 2, 9, 0, 0).unwrap();
        BookingModel {
            id: 7,
            mentor_id: 1,
            learner_id: 2,
            start_time: start,
            end_time: start + chrono::Duration::minutes(60),
            duration_minutes: 60,
            price: 500_000,
            funding: Funding::Wallet,
            payment_reference: None,
            status: BookingStatus::Pending,
            meeting_link: Some("https://meet.jit.si/MentorSession-7-1-2".to_string()),
            rejection_reason: None,
            cancellation_reason: None,
            created_at: start,
            updated_at: start,
        }
    }

    fn contact() -> UserContact {
        UserContact {
            user_id: 2,
            email: "learner@example.com".to_string(),
            display_name: "Learner".to_string(),
        }
    }

    #[test]
    fn test_success_email_carries_invoice() {
        let email = booking_success(&contact(), &sample_booking(), "VND", "http://portal");
        assert_eq!(email.to, "learner@example.com");
        let attachment = email.attachment.unwrap();
        assert_eq!(attachment.filename, "invoice_booking_7.txt");
        let text = String::from_utf8(attachment.content).unwrap();
        assert!(text.contains("500000 VND"));
        assert!(email.html.contains("MentorSession-7-1-2"));
        assert!(email.html.contains("http://portal/bookings/7"));
    }

    #[test]
    fn test_reminder_mentions_start_time() {
        let email = booking_reminder(&contact(), &sample_booking());
        assert!(email.html.contains("2030-01-02 09:00 UTC"));
        assert!(email.attachment.is_none());
    }

    #[test]
    fn test_user_supplied_text_is_escaped() {
        let mut recipient = contact();
        recipient.display_name = "<b>Eve</b> & \"co\"".to_string();
        let mut booking = sample_booking();
        booking.meeting_link = Some("https://meet.test/a?x=1&y=\"2\"".to_string());

        let email = booking_approved(&recipient, &booking);
        assert!(email.html.contains("Hi &lt;b&gt;Eve&lt;/b&gt; &amp; &quot;co&quot;,"));
        assert!(!email.html.contains("<b>Eve</b>"));
        assert!(email.html.contains("href=\"https://meet.test/a?x=1&amp;y=&quot;2&quot;\""));
    }
}
