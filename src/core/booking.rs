//! Booking lifecycle - the state machine over `bookings` and its escrow effects.
//!
//! ```text
//! PENDING   --approve-->     CONFIRMED
//! PENDING   --reject-->      REJECTED   (release escrow)
//! PENDING   --auto-cancel--> CANCELLED  (release escrow)
//! PENDING/CONFIRMED --learner cancel before cutoff--> CANCELLED (release escrow)
//! CONFIRMED --start-->       ONGOING
//! CONFIRMED/ONGOING --complete--> COMPLETED (capture escrow, pay mentor, gamification)
//! ```
//!
//! Every transition is a conditional update keyed on the expected status,
//! executed in the same database transaction as its wallet effects. Wallet
//! effects use `BOOKING_<id>` as correlation id. Notifications and emails are
//! dispatched only after commit.

use crate::{
    config::Settings,
    core::{
        context::ServiceContext,
        gamification::{self, GamificationEvent},
        money::{ensure_positive, payout_share},
        payment::{self, PaymentCreated, PaymentRequest},
        wallet,
    },
    entities::{
        Booking, BookingReview, BookingStatus, Funding, JobKind, JobStatus, PaymentKind,
        PaymentMethod, PaymentStatus, ScheduledJob, booking, booking_review, payment_transaction,
        scheduled_job,
    },
    errors::{Error, Result},
    notify::{Notification, NotificationKind, templates},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ConnectionTrait, PaginatorTrait, QueryOrder, Set, TransactionTrait, prelude::*,
    sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Booking parameters chosen by the learner.
///
/// Also stored as the metadata of a gateway payment so the booking can be
/// rebuilt once the payment completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub mentor_id: i64,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub price: i64,
}

impl BookingRequest {
    #[must_use]
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }

    fn validate(&self, learner_id: i64, now: DateTime<Utc>) -> Result<()> {
        ensure_positive(self.price)?;
        if self.duration_minutes <= 0 {
            return Err(Error::Validation {
                message: format!("Duration must be positive, got {}", self.duration_minutes),
            });
        }
        if self.mentor_id == learner_id {
            return Err(Error::Validation {
                message: "Mentors cannot book themselves".to_string(),
            });
        }
        if self.start_time <= now {
            return Err(Error::Validation {
                message: "Start time must be in the future".to_string(),
            });
        }
        Ok(())
    }
}

/// Which side of the bookings to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingView {
    AsMentor,
    AsLearner,
}

/// Deterministic video room for a booking.
#[must_use]
pub fn meeting_link(settings: &Settings, booking: &booking::Model) -> String {
    format!(
        "{}/{}-{}-{}-{}",
        settings.booking.meeting_base_url.trim_end_matches('/'),
        settings.booking.meeting_room_prefix,
        booking.id,
        booking.mentor_id,
        booking.learner_id
    )
}

/// Fails with `SchedulingConflict` if the mentor or the learner already has an
/// active booking overlapping `[start, end)`.
pub async fn ensure_slot_available<C>(
    db: &C,
    mentor_id: i64,
    learner_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let overlapping = || {
        Booking::find()
            .filter(booking::Column::Status.is_in(BookingStatus::ACTIVE))
            .filter(booking::Column::StartTime.lt(end))
            .filter(booking::Column::EndTime.gt(start))
    };

    if overlapping()
        .filter(booking::Column::MentorId.eq(mentor_id))
        .one(db)
        .await?
        .is_some()
    {
        return Err(Error::SchedulingConflict {
            message: format!("Mentor {mentor_id} already has a booking in this time slot"),
        });
    }
    if overlapping()
        .filter(booking::Column::LearnerId.eq(learner_id))
        .one(db)
        .await?
        .is_some()
    {
        return Err(Error::SchedulingConflict {
            message: format!("Learner {learner_id} already has a booking in this time slot"),
        });
    }
    Ok(())
}

/// Inserts a `PENDING` booking, sets its meeting link and schedules its reminder.
async fn insert_booking<C>(
    db: &C,
    settings: &Settings,
    learner_id: i64,
    request: &BookingRequest,
    funding: Funding,
    payment_reference: Option<String>,
) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let inserted = booking::ActiveModel {
        mentor_id: Set(request.mentor_id),
        learner_id: Set(learner_id),
        start_time: Set(request.start_time),
        end_time: Set(request.end_time()),
        duration_minutes: Set(request.duration_minutes),
        price: Set(request.price),
        funding: Set(funding),
        payment_reference: Set(payment_reference),
        status: Set(BookingStatus::Pending),
        meeting_link: Set(None),
        rejection_reason: Set(None),
        cancellation_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    let link = meeting_link(settings, &inserted);
    let mut active: booking::ActiveModel = inserted.into();
    active.meeting_link = Set(Some(link));
    let saved = active.update(db).await?;

    schedule_reminder(db, settings, &saved).await?;
    Ok(saved)
}

/// Durable reminder row for a booking; a second call for the same booking is a no-op.
pub async fn schedule_reminder<C>(db: &C, settings: &Settings, booking: &booking::Model) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let due = (booking.start_time - Duration::minutes(settings.booking.reminder_lead_minutes)).max(now);
    let job = scheduled_job::ActiveModel {
        job_key: Set(format!("REMINDER:{}", booking.id)),
        kind: Set(JobKind::Reminder),
        booking_id: Set(booking.id),
        due_at: Set(due),
        status: Set(JobStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    ScheduledJob::insert(job)
        .on_conflict(
            OnConflict::column(scheduled_job::Column::JobKey)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    debug!(booking_id = booking.id, due_at = %due, "Reminder scheduled");
    Ok(())
}

/// Mentor notification plus learner success email for a freshly created booking.
pub async fn announce_new_booking(ctx: &ServiceContext, booking: &booking::Model) {
    ctx.notify(
        Notification::new(
            booking.mentor_id,
            NotificationKind::BookingCreated,
            "New booking",
            format!(
                "You have a new booking request for {}",
                booking.start_time.format("%Y-%m-%d %H:%M UTC")
            ),
        )
        .with_ref(wallet::booking_correlation(booking.id)),
    )
    .await;

    if let Some(learner) = ctx.contact(booking.learner_id).await {
        let email = templates::booking_success(
            &learner,
            booking,
            &ctx.settings.booking.currency,
            &ctx.settings.booking.portal_base_url,
        );
        ctx.send_email(email).await;
    }
}

/// Validates the slot and opens a gateway checkout. No booking row exists
/// until the payment completes.
#[instrument(skip(ctx, request, success_url, cancel_url))]
pub async fn create_booking_intent(
    ctx: &ServiceContext,
    learner_id: i64,
    request: &BookingRequest,
    success_url: &str,
    cancel_url: &str,
) -> Result<PaymentCreated> {
    request.validate(learner_id, Utc::now())?;
    ensure_slot_available(
        &ctx.db,
        request.mentor_id,
        learner_id,
        request.start_time,
        request.end_time(),
    )
    .await?;

    payment::create_payment(
        ctx,
        learner_id,
        PaymentRequest {
            amount: request.price,
            kind: PaymentKind::MentorBooking,
            method: PaymentMethod::Gateway,
            description: "Mentor booking".to_string(),
            metadata: Some(serde_json::to_string(request)?),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
        },
    )
    .await
}

/// Freezes the price in the learner's wallet and creates the booking in one
/// transaction. Insufficient funds leave no booking behind.
#[instrument(skip(ctx, request))]
pub async fn create_booking_with_wallet(
    ctx: &ServiceContext,
    learner_id: i64,
    request: &BookingRequest,
) -> Result<booking::Model> {
    request.validate(learner_id, Utc::now())?;

    let txn = ctx.db.begin().await?;
    ensure_slot_available(
        &txn,
        request.mentor_id,
        learner_id,
        request.start_time,
        request.end_time(),
    )
    .await?;

    let created = insert_booking(&txn, &ctx.settings, learner_id, request, Funding::Wallet, None).await?;
    wallet::freeze(
        &txn,
        learner_id,
        request.price,
        &wallet::booking_correlation(created.id),
    )
    .await?;
    txn.commit().await?;

    info!(booking_id = created.id, learner_id, mentor_id = created.mentor_id, "Wallet booking created");
    announce_new_booking(ctx, &created).await;
    Ok(created)
}

/// Builds the booking for a completed mentor-booking payment inside the
/// caller's transaction. Returns the existing booking if this payment was
/// already materialized.
pub async fn materialize_from_payment<C>(
    db: &C,
    settings: &Settings,
    payment: &payment_transaction::Model,
) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = Booking::find()
        .filter(booking::Column::PaymentReference.eq(payment.internal_reference.as_str()))
        .one(db)
        .await?
    {
        warn!(
            booking_id = existing.id,
            reference = %payment.internal_reference,
            "Payment already materialized"
        );
        return Ok(existing);
    }

    let raw = payment.metadata.as_deref().ok_or_else(|| Error::Validation {
        message: format!("Payment {} has no booking metadata", payment.internal_reference),
    })?;
    let request: BookingRequest = serde_json::from_str(raw)?;

    ensure_slot_available(
        db,
        request.mentor_id,
        payment.user_id,
        request.start_time,
        request.end_time(),
    )
    .await?;

    let created = insert_booking(
        db,
        settings,
        payment.user_id,
        &request,
        Funding::Gateway,
        Some(payment.internal_reference.clone()),
    )
    .await?;
    info!(
        booking_id = created.id,
        reference = %payment.internal_reference,
        "Booking created from payment"
    );
    Ok(created)
}

/// Creates the booking for a completed gateway payment.
///
/// Payment callbacks do this themselves; this entry point re-drives a
/// completed payment whose booking is missing.
#[instrument(skip(ctx))]
pub async fn create_pending_from_payment(
    ctx: &ServiceContext,
    internal_reference: &str,
) -> Result<booking::Model> {
    let txn = ctx.db.begin().await?;
    let payment = payment::get_payment_by_reference(&txn, internal_reference).await?;
    if payment.kind != PaymentKind::MentorBooking || payment.status != PaymentStatus::Completed {
        return Err(Error::Validation {
            message: format!(
                "Payment {internal_reference} is a {:?} in status {}, not a completed mentor booking",
                payment.kind, payment.status
            ),
        });
    }

    let already = Booking::find()
        .filter(booking::Column::PaymentReference.eq(internal_reference))
        .one(&txn)
        .await?;
    let created = materialize_from_payment(&txn, &ctx.settings, &payment).await?;
    txn.commit().await?;

    if already.is_none() {
        announce_new_booking(ctx, &created).await;
    }
    Ok(created)
}

async fn find_booking<C>(db: &C, booking_id: i64) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    Booking::find_by_id(booking_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Booking", booking_id))
}

async fn load_as_mentor<C>(db: &C, mentor_id: i64, booking_id: i64, action: &'static str) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    let found = find_booking(db, booking_id).await?;
    if found.mentor_id != mentor_id {
        return Err(Error::Unauthorized {
            user_id: mentor_id,
            action,
        });
    }
    Ok(found)
}

async fn load_as_learner<C>(db: &C, learner_id: i64, booking_id: i64, action: &'static str) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    let found = find_booking(db, booking_id).await?;
    if found.learner_id != learner_id {
        return Err(Error::Unauthorized {
            user_id: learner_id,
            action,
        });
    }
    Ok(found)
}

/// Conditional status update. Fails with `InvalidStateTransition` if the row is
/// not in one of `expected` at write time.
async fn transition<C, F>(
    db: &C,
    booking_id: i64,
    expected: &[BookingStatus],
    to: BookingStatus,
    action: &'static str,
    extra: F,
) -> Result<booking::Model>
where
    C: ConnectionTrait,
    F: FnOnce(&mut booking::ActiveModel),
{
    let mut changes = booking::ActiveModel {
        status: Set(to),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    extra(&mut changes);

    let result = Booking::update_many()
        .set(changes)
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::Status.is_in(expected.iter().copied()))
        .exec(db)
        .await?;

    let current = find_booking(db, booking_id).await?;
    if result.rows_affected == 0 {
        return Err(Error::InvalidStateTransition {
            booking_id,
            from: current.status.to_string(),
            action,
        });
    }
    info!(booking_id, status = %to, "Booking {action}");
    Ok(current)
}

/// Returns the escrow to the learner: unfreeze for wallet funding, refund for
/// gateway funding.
async fn release_escrow<C>(db: &C, booking: &booking::Model, reason: &str) -> Result<()>
where
    C: ConnectionTrait + TransactionTrait,
{
    let correlation = wallet::booking_correlation(booking.id);
    match booking.funding {
        Funding::Wallet => {
            wallet::unfreeze(db, booking.learner_id, booking.price, &correlation).await?;
        }
        Funding::Gateway => {
            wallet::refund(db, booking.learner_id, booking.price, &correlation, reason).await?;
        }
    }
    Ok(())
}

/// Cancellation shared by the learner path and the auto-cancel job.
pub async fn cancel_booking<C>(
    db: &C,
    booking: &booking::Model,
    expected: &[BookingStatus],
    reason: &str,
) -> Result<booking::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let cancelled = transition(
        db,
        booking.id,
        expected,
        BookingStatus::Cancelled,
        "cancel",
        |changes| changes.cancellation_reason = Set(Some(reason.to_string())),
    )
    .await?;
    release_escrow(db, &cancelled, reason).await?;
    Ok(cancelled)
}

/// Mentor accepts a pending booking.
#[instrument(skip(ctx))]
pub async fn approve(ctx: &ServiceContext, mentor_id: i64, booking_id: i64) -> Result<booking::Model> {
    let txn = ctx.db.begin().await?;
    let found = load_as_mentor(&txn, mentor_id, booking_id, "approve this booking").await?;
    let link = meeting_link(&ctx.settings, &found);
    let confirmed = transition(
        &txn,
        booking_id,
        &[BookingStatus::Pending],
        BookingStatus::Confirmed,
        "approve",
        |changes| changes.meeting_link = Set(Some(link)),
    )
    .await?;
    schedule_reminder(&txn, &ctx.settings, &confirmed).await?;
    txn.commit().await?;

    ctx.notify(
        Notification::new(
            confirmed.learner_id,
            NotificationKind::BookingConfirmed,
            "Booking confirmed",
            "Your mentor approved the session",
        )
        .with_ref(wallet::booking_correlation(booking_id)),
    )
    .await;
    for user_id in [confirmed.learner_id, confirmed.mentor_id] {
        if let Some(contact) = ctx.contact(user_id).await {
            ctx.send_email(templates::booking_approved(&contact, &confirmed)).await;
        }
    }
    Ok(confirmed)
}

/// Mentor declines a pending booking; the learner gets the full price back.
#[instrument(skip(ctx, reason))]
pub async fn reject(
    ctx: &ServiceContext,
    mentor_id: i64,
    booking_id: i64,
    reason: Option<String>,
) -> Result<booking::Model> {
    let txn = ctx.db.begin().await?;
    load_as_mentor(&txn, mentor_id, booking_id, "reject this booking").await?;
    let stored_reason = reason.clone();
    let rejected = transition(
        &txn,
        booking_id,
        &[BookingStatus::Pending],
        BookingStatus::Rejected,
        "reject",
        |changes| changes.rejection_reason = Set(stored_reason),
    )
    .await?;
    release_escrow(&txn, &rejected, "Booking rejected by mentor").await?;
    txn.commit().await?;

    ctx.notify(
        Notification::new(
            rejected.learner_id,
            NotificationKind::BookingRejected,
            "Booking rejected",
            reason.unwrap_or_else(|| "The mentor declined the session".to_string()),
        )
        .with_ref(wallet::booking_correlation(booking_id)),
    )
    .await;
    Ok(rejected)
}

/// Mentor opens a confirmed session.
#[instrument(skip(ctx))]
pub async fn start_meeting(ctx: &ServiceContext, mentor_id: i64, booking_id: i64) -> Result<booking::Model> {
    let txn = ctx.db.begin().await?;
    load_as_mentor(&txn, mentor_id, booking_id, "start this session").await?;
    let started = transition(
        &txn,
        booking_id,
        &[BookingStatus::Confirmed],
        BookingStatus::Ongoing,
        "start",
        |_| {},
    )
    .await?;
    txn.commit().await?;

    ctx.notify(
        Notification::new(
            started.learner_id,
            NotificationKind::BookingStarted,
            "Session started",
            "Your mentor has opened the meeting room",
        )
        .with_ref(wallet::booking_correlation(booking_id)),
    )
    .await;
    Ok(started)
}

/// Mentor closes a session: the escrow is captured, the mentor is paid their
/// share and gamification is updated.
#[instrument(skip(ctx))]
pub async fn complete(ctx: &ServiceContext, mentor_id: i64, booking_id: i64) -> Result<booking::Model> {
    let txn = ctx.db.begin().await?;
    load_as_mentor(&txn, mentor_id, booking_id, "complete this session").await?;
    let completed = transition(
        &txn,
        booking_id,
        &[BookingStatus::Confirmed, BookingStatus::Ongoing],
        BookingStatus::Completed,
        "complete",
        |_| {},
    )
    .await?;

    let correlation = wallet::booking_correlation(booking_id);
    if completed.funding == Funding::Wallet {
        wallet::charge_frozen(&txn, completed.learner_id, completed.price, &correlation).await?;
    }
    let share = payout_share(completed.price, ctx.settings.booking.mentor_payout_share)?;
    if share > 0 {
        wallet::payout(&txn, mentor_id, share, &correlation).await?;
    }

    let completed_sessions = Booking::find()
        .filter(booking::Column::MentorId.eq(mentor_id))
        .filter(booking::Column::Status.eq(BookingStatus::Completed))
        .count(&txn)
        .await?;
    let rewards = gamification::apply_event(
        &txn,
        mentor_id,
        GamificationEvent::SessionCompleted,
        completed_sessions,
        &correlation,
    )
    .await?;
    txn.commit().await?;

    info!(booking_id, payout = share, "Session completed and paid out");

    ctx.notify(
        Notification::new(
            completed.learner_id,
            NotificationKind::BookingCompleted,
            "Session completed",
            "You can now rate your mentor",
        )
        .with_ref(correlation.clone()),
    )
    .await;
    ctx.notify(
        Notification::new(
            mentor_id,
            NotificationKind::BookingCompleted,
            "Payout received",
            format!("{share} {} credited for booking #{booking_id}", ctx.settings.booking.currency),
        )
        .with_ref(correlation),
    )
    .await;
    ctx.notify_all(rewards).await;
    Ok(completed)
}

/// Learner cancels a pending or confirmed booking before the cutoff.
///
/// Cancelling an already cancelled booking returns it unchanged.
#[instrument(skip(ctx, reason))]
pub async fn cancel_by_learner(
    ctx: &ServiceContext,
    learner_id: i64,
    booking_id: i64,
    reason: Option<String>,
) -> Result<booking::Model> {
    let now = Utc::now();
    let txn = ctx.db.begin().await?;
    let found = load_as_learner(&txn, learner_id, booking_id, "cancel this booking").await?;

    match found.status {
        BookingStatus::Cancelled => {
            debug!(booking_id, "Booking already cancelled");
            txn.commit().await?;
            return Ok(found);
        }
        BookingStatus::Pending | BookingStatus::Confirmed => {}
        other => {
            return Err(Error::InvalidStateTransition {
                booking_id,
                from: other.to_string(),
                action: "cancel",
            });
        }
    }

    let cutoff = found.start_time - Duration::hours(ctx.settings.booking.cancel_cutoff_hours);
    if now >= cutoff {
        return Err(Error::PolicyViolation {
            message: format!(
                "Bookings can only be cancelled at least {} hours before the start",
                ctx.settings.booking.cancel_cutoff_hours
            ),
        });
    }

    let reason = reason.unwrap_or_else(|| "Cancelled by learner".to_string());
    let cancelled = cancel_booking(
        &txn,
        &found,
        &[BookingStatus::Pending, BookingStatus::Confirmed],
        &reason,
    )
    .await?;
    txn.commit().await?;

    ctx.notify(
        Notification::new(
            cancelled.mentor_id,
            NotificationKind::BookingCancelled,
            "Booking cancelled",
            format!("The learner cancelled booking #{booking_id}"),
        )
        .with_ref(wallet::booking_correlation(booking_id)),
    )
    .await;
    Ok(cancelled)
}

/// Learner reviews a completed session. One review per booking.
#[instrument(skip(ctx, comment))]
pub async fn rate_after_session(
    ctx: &ServiceContext,
    learner_id: i64,
    booking_id: i64,
    stars: i32,
    comment: &str,
) -> Result<booking_review::Model> {
    if !(1..=5).contains(&stars) {
        return Err(Error::Validation {
            message: format!("Rating must be between 1 and 5, got {stars}"),
        });
    }

    let txn = ctx.db.begin().await?;
    let found = load_as_learner(&txn, learner_id, booking_id, "rate this booking").await?;
    if found.status != BookingStatus::Completed {
        return Err(Error::InvalidStateTransition {
            booking_id,
            from: found.status.to_string(),
            action: "rate",
        });
    }
    let already_rated = BookingReview::find()
        .filter(booking_review::Column::BookingId.eq(booking_id))
        .one(&txn)
        .await?
        .is_some();
    if already_rated {
        return Err(Error::PolicyViolation {
            message: format!("Booking {booking_id} has already been reviewed"),
        });
    }

    let review = booking_review::ActiveModel {
        booking_id: Set(booking_id),
        mentor_id: Set(found.mentor_id),
        learner_id: Set(learner_id),
        stars: Set(stars),
        comment: Set(comment.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    gamification::record_rating(&txn, found.mentor_id, stars).await?;
    let mut rewards = Vec::new();
    if stars == 5 {
        let five_stars = BookingReview::find()
            .filter(booking_review::Column::MentorId.eq(found.mentor_id))
            .filter(booking_review::Column::Stars.eq(5))
            .count(&txn)
            .await?;
        rewards = gamification::apply_event(
            &txn,
            found.mentor_id,
            GamificationEvent::FiveStarReview,
            five_stars,
            &format!("REVIEW_{}", review.id),
        )
        .await?;
    }
    txn.commit().await?;

    info!(booking_id, stars, "Session reviewed");
    ctx.notify(
        Notification::new(
            found.mentor_id,
            NotificationKind::ReviewReceived,
            "New review",
            format!("You received a {stars}-star review"),
        )
        .with_ref(wallet::booking_correlation(booking_id)),
    )
    .await;
    ctx.notify_all(rewards).await;
    Ok(review)
}

/// Reads a booking on behalf of one of its participants.
pub async fn get_booking_for_participant(
    db: &DatabaseConnection,
    user_id: i64,
    booking_id: i64,
) -> Result<booking::Model> {
    let found = find_booking(db, booking_id).await?;
    if !found.is_participant(user_id) {
        return Err(Error::Unauthorized {
            user_id,
            action: "view this booking",
        });
    }
    Ok(found)
}

/// A participant's bookings, latest start first.
pub async fn list_bookings_for_user(
    db: &DatabaseConnection,
    user_id: i64,
    view: BookingView,
    page: u64,
    per_page: u64,
) -> Result<Vec<booking::Model>> {
    let owner = match view {
        BookingView::AsMentor => booking::Column::MentorId,
        BookingView::AsLearner => booking::Column::LearnerId,
    };
    Booking::find()
        .filter(owner.eq(user_id))
        .filter(booking::Column::Status.is_in(BookingStatus::LISTED))
        .order_by_desc(booking::Column::StartTime)
        .paginate(db, per_page.max(1))
        .fetch_page(page)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::payment::{CallbackOutcome, process_payment_callback};
    use crate::core::wallet::{find_entry, get_wallet};
    use crate::entities::{EntryKind, MentorProfile, WalletEntry, wallet_entry};
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_wallet_booking_full_lifecycle() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 1_000_000).await?;
        seed_mentor_profile(&h.ctx.db, MENTOR).await?;

        let request = request_in_days(MENTOR, 3, 500_000);
        let created = create_booking_with_wallet(&h.ctx, LEARNER, &request).await?;
        assert_eq!(created.status, BookingStatus::Pending);
        assert_eq!(created.funding, Funding::Wallet);
        assert_eq!(
            created.meeting_link.as_deref(),
            Some(format!("https://meet.jit.si/MentorSession-{}-{MENTOR}-{LEARNER}", created.id).as_str())
        );

        let learner = get_wallet(&h.ctx.db, LEARNER).await?;
        assert_eq!(learner.balance, 500_000);
        assert_eq!(learner.frozen_balance, 500_000);

        approve(&h.ctx, MENTOR, created.id).await?;
        start_meeting(&h.ctx, MENTOR, created.id).await?;
        let done = complete(&h.ctx, MENTOR, created.id).await?;
        assert_eq!(done.status, BookingStatus::Completed);

        let learner = get_wallet(&h.ctx.db, LEARNER).await?;
        assert_eq!(learner.frozen_balance, 0);
        assert_eq!(learner.balance, 500_000);
        let mentor = get_wallet(&h.ctx.db, MENTOR).await?;
        assert_eq!(mentor.balance, 400_000);
        assert_eq!(mentor.total_earned, 400_000);

        // Financial closure: captured escrow minus payout is the platform share
        let correlation = wallet::booking_correlation(created.id);
        let charged = find_entry(&h.ctx.db, EntryKind::ChargeFrozen, LEARNER, &correlation).await?.unwrap();
        let paid = find_entry(&h.ctx.db, EntryKind::Payout, MENTOR, &correlation).await?.unwrap();
        assert_eq!(charged.amount - paid.amount, 100_000);

        let profile = MentorProfile::find_by_id(MENTOR).one(&h.ctx.db).await?.unwrap();
        assert!(profile.badges.contains("FIRST_SESSION"));

        assert!(h.notifier.kinds_for(MENTOR).contains(&NotificationKind::BookingCreated));
        assert!(h.notifier.kinds_for(MENTOR).contains(&NotificationKind::BadgeEarned));
        assert!(h.notifier.kinds_for(LEARNER).contains(&NotificationKind::BookingConfirmed));
        let emails = h.mailer.sent();
        assert!(emails.iter().any(|e| e.attachment.as_ref().is_some_and(|a| a.filename
            == format!("invoice_booking_{}.txt", created.id))));
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_funds_creates_nothing() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 100_000).await?;

        let result = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 3, 500_000)).await;
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
        assert_eq!(Booking::find().count(&h.ctx.db).await?, 0);
        assert_eq!(ScheduledJob::find().count(&h.ctx.db).await?, 0);
        assert_eq!(get_wallet(&h.ctx.db, LEARNER).await?.balance, 100_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_overlapping_active_bookings_conflict() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 2_000_000).await?;
        fund_wallet(&h.ctx.db, OTHER_LEARNER, 2_000_000).await?;

        let first = request_in_days(MENTOR, 3, 200_000);
        create_booking_with_wallet(&h.ctx, LEARNER, &first).await?;

        // Same mentor, overlapping by 30 minutes
        let overlapping = BookingRequest {
            start_time: first.start_time + Duration::minutes(30),
            ..first.clone()
        };
        let result = create_booking_with_wallet(&h.ctx, OTHER_LEARNER, &overlapping).await;
        assert!(matches!(result, Err(Error::SchedulingConflict { .. })));

        // Back-to-back is fine: intervals are half-open
        let adjacent = BookingRequest {
            start_time: first.end_time(),
            ..first.clone()
        };
        create_booking_with_wallet(&h.ctx, OTHER_LEARNER, &adjacent).await?;

        // Same learner with another mentor at the same time
        let other_mentor = BookingRequest {
            mentor_id: OTHER_MENTOR,
            ..first
        };
        let result = create_booking_with_wallet(&h.ctx, LEARNER, &other_mentor).await;
        assert!(matches!(result, Err(Error::SchedulingConflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_bookings_free_the_slot() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 1_000_000).await?;

        let request = request_in_days(MENTOR, 3, 300_000);
        let created = create_booking_with_wallet(&h.ctx, LEARNER, &request).await?;
        reject(&h.ctx, MENTOR, created.id, Some("Busy".to_string())).await?;

        let again = create_booking_with_wallet(&h.ctx, LEARNER, &request).await?;
        assert_ne!(again.id, created.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_request_validation() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        let past = BookingRequest {
            start_time: Utc::now() - Duration::hours(1),
            ..request_in_days(MENTOR, 1, 100)
        };
        assert!(matches!(
            create_booking_with_wallet(&h.ctx, LEARNER, &past).await,
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            create_booking_with_wallet(&h.ctx, MENTOR, &request_in_days(MENTOR, 2, 100)).await,
            Err(Error::Validation { .. })
        ));
        let zero_duration = BookingRequest {
            duration_minutes: 0,
            ..request_in_days(MENTOR, 2, 100)
        };
        assert!(matches!(
            create_booking_with_wallet(&h.ctx, LEARNER, &zero_duration).await,
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 2, 0)).await,
            Err(Error::InvalidAmount { amount: 0 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_guards() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 1_000_000).await?;
        let created = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 3, 100_000)).await?;

        assert!(matches!(
            approve(&h.ctx, OTHER_MENTOR, created.id).await,
            Err(Error::Unauthorized { .. })
        ));
        assert!(matches!(
            approve(&h.ctx, MENTOR, 9_999).await,
            Err(Error::NotFound { .. })
        ));

        let confirmed = approve(&h.ctx, MENTOR, created.id).await?;
        let result = approve(&h.ctx, MENTOR, created.id).await;
        match result {
            Err(Error::InvalidStateTransition { from, .. }) => assert_eq!(from, "CONFIRMED"),
            other => panic!("expected InvalidStateTransition, got {other:?}"),
        }
        let unchanged = get_booking_for_participant(&h.ctx.db, LEARNER, created.id).await?;
        assert_eq!(unchanged.updated_at, confirmed.updated_at);

        assert!(matches!(
            start_meeting(&h.ctx, MENTOR, created.id).await.map(|b| b.status),
            Ok(BookingStatus::Ongoing)
        ));
        assert!(matches!(
            start_meeting(&h.ctx, MENTOR, created.id).await,
            Err(Error::InvalidStateTransition { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_unfreezes_wallet_funding_once() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 500_000).await?;
        let created = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 3, 500_000)).await?;

        let rejected = reject(&h.ctx, MENTOR, created.id, None).await?;
        assert_eq!(rejected.status, BookingStatus::Rejected);
        assert!(matches!(
            reject(&h.ctx, MENTOR, created.id, None).await,
            Err(Error::InvalidStateTransition { .. })
        ));

        let learner = get_wallet(&h.ctx.db, LEARNER).await?;
        assert_eq!(learner.balance, 500_000);
        assert_eq!(learner.frozen_balance, 0);
        assert!(h.notifier.kinds_for(LEARNER).contains(&NotificationKind::BookingRejected));
        Ok(())
    }

    #[tokio::test]
    async fn test_learner_cancel_window() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 1_000_000).await?;

        let soon = BookingRequest {
            start_time: Utc::now() + Duration::hours(12),
            ..request_in_days(MENTOR, 1, 200_000)
        };
        let near = create_booking_with_wallet(&h.ctx, LEARNER, &soon).await?;
        assert!(matches!(
            cancel_by_learner(&h.ctx, LEARNER, near.id, None).await,
            Err(Error::PolicyViolation { .. })
        ));

        let far = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 2, 300_000)).await?;
        approve(&h.ctx, MENTOR, far.id).await?;
        assert!(matches!(
            cancel_by_learner(&h.ctx, MENTOR, far.id, None).await,
            Err(Error::Unauthorized { .. })
        ));

        let cancelled = cancel_by_learner(&h.ctx, LEARNER, far.id, None).await?;
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        let learner = get_wallet(&h.ctx.db, LEARNER).await?;
        assert_eq!(learner.frozen_balance, 200_000);
        assert_eq!(learner.balance, 800_000);
        assert!(h.notifier.kinds_for(MENTOR).contains(&NotificationKind::BookingCancelled));

        // Repeating the cancel is a no-op
        let again = cancel_by_learner(&h.ctx, LEARNER, far.id, None).await?;
        assert_eq!(again.updated_at, cancelled.updated_at);
        let unfreezes = WalletEntry::find()
            .filter(wallet_entry::Column::Kind.eq(EntryKind::Unfreeze))
            .count(&h.ctx.db)
            .await?;
        assert_eq!(unfreezes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_ongoing_is_invalid() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 1_000_000).await?;
        let created = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 3, 100_000)).await?;
        approve(&h.ctx, MENTOR, created.id).await?;
        start_meeting(&h.ctx, MENTOR, created.id).await?;

        assert!(matches!(
            cancel_by_learner(&h.ctx, LEARNER, created.id, None).await,
            Err(Error::InvalidStateTransition { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_booking_materializes_once() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        let request = request_in_days(MENTOR, 4, 500_000);

        let intent = create_booking_intent(
            &h.ctx,
            LEARNER,
            &request,
            "https://app.test/ok",
            "https://app.test/cancel",
        )
        .await?;
        assert!(intent.checkout_url.is_some());
        assert_eq!(Booking::find().count(&h.ctx.db).await?, 0);

        let gateway_ref = intent.transaction.gateway_reference.clone().unwrap();
        let first = process_payment_callback(&h.ctx, &gateway_ref, "PAID", None).await?;
        let second = process_payment_callback(&h.ctx, &gateway_ref, "PAID", None).await?;
        assert!(matches!(first, CallbackOutcome::Applied(_)));
        assert!(matches!(second, CallbackOutcome::Duplicate(_)));

        let bookings = Booking::find().all(&h.ctx.db).await?;
        assert_eq!(bookings.len(), 1);
        let created = &bookings[0];
        assert_eq!(created.funding, Funding::Gateway);
        assert_eq!(created.learner_id, LEARNER);
        assert_eq!(
            created.payment_reference.as_deref(),
            Some(intent.transaction.internal_reference.as_str())
        );
        assert_eq!(ScheduledJob::find().count(&h.ctx.db).await?, 1);

        // Re-driving a materialized payment returns the same booking
        let redriven = create_pending_from_payment(&h.ctx, &intent.transaction.internal_reference).await?;
        assert_eq!(redriven.id, created.id);

        // Completion pays the mentor; nothing frozen to capture
        approve(&h.ctx, MENTOR, created.id).await?;
        complete(&h.ctx, MENTOR, created.id).await?;
        assert_eq!(get_wallet(&h.ctx.db, MENTOR).await?.balance, 400_000);
        assert!(get_wallet(&h.ctx.db, LEARNER).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_booking_rejection_refunds_to_wallet() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        let intent = create_booking_intent(
            &h.ctx,
            LEARNER,
            &request_in_days(MENTOR, 4, 350_000),
            "https://app.test/ok",
            "https://app.test/cancel",
        )
        .await?;
        process_payment_callback(
            &h.ctx,
            intent.transaction.gateway_reference.as_deref().unwrap(),
            "PAID",
            None,
        )
        .await?;
        let created = Booking::find().one(&h.ctx.db).await?.unwrap();

        reject(&h.ctx, MENTOR, created.id, Some("Unavailable".to_string())).await?;
        let learner = get_wallet(&h.ctx.db, LEARNER).await?;
        assert_eq!(learner.balance, 350_000);
        assert_eq!(learner.frozen_balance, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_learner_cancel_refunds_gateway_booking_once() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        let intent = create_booking_intent(
            &h.ctx,
            LEARNER,
            &request_in_days(MENTOR, 4, 350_000),
            "https://app.test/ok",
            "https://app.test/cancel",
        )
        .await?;
        process_payment_callback(
            &h.ctx,
            intent.transaction.gateway_reference.as_deref().unwrap(),
            "PAID",
            None,
        )
        .await?;
        let created = Booking::find().one(&h.ctx.db).await?.unwrap();
        assert_eq!(created.funding, Funding::Gateway);

        let cancelled = cancel_by_learner(&h.ctx, LEARNER, created.id, None).await?;
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        let learner = get_wallet(&h.ctx.db, LEARNER).await?;
        assert_eq!(learner.balance, 350_000);
        assert_eq!(learner.frozen_balance, 0);

        let again = cancel_by_learner(&h.ctx, LEARNER, created.id, Some("twice".to_string())).await?;
        assert_eq!(again.updated_at, cancelled.updated_at);
        assert_eq!(get_wallet(&h.ctx.db, LEARNER).await?.balance, 350_000);

        let refunds = WalletEntry::find()
            .filter(wallet_entry::Column::Kind.eq(EntryKind::Refund))
            .count(&h.ctx.db)
            .await?;
        assert_eq!(refunds, 1);
        assert!(
            find_entry(&h.ctx.db, EntryKind::Refund, LEARNER, &wallet::booking_correlation(created.id))
                .await?
                .is_some()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_slot_taken_during_checkout_refunds_payer() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, OTHER_LEARNER, 1_000_000).await?;
        let request = request_in_days(MENTOR, 5, 450_000);

        let intent = create_booking_intent(
            &h.ctx,
            LEARNER,
            &request,
            "https://app.test/ok",
            "https://app.test/cancel",
        )
        .await?;

        // Someone else grabs the slot while the learner is paying
        create_booking_with_wallet(&h.ctx, OTHER_LEARNER, &request).await?;

        let result = process_payment_callback(
            &h.ctx,
            intent.transaction.gateway_reference.as_deref().unwrap(),
            "PAID",
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::SchedulingConflict { .. })));

        let payment = payment::get_payment_by_reference(&h.ctx.db, &intent.transaction.internal_reference).await?;
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(get_wallet(&h.ctx.db, LEARNER).await?.balance, 450_000);
        assert_eq!(Booking::find().count(&h.ctx.db).await?, 1);

        // Redelivery is a duplicate and does not refund twice
        let redelivered = process_payment_callback(
            &h.ctx,
            intent.transaction.gateway_reference.as_deref().unwrap(),
            "PAID",
            None,
        )
        .await?;
        assert!(matches!(redelivered, CallbackOutcome::Duplicate(_)));
        assert_eq!(get_wallet(&h.ctx.db, LEARNER).await?.balance, 450_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_intent_rejects_busy_slot_before_payment() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, OTHER_LEARNER, 1_000_000).await?;
        let request = request_in_days(MENTOR, 5, 100_000);
        create_booking_with_wallet(&h.ctx, OTHER_LEARNER, &request).await?;

        let result =
            create_booking_intent(&h.ctx, LEARNER, &request, "https://app.test/ok", "https://app.test/c").await;
        assert!(matches!(result, Err(Error::SchedulingConflict { .. })));
        assert!(h.gateway.created().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reviews() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 1_000_000).await?;
        seed_mentor_profile(&h.ctx.db, MENTOR).await?;
        let created = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 3, 100_000)).await?;

        assert!(matches!(
            rate_after_session(&h.ctx, LEARNER, created.id, 5, "Great").await,
            Err(Error::InvalidStateTransition { .. })
        ));

        approve(&h.ctx, MENTOR, created.id).await?;
        complete(&h.ctx, MENTOR, created.id).await?;

        assert!(matches!(
            rate_after_session(&h.ctx, LEARNER, created.id, 6, "Too good").await,
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            rate_after_session(&h.ctx, OTHER_LEARNER, created.id, 5, "Not mine").await,
            Err(Error::Unauthorized { .. })
        ));

        let review = rate_after_session(&h.ctx, LEARNER, created.id, 5, "Great").await?;
        assert_eq!(review.stars, 5);
        assert!(matches!(
            rate_after_session(&h.ctx, LEARNER, created.id, 4, "Again").await,
            Err(Error::PolicyViolation { .. })
        ));

        let profile = MentorProfile::find_by_id(MENTOR).one(&h.ctx.db).await?.unwrap();
        assert_eq!(profile.rating_count, 1);
        assert!(profile.badges.contains("FIRST_5_STAR"));
        // 20 + 50 for the first session, 30 for the first five-star review
        assert_eq!(profile.skill_points, 100);
        assert_eq!(profile.current_level, 1);
        assert!(h.notifier.kinds_for(MENTOR).contains(&NotificationKind::LevelUp));
        Ok(())
    }

    #[tokio::test]
    async fn test_participant_queries() -> Result<()> {
        let h = setup_test_context(test_settings()).await?;
        fund_wallet(&h.ctx.db, LEARNER, 1_000_000).await?;
        let early = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 2, 100_000)).await?;
        let late = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 6, 100_000)).await?;
        let rejected = create_booking_with_wallet(&h.ctx, LEARNER, &request_in_days(MENTOR, 9, 100_000)).await?;
        reject(&h.ctx, MENTOR, rejected.id, None).await?;

        assert!(matches!(
            get_booking_for_participant(&h.ctx.db, OTHER_LEARNER, early.id).await,
            Err(Error::Unauthorized { .. })
        ));
        assert_eq!(get_booking_for_participant(&h.ctx.db, MENTOR, early.id).await?.id, early.id);

        let as_learner = list_bookings_for_user(&h.ctx.db, LEARNER, BookingView::AsLearner, 0, 10).await?;
        let ids: Vec<i64> = as_learner.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![late.id, early.id]);

        let as_mentor = list_bookings_for_user(&h.ctx.db, MENTOR, BookingView::AsMentor, 0, 1).await?;
        assert_eq!(as_mentor.len(), 1);
        assert!(list_bookings_for_user(&h.ctx.db, MENTOR, BookingView::AsLearner, 0, 10).await?.is_empty());
        Ok(())
    }
}
