//! Periodic background work: auto-cancel of stale pending bookings and
//! delivery of due reminder jobs.
//!
//! Both jobs act on rows through the same conditional updates as the manual
//! paths, so a mentor approving a booking while a pass is running simply makes
//! the scheduler lose the race for that row.

use crate::{
    core::{booking::cancel_booking, context::ServiceContext, wallet},
    entities::{Booking, BookingStatus, JobStatus, ScheduledJob, booking, scheduled_job},
    errors::{Error, Result},
    notify::{Notification, NotificationKind, templates},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

const AUTO_CANCEL_REASON: &str = "Mentor did not respond in time";

/// What one scheduler pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub auto_cancelled: usize,
    pub reminders_sent: usize,
}

/// Cancels `PENDING` bookings created more than `auto_cancel_after_hours`
/// before `now` and releases their escrow. Returns how many were cancelled.
#[instrument(skip(ctx))]
pub async fn auto_cancel_stale_bookings(ctx: &ServiceContext, now: DateTime<Utc>) -> Result<usize> {
    let threshold = now - Duration::hours(ctx.settings.booking.auto_cancel_after_hours);
    let stale = Booking::find()
        .filter(booking::Column::Status.eq(BookingStatus::Pending))
        .filter(booking::Column::CreatedAt.lt(threshold))
        .order_by_asc(booking::Column::CreatedAt)
        .limit(ctx.settings.scheduler.batch_size)
        .all(&ctx.db)
        .await?;

    let mut cancelled = 0;
    for candidate in stale {
        let txn = ctx.db.begin().await?;
        match cancel_booking(&txn, &candidate, &[BookingStatus::Pending], AUTO_CANCEL_REASON).await {
            Ok(updated) => {
                txn.commit().await?;
                cancelled += 1;
                info!(booking_id = updated.id, "Stale booking auto-cancelled");
                ctx.notify(
                    Notification::new(
                        updated.learner_id,
                        NotificationKind::BookingCancelled,
                        "Booking cancelled",
                        "The mentor did not respond in time; your payment has been returned",
                    )
                    .with_ref(wallet::booking_correlation(updated.id)),
                )
                .await;
            }
            Err(Error::InvalidStateTransition { from, .. }) => {
                txn.rollback().await?;
                debug!(booking_id = candidate.id, from = %from, "Booking moved on before auto-cancel");
            }
            Err(e) => {
                txn.rollback().await?;
                warn!(booking_id = candidate.id, "Auto-cancel failed: {e}");
            }
        }
    }
    Ok(cancelled)
}

/// Moves a pending job to `to`; false if another pass already took it.
async fn claim_job(db: &DatabaseConnection, job_id: i64, to: JobStatus) -> Result<bool> {
    let result = ScheduledJob::update_many()
        .set(scheduled_job::ActiveModel {
            status: Set(to),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(scheduled_job::Column::Id.eq(job_id))
        .filter(scheduled_job::Column::Status.eq(JobStatus::Pending))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Sends reminder emails for jobs due at or before `now`. Jobs whose booking
/// is gone or no longer active are marked skipped. Returns how many reminders
/// were sent.
#[instrument(skip(ctx))]
pub async fn dispatch_due_reminders(ctx: &ServiceContext, now: DateTime<Utc>) -> Result<usize> {
    let due = ScheduledJob::find()
        .filter(scheduled_job::Column::Status.eq(JobStatus::Pending))
        .filter(scheduled_job::Column::DueAt.lte(now))
        .order_by_asc(scheduled_job::Column::DueAt)
        .limit(ctx.settings.scheduler.batch_size)
        .all(&ctx.db)
        .await?;

    let mut sent = 0;
    for job in due {
        let target = Booking::find_by_id(job.booking_id)
            .one(&ctx.db)
            .await?
            .filter(|b| !b.status.is_terminal());

        let Some(target) = target else {
            if claim_job(&ctx.db, job.id, JobStatus::Skipped).await? {
                debug!(job_key = %job.job_key, "Reminder skipped, booking not active");
            }
            continue;
        };

        if !claim_job(&ctx.db, job.id, JobStatus::Done).await? {
            debug!(job_key = %job.job_key, "Reminder already claimed");
            continue;
        }

        for user_id in [target.learner_id, target.mentor_id] {
            if let Some(contact) = ctx.contact(user_id).await {
                ctx.send_email(templates::booking_reminder(&contact, &target)).await;
            }
        }
        sent += 1;
        info!(booking_id = target.id, "Reminder sent");
    }
    Ok(sent)
}

/// One pass of every job. A failing job is logged and does not stop the other.
pub async fn run_once(ctx: &ServiceContext, now: DateTime<Utc>) -> PassReport {
    let auto_cancelled = auto_cancel_stale_bookings(ctx, now)
        .await
        .inspect_err(|e| error!("Auto-cancel pass failed: {e}"))
        .unwrap_or_default();
    let reminders_sent = dispatch_due_reminders(ctx, now)
        .await
        .inspect_err(|e| error!("Reminder pass failed: {e}"))
        .unwrap_or_default();

    PassReport {
        auto_cancelled,
        reminders_sent,
    }
}

/// Runs [`run_once`] every `scheduler.interval_secs` until `shutdown` flips to true.
pub async fn run(ctx: ServiceContext, mut shutdown: watch::Receiver<bool>) {
    let period = std::time::Duration::from_secs(ctx.settings.scheduler.interval_secs);
    let mut interval = tokio::time::interval(period);
    info!(interval_secs = ctx.settings.scheduler.interval_secs, "Scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = run_once(&ctx, Utc::now()).await;
                if report != PassReport::default() {
                    info!(
                        auto_cancelled = report.auto_cancelled,
                        reminders_sent = report.reminders_sent,
                        "Scheduler pass finished"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Scheduler stopped");
}
