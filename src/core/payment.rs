//! Payment transaction ledger.
//!
//! A transaction leaves `PENDING` exactly once. Webhooks and poll-driven
//! verification both funnel into [`process_payment_callback`], whose
//! conditional update (`WHERE status = 'PENDING'`) decides which signal wins;
//! the loser sees the stored record as a duplicate. Completion effects run in
//! the same database transaction as the status change.

use crate::{
    core::{booking, context::ServiceContext, money::ensure_positive, wallet},
    entities::{
        Booking, PaymentKind, PaymentMethod, PaymentStatus, PaymentTransaction, booking as booking_entity,
        payment_transaction,
    },
    errors::{Error, Result},
    gateway::{CheckoutRequest, WebhookPayload},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument, warn};

/// What the caller wants to pay for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: i64,
    pub kind: PaymentKind,
    pub method: PaymentMethod,
    pub description: String,
    /// Opaque JSON stored with the transaction
    pub metadata: Option<String>,
    /// Where the gateway redirects after payment
    pub success_url: String,
    /// Where the gateway redirects on abort
    pub cancel_url: String,
}

/// A persisted transaction plus the checkout URL for gateway payments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCreated {
    pub transaction: payment_transaction::Model,
    pub checkout_url: Option<String>,
}

/// Result of a status signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Unknown reference that matches the provider's sandbox test payloads
    IgnoredTestPayload,
    /// No change: the transaction had already left `PENDING`, or the signal was not a transition
    Duplicate(payment_transaction::Model),
    /// This signal moved the transaction out of `PENDING`
    Applied(payment_transaction::Model),
}

impl CallbackOutcome {
    #[must_use]
    pub fn transaction(&self) -> Option<&payment_transaction::Model> {
        match self {
            Self::IgnoredTestPayload => None,
            Self::Duplicate(model) | Self::Applied(model) => Some(model),
        }
    }
}

/// Appends `key=value` to a URL that may already carry a query string.
#[must_use]
pub fn append_query_param(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{key}={value}")
}

/// Looks up a transaction by its client-facing reference.
pub async fn get_payment_by_reference<C>(
    db: &C,
    internal_reference: &str,
) -> Result<payment_transaction::Model>
where
    C: ConnectionTrait,
{
    PaymentTransaction::find()
        .filter(payment_transaction::Column::InternalReference.eq(internal_reference))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("PaymentTransaction", internal_reference))
}

/// All transactions of a user, newest first.
pub async fn payment_history(
    db: &DatabaseConnection,
    user_id: i64,
) -> Result<Vec<payment_transaction::Model>> {
    PaymentTransaction::find()
        .filter(payment_transaction::Column::UserId.eq(user_id))
        .order_by_desc(payment_transaction::Column::CreatedAt)
        .order_by_desc(payment_transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Persists a `PENDING` transaction and, for gateway payments, opens a checkout.
///
/// If the gateway refuses the intent the transaction is marked `FAILED` and
/// the gateway error is returned.
#[instrument(skip(ctx, request), fields(kind = ?request.kind, amount = request.amount))]
pub async fn create_payment(
    ctx: &ServiceContext,
    user_id: i64,
    request: PaymentRequest,
) -> Result<PaymentCreated> {
    ensure_positive(request.amount)?;

    let now = Utc::now();
    let internal_reference = uuid::Uuid::new_v4().simple().to_string();
    let transaction = payment_transaction::ActiveModel {
        internal_reference: Set(internal_reference.clone()),
        gateway_reference: Set(None),
        user_id: Set(user_id),
        amount: Set(request.amount),
        currency: Set(ctx.settings.booking.currency.clone()),
        kind: Set(request.kind),
        method: Set(request.method),
        status: Set(PaymentStatus::Pending),
        description: Set(request.description.clone()),
        metadata: Set(request.metadata.clone()),
        failure_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&ctx.db)
    .await?;

    info!(reference = %internal_reference, user_id, "Payment transaction created");

    if request.method != PaymentMethod::Gateway {
        return Ok(PaymentCreated {
            transaction,
            checkout_url: None,
        });
    }

    let return_url = append_query_param(&request.success_url, "ref", &internal_reference);
    let cancel_url = append_query_param(
        &append_query_param(&request.cancel_url, "ref", &internal_reference),
        "cancel",
        "1",
    );
    let checkout = CheckoutRequest {
        order_code: transaction.id,
        amount: transaction.amount,
        description: request.description,
        return_url,
        cancel_url,
    };

    match ctx.gateway.create_intent(&checkout).await {
        Ok(intent) => {
            let mut active: payment_transaction::ActiveModel = transaction.into();
            active.gateway_reference = Set(Some(intent.gateway_reference));
            active.updated_at = Set(Utc::now());
            let transaction = active.update(&ctx.db).await?;
            Ok(PaymentCreated {
                transaction,
                checkout_url: Some(intent.checkout_url),
            })
        }
        Err(e) => {
            warn!(reference = %internal_reference, "Gateway refused checkout: {e}");
            PaymentTransaction::update_many()
                .set(payment_transaction::ActiveModel {
                    status: Set(PaymentStatus::Failed),
                    failure_reason: Set(Some(e.to_string())),
                    updated_at: Set(Utc::now()),
                    ..Default::default()
                })
                .filter(payment_transaction::Column::Id.eq(transaction.id))
                .filter(payment_transaction::Column::Status.eq(PaymentStatus::Pending))
                .exec(&ctx.db)
                .await?;
            Err(match e {
                Error::Gateway { .. } => e,
                other => Error::Gateway {
                    message: other.to_string(),
                },
            })
        }
    }
}

/// Moves a `PENDING` transaction to `to`; returns false if it was no longer pending.
async fn claim_pending<C>(
    db: &C,
    transaction_id: i64,
    to: PaymentStatus,
    reason: Option<String>,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let result = PaymentTransaction::update_many()
        .set(payment_transaction::ActiveModel {
            status: Set(to),
            failure_reason: Set(reason),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(payment_transaction::Column::Id.eq(transaction_id))
        .filter(payment_transaction::Column::Status.eq(PaymentStatus::Pending))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Single entry point for every status signal (webhook or verification).
///
/// Only a first transition out of `PENDING` has effects. A `COMPLETED` signal
/// runs the kind-specific completion effect in the same database transaction:
/// mentor bookings are materialized, wallet top-ups are deposited.
///
/// If the booking slot was taken while the payment was in flight, the payment
/// still commits as `COMPLETED`, the amount is refunded to the payer's wallet
/// and `SchedulingConflict` is returned.
#[instrument(skip(ctx, metadata))]
pub async fn process_payment_callback(
    ctx: &ServiceContext,
    gateway_reference: &str,
    external_status: &str,
    metadata: Option<&str>,
) -> Result<CallbackOutcome> {
    let new_status = PaymentStatus::from_external(external_status);

    let Some(existing) = PaymentTransaction::find()
        .filter(payment_transaction::Column::GatewayReference.eq(gateway_reference))
        .one(&ctx.db)
        .await?
    else {
        if ctx.settings.gateway.is_sandbox_reference(gateway_reference) {
            info!(gateway_reference, "Ignoring gateway sandbox test payload");
            return Ok(CallbackOutcome::IgnoredTestPayload);
        }
        return Err(Error::not_found("PaymentTransaction", gateway_reference));
    };

    if let Some(raw) = metadata {
        debug!(reference = %existing.internal_reference, raw, "Callback payload");
    }

    if new_status == PaymentStatus::Pending {
        debug!(reference = %existing.internal_reference, external_status, "Signal carries no transition");
        return Ok(CallbackOutcome::Duplicate(existing));
    }
    if existing.status != PaymentStatus::Pending {
        info!(
            reference = %existing.internal_reference,
            current = %existing.status,
            signal = %new_status,
            "Transaction already settled, signal ignored"
        );
        return Ok(CallbackOutcome::Duplicate(existing));
    }

    let txn = ctx.db.begin().await?;

    let reason = match new_status {
        PaymentStatus::Completed => None,
        other => Some(format!("Gateway reported {external_status} ({other})")),
    };
    if !claim_pending(&txn, existing.id, new_status, reason).await? {
        txn.rollback().await?;
        let current = get_payment_by_reference(&ctx.db, &existing.internal_reference).await?;
        info!(
            reference = %current.internal_reference,
            current = %current.status,
            "Lost race for transaction, signal ignored"
        );
        return Ok(CallbackOutcome::Duplicate(current));
    }

    let mut materialized = None;
    let mut conflict = None;
    if new_status == PaymentStatus::Completed {
        match existing.kind {
            PaymentKind::MentorBooking => {
                match booking::materialize_from_payment(&txn, &ctx.settings, &existing).await {
                    Ok(created) => materialized = Some(created),
                    Err(e @ Error::SchedulingConflict { .. }) => {
                        warn!(
                            reference = %existing.internal_reference,
                            "Booking slot taken during checkout, refunding payer: {e}"
                        );
                        wallet::refund(
                            &txn,
                            existing.user_id,
                            existing.amount,
                            &wallet::payment_correlation(&existing.internal_reference),
                            "Booking slot no longer available",
                        )
                        .await?;
                        conflict = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            PaymentKind::WalletTopup => {
                wallet::deposit(
                    &txn,
                    existing.user_id,
                    existing.amount,
                    &wallet::payment_correlation(&existing.internal_reference),
                    "Wallet top-up",
                )
                .await?;
            }
            PaymentKind::CoursePurchase => {
                info!(reference = %existing.internal_reference, "Course purchase completed");
            }
        }
    }

    let updated = get_payment_by_reference(&txn, &existing.internal_reference).await?;
    txn.commit().await?;

    info!(
        reference = %updated.internal_reference,
        status = %updated.status,
        "Payment transaction settled"
    );

    if let Some(created) = materialized {
        booking::announce_new_booking(ctx, &created).await;
    }
    if let Some(e) = conflict {
        return Err(e);
    }
    Ok(CallbackOutcome::Applied(updated))
}

/// Validates a signed gateway webhook and applies it.
pub async fn handle_gateway_webhook(
    ctx: &ServiceContext,
    payload: &WebhookPayload,
) -> Result<CallbackOutcome> {
    let event = ctx.gateway.parse_webhook(payload).inspect_err(|e| {
        warn!("Rejected gateway webhook: {e}");
    })?;
    process_payment_callback(ctx, &event.gateway_reference, &event.status, Some(&event.raw)).await
}

/// Client-poll reconciliation against the gateway.
///
/// Settled transactions return immediately. Gateway failures are logged and
/// the stored record is returned.
#[instrument(skip(ctx))]
pub async fn verify_payment_with_gateway(
    ctx: &ServiceContext,
    internal_reference: &str,
) -> Result<payment_transaction::Model> {
    let payment = get_payment_by_reference(&ctx.db, internal_reference).await?;
    if payment.status != PaymentStatus::Pending {
        return Ok(payment);
    }
    let Some(gateway_reference) = payment.gateway_reference.clone() else {
        debug!(internal_reference, "No gateway reference yet, nothing to verify");
        return Ok(payment);
    };

    let status = match ctx.gateway.verify(&gateway_reference).await {
        Ok(status) => status,
        Err(e) => {
            warn!(internal_reference, "Gateway verification failed: {e}");
            return Ok(payment);
        }
    };

    match process_payment_callback(ctx, &gateway_reference, &status, None).await? {
        CallbackOutcome::Applied(model) | CallbackOutcome::Duplicate(model) => Ok(model),
        CallbackOutcome::IgnoredTestPayload => Ok(payment),
    }
}

/// Cancels a pending transaction. Any other status is returned unchanged.
#[instrument(skip(ctx))]
pub async fn cancel_payment(
    ctx: &ServiceContext,
    internal_reference: &str,
    reason: &str,
) -> Result<payment_transaction::Model> {
    let payment = get_payment_by_reference(&ctx.db, internal_reference).await?;
    if claim_pending(
        &ctx.db,
        payment.id,
        PaymentStatus::Cancelled,
        Some(reason.to_string()),
    )
    .await?
    {
        info!(internal_reference, "Payment cancelled");
    } else {
        debug!(internal_reference, status = %payment.status, "Cancel on settled payment ignored");
    }
    get_payment_by_reference(&ctx.db, internal_reference).await
}

/// Moves a `COMPLETED` transaction to `REFUNDED` and credits the payer's wallet.
///
/// Repeating the call on a refunded transaction returns it unchanged. Only
/// payments whose effect is still with the platform can be refunded here:
/// top-ups already sit in the wallet, and booking payments are released
/// through the booking. A booking payment that never produced a booking was
/// credited back when the slot conflict was detected, so it is only marked.
#[instrument(skip(ctx))]
pub async fn refund_payment(
    ctx: &ServiceContext,
    internal_reference: &str,
    reason: &str,
) -> Result<payment_transaction::Model> {
    let txn = ctx.db.begin().await?;
    let payment = get_payment_by_reference(&txn, internal_reference).await?;

    match payment.status {
        PaymentStatus::Refunded => {
            txn.commit().await?;
            return Ok(payment);
        }
        PaymentStatus::Completed => {}
        other => {
            return Err(Error::PolicyViolation {
                message: format!("Payment {internal_reference} is {other}; only completed payments can be refunded"),
            });
        }
    }

    match payment.kind {
        PaymentKind::WalletTopup => {
            return Err(Error::PolicyViolation {
                message: format!("Payment {internal_reference} was already deposited to the wallet"),
            });
        }
        PaymentKind::MentorBooking => {
            let backed = Booking::find()
                .filter(booking_entity::Column::PaymentReference.eq(internal_reference))
                .one(&txn)
                .await?;
            if let Some(backed) = backed {
                return Err(Error::PolicyViolation {
                    message: format!(
                        "Payment {internal_reference} funds booking {}; its escrow is settled through the booking",
                        backed.id
                    ),
                });
            }
        }
        PaymentKind::CoursePurchase => {}
    }

    let result = PaymentTransaction::update_many()
        .set(payment_transaction::ActiveModel {
            status: Set(PaymentStatus::Refunded),
            failure_reason: Set(Some(reason.to_string())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(payment_transaction::Column::Id.eq(payment.id))
        .filter(payment_transaction::Column::Status.eq(PaymentStatus::Completed))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        txn.rollback().await?;
        return get_payment_by_reference(&ctx.db, internal_reference).await;
    }

    let credit = wallet::refund(
        &txn,
        payment.user_id,
        payment.amount,
        &wallet::payment_correlation(internal_reference),
        reason,
    )
    .await?;

    let updated = get_payment_by_reference(&txn, internal_reference).await?;
    txn.commit().await?;
    if credit.is_applied() {
        info!(internal_reference, amount = payment.amount, "Payment refunded to wallet");
    } else {
        info!(internal_reference, "Payment marked refunded; wallet was credited earlier");
    }
    Ok(updated)
}
