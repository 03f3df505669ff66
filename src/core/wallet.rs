//! Wallet ledger - escrow primitives over a user's spendable, frozen and coin balances.
//!
//! Every primitive is one conditional SQL update on the wallet row plus one
//! immutable `wallet_entries` row, inside a (possibly nested) transaction.
//! Entries carry an idempotency key derived from the entry kind, the user and
//! a business correlation id, so replaying the same logical effect returns the
//! first entry instead of mutating the balance twice.
//!
//! The primitives are generic over the connection so booking and payment
//! transitions can run them inside their own database transaction.

use crate::{
    core::money::ensure_positive,
    entities::{EntryKind, Wallet, WalletEntry, wallet, wallet_entry},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    ConnectionTrait, PaginatorTrait, QueryOrder, Set, TransactionTrait, prelude::*,
    sea_query::{Expr, OnConflict},
};
use tracing::{info, warn};

/// Result of a ledger primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// The balance changed and this entry records it
    Applied(wallet_entry::Model),
    /// The same effect was applied before; nothing changed
    Duplicate(wallet_entry::Model),
}

impl LedgerOutcome {
    #[must_use]
    pub const fn entry(&self) -> &wallet_entry::Model {
        match self {
            Self::Applied(entry) | Self::Duplicate(entry) => entry,
        }
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Deduplication key of a ledger effect.
#[must_use]
pub fn idempotency_key(kind: EntryKind, user_id: i64, correlation_id: &str) -> String {
    format!("{kind}:{user_id}:{correlation_id}")
}

/// Correlation id for effects tied to a booking.
#[must_use]
pub fn booking_correlation(booking_id: i64) -> String {
    format!("BOOKING_{booking_id}")
}

/// Correlation id for effects tied to a payment transaction.
#[must_use]
pub fn payment_correlation(internal_reference: &str) -> String {
    format!("PAYMENT_{internal_reference}")
}

/// Returns the user's wallet, opening an empty one on first use.
pub async fn get_or_create_wallet<C>(db: &C, user_id: i64) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let new_wallet = wallet::ActiveModel {
        user_id: Set(user_id),
        balance: Set(0),
        frozen_balance: Set(0),
        coin_balance: Set(0),
        total_deposited: Set(0),
        total_earned: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    };

    Wallet::insert(new_wallet)
        .on_conflict(
            OnConflict::column(wallet::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    Wallet::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Wallet", user_id))
}

/// Reads a wallet without creating it.
pub async fn get_wallet(db: &DatabaseConnection, user_id: i64) -> Result<wallet::Model> {
    Wallet::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Wallet", user_id))
}

/// Ledger history of a user, newest first.
pub async fn wallet_entries(
    db: &DatabaseConnection,
    user_id: i64,
    page: u64,
    per_page: u64,
) -> Result<Vec<wallet_entry::Model>> {
    WalletEntry::find()
        .filter(wallet_entry::Column::UserId.eq(user_id))
        .order_by_desc(wallet_entry::Column::CreatedAt)
        .order_by_desc(wallet_entry::Column::Id)
        .paginate(db, per_page.max(1))
        .fetch_page(page)
        .await
        .map_err(Into::into)
}

/// Looks up an entry by its effect identity.
pub async fn find_entry<C>(
    db: &C,
    kind: EntryKind,
    user_id: i64,
    correlation_id: &str,
) -> Result<Option<wallet_entry::Model>>
where
    C: ConnectionTrait,
{
    WalletEntry::find()
        .filter(wallet_entry::Column::IdempotencyKey.eq(idempotency_key(kind, user_id, correlation_id)))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Applies one balance mutation of `kind` exactly once per correlation id.
async fn apply<C>(
    db: &C,
    kind: EntryKind,
    user_id: i64,
    amount: i64,
    correlation_id: &str,
    reason: &str,
) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    use wallet::Column;

    ensure_positive(amount)?;

    let txn = db.begin().await?;

    if let Some(existing) = find_entry(&txn, kind, user_id, correlation_id).await? {
        warn!(
            user_id,
            correlation_id, "Ledger effect {kind} already applied, skipping"
        );
        txn.commit().await?;
        return Ok(LedgerOutcome::Duplicate(existing));
    }

    get_or_create_wallet(&txn, user_id).await?;

    let now = Utc::now();
    let mut update = Wallet::update_many()
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::UserId.eq(user_id));

    update = match kind {
        EntryKind::Freeze => update
            .col_expr(Column::Balance, Expr::col(Column::Balance).sub(amount))
            .col_expr(
                Column::FrozenBalance,
                Expr::col(Column::FrozenBalance).add(amount),
            )
            .filter(Column::Balance.gte(amount)),
        EntryKind::ChargeFrozen => update
            .col_expr(
                Column::FrozenBalance,
                Expr::col(Column::FrozenBalance).sub(amount),
            )
            .filter(Column::FrozenBalance.gte(amount)),
        EntryKind::Unfreeze => update
            .col_expr(
                Column::FrozenBalance,
                Expr::col(Column::FrozenBalance).sub(amount),
            )
            .col_expr(Column::Balance, Expr::col(Column::Balance).add(amount))
            .filter(Column::FrozenBalance.gte(amount)),
        EntryKind::Refund => {
            update.col_expr(Column::Balance, Expr::col(Column::Balance).add(amount))
        }
        EntryKind::Payout => update
            .col_expr(Column::Balance, Expr::col(Column::Balance).add(amount))
            .col_expr(
                Column::TotalEarned,
                Expr::col(Column::TotalEarned).add(amount),
            ),
        EntryKind::Deposit => update
            .col_expr(Column::Balance, Expr::col(Column::Balance).add(amount))
            .col_expr(
                Column::TotalDeposited,
                Expr::col(Column::TotalDeposited).add(amount),
            ),
        EntryKind::AddCoins => update.col_expr(
            Column::CoinBalance,
            Expr::col(Column::CoinBalance).add(amount),
        ),
    };

    let result = update.exec(&txn).await?;
    if result.rows_affected == 0 {
        let current = get_or_create_wallet(&txn, user_id).await?;
        let available = match kind {
            EntryKind::Freeze => current.balance,
            _ => current.frozen_balance,
        };
        return Err(Error::InsufficientFunds {
            available,
            required: amount,
        });
    }

    let after = Wallet::find_by_id(user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Wallet", user_id))?;

    let entry = wallet_entry::ActiveModel {
        user_id: Set(user_id),
        kind: Set(kind),
        amount: Set(amount),
        balance_after: Set(after.balance),
        frozen_after: Set(after.frozen_balance),
        correlation_id: Set(correlation_id.to_string()),
        idempotency_key: Set(idempotency_key(kind, user_id, correlation_id)),
        reason: Set(reason.to_string()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    info!(
        user_id,
        amount,
        correlation_id,
        balance = after.balance,
        frozen = after.frozen_balance,
        "Wallet {kind} applied"
    );
    Ok(LedgerOutcome::Applied(entry))
}

/// Moves `amount` from spendable to frozen. Fails with `InsufficientFunds`.
pub async fn freeze<C>(db: &C, user_id: i64, amount: i64, correlation_id: &str) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply(db, EntryKind::Freeze, user_id, amount, correlation_id, "Escrow hold").await
}

/// Removes `amount` from frozen; the money is spent.
pub async fn charge_frozen<C>(
    db: &C,
    user_id: i64,
    amount: i64,
    correlation_id: &str,
) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply(
        db,
        EntryKind::ChargeFrozen,
        user_id,
        amount,
        correlation_id,
        "Escrow captured",
    )
    .await
}

/// Returns frozen `amount` to spendable.
pub async fn unfreeze<C>(
    db: &C,
    user_id: i64,
    amount: i64,
    correlation_id: &str,
) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply(
        db,
        EntryKind::Unfreeze,
        user_id,
        amount,
        correlation_id,
        "Escrow released",
    )
    .await
}

/// Credits spendable balance for money that was never frozen.
pub async fn refund<C>(
    db: &C,
    user_id: i64,
    amount: i64,
    correlation_id: &str,
    reason: &str,
) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply(db, EntryKind::Refund, user_id, amount, correlation_id, reason).await
}

/// Credits a mentor's share to spendable balance.
pub async fn payout<C>(db: &C, user_id: i64, amount: i64, correlation_id: &str) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply(
        db,
        EntryKind::Payout,
        user_id,
        amount,
        correlation_id,
        "Mentor payout",
    )
    .await
}

/// Cash top-up, keyed by the funding payment's reference.
pub async fn deposit<C>(
    db: &C,
    user_id: i64,
    amount: i64,
    correlation_id: &str,
    reason: &str,
) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply(db, EntryKind::Deposit, user_id, amount, correlation_id, reason).await
}

/// Coin credit.
pub async fn add_coins<C>(
    db: &C,
    user_id: i64,
    coins: i64,
    correlation_id: &str,
    reason: &str,
) -> Result<LedgerOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply(db, EntryKind::AddCoins, user_id, coins, correlation_id, reason).await
}
