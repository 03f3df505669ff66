//! Wallet ledger entry - Immutable record of one balance mutation.
//!
//! `idempotency_key` is `<KIND>:<user_id>:<correlation_id>` and is unique, so
//! replaying the same logical effect cannot insert a second row.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Spendable -> frozen
    #[sea_orm(string_value = "FREEZE")]
    Freeze,
    /// Frozen -> spent
    #[sea_orm(string_value = "CHARGE_FROZEN")]
    ChargeFrozen,
    /// Frozen -> spendable
    #[sea_orm(string_value = "UNFREEZE")]
    Unfreeze,
    /// Credit to spendable for money that was never frozen
    #[sea_orm(string_value = "REFUND")]
    Refund,
    /// Mentor share credited to spendable
    #[sea_orm(string_value = "PAYOUT")]
    Payout,
    /// Cash top-up
    #[sea_orm(string_value = "DEPOSIT")]
    Deposit,
    /// Coin credit
    #[sea_orm(string_value = "ADD_COINS")]
    AddCoins,
}

impl EntryKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Freeze => "FREEZE",
            Self::ChargeFrozen => "CHARGE_FROZEN",
            Self::Unfreeze => "UNFREEZE",
            Self::Refund => "REFUND",
            Self::Payout => "PAYOUT",
            Self::Deposit => "DEPOSIT",
            Self::AddCoins => "ADD_COINS",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_entries")]
pub struct Model {
    /// Unique identifier for the entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Wallet owner
    pub user_id: i64,
    /// Mutation kind
    pub kind: EntryKind,
    /// Amount moved (always positive)
    pub amount: i64,
    /// Spendable balance after the mutation
    pub balance_after: i64,
    /// Frozen balance after the mutation
    pub frozen_after: i64,
    /// Business correlation, e.g. `BOOKING_42` or `PAYMENT_<ref>`
    pub correlation_id: String,
    /// Deduplication key
    #[sea_orm(unique)]
    pub idempotency_key: String,
    /// Human-readable reason
    pub reason: String,
    /// When the mutation was applied
    pub created_at: DateTimeUtc,
}

/// Defines relationships between entries and wallets
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one wallet
    #[sea_orm(
        belongs_to = "super::wallet::Entity",
        from = "Column::UserId",
        to = "super::wallet::Column::UserId"
    )]
    Wallet,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
