//! Wallet entity - A user's spendable cash, escrowed (frozen) cash and coins.
//!
//! Balances only change through the conditional updates in `core::wallet`,
//! each paired with an immutable `wallet_entry` row.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wallet database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallets")]
pub struct Model {
    /// Owner; one wallet per user
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    /// Spendable cash in whole currency units
    pub balance: i64,
    /// Cash held in escrow for pending/confirmed bookings
    pub frozen_balance: i64,
    /// Coin balance (rewards, purchases)
    pub coin_balance: i64,
    /// Lifetime cash deposited
    pub total_deposited: i64,
    /// Lifetime cash received as mentor payouts
    pub total_earned: i64,
    /// When the wallet was opened
    pub created_at: DateTimeUtc,
    /// When any balance last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Wallet and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One wallet has many ledger entries
    #[sea_orm(has_many = "super::wallet_entry::Entity")]
    Entries,
}

impl Related<super::wallet_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
