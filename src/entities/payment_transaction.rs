//! Payment transaction entity - One payment attempt, gateway- or wallet-based.
//!
//! `internal_reference` is generated on insert and exposed to clients.
//! `gateway_reference` stays empty until the provider accepts the intent.
//! `metadata` is an opaque JSON blob; for mentor bookings it carries the booking intent.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a payment attempt. Only `PENDING` may transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

impl PaymentStatus {
    /// Maps a provider/webhook status word to the internal status.
    ///
    /// Unknown words map to `Pending`, which callers treat as "no change".
    #[must_use]
    pub fn from_external(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" | "COMPLETED" | "PAID" => Self::Completed,
            "FAILED" | "ERROR" | "EXPIRED" => Self::Failed,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the payment is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    #[sea_orm(string_value = "MENTOR_BOOKING")]
    MentorBooking,
    #[sea_orm(string_value = "WALLET_TOPUP")]
    WalletTopup,
    #[sea_orm(string_value = "COURSE_PURCHASE")]
    CoursePurchase,
}

/// How the payment is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// External checkout (PayOS)
    #[sea_orm(string_value = "GATEWAY")]
    Gateway,
    /// Internal wallet
    #[sea_orm(string_value = "WALLET")]
    Wallet,
}

/// Payment transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_transactions")]
pub struct Model {
    /// Unique identifier, also used as the gateway order code
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Stable client-facing reference
    #[sea_orm(unique)]
    pub internal_reference: String,
    /// Provider's reference, set once the intent is accepted
    #[sea_orm(unique)]
    pub gateway_reference: Option<String>,
    /// Paying user
    pub user_id: i64,
    /// Amount in whole currency units
    pub amount: i64,
    /// ISO currency code
    pub currency: String,
    /// What is being paid for
    pub kind: PaymentKind,
    /// Gateway or wallet
    pub method: PaymentMethod,
    /// Current status
    pub status: PaymentStatus,
    /// Short description shown on the checkout page
    pub description: String,
    /// Opaque JSON payload (booking intent for mentor bookings)
    pub metadata: Option<String>,
    /// Reason recorded on failure, cancellation or refund
    pub failure_reason: Option<String>,
    /// When the attempt was created
    pub created_at: DateTimeUtc,
    /// When the attempt last changed
    pub updated_at: DateTimeUtc,
}

/// `PaymentTransaction` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
