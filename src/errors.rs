//! Unified error type for the booking core.
//!
//! Caller-fixable failures (validation, authorization, guard mismatches,
//! policy breaches) are kept apart from infrastructure failures so the
//! outer layer can decide what to retry.

use thiserror::Error;

/// All errors produced by the booking, payment and wallet modules.
#[derive(Debug, Error)]
pub enum Error {
    /// Settings could not be read or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O failure (config file, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure (payment metadata, badges)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A booking, transaction, wallet or user does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up
        entity: &'static str,
        /// Identifier used for the lookup
        id: String,
    },

    /// The acting user is not a participant/owner of the record
    #[error("User {user_id} is not allowed to {action}")]
    Unauthorized {
        /// Acting user
        user_id: i64,
        /// Attempted action
        action: &'static str,
    },

    /// The record was not in the status the operation requires
    #[error("Cannot {action} booking {booking_id} in status {from}")]
    InvalidStateTransition {
        /// Booking being transitioned
        booking_id: i64,
        /// Status observed when the guard failed
        from: String,
        /// Attempted transition
        action: &'static str,
    },

    /// An active booking already occupies the requested interval
    #[error("Scheduling conflict: {message}")]
    SchedulingConflict {
        /// Which participant is double-booked
        message: String,
    },

    /// Spendable (or frozen) balance is too small for the mutation
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        /// Balance at the time of the attempt
        available: i64,
        /// Amount the operation needed
        required: i64,
    },

    /// Cancel window or similar business rule breached
    #[error("Policy violation: {message}")]
    PolicyViolation {
        /// Human-readable rule description
        message: String,
    },

    /// Amounts must be strictly positive
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// Offending amount
        amount: i64,
    },

    /// Malformed request input
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Upstream payment provider failure
    #[error("Payment gateway error: {message}")]
    Gateway {
        /// Provider or transport error description
        message: String,
    },

    /// Webhook payload signature did not match
    #[error("Invalid webhook signature")]
    InvalidSignature,
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the failure is infrastructural and the same call may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_) | Self::Gateway { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Gateway {
            message: value.to_string(),
        }
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
