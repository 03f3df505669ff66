//! Booking entity - One scheduled mentoring session between a mentor and a learner.
//!
//! Rows are never deleted. Terminal statuses (`COMPLETED`, `REJECTED`, `CANCELLED`)
//! are kept for audit and reviews. Status changes go through conditional updates
//! in `core::booking`, never through a plain read-modify-write.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Reserved and funded, waiting for the mentor
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Approved by the mentor
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    /// Session in progress
    #[sea_orm(string_value = "ONGOING")]
    Ongoing,
    /// Session finished and paid out
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Declined by the mentor
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    /// Cancelled by the learner or by the auto-cancel job
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl BookingStatus {
    /// Statuses that occupy the mentor's and learner's calendars.
    pub const ACTIVE: [Self; 3] = [Self::Pending, Self::Confirmed, Self::Ongoing];

    /// Statuses shown in a participant's booking list.
    pub const LISTED: [Self; 4] = [
        Self::Pending,
        Self::Confirmed,
        Self::Ongoing,
        Self::Completed,
    ];

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Ongoing => "ONGOING",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the learner's money for this booking sits until completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Funding {
    /// Price frozen in the learner's wallet
    #[sea_orm(string_value = "WALLET")]
    Wallet,
    /// Price captured by the external gateway, nothing frozen
    #[sea_orm(string_value = "GATEWAY")]
    Gateway,
}

/// Booking database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    /// Unique identifier for the booking
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User id of the mentor
    pub mentor_id: i64,
    /// User id of the learner
    pub learner_id: i64,
    /// Session start (UTC)
    pub start_time: DateTimeUtc,
    /// Session end, `start_time + duration_minutes`
    pub end_time: DateTimeUtc,
    /// Session length in minutes
    pub duration_minutes: i32,
    /// Agreed price in whole currency units
    pub price: i64,
    /// How the price was paid
    pub funding: Funding,
    /// Internal reference of the gateway payment, if any
    pub payment_reference: Option<String>,
    /// Current lifecycle status
    pub status: BookingStatus,
    /// Video room link, derived from booking and participant ids
    pub meeting_link: Option<String>,
    /// Mentor-supplied reason on rejection
    pub rejection_reason: Option<String>,
    /// Reason recorded on cancellation
    pub cancellation_reason: Option<String>,
    /// When the booking was materialized
    pub created_at: DateTimeUtc,
    /// When the booking last changed
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Whether `user_id` is the mentor or the learner of this booking.
    #[must_use]
    pub const fn is_participant(&self, user_id: i64) -> bool {
        self.mentor_id == user_id || self.learner_id == user_id
    }
}

/// Defines relationships between Booking and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One booking has at most one review
    #[sea_orm(has_many = "super::booking_review::Entity")]
    Reviews,
}

impl Related<super::booking_review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
