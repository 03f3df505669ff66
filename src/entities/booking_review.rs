//! Booking review entity - A learner's rating of a completed session.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Review database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "booking_reviews")]
pub struct Model {
    /// Unique identifier for the review
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Reviewed booking; one review per booking
    #[sea_orm(unique)]
    pub booking_id: i64,
    /// Mentor being rated
    pub mentor_id: i64,
    /// Learner who wrote the review
    pub learner_id: i64,
    /// Rating from 1 to 5
    pub stars: i32,
    /// Free-form feedback
    pub comment: String,
    /// When the review was written
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Review and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each review belongs to one booking
    #[sea_orm(
        belongs_to = "super::booking::Entity",
        from = "Column::BookingId",
        to = "super::booking::Column::Id"
    )]
    Booking,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
