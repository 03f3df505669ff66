//! Mentor profile entity - the gamification subset (points, level, badges, rating).
//!
//! Profiles are owned by the mentor service; this crate only updates them as a
//! side effect of completed sessions and reviews.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Mentor profile database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mentor_profiles")]
pub struct Model {
    /// Mentor's user id
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    /// Accumulated skill points
    pub skill_points: i32,
    /// Level, always `skill_points / 100` or higher
    pub current_level: i32,
    /// JSON array of badge codes
    pub badges: String,
    /// Number of reviews received
    pub rating_count: i32,
    /// Mean star rating
    pub rating_average: f64,
    /// When the profile last changed
    pub updated_at: DateTimeUtc,
}

/// `MentorProfile` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
