//! Scheduled job entity - Durable one-shot jobs polled by the scheduler.
//!
//! Replaces in-process timers so a restart does not lose pending reminders.
//! `job_key` is unique, making scheduling insert-if-absent.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What the job does when it comes due
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Meeting reminder email to both participants
    #[sea_orm(string_value = "REMINDER")]
    Reminder,
}

/// Job progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "DONE")]
    Done,
    /// Target no longer relevant (booking left the active set)
    #[sea_orm(string_value = "SKIPPED")]
    Skipped,
}

/// Scheduled job database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scheduled_jobs")]
pub struct Model {
    /// Unique identifier for the job
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Deduplication key, e.g. `REMINDER:42`
    #[sea_orm(unique)]
    pub job_key: String,
    /// Job type
    pub kind: JobKind,
    /// Booking the job refers to
    pub booking_id: i64,
    /// Earliest time the job may run
    pub due_at: DateTimeUtc,
    /// Progress
    pub status: JobStatus,
    /// When the job was scheduled
    pub created_at: DateTimeUtc,
    /// When the job was claimed or last changed
    pub updated_at: DateTimeUtc,
}

/// `ScheduledJob` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
