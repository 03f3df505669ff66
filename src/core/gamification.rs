//! Mentor gamification: skill points, levels, badges and rating aggregates.
//!
//! Both award paths (completed session, five-star review) go through
//! [`apply_event`]. Badge bonuses are guarded by "counter equals threshold and
//! badge not yet held", so replaying an event for the same counter value
//! cannot award the same bonus twice.

use crate::{
    entities::{MentorProfile, mentor_profile},
    errors::Result,
    notify::{Notification, NotificationKind},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, IntoActiveModel, Set};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Points for every completed session
pub const SESSION_COMPLETION_POINTS: i32 = 20;

/// Points per level
pub const POINTS_PER_LEVEL: i32 = 100;

/// What happened to the mentor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamificationEvent {
    /// A booking reached `COMPLETED`; counter is the mentor's completed-session count
    SessionCompleted,
    /// A five-star review was recorded; counter is the mentor's five-star count
    FiveStarReview,
}

/// Milestone badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge {
    pub code: &'static str,
    pub threshold: u64,
    pub bonus: i32,
    pub label: &'static str,
}

const SESSION_BADGES: [Badge; 3] = [
    Badge {
        code: "FIRST_SESSION",
        threshold: 1,
        bonus: 50,
        label: "Completed your first mentoring session",
    },
    Badge {
        code: "TEN_SESSIONS",
        threshold: 10,
        bonus: 100,
        label: "Completed 10 mentoring sessions",
    },
    Badge {
        code: "HUNDRED_SESSIONS",
        threshold: 100,
        bonus: 500,
        label: "Completed 100 mentoring sessions",
    },
];

const FIVE_STAR_BADGES: [Badge; 3] = [
    Badge {
        code: "FIRST_5_STAR",
        threshold: 1,
        bonus: 30,
        label: "Received your first 5-star review",
    },
    Badge {
        code: "TEN_5_STAR",
        threshold: 10,
        bonus: 150,
        label: "Received 10 five-star reviews",
    },
    Badge {
        code: "HUNDRED_5_STAR",
        threshold: 100,
        bonus: 1000,
        label: "Received 100 five-star reviews",
    },
];

impl GamificationEvent {
    const fn base_points(self) -> i32 {
        match self {
            Self::SessionCompleted => SESSION_COMPLETION_POINTS,
            Self::FiveStarReview => 0,
        }
    }

    const fn badges(self) -> &'static [Badge] {
        match self {
            Self::SessionCompleted => &SESSION_BADGES,
            Self::FiveStarReview => &FIVE_STAR_BADGES,
        }
    }
}

#[must_use]
pub const fn level_for_points(points: i32) -> i32 {
    if points <= 0 { 0 } else { points / POINTS_PER_LEVEL }
}

/// Named milestone levels.
#[must_use]
pub const fn level_title(level: i32) -> Option<&'static str> {
    match level {
        1 => Some("Rising Mentor"),
        5 => Some("Star Mentor"),
        10 => Some("Veteran Mentor"),
        15 => Some("Master Mentor"),
        20 => Some("Legendary Mentor"),
        _ => None,
    }
}

fn parse_badges(raw: &str) -> Result<BTreeSet<String>> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    Ok(serde_json::from_str(raw)?)
}

/// Applies `event` to the mentor's profile and returns the notifications to send
/// after the surrounding transaction commits.
///
/// A mentor without a profile row is skipped.
pub async fn apply_event<C>(
    db: &C,
    mentor_id: i64,
    event: GamificationEvent,
    counter: u64,
    correlation_ref: &str,
) -> Result<Vec<Notification>>
where
    C: ConnectionTrait,
{
    let Some(profile) = MentorProfile::find_by_id(mentor_id).one(db).await? else {
        debug!(mentor_id, "No mentor profile, gamification skipped");
        return Ok(Vec::new());
    };

    let mut notifications = Vec::new();
    let mut badges = parse_badges(&profile.badges)?;
    let mut points = profile.skill_points.saturating_add(event.base_points());

    for badge in event.badges() {
        if counter == badge.threshold && !badges.contains(badge.code) {
            badges.insert(badge.code.to_string());
            points = points.saturating_add(badge.bonus);
            info!(mentor_id, badge = badge.code, "Badge awarded");
            notifications.push(
                Notification::new(mentor_id, NotificationKind::BadgeEarned, "Badge earned", badge.label)
                    .with_ref(format!("BADGE_{}", badge.code)),
            );
        }
    }

    let level = level_for_points(points).max(profile.current_level);
    if level > profile.current_level {
        let body = level_title(level).map_or_else(
            || format!("You reached level {level}"),
            |title| format!("You reached level {level} - {title}"),
        );
        info!(mentor_id, level, "Mentor levelled up");
        notifications.push(
            Notification::new(mentor_id, NotificationKind::LevelUp, "Level up", body)
                .with_ref(format!("LEVEL_{level}")),
        );
    }

    let mut active = profile.into_active_model();
    active.skill_points = Set(points);
    active.current_level = Set(level);
    active.badges = Set(serde_json::to_string(&badges)?);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;

    debug!(mentor_id, ?event, counter, points, correlation_ref, "Gamification applied");
    Ok(notifications)
}

/// Folds a new review into the mentor's rating aggregates.
pub async fn record_rating<C>(db: &C, mentor_id: i64, stars: i32) -> Result<Option<mentor_profile::Model>>
where
    C: ConnectionTrait,
{
    let Some(profile) = MentorProfile::find_by_id(mentor_id).one(db).await? else {
        return Ok(None);
    };

    let count = profile.rating_count + 1;
    let average = profile
        .rating_average
        .mul_add(f64::from(profile.rating_count), f64::from(stars))
        / f64::from(count);

    let mut active = profile.into_active_model();
    active.rating_count = Set(count);
    active.rating_average = Set(average);
    active.updated_at = Set(Utc::now());
    Ok(Some(active.update(db).await?))
}
