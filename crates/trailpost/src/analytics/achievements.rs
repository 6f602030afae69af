//! Achievement evaluation over the user's running totals.
//!
//! Evaluated after every save; each achievement is unique per user, so
//! re-evaluation is naturally idempotent.

use time::Date;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::AchievementType;
use crate::store::Database;

const MARATHON_M: f64 = 42_195.0;
const BIG_CLIMB_M: f64 = 1_000.0;

/// Longest run of consecutive days in a distinct, descending day list.
pub fn longest_streak(days: &[Date]) -> i64 {
    let mut longest = 0i64;
    let mut current = 0i64;
    let mut prev: Option<Date> = None;
    for &day in days {
        current = match prev {
            Some(prev) if prev - day == time::Duration::days(1) => current + 1,
            _ => 1,
        };
        longest = longest.max(current);
        prev = Some(day);
    }
    longest
}

pub async fn evaluate_achievements(db: &Database, activity_id: Uuid) -> Result<(), AppError> {
    let Some(activity) = db.get_activity(activity_id).await? else {
        debug!(%activity_id, "activity vanished before achievement evaluation");
        return Ok(());
    };
    let user_id = activity.user_id;
    let totals = db.user_totals(user_id).await?;

    // activity-count tiers
    let count_tiers = [
        (1, AchievementType::FirstActivity),
        (10, AchievementType::TenActivities),
        (50, AchievementType::FiftyActivities),
        (100, AchievementType::HundredActivities),
    ];
    for (threshold, achievement) in count_tiers {
        if totals.activity_count >= threshold {
            db.try_award_achievement(user_id, achievement, Some(activity_id))
                .await?;
        }
    }

    // cumulative distance tiers
    if totals.total_distance >= 100_000.0 {
        db.try_award_achievement(user_id, AchievementType::CumulativeHundredKm, Some(activity_id))
            .await?;
    }
    if totals.total_distance >= 1_000_000.0 {
        db.try_award_achievement(
            user_id,
            AchievementType::CumulativeThousandKm,
            Some(activity_id),
        )
        .await?;
    }

    // streaks of consecutive days
    let streak = longest_streak(&totals.activity_days);
    if streak >= 7 {
        db.try_award_achievement(user_id, AchievementType::WeekStreak, Some(activity_id))
            .await?;
    }
    if streak >= 30 {
        db.try_award_achievement(user_id, AchievementType::MonthStreak, Some(activity_id))
            .await?;
    }

    // breadth
    if totals.distinct_activity_types >= 5 {
        db.try_award_achievement(user_id, AchievementType::AllRounder, Some(activity_id))
            .await?;
    }

    // time of day
    let hour = activity.started_at.hour();
    if hour < 6 {
        db.try_award_achievement(user_id, AchievementType::EarlyBird, Some(activity_id))
            .await?;
    }
    if hour >= 22 {
        db.try_award_achievement(user_id, AchievementType::NightOwl, Some(activity_id))
            .await?;
    }

    // single-activity maxima
    if activity.total_distance >= MARATHON_M {
        db.try_award_achievement(user_id, AchievementType::MarathonDistance, Some(activity_id))
            .await?;
    }
    if activity.elevation_gain.unwrap_or(0.0) >= BIG_CLIMB_M {
        db.try_award_achievement(user_id, AchievementType::BigClimb, Some(activity_id))
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_streak_counts_consecutive_days() {
        let days = [
            date!(2025 - 11 - 27),
            date!(2025 - 11 - 26),
            date!(2025 - 11 - 25),
            date!(2025 - 11 - 22),
        ];
        assert_eq!(longest_streak(&days), 3);
    }

    #[test]
    fn test_streak_single_day() {
        assert_eq!(longest_streak(&[date!(2025 - 11 - 27)]), 1);
        assert_eq!(longest_streak(&[]), 0);
    }

    #[test]
    fn test_streak_finds_interior_run() {
        let days = [
            date!(2025 - 11 - 27),
            date!(2025 - 11 - 20),
            date!(2025 - 11 - 19),
            date!(2025 - 11 - 18),
            date!(2025 - 11 - 17),
            date!(2025 - 11 - 10),
        ];
        assert_eq!(longest_streak(&days), 4);
    }
}
