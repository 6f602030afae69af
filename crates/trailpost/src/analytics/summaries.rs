//! Weekly / monthly / yearly activity summaries.

use time::{Date, Duration, Month, OffsetDateTime};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ActivitySummary, PeriodType};
use crate::store::Database;

/// Monday of the week containing `day`.
pub fn week_start(day: Date) -> Date {
    let days_from_monday = day.weekday().number_days_from_monday();
    day - Duration::days(i64::from(days_from_monday))
}

/// First and (exclusive) end day of the month containing `day`.
pub fn month_bounds(day: Date) -> (Date, Date) {
    let start = Date::from_calendar_date(day.year(), day.month(), 1).expect("first of month");
    let end = if day.month() == Month::December {
        Date::from_calendar_date(day.year() + 1, Month::January, 1)
    } else {
        Date::from_calendar_date(day.year(), day.month().next(), 1)
    }
    .expect("first of next month");
    (start, end)
}

pub fn year_bounds(day: Date) -> (Date, Date) {
    (
        Date::from_calendar_date(day.year(), Month::January, 1).expect("first of year"),
        Date::from_calendar_date(day.year() + 1, Month::January, 1).expect("first of next year"),
    )
}

fn period_window(period_type: PeriodType, day: Date) -> (Date, Date) {
    match period_type {
        PeriodType::Weekly => {
            let start = week_start(day);
            (start, start + Duration::days(7))
        }
        PeriodType::Monthly => month_bounds(day),
        PeriodType::Yearly => year_bounds(day),
    }
}

/// Recompute the three summaries whose windows contain the activity date.
pub async fn update_summaries(
    db: &Database,
    user_id: Uuid,
    activity_date: Date,
) -> Result<(), AppError> {
    for period_type in [PeriodType::Weekly, PeriodType::Monthly, PeriodType::Yearly] {
        let (start, end) = period_window(period_type, activity_date);
        let from = start.midnight().assume_utc();
        let to = end.midnight().assume_utc();

        let totals = db.period_totals(user_id, from, to).await?;
        let record_count = db.personal_records_in_window(user_id, from, to).await?;
        let achievement_count = db.achievements_in_window(user_id, from, to).await?;

        db.upsert_activity_summary(&ActivitySummary {
            id: Uuid::new_v4(),
            user_id,
            period_type,
            period_start: start,
            // inclusive last day of the window
            period_end: end - Duration::days(1),
            activity_count: totals.activity_count as i32,
            total_duration_seconds: totals.total_duration_seconds,
            total_distance: totals.total_distance,
            total_elevation_gain: totals.total_elevation_gain,
            max_speed: totals.max_speed,
            average_speed: totals.average_speed,
            by_activity_type: totals.by_activity_type,
            personal_record_count: record_count as i32,
            achievement_count: achievement_count as i32,
        })
        .await?;
    }
    Ok(())
}

/// Convenience for callers holding a timestamp.
pub async fn update_summaries_at(
    db: &Database,
    user_id: Uuid,
    at: OffsetDateTime,
) -> Result<(), AppError> {
    update_summaries(db, user_id, at.date()).await
}
