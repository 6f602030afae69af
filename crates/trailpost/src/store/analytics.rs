use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::Database;
use crate::errors::AppError;
use crate::models::{
    Achievement, AchievementType, ActivitySummary, ActivityType, PersonalRecord, PeriodType,
    RecordType, TrainingLoad,
};

// ============================================================================
// Personal records
// ============================================================================

impl Database {
    /// Upsert a record only when it improves on the stored one. Returns true
    /// when the record changed.
    pub async fn upsert_personal_record(
        &self,
        user_id: Uuid,
        activity_type: ActivityType,
        record_type: RecordType,
        value: f64,
        activity_id: Uuid,
        achieved_at: OffsetDateTime,
    ) -> Result<bool, AppError> {
        let existing: Option<(f64,)> = sqlx::query_as(
            r#"
            SELECT value FROM personal_records
            WHERE user_id = $1 AND activity_type = $2 AND record_type = $3
            "#,
        )
        .bind(user_id)
        .bind(activity_type)
        .bind(record_type)
        .fetch_optional(&self.pool)
        .await?;

        let improved = match existing {
            None => true,
            Some((current,)) => {
                if record_type.lower_is_better() {
                    value < current
                } else {
                    value > current
                }
            }
        };
        if !improved {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO personal_records (id, user_id, activity_type, record_type, value,
                                          activity_id, achieved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, activity_type, record_type) DO UPDATE SET
                value = EXCLUDED.value,
                activity_id = EXCLUDED.activity_id,
                achieved_at = EXCLUDED.achieved_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(activity_type)
        .bind(record_type)
        .bind(value)
        .bind(activity_id)
        .bind(achieved_at)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    pub async fn get_personal_records(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PersonalRecord>, AppError> {
        let records = sqlx::query_as::<_, PersonalRecord>(
            r#"
            SELECT id, user_id, activity_type, record_type, value, activity_id, achieved_at
            FROM personal_records WHERE user_id = $1
            ORDER BY activity_type, record_type
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn personal_records_in_window(
        &self,
        user_id: Uuid,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM personal_records
            WHERE user_id = $1 AND achieved_at >= $2 AND achieved_at < $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }
}

// ============================================================================
// Achievements
// ============================================================================

impl Database {
    /// Award once per (user, type); returns true when it was new.
    pub async fn try_award_achievement(
        &self,
        user_id: Uuid,
        achievement_type: AchievementType,
        activity_id: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO achievements (id, user_id, achievement_type, activity_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, achievement_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(achievement_type)
        .bind(activity_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_achievements(&self, user_id: Uuid) -> Result<Vec<Achievement>, AppError> {
        let achievements = sqlx::query_as::<_, Achievement>(
            r#"
            SELECT id, user_id, achievement_type, activity_id, earned_at
            FROM achievements WHERE user_id = $1 ORDER BY earned_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(achievements)
    }

    pub async fn achievements_in_window(
        &self,
        user_id: Uuid,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM achievements
            WHERE user_id = $1 AND earned_at >= $2 AND earned_at < $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }
}

// ============================================================================
// Totals feeding the achievement evaluator
// ============================================================================

/// Aggregate facts about a user's history, gathered in two queries.
#[derive(Debug, Clone, Default)]
pub struct UserTotals {
    pub activity_count: i64,
    pub total_distance: f64,
    pub distinct_activity_types: i64,
    /// Distinct local dates with at least one activity, newest first.
    pub activity_days: Vec<Date>,
}

impl Database {
    pub async fn user_totals(&self, user_id: Uuid) -> Result<UserTotals, AppError> {
        let row: (i64, Option<f64>, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   SUM(total_distance),
                   COUNT(DISTINCT activity_type)
            FROM activities WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let days: Vec<(Date,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT started_at::date AS day FROM activities
            WHERE user_id = $1 ORDER BY day DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(UserTotals {
            activity_count: row.0,
            total_distance: row.1.unwrap_or(0.0),
            distinct_activity_types: row.2,
            activity_days: days.into_iter().map(|(d,)| d).collect(),
        })
    }
}

// ============================================================================
// Training load
// ============================================================================

/// The slice of an activity the TSS computation needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrainingActivity {
    pub total_duration_seconds: i64,
    pub total_distance: f64,
    pub elevation_gain: Option<f64>,
    pub average_speed: Option<f64>,
}

impl Database {
    pub async fn training_activities_on_day(
        &self,
        user_id: Uuid,
        day: Date,
    ) -> Result<Vec<TrainingActivity>, AppError> {
        let activities = sqlx::query_as::<_, TrainingActivity>(
            r#"
            SELECT a.total_duration_seconds, a.total_distance, a.elevation_gain,
                   m.average_speed
            FROM activities a
            LEFT JOIN activity_metrics m ON m.activity_id = a.id
            WHERE a.user_id = $1 AND a.started_at::date = $2
            "#,
        )
        .bind(user_id)
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }

    pub async fn upsert_training_load(&self, load: &TrainingLoad) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO training_load (user_id, day, tss, atl, ctl, tsb, form_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, day) DO UPDATE SET
                tss = EXCLUDED.tss, atl = EXCLUDED.atl, ctl = EXCLUDED.ctl,
                tsb = EXCLUDED.tsb, form_status = EXCLUDED.form_status
            "#,
        )
        .bind(load.user_id)
        .bind(load.day)
        .bind(load.tss)
        .bind(load.atl)
        .bind(load.ctl)
        .bind(load.tsb)
        .bind(load.form_status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn training_load_range(
        &self,
        user_id: Uuid,
        from: Date,
        to: Date,
    ) -> Result<Vec<TrainingLoad>, AppError> {
        let loads = sqlx::query_as::<_, TrainingLoad>(
            r#"
            SELECT user_id, day, tss, atl, ctl, tsb, form_status
            FROM training_load
            WHERE user_id = $1 AND day >= $2 AND day <= $3
            ORDER BY day
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(loads)
    }
}

// ============================================================================
// Period summaries
// ============================================================================

/// Aggregates for one summary window, from a single query plus a per-type
/// breakdown.
#[derive(Debug, Clone, Default)]
pub struct PeriodTotals {
    pub activity_count: i64,
    pub total_duration_seconds: i64,
    pub total_distance: f64,
    pub total_elevation_gain: f64,
    pub max_speed: Option<f64>,
    pub average_speed: Option<f64>,
    pub by_activity_type: serde_json::Value,
}

impl Database {
    pub async fn period_totals(
        &self,
        user_id: Uuid,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<PeriodTotals, AppError> {
        let row: (i64, Option<i64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       SUM(a.total_duration_seconds),
                       SUM(a.total_distance),
                       SUM(a.elevation_gain),
                       MAX(m.max_speed),
                       AVG(m.average_speed)
                FROM activities a
                LEFT JOIN activity_metrics m ON m.activity_id = a.id
                WHERE a.user_id = $1 AND a.started_at >= $2 AND a.started_at < $3
                "#,
            )
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_one(&self.pool)
            .await?;

        let breakdown: Vec<(ActivityType, i64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT activity_type, COUNT(*), SUM(total_distance)
            FROM activities
            WHERE user_id = $1 AND started_at >= $2 AND started_at < $3
            GROUP BY activity_type
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let by_activity_type = serde_json::Value::Object(
            breakdown
                .into_iter()
                .map(|(activity_type, count, distance)| {
                    (
                        activity_type.as_str().to_string(),
                        serde_json::json!({
                            "count": count,
                            "distance": distance.unwrap_or(0.0),
                        }),
                    )
                })
                .collect(),
        );

        Ok(PeriodTotals {
            activity_count: row.0,
            total_duration_seconds: row.1.unwrap_or(0),
            total_distance: row.2.unwrap_or(0.0),
            total_elevation_gain: row.3.unwrap_or(0.0),
            max_speed: row.4,
            average_speed: row.5,
            by_activity_type,
        })
    }

    pub async fn upsert_activity_summary(
        &self,
        summary: &ActivitySummary,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO activity_summaries (id, user_id, period_type, period_start, period_end,
                                            activity_count, total_duration_seconds,
                                            total_distance, total_elevation_gain, max_speed,
                                            average_speed, by_activity_type,
                                            personal_record_count, achievement_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (user_id, period_type, period_start) DO UPDATE SET
                period_end = EXCLUDED.period_end,
                activity_count = EXCLUDED.activity_count,
                total_duration_seconds = EXCLUDED.total_duration_seconds,
                total_distance = EXCLUDED.total_distance,
                total_elevation_gain = EXCLUDED.total_elevation_gain,
                max_speed = EXCLUDED.max_speed,
                average_speed = EXCLUDED.average_speed,
                by_activity_type = EXCLUDED.by_activity_type,
                personal_record_count = EXCLUDED.personal_record_count,
                achievement_count = EXCLUDED.achievement_count
            "#,
        )
        .bind(summary.id)
        .bind(summary.user_id)
        .bind(summary.period_type)
        .bind(summary.period_start)
        .bind(summary.period_end)
        .bind(summary.activity_count)
        .bind(summary.total_duration_seconds)
        .bind(summary.total_distance)
        .bind(summary.total_elevation_gain)
        .bind(summary.max_speed)
        .bind(summary.average_speed)
        .bind(&summary.by_activity_type)
        .bind(summary.personal_record_count)
        .bind(summary.achievement_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_activity_summaries(
        &self,
        user_id: Uuid,
        period_type: PeriodType,
        limit: i64,
    ) -> Result<Vec<ActivitySummary>, AppError> {
        let summaries = sqlx::query_as::<_, ActivitySummary>(
            r#"
            SELECT id, user_id, period_type, period_start, period_end, activity_count,
                   total_duration_seconds, total_distance, total_elevation_gain, max_speed,
                   average_speed, by_activity_type, personal_record_count, achievement_count
            FROM activity_summaries
            WHERE user_id = $1 AND period_type = $2
            ORDER BY period_start DESC LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(period_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }
}

// ============================================================================
// Privacy zones
// ============================================================================

impl Database {
    pub async fn get_privacy_zones(&self, user_id: Uuid) -> Result<Vec<crate::models::PrivacyZone>, AppError> {
        let zones = sqlx::query_as::<_, crate::models::PrivacyZone>(
            r#"
            SELECT id, user_id, name, center_lon, center_lat, radius_m, active
            FROM privacy_zones WHERE user_id = $1 ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(zones)
    }

    pub async fn create_privacy_zone(
        &self,
        zone: &crate::models::PrivacyZone,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO privacy_zones (id, user_id, name, center_lon, center_lat, radius_m,
                                       active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(zone.id)
        .bind(zone.user_id)
        .bind(&zone.name)
        .bind(zone.center_lon)
        .bind(zone.center_lat)
        .bind(zone.radius_m)
        .bind(zone.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_privacy_zone(&self, id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM privacy_zones WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
