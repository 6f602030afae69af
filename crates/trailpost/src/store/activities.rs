use time::OffsetDateTime;
use uuid::Uuid;

use super::Database;
use crate::errors::AppError;
use crate::models::{
    Activity, ActivityMetrics, ActivityType, IndoorDetectionMethod, TrackPoint, Visibility,
};

/// Everything the upload path persists in one transaction.
#[derive(Debug)]
pub struct NewActivity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub activity_type: ActivityType,
    pub title: String,
    pub description: Option<String>,
    pub started_at: OffsetDateTime,
    pub ended_at: OffsetDateTime,
    pub timezone: String,
    pub visibility: Visibility,
    pub total_distance: f64,
    pub total_duration_seconds: i64,
    pub elevation_gain: Option<f64>,
    pub elevation_loss: Option<f64>,
    pub indoor: bool,
    pub indoor_detection_method: Option<IndoorDetectionMethod>,
    pub sub_sport: Option<String>,
    pub raw_file: Option<Vec<u8>>,
    pub raw_file_format: Option<String>,
    pub simplified_track: Option<serde_json::Value>,
    pub track_points: serde_json::Value,
    pub metrics: ActivityMetrics,
}

const ACTIVITY_COLUMNS: &str = "id, user_id, activity_type, title, description, started_at, \
                                ended_at, timezone, visibility, total_distance, \
                                total_duration_seconds, elevation_gain, elevation_loss, indoor, \
                                indoor_detection_method, sub_sport, raw_file_format, \
                                simplified_track, created_at";

impl Database {
    /// Atomic write of the activity row and its metrics: either the whole
    /// activity becomes visible or none of it does.
    pub async fn save_activity(&self, activity: &NewActivity) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO activities (id, user_id, activity_type, title, description, started_at,
                                    ended_at, timezone, visibility, total_distance,
                                    total_duration_seconds, elevation_gain, elevation_loss,
                                    indoor, indoor_detection_method, sub_sport, raw_file,
                                    raw_file_format, simplified_track, track_points)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(activity.id)
        .bind(activity.user_id)
        .bind(activity.activity_type)
        .bind(&activity.title)
        .bind(&activity.description)
        .bind(activity.started_at)
        .bind(activity.ended_at)
        .bind(&activity.timezone)
        .bind(activity.visibility)
        .bind(activity.total_distance)
        .bind(activity.total_duration_seconds)
        .bind(activity.elevation_gain)
        .bind(activity.elevation_loss)
        .bind(activity.indoor)
        .bind(activity.indoor_detection_method)
        .bind(&activity.sub_sport)
        .bind(&activity.raw_file)
        .bind(&activity.raw_file_format)
        .bind(&activity.simplified_track)
        .bind(&activity.track_points)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO activity_metrics (activity_id, average_heart_rate, max_heart_rate,
                                          average_cadence, average_power, max_power,
                                          average_speed, max_speed, calories, min_elevation,
                                          max_elevation, average_temperature)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(activity.id)
        .bind(activity.metrics.average_heart_rate)
        .bind(activity.metrics.max_heart_rate)
        .bind(activity.metrics.average_cadence)
        .bind(activity.metrics.average_power)
        .bind(activity.metrics.max_power)
        .bind(activity.metrics.average_speed)
        .bind(activity.metrics.max_speed)
        .bind(activity.metrics.calories)
        .bind(activity.metrics.min_elevation)
        .bind(activity.metrics.max_elevation)
        .bind(activity.metrics.average_temperature)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_activity(&self, id: Uuid) -> Result<Option<Activity>, AppError> {
        let activity = sqlx::query_as::<_, Activity>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(activity)
    }

    pub async fn get_activity_metrics(
        &self,
        id: Uuid,
    ) -> Result<Option<ActivityMetrics>, AppError> {
        let metrics = sqlx::query_as::<_, ActivityMetrics>(
            "SELECT * FROM activity_metrics WHERE activity_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(metrics)
    }

    /// Visibility-checked read. `Forbidden` when the row exists but the
    /// viewer may not see it.
    pub async fn get_visible_activity(
        &self,
        id: Uuid,
        viewer: Option<Uuid>,
    ) -> Result<Activity, AppError> {
        let activity = self.get_activity(id).await?.ok_or(AppError::NotFound)?;
        if self.can_view_activity(&activity, viewer).await? {
            Ok(activity)
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// The §access rules: PUBLIC for anyone, FOLLOWERS for the owner and
    /// ACCEPTED followers, PRIVATE for the owner alone.
    pub async fn can_view_activity(
        &self,
        activity: &Activity,
        viewer: Option<Uuid>,
    ) -> Result<bool, AppError> {
        match activity.visibility {
            Visibility::Public => Ok(true),
            Visibility::Private => Ok(viewer == Some(activity.user_id)),
            Visibility::Followers => {
                let Some(viewer) = viewer else {
                    return Ok(false);
                };
                if viewer == activity.user_id {
                    return Ok(true);
                }
                self.is_local_follower_of_user(viewer, activity.user_id).await
            }
        }
    }

    pub async fn update_activity_details(
        &self,
        id: Uuid,
        owner: Uuid,
        title: Option<&str>,
        description: Option<&str>,
        visibility: Option<Visibility>,
    ) -> Result<Activity, AppError> {
        let activity = sqlx::query_as::<_, Activity>(&format!(
            r#"
            UPDATE activities
            SET title = COALESCE($3, title),
                description = COALESCE($4, description),
                visibility = COALESCE($5, visibility)
            WHERE id = $1 AND user_id = $2
            RETURNING {ACTIVITY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(title)
        .bind(description)
        .bind(visibility)
        .fetch_optional(&self.pool)
        .await?;
        activity.ok_or(AppError::NotFound)
    }

    /// Owner-checked delete. Likes, comments, metrics and record rows go via
    /// ON DELETE CASCADE; the caller removes the heatmap contribution first.
    pub async fn delete_activity(&self, id: Uuid, owner: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM activities WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// A user's activities as the viewer may see them, newest first.
    pub async fn get_user_activities(
        &self,
        user_id: Uuid,
        viewer: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Activity>, AppError> {
        let visible: Vec<Visibility> = if viewer == Some(user_id) {
            vec![Visibility::Public, Visibility::Followers, Visibility::Private]
        } else if let Some(viewer) = viewer {
            if self.is_local_follower_of_user(viewer, user_id).await? {
                vec![Visibility::Public, Visibility::Followers]
            } else {
                vec![Visibility::Public]
            }
        } else {
            vec![Visibility::Public]
        };
        let visible: Vec<String> = visible.iter().map(|v| v.as_str().to_string()).collect();

        let activities = sqlx::query_as::<_, Activity>(&format!(
            r#"
            SELECT {ACTIVITY_COLUMNS} FROM activities
            WHERE user_id = $1 AND visibility = ANY($2)
            ORDER BY started_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(visible)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }

    pub async fn get_track_points(&self, id: Uuid) -> Result<Vec<TrackPoint>, AppError> {
        let row: Option<(Option<serde_json::Value>,)> =
            sqlx::query_as("SELECT track_points FROM activities WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((Some(json),)) = row else {
            return Ok(Vec::new());
        };
        serde_json::from_value(json).map_err(|e| AppError::Parse(e.to_string()))
    }

    pub async fn get_raw_file(
        &self,
        id: Uuid,
    ) -> Result<Option<(Vec<u8>, Option<String>)>, AppError> {
        let row: Option<(Option<Vec<u8>>, Option<String>)> =
            sqlx::query_as("SELECT raw_file, raw_file_format FROM activities WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(bytes, format)| bytes.map(|b| (b, format))))
    }

    pub async fn update_activity_weather(
        &self,
        id: Uuid,
        temp: Option<f64>,
        condition: Option<&str>,
        wind_speed: Option<f64>,
        humidity: Option<f64>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE activities
            SET weather_temp = $2, weather_condition = $3,
                weather_wind_speed = $4, weather_humidity = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(temp)
        .bind(condition)
        .bind(wind_speed)
        .bind(humidity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ids of a user's non-indoor activities, oldest first; the heatmap
    /// rebuild walks these.
    pub async fn outdoor_activity_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM activities WHERE user_id = $1 AND NOT indoor ORDER BY started_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn all_activity_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM activities WHERE user_id = $1 ORDER BY started_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
