use time::OffsetDateTime;

use super::Database;
use crate::errors::AppError;
use crate::models::{RemoteActivity, RemoteActor, Visibility};

const REMOTE_ACTOR_COLUMNS: &str = "actor_uri, preferred_username, inbox_url, shared_inbox_url, \
                                    public_key_id, public_key_pem, display_name, avatar_url, \
                                    summary, last_fetched_at";

const REMOTE_ACTIVITY_COLUMNS: &str = "activity_uri, actor_uri, content, published_at, \
                                       started_at, visibility, activity_type, distance, \
                                       duration_seconds, average_pace, elevation_gain, \
                                       average_heart_rate, map_image_url, track_geojson_url, \
                                       received_at";

impl Database {
    pub async fn get_remote_actor(&self, actor_uri: &str) -> Result<Option<RemoteActor>, AppError> {
        let actor = sqlx::query_as::<_, RemoteActor>(&format!(
            "SELECT {REMOTE_ACTOR_COLUMNS} FROM remote_actors WHERE actor_uri = $1"
        ))
        .bind(actor_uri)
        .fetch_optional(&self.pool)
        .await?;
        Ok(actor)
    }

    pub async fn upsert_remote_actor(&self, actor: &RemoteActor) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO remote_actors (actor_uri, preferred_username, inbox_url,
                                       shared_inbox_url, public_key_id, public_key_pem,
                                       display_name, avatar_url, summary, last_fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (actor_uri) DO UPDATE SET
                preferred_username = EXCLUDED.preferred_username,
                inbox_url = EXCLUDED.inbox_url,
                shared_inbox_url = EXCLUDED.shared_inbox_url,
                public_key_id = EXCLUDED.public_key_id,
                public_key_pem = EXCLUDED.public_key_pem,
                display_name = EXCLUDED.display_name,
                avatar_url = EXCLUDED.avatar_url,
                summary = EXCLUDED.summary,
                last_fetched_at = EXCLUDED.last_fetched_at
            "#,
        )
        .bind(&actor.actor_uri)
        .bind(&actor.preferred_username)
        .bind(&actor.inbox_url)
        .bind(&actor.shared_inbox_url)
        .bind(&actor.public_key_id)
        .bind(&actor.public_key_pem)
        .bind(&actor.display_name)
        .bind(&actor.avatar_url)
        .bind(&actor.summary)
        .bind(actor.last_fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Force a refetch on next resolution, e.g. after a 401/403 delivery
    /// suggested the key rotated.
    pub async fn mark_remote_actor_stale(&self, actor_uri: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE remote_actors SET last_fetched_at = to_timestamp(0) WHERE actor_uri = $1",
        )
        .bind(actor_uri)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a remote actor and (via cascade) its activities.
    pub async fn delete_remote_actor(&self, actor_uri: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM remote_actors WHERE actor_uri = $1")
            .bind(actor_uri)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_remote_activity(
        &self,
        activity: &RemoteActivity,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO remote_activities (activity_uri, actor_uri, content, published_at,
                                           started_at, visibility, activity_type, distance,
                                           duration_seconds, average_pace, elevation_gain,
                                           average_heart_rate, map_image_url,
                                           track_geojson_url, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (activity_uri) DO UPDATE SET
                content = EXCLUDED.content,
                published_at = EXCLUDED.published_at,
                started_at = EXCLUDED.started_at,
                visibility = EXCLUDED.visibility,
                activity_type = EXCLUDED.activity_type,
                distance = EXCLUDED.distance,
                duration_seconds = EXCLUDED.duration_seconds,
                average_pace = EXCLUDED.average_pace,
                elevation_gain = EXCLUDED.elevation_gain,
                average_heart_rate = EXCLUDED.average_heart_rate,
                map_image_url = EXCLUDED.map_image_url,
                track_geojson_url = EXCLUDED.track_geojson_url
            "#,
        )
        .bind(&activity.activity_uri)
        .bind(&activity.actor_uri)
        .bind(&activity.content)
        .bind(activity.published_at)
        .bind(activity.started_at)
        .bind(activity.visibility)
        .bind(&activity.activity_type)
        .bind(activity.distance)
        .bind(activity.duration_seconds)
        .bind(&activity.average_pace)
        .bind(activity.elevation_gain)
        .bind(activity.average_heart_rate)
        .bind(&activity.map_image_url)
        .bind(&activity.track_geojson_url)
        .bind(activity.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete one remote activity, but only when the given actor owns it.
    pub async fn delete_remote_activity_of(
        &self,
        activity_uri: &str,
        actor_uri: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM remote_activities WHERE activity_uri = $1 AND actor_uri = $2",
        )
        .bind(activity_uri)
        .bind(actor_uri)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remote activities of the followed set, over-fetched for the merge.
    pub async fn remote_timeline_page(
        &self,
        actor_uris: &[String],
        before: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<RemoteActivity>, AppError> {
        if actor_uris.is_empty() {
            return Ok(Vec::new());
        }
        let activities = sqlx::query_as::<_, RemoteActivity>(&format!(
            r#"
            SELECT {REMOTE_ACTIVITY_COLUMNS} FROM remote_activities
            WHERE actor_uri = ANY($1)
              AND visibility = ANY($2)
              AND ($3::timestamptz IS NULL OR started_at < $3)
            ORDER BY started_at DESC NULLS LAST
            LIMIT $4
            "#
        ))
        .bind(actor_uris)
        .bind(vec![
            Visibility::Public.as_str().to_string(),
            Visibility::Followers.as_str().to_string(),
        ])
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }
}
