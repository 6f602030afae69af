use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, map_unique_violation};
use crate::models::{Comment, Follow, FollowStatus, Notification, NotificationType};

const FOLLOW_COLUMNS: &str = "id, follower_user_id, follower_remote_uri, following_actor_uri, \
                              status, activity_pub_id, created_at";

// ============================================================================
// Follows
// ============================================================================

impl Database {
    /// Record a remote actor following a local one. Idempotent on the
    /// originating activity id and on the (follower, following) pair;
    /// returns false when the edge already existed.
    pub async fn create_remote_follow(
        &self,
        follower_remote_uri: &str,
        following_actor_uri: &str,
        activity_pub_id: Option<&str>,
        status: FollowStatus,
    ) -> Result<bool, AppError> {
        if let Some(ap_id) = activity_pub_id {
            if self.get_follow_by_activity_pub_id(ap_id).await?.is_some() {
                return Ok(false);
            }
        }
        let result = sqlx::query(
            r#"
            INSERT INTO follows (id, follower_remote_uri, following_actor_uri, status,
                                 activity_pub_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (follower_remote_uri, following_actor_uri)
                WHERE follower_remote_uri IS NOT NULL
                DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(follower_remote_uri)
        .bind(following_actor_uri)
        .bind(status)
        .bind(activity_pub_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a local user following a (usually remote) actor.
    pub async fn create_local_follow(
        &self,
        follower_user_id: Uuid,
        following_actor_uri: &str,
        status: FollowStatus,
        activity_pub_id: Option<&str>,
    ) -> Result<Follow, AppError> {
        let follow = sqlx::query_as::<_, Follow>(&format!(
            r#"
            INSERT INTO follows (id, follower_user_id, following_actor_uri, status,
                                 activity_pub_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {FOLLOW_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(follower_user_id)
        .bind(following_actor_uri)
        .bind(status)
        .bind(activity_pub_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(follow)
    }

    pub async fn get_follow_by_activity_pub_id(
        &self,
        activity_pub_id: &str,
    ) -> Result<Option<Follow>, AppError> {
        let follow = sqlx::query_as::<_, Follow>(&format!(
            "SELECT {FOLLOW_COLUMNS} FROM follows WHERE activity_pub_id = $1"
        ))
        .bind(activity_pub_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(follow)
    }

    pub async fn delete_follow_by_activity_pub_id(
        &self,
        activity_pub_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM follows WHERE activity_pub_id = $1")
            .bind(activity_pub_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_remote_follow(
        &self,
        follower_remote_uri: &str,
        following_actor_uri: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM follows WHERE follower_remote_uri = $1 AND following_actor_uri = $2",
        )
        .bind(follower_remote_uri)
        .bind(following_actor_uri)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_local_follow(
        &self,
        follower_user_id: Uuid,
        following_actor_uri: &str,
    ) -> Result<Option<Follow>, AppError> {
        let follow = sqlx::query_as::<_, Follow>(&format!(
            r#"
            DELETE FROM follows
            WHERE follower_user_id = $1 AND following_actor_uri = $2
            RETURNING {FOLLOW_COLUMNS}
            "#
        ))
        .bind(follower_user_id)
        .bind(following_actor_uri)
        .fetch_optional(&self.pool)
        .await?;
        Ok(follow)
    }

    /// PENDING -> ACCEPTED on an inbound `Accept`. Idempotent; returns the
    /// row so the caller can notify the follower.
    pub async fn accept_follow_by_activity_pub_id(
        &self,
        activity_pub_id: &str,
    ) -> Result<Option<Follow>, AppError> {
        let follow = sqlx::query_as::<_, Follow>(&format!(
            r#"
            UPDATE follows SET status = 'ACCEPTED'
            WHERE activity_pub_id = $1
            RETURNING {FOLLOW_COLUMNS}
            "#
        ))
        .bind(activity_pub_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(follow)
    }

    /// Does `viewer` follow `owner` (both local) with ACCEPTED status?
    pub async fn is_local_follower_of_user(
        &self,
        viewer: Uuid,
        owner: Uuid,
    ) -> Result<bool, AppError> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM follows f
                JOIN users u ON u.id = $2
                WHERE f.follower_user_id = $1
                  AND f.status = 'ACCEPTED'
                  AND f.following_actor_uri = $3 || '/users/' || u.username
            )
            "#,
        )
        .bind(viewer)
        .bind(owner)
        .bind(&self.base_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists.0)
    }

    /// Does the local user follow the given actor URI with ACCEPTED status?
    pub async fn is_following_uri(
        &self,
        user_id: Uuid,
        actor_uri: &str,
    ) -> Result<bool, AppError> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM follows
                WHERE follower_user_id = $1 AND following_actor_uri = $2
                  AND status = 'ACCEPTED'
            )
            "#,
        )
        .bind(user_id)
        .bind(actor_uri)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists.0)
    }

    /// Local user ids whose actor the user follows (ACCEPTED), for the
    /// timeline's local stream.
    pub async fn followed_local_user_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT u.id FROM follows f
            JOIN users u ON f.following_actor_uri = $2 || '/users/' || u.username
            WHERE f.follower_user_id = $1 AND f.status = 'ACCEPTED'
            "#,
        )
        .bind(user_id)
        .bind(&self.base_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Remote actor URIs the user follows (ACCEPTED), for the timeline's
    /// remote stream.
    pub async fn followed_remote_actor_uris(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT following_actor_uri FROM follows
            WHERE follower_user_id = $1 AND status = 'ACCEPTED'
              AND following_actor_uri NOT LIKE $2 || '/users/%'
            "#,
        )
        .bind(user_id)
        .bind(&self.base_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(uri,)| uri).collect())
    }

    /// All follow URIs of the user, newest first, for the `following`
    /// collection.
    pub async fn following_uris(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT following_actor_uri FROM follows
            WHERE follower_user_id = $1 AND status = 'ACCEPTED'
            ORDER BY created_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(uri,)| uri).collect())
    }

    pub async fn following_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM follows WHERE follower_user_id = $1 AND status = 'ACCEPTED'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Follower URIs of a local actor (remote URIs plus local actor URIs),
    /// newest first, for the `followers` collection.
    pub async fn follower_uris(
        &self,
        actor_uri: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT COALESCE(f.follower_remote_uri, $4 || '/users/' || u.username)
            FROM follows f
            LEFT JOIN users u ON u.id = f.follower_user_id
            WHERE f.following_actor_uri = $1 AND f.status = 'ACCEPTED'
            ORDER BY f.created_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(actor_uri)
        .bind(limit)
        .bind(offset)
        .bind(&self.base_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(uri,)| uri).collect())
    }

    pub async fn follower_count(&self, actor_uri: &str) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM follows WHERE following_actor_uri = $1 AND status = 'ACCEPTED'",
        )
        .bind(actor_uri)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// The fan-out target set for one sender: remote followers joined with
    /// their cached actors, one row per follower. Shared-inbox dedup is the
    /// dispatcher's job.
    pub async fn accepted_follower_delivery_targets(
        &self,
        actor_uri: &str,
    ) -> Result<Vec<DeliveryTarget>, AppError> {
        let targets = sqlx::query_as::<_, DeliveryTarget>(
            r#"
            SELECT ra.actor_uri,
                   COALESCE(ra.shared_inbox_url, ra.inbox_url) AS inbox_url
            FROM follows f
            JOIN remote_actors ra ON ra.actor_uri = f.follower_remote_uri
            WHERE f.following_actor_uri = $1 AND f.status = 'ACCEPTED'
            "#,
        )
        .bind(actor_uri)
        .fetch_all(&self.pool)
        .await?;
        Ok(targets)
    }
}

/// One remote follower's delivery address.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryTarget {
    pub actor_uri: String,
    pub inbox_url: String,
}

// ============================================================================
// Likes
// ============================================================================

impl Database {
    /// True when the like was new; duplicates are swallowed per the unique
    /// constraint.
    pub async fn add_like_local(
        &self,
        activity_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO likes (id, activity_id, user_id) VALUES ($1, $2, $3)
            ON CONFLICT (activity_id, user_id) WHERE user_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(activity_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_like_remote(
        &self,
        activity_id: Uuid,
        remote_actor_uri: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO likes (id, activity_id, remote_actor_uri) VALUES ($1, $2, $3)
            ON CONFLICT (activity_id, remote_actor_uri)
                WHERE remote_actor_uri IS NOT NULL DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(activity_id)
        .bind(remote_actor_uri)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_like_local(
        &self,
        activity_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM likes WHERE activity_id = $1 AND user_id = $2")
            .bind(activity_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_like_remote(
        &self,
        activity_id: Uuid,
        remote_actor_uri: &str,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM likes WHERE activity_id = $1 AND remote_actor_uri = $2")
                .bind(activity_id)
                .bind(remote_actor_uri)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn like_count(&self, activity_id: Uuid) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM likes WHERE activity_id = $1")
            .bind(activity_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

// ============================================================================
// Comments
// ============================================================================

impl Database {
    /// Insert a comment; remote comments dedup on their ActivityPub id.
    /// Returns `None` for a duplicate delivery.
    pub async fn add_comment(
        &self,
        activity_id: Uuid,
        user_id: Option<Uuid>,
        remote_actor_uri: Option<&str>,
        content: &str,
        activity_pub_id: Option<&str>,
    ) -> Result<Option<Comment>, AppError> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (id, activity_id, user_id, remote_actor_uri, content,
                                  activity_pub_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (activity_pub_id) DO NOTHING
            RETURNING id, activity_id, user_id, remote_actor_uri, content, activity_pub_id,
                      created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(activity_id)
        .bind(user_id)
        .bind(remote_actor_uri)
        .bind(content)
        .bind(activity_pub_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }

    pub async fn get_comments(&self, activity_id: Uuid) -> Result<Vec<Comment>, AppError> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT id, activity_id, user_id, remote_actor_uri, content, activity_pub_id,
                   created_at
            FROM comments WHERE activity_id = $1 ORDER BY created_at
            "#,
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }

    pub async fn delete_comment(&self, id: Uuid, author: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(author)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Notifications
// ============================================================================

impl Database {
    pub async fn create_notification(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        actor_display_name: &str,
        actor_uri: Option<&str>,
        activity_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, notification_type, actor_display_name,
                                       actor_uri, activity_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(notification_type)
        .bind(actor_display_name)
        .bind(actor_uri)
        .bind(activity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, notification_type, actor_display_name, actor_uri, activity_id,
                   read, created_at
            FROM notifications WHERE user_id = $1
            ORDER BY created_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    pub async fn unread_notification_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT read",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    pub async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2")
                .bind(id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND NOT read")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
