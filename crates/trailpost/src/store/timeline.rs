//! Timeline queries and the local/remote merge.
//!
//! Each stream is one aggregated query (stats joined in, no N+1); the merge
//! is pure so ordering is unit-testable.

use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use super::Database;
use crate::errors::AppError;
use crate::models::{ActivityType, RemoteActivity, Visibility};

/// A local activity decorated for timeline display: author and social stats
/// come from the same query as the row itself.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct LocalTimelineActivity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub activity_type: ActivityType,
    pub title: String,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub timezone: String,
    pub visibility: Visibility,
    pub total_distance: f64,
    pub total_duration_seconds: i64,
    pub elevation_gain: Option<f64>,
    pub indoor: bool,
    pub simplified_track: Option<serde_json::Value>,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked_by_me: bool,
}

/// One merged timeline item.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum TimelineEntry {
    Local(LocalTimelineActivity),
    Remote(RemoteActivity),
}

impl TimelineEntry {
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        match self {
            TimelineEntry::Local(a) => Some(a.started_at),
            TimelineEntry::Remote(a) => a.started_at,
        }
    }
}

/// Merge both streams, strictly descending by `started_at` with nulls last,
/// then cut to the page size.
pub fn merge_timelines(
    local: Vec<LocalTimelineActivity>,
    remote: Vec<RemoteActivity>,
    limit: usize,
) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = local
        .into_iter()
        .map(TimelineEntry::Local)
        .chain(remote.into_iter().map(TimelineEntry::Remote))
        .collect();

    entries.sort_by(|a, b| match (a.started_at(), b.started_at()) {
        (Some(a), Some(b)) => b.cmp(&a),
        // entries without a start sort after everything dated
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    entries.truncate(limit);
    entries
}

const TIMELINE_SELECT: &str = r#"
    SELECT a.id, a.user_id, u.username, u.display_name, u.avatar_url,
           a.activity_type, a.title, a.description, a.started_at, a.timezone,
           a.visibility, a.total_distance, a.total_duration_seconds, a.elevation_gain,
           a.indoor, a.simplified_track,
           COALESCE(l.like_count, 0) AS like_count,
           COALESCE(c.comment_count, 0) AS comment_count,
           COALESCE(ml.liked, FALSE) AS liked_by_me
    FROM activities a
    JOIN users u ON u.id = a.user_id
    LEFT JOIN (SELECT activity_id, COUNT(*) AS like_count FROM likes GROUP BY activity_id) l
        ON l.activity_id = a.id
    LEFT JOIN (SELECT activity_id, COUNT(*) AS comment_count FROM comments GROUP BY activity_id) c
        ON c.activity_id = a.id
    LEFT JOIN (SELECT activity_id, TRUE AS liked FROM likes WHERE user_id = $1) ml
        ON ml.activity_id = a.id
"#;

impl Database {
    /// The viewer's own activities plus followed local users' PUBLIC and
    /// FOLLOWERS activities, decorated, over-fetched by the caller's limit.
    pub async fn local_timeline_page(
        &self,
        viewer: Uuid,
        followed_local: &[Uuid],
        before: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<LocalTimelineActivity>, AppError> {
        let activities = sqlx::query_as::<_, LocalTimelineActivity>(&format!(
            r#"
            {TIMELINE_SELECT}
            WHERE (a.user_id = $1
                   OR (a.user_id = ANY($2) AND a.visibility IN ('PUBLIC', 'FOLLOWERS')))
              AND ($3::timestamptz IS NULL OR a.started_at < $3)
            ORDER BY a.started_at DESC
            LIMIT $4
            "#
        ))
        .bind(viewer)
        .bind(followed_local)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }

    /// The public timeline: local PUBLIC activities only, one query.
    pub async fn public_timeline_page(
        &self,
        viewer: Option<Uuid>,
        before: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<LocalTimelineActivity>, AppError> {
        let activities = sqlx::query_as::<_, LocalTimelineActivity>(&format!(
            r#"
            {TIMELINE_SELECT}
            WHERE a.visibility = 'PUBLIC'
              AND ($2::timestamptz IS NULL OR a.started_at < $2)
            ORDER BY a.started_at DESC
            LIMIT $3
            "#
        ))
        .bind(viewer)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }

    /// Local activity URIs for the actor's outbox collection, newest first.
    pub async fn outbox_activity_ids(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM activities
            WHERE user_id = $1 AND visibility = 'PUBLIC'
            ORDER BY started_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn public_activity_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM activities WHERE user_id = $1 AND visibility = 'PUBLIC'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn local(started_at: OffsetDateTime) -> LocalTimelineActivity {
        LocalTimelineActivity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            username: "bob".into(),
            display_name: "Bob".into(),
            avatar_url: None,
            activity_type: ActivityType::Running,
            title: "Run".into(),
            description: None,
            started_at,
            timezone: "UTC".into(),
            visibility: Visibility::Public,
            total_distance: 5000.0,
            total_duration_seconds: 1800,
            elevation_gain: None,
            indoor: false,
            simplified_track: None,
            like_count: 0,
            comment_count: 0,
            liked_by_me: false,
        }
    }

    fn remote(started_at: Option<OffsetDateTime>) -> RemoteActivity {
        RemoteActivity {
            activity_uri: format!("https://remote/activities/{}", Uuid::new_v4()),
            actor_uri: "https://remote/users/alice".into(),
            content: None,
            published_at: started_at,
            started_at,
            visibility: Visibility::Public,
            activity_type: Some("RUNNING".into()),
            distance: Some(4000.0),
            duration_seconds: Some(1500),
            average_pace: None,
            elevation_gain: None,
            average_heart_rate: None,
            map_image_url: None,
            track_geojson_url: None,
            received_at: datetime!(2025-11-27 12:00:00 UTC),
        }
    }

    #[test]
    fn test_merge_is_strictly_non_increasing() {
        let locals = vec![
            local(datetime!(2025-11-27 10:00:00 UTC)),
            local(datetime!(2025-11-25 10:00:00 UTC)),
            local(datetime!(2025-11-26 10:00:00 UTC)),
        ];
        let remotes = vec![
            remote(Some(datetime!(2025-11-26 15:00:00 UTC))),
            remote(Some(datetime!(2025-11-27 09:00:00 UTC))),
        ];

        let merged = merge_timelines(locals, remotes, 10);
        assert_eq!(merged.len(), 5);
        for pair in merged.windows(2) {
            let (a, b) = (pair[0].started_at(), pair[1].started_at());
            match (a, b) {
                (Some(a), Some(b)) => assert!(a >= b, "out of order: {a} < {b}"),
                (None, Some(_)) => panic!("null sorted before non-null"),
                _ => {}
            }
        }
    }

    #[test]
    fn test_merge_nulls_sort_last() {
        let remotes = vec![
            remote(None),
            remote(Some(datetime!(2025-11-27 09:00:00 UTC))),
        ];
        let merged = merge_timelines(vec![local(datetime!(2025-11-20 08:00:00 UTC))], remotes, 10);
        assert!(merged.last().unwrap().started_at().is_none());
        assert!(merged.first().unwrap().started_at().is_some());
    }

    #[test]
    fn test_merge_truncates_to_limit() {
        let locals: Vec<_> = (0..8)
            .map(|i| local(datetime!(2025-11-01 00:00:00 UTC) + time::Duration::hours(i)))
            .collect();
        let merged = merge_timelines(locals, Vec::new(), 5);
        assert_eq!(merged.len(), 5);
        // kept the newest five
        assert_eq!(
            merged[0].started_at().unwrap(),
            datetime!(2025-11-01 07:00:00 UTC)
        );
    }
}
