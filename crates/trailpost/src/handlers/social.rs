//! Social handlers: likes, comments, notifications and remote follows.

use axum::{
    Extension,
    extract::{Path, Query},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::federation::actors::ActorResolver;
use crate::federation::objects::{build_follow, build_undo};
use crate::federation::outbox::OutboxDispatcher;
use crate::models::{Comment, FollowStatus, Notification, NotificationType};
use crate::store::Database;

use super::pagination::{clamp_limit, default_limit};

// ============================================================================
// Likes
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: i64,
}

/// Like an activity. Duplicate likes are swallowed.
#[utoipa::path(
    post,
    path = "/activities/{id}/likes",
    tag = "social",
    params(("id" = Uuid, Path, description = "Activity ID")),
    responses(
        (status = 200, description = "Like recorded", body = LikeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Activity not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn like_activity(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(activity_id): Path<Uuid>,
) -> Result<Json<LikeResponse>, AppError> {
    let activity = db
        .get_visible_activity(activity_id, Some(claims.sub))
        .await?;

    let new = db.add_like_local(activity_id, claims.sub).await?;
    if new && activity.user_id != claims.sub {
        if let Some(liker) = db.get_user(claims.sub).await? {
            db.create_notification(
                activity.user_id,
                NotificationType::Liked,
                &liker.display_name,
                None,
                Some(activity_id),
            )
            .await?;
        }
    }

    let like_count = db.like_count(activity_id).await?;
    Ok(Json(LikeResponse {
        liked: true,
        like_count,
    }))
}

/// Remove a like.
#[utoipa::path(
    delete,
    path = "/activities/{id}/likes",
    tag = "social",
    params(("id" = Uuid, Path, description = "Activity ID")),
    responses(
        (status = 204, description = "Like removed"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn unlike_activity(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(activity_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    db.remove_like_local(activity_id, claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Comments
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCommentRequest {
    pub content: String,
}

/// Comment on an activity.
#[utoipa::path(
    post,
    path = "/activities/{id}/comments",
    tag = "social",
    params(("id" = Uuid, Path, description = "Activity ID")),
    request_body = AddCommentRequest,
    responses(
        (status = 200, description = "Comment created", body = Comment),
        (status = 400, description = "Empty comment"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Activity not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn add_comment(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(activity_id): Path<Uuid>,
    Json(req): Json<AddCommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("comment is empty".to_string()));
    }
    let activity = db
        .get_visible_activity(activity_id, Some(claims.sub))
        .await?;

    let comment = db
        .add_comment(activity_id, Some(claims.sub), None, content, None)
        .await?
        .ok_or(AppError::Internal)?;

    if activity.user_id != claims.sub {
        if let Some(author) = db.get_user(claims.sub).await? {
            db.create_notification(
                activity.user_id,
                NotificationType::Commented,
                &author.display_name,
                None,
                Some(activity_id),
            )
            .await?;
        }
    }
    Ok(Json(comment))
}

/// List an activity's comments.
#[utoipa::path(
    get,
    path = "/activities/{id}/comments",
    tag = "social",
    params(("id" = Uuid, Path, description = "Activity ID")),
    responses(
        (status = 200, description = "Comments in chronological order", body = Vec<Comment>),
        (status = 404, description = "Activity not found")
    )
)]
pub async fn get_comments(
    Extension(db): Extension<Database>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Path(activity_id): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let viewer = claims.map(|c| c.sub);
    db.get_visible_activity(activity_id, viewer).await?;
    let comments = db.get_comments(activity_id).await?;
    Ok(Json(comments))
}

/// Delete an own comment.
#[utoipa::path(
    delete,
    path = "/comments/{id}",
    tag = "social",
    params(("id" = Uuid, Path, description = "Comment ID")),
    responses(
        (status = 204, description = "Comment deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Comment not found or not owned")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_comment(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(comment_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if db.delete_comment(comment_id, claims.sub).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

// ============================================================================
// Remote follows
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct FollowRequest {
    /// `user@host`, `acct:user@host` or a full actor URI.
    pub actor: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FollowResponse {
    pub actor_uri: String,
    pub status: FollowStatus,
}

/// Follow a remote actor. The edge stays PENDING until the peer's Accept
/// arrives in the inbox.
#[utoipa::path(
    post,
    path = "/federation/follow",
    tag = "federation",
    request_body = FollowRequest,
    responses(
        (status = 200, description = "Follow requested", body = FollowResponse),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Already following"),
        (status = 502, description = "Remote unreachable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn follow_remote(
    Extension(db): Extension<Database>,
    Extension(resolver): Extension<ActorResolver>,
    Extension(outbox): Extension<OutboxDispatcher>,
    Extension(config): Extension<AppConfig>,
    AuthUser(claims): AuthUser,
    Json(req): Json<FollowRequest>,
) -> Result<Json<FollowResponse>, AppError> {
    let user = db.get_user(claims.sub).await?.ok_or(AppError::AuthFailure)?;

    let actor = if req.actor.contains("://") {
        resolver.resolve(&req.actor).await?
    } else {
        resolver.resolve_handle(&req.actor).await?
    };

    let follow = build_follow(&config, &user.username, &actor.actor_uri);
    let follow_id = follow["id"].as_str().map(String::from);
    db.create_local_follow(
        claims.sub,
        &actor.actor_uri,
        FollowStatus::Pending,
        follow_id.as_deref(),
    )
    .await?;

    // delivered to the actor's own inbox; the Accept will flip the status
    outbox
        .deliver_to_inbox(&user, &actor.inbox_url, &follow)
        .await?;

    Ok(Json(FollowResponse {
        actor_uri: actor.actor_uri,
        status: FollowStatus::Pending,
    }))
}

/// Stop following a remote actor; emits Undo(Follow).
#[utoipa::path(
    delete,
    path = "/federation/follow",
    tag = "federation",
    request_body = FollowRequest,
    responses(
        (status = 204, description = "Unfollowed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not following this actor")
    ),
    security(("bearer_auth" = []))
)]
pub async fn unfollow_remote(
    Extension(db): Extension<Database>,
    Extension(resolver): Extension<ActorResolver>,
    Extension(outbox): Extension<OutboxDispatcher>,
    Extension(config): Extension<AppConfig>,
    AuthUser(claims): AuthUser,
    Json(req): Json<FollowRequest>,
) -> Result<StatusCode, AppError> {
    let user = db.get_user(claims.sub).await?.ok_or(AppError::AuthFailure)?;
    let actor = if req.actor.contains("://") {
        resolver.resolve(&req.actor).await?
    } else {
        resolver.resolve_handle(&req.actor).await?
    };

    let follow = db
        .delete_local_follow(claims.sub, &actor.actor_uri)
        .await?
        .ok_or(AppError::NotFound)?;

    // reconstruct the original Follow so the peer can match it
    let inner = serde_json::json!({
        "id": follow.activity_pub_id,
        "type": "Follow",
        "actor": config.actor_uri(&user.username),
        "object": actor.actor_uri,
    });
    let undo = build_undo(&config, &user.username, inner);
    if let Err(e) = outbox.deliver_to_inbox(&user, &actor.inbox_url, &undo).await {
        warn!(actor_uri = actor.actor_uri, "failed to deliver Undo(Follow): {e}");
    }

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct NotificationsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

/// List the caller's notifications, newest first.
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "notifications",
    params(
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("offset" = Option<i64>, Query, description = "Offset")
    ),
    responses(
        (status = 200, description = "Notifications", body = NotificationsResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_notifications(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<NotificationsResponse>, AppError> {
    let notifications = db
        .get_notifications(claims.sub, clamp_limit(query.limit), query.offset.max(0))
        .await?;
    let unread_count = db.unread_notification_count(claims.sub).await?;
    Ok(Json(NotificationsResponse {
        notifications,
        unread_count,
    }))
}

/// Mark one notification as read.
#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    tag = "notifications",
    params(("id" = Uuid, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Marked read"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Notification not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_notification_read(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if db.mark_notification_read(id, claims.sub).await? {
        Ok(StatusCode::OK)
    } else {
        Err(AppError::NotFound)
    }
}

/// Mark every notification as read.
#[utoipa::path(
    post,
    path = "/notifications/read-all",
    tag = "notifications",
    responses(
        (status = 200, description = "All marked read"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_all_notifications_read(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = db.mark_all_notifications_read(claims.sub).await?;
    Ok(Json(serde_json::json!({ "marked_count": count })))
}
