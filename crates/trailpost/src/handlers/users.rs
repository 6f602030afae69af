//! User-level handlers: health, activity listings, account deletion.

use axum::{
    Extension,
    extract::{Path, Query},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::federation::objects::build_actor_delete;
use crate::federation::outbox::OutboxDispatcher;
use crate::models::Activity;
use crate::store::Database;

use super::pagination::{clamp_limit, default_limit};

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserActivitiesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// A user's activities as visible to the caller.
#[utoipa::path(
    get,
    path = "/users/{username}/activities",
    tag = "activities",
    params(
        ("username" = Uuid, Path, description = "User ID"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("offset" = Option<i64>, Query, description = "Offset")
    ),
    responses(
        (status = 200, description = "Visible activities, newest first", body = Vec<Activity>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_activities(
    Extension(db): Extension<Database>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Path(user_id): Path<Uuid>,
    Query(query): Query<UserActivitiesQuery>,
) -> Result<Json<Vec<Activity>>, AppError> {
    db.get_user(user_id).await?.ok_or(AppError::NotFound)?;
    let viewer = claims.map(|c| c.sub);
    let activities = db
        .get_user_activities(user_id, viewer, clamp_limit(query.limit), query.offset.max(0))
        .await?;
    Ok(Json(activities))
}

/// Delete the caller's account. A `Delete` actor activity goes to every
/// follower inbox first, then the cascade removes activities, follows,
/// likes, comments and notifications.
#[utoipa::path(
    delete,
    path = "/users/me",
    tag = "users",
    responses(
        (status = 204, description = "Account deleted"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_account(
    Extension(db): Extension<Database>,
    Extension(outbox): Extension<OutboxDispatcher>,
    Extension(config): Extension<AppConfig>,
    AuthUser(claims): AuthUser,
) -> Result<StatusCode, AppError> {
    let user = db.get_user(claims.sub).await?.ok_or(AppError::AuthFailure)?;

    let delete = build_actor_delete(&config, &user.username);
    if let Err(e) = outbox.deliver_to_followers(&user, &delete).await {
        // the account must go even when some peers are down
        warn!(username = user.username, "actor Delete fan-out incomplete: {e}");
    }

    db.delete_user(claims.sub).await?;
    info!(username = user.username, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}
