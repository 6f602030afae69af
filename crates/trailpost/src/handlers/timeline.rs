//! Timeline handlers: the merged federated timeline and the public local
//! one.

use axum::{Extension, extract::Query, response::Json};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::errors::AppError;
use crate::store::{Database, TimelineEntry, merge_timelines};

use super::pagination::{clamp_limit, default_limit};

#[derive(Debug, Deserialize, ToSchema)]
pub struct TimelineQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Return only entries strictly older than this instant.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub before: Option<OffsetDateTime>,
}

/// The federated timeline: own and followed local activities merged with
/// remote activities of the followed remote set, strictly newest first.
#[utoipa::path(
    get,
    path = "/timeline",
    tag = "timeline",
    params(
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("before" = Option<String>, Query, description = "Cursor: only entries before this RFC3339 instant")
    ),
    responses(
        (status = 200, description = "Merged timeline page", body = Vec<TimelineEntry>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn federated_timeline(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<Vec<TimelineEntry>>, AppError> {
    let limit = clamp_limit(query.limit);
    // over-fetch both streams so the merge has enough to cut a full page
    let fetch = limit * 2;

    let followed_local = db.followed_local_user_ids(claims.sub).await?;
    let followed_remote = db.followed_remote_actor_uris(claims.sub).await?;

    let local = db
        .local_timeline_page(claims.sub, &followed_local, query.before, fetch)
        .await?;
    let remote = db
        .remote_timeline_page(&followed_remote, query.before, fetch)
        .await?;

    Ok(Json(merge_timelines(local, remote, limit as usize)))
}

/// The public timeline: local PUBLIC activities only.
#[utoipa::path(
    get,
    path = "/timeline/public",
    tag = "timeline",
    params(
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("before" = Option<String>, Query, description = "Cursor: only entries before this RFC3339 instant")
    ),
    responses(
        (status = 200, description = "Public timeline page", body = Vec<TimelineEntry>)
    )
)]
pub async fn public_timeline(
    Extension(db): Extension<Database>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<Vec<TimelineEntry>>, AppError> {
    let limit = clamp_limit(query.limit);
    let viewer = claims.map(|c| c.sub);
    let local = db.public_timeline_page(viewer, query.before, limit).await?;
    Ok(Json(
        local.into_iter().map(TimelineEntry::Local).collect(),
    ))
}
