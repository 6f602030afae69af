//! Activity management handlers.

use axum::{
    Extension,
    extract::{Multipart, Path},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use bytes::BytesMut;
use serde::Deserialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::config::AppConfig;
use crate::decoders::FileFormat;
use crate::errors::AppError;
use crate::federation::objects::build_object_delete;
use crate::federation::outbox::OutboxDispatcher;
use crate::ingest::{UploadRequest, ingest_activity};
use crate::models::{Activity, TrackPoint, Visibility};
use crate::pipeline::{PostProcessor, ProcessingOptions, heatmap_remove};
use crate::store::Database;

fn parse_visibility(value: Option<&str>) -> Result<Visibility, AppError> {
    match value {
        None | Some("PUBLIC") | Some("public") => Ok(Visibility::Public),
        Some("FOLLOWERS") | Some("followers") => Ok(Visibility::Followers),
        Some("PRIVATE") | Some("private") => Ok(Visibility::Private),
        Some(other) => Err(AppError::Validation(format!("unknown visibility {other}"))),
    }
}

/// Create a new activity by uploading a FIT or GPX file.
#[utoipa::path(
    post,
    path = "/activities",
    tag = "activities",
    request_body(content_type = "multipart/form-data",
                 description = "file plus optional title/description/visibility/timezone fields"),
    responses(
        (status = 200, description = "Activity created", body = Activity),
        (status = 400, description = "Invalid upload"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn upload_activity(
    Extension(db): Extension<Database>,
    Extension(processor): Extension<PostProcessor>,
    Extension(config): Extension<AppConfig>,
    AuthUser(claims): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Activity>, AppError> {
    let mut file_bytes = BytesMut::new();
    let mut file_name = None;
    let mut title = None;
    let mut description = None;
    let mut visibility = None;
    let mut timezone = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::Validation("failed to process multipart data".to_string()))?
    {
        let name = field.name().map(String::from);
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(String::from);
                let chunk = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::Validation("failed to read file data".to_string()))?;
                file_bytes.extend(chunk);
            }
            Some("title") => title = field.text().await.ok(),
            Some("description") => description = field.text().await.ok(),
            Some("visibility") => visibility = field.text().await.ok(),
            Some("timezone") => timezone = field.text().await.ok(),
            other => {
                warn!("unexpected multipart field: {other:?}");
            }
        }
    }

    if file_bytes.is_empty() {
        return Err(AppError::Validation("no file provided".to_string()));
    }
    let format = file_name
        .as_deref()
        .map(FileFormat::from_file_name)
        .unwrap_or(FileFormat::Unknown);

    let activity = ingest_activity(
        &db,
        &processor,
        &config,
        UploadRequest {
            user_id: claims.sub,
            title,
            description,
            visibility: parse_visibility(visibility.as_deref())?,
            timezone,
            format,
            bytes: file_bytes.freeze(),
        },
    )
    .await?;

    // The row is committed and user-visible; the synchronous stages run in
    // the request but never roll it back, then the async stages fan out.
    processor
        .run_post_commit(activity.id, ProcessingOptions::default())
        .await;

    Ok(Json(activity))
}

/// Fields the owner may change after upload.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateActivityRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
}

/// Update title, description or visibility.
#[utoipa::path(
    patch,
    path = "/activities/{id}",
    tag = "activities",
    params(("id" = Uuid, Path, description = "Activity ID")),
    request_body = UpdateActivityRequest,
    responses(
        (status = 200, description = "Updated activity", body = Activity),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Activity not found or not owned")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_activity(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateActivityRequest>,
) -> Result<Json<Activity>, AppError> {
    let visibility = match req.visibility.as_deref() {
        Some(v) => Some(parse_visibility(Some(v))?),
        None => None,
    };
    let activity = db
        .update_activity_details(
            id,
            claims.sub,
            req.title.as_deref(),
            req.description.as_deref(),
            visibility,
        )
        .await?;
    Ok(Json(activity))
}

/// Delete an activity. The heatmap contribution is reversed first, the row
/// cascade removes likes, comments, metrics and record rows, and followers
/// receive a Delete for the published Note.
#[utoipa::path(
    delete,
    path = "/activities/{id}",
    tag = "activities",
    params(("id" = Uuid, Path, description = "Activity ID")),
    responses(
        (status = 204, description = "Activity deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Activity not found or not owned")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_activity(
    Extension(db): Extension<Database>,
    Extension(outbox): Extension<OutboxDispatcher>,
    Extension(config): Extension<AppConfig>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let activity = db.get_activity(id).await?.ok_or(AppError::NotFound)?;
    if activity.user_id != claims.sub {
        return Err(AppError::NotFound);
    }

    if let Err(e) = heatmap_remove(&db, id).await {
        warn!(activity_id = %id, "failed to remove heatmap contribution: {e}");
    }

    if !db.delete_activity(id, claims.sub).await? {
        return Err(AppError::NotFound);
    }

    // tell followers, unless the activity was never published
    if activity.visibility != Visibility::Private {
        if let Some(user) = db.get_user(claims.sub).await? {
            let delete = build_object_delete(&config, &user.username, &config.activity_uri(id));
            tokio::spawn(async move {
                if let Err(e) = outbox.deliver_to_followers(&user, &delete).await {
                    warn!(activity_id = %id, "failed to federate activity delete: {e}");
                }
            });
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Get the full-resolution track of an activity.
#[utoipa::path(
    get,
    path = "/activities/{id}/track",
    tag = "activities",
    params(("id" = Uuid, Path, description = "Activity ID")),
    responses(
        (status = 200, description = "Track points", body = Vec<TrackPoint>),
        (status = 403, description = "Not visible to this viewer"),
        (status = 404, description = "Activity not found")
    )
)]
pub async fn get_activity_track(
    Extension(db): Extension<Database>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TrackPoint>>, AppError> {
    let viewer = claims.map(|c| c.sub);
    db.get_visible_activity(id, viewer).await?;
    let points = db.get_track_points(id).await?;
    Ok(Json(points))
}

/// The simplified track as GeoJSON, as referenced by federation
/// attachments. Serves whatever privacy masking left in the stored
/// geometry.
#[utoipa::path(
    get,
    path = "/activities/{id}/track.geojson",
    tag = "activities",
    params(("id" = Uuid, Path, description = "Activity ID")),
    responses(
        (status = 200, description = "GeoJSON LineString feature"),
        (status = 404, description = "Activity not found or has no track")
    )
)]
pub async fn get_activity_geojson(
    Extension(db): Extension<Database>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let viewer = claims.map(|c| c.sub);
    let activity = db.get_visible_activity(id, viewer).await?;
    let coordinates = activity
        .simplified_track
        .filter(|v| v.as_array().is_some_and(|a| !a.is_empty()))
        .ok_or(AppError::NotFound)?;

    let feature = serde_json::json!({
        "type": "Feature",
        "geometry": { "type": "LineString", "coordinates": coordinates },
        "properties": {
            "activity_type": activity.activity_type,
            "distance": activity.total_distance,
        },
    });
    Ok((
        [(header::CONTENT_TYPE, "application/geo+json")],
        feature.to_string(),
    )
        .into_response())
}

/// Download the originally uploaded file.
#[utoipa::path(
    get,
    path = "/activities/{id}/download",
    tag = "activities",
    params(("id" = Uuid, Path, description = "Activity ID")),
    responses(
        (status = 200, description = "Raw activity file"),
        (status = 404, description = "Activity or raw file not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn download_raw_file(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    // raw files are owner-only: they may contain unmasked coordinates
    let activity = db.get_activity(id).await?.ok_or(AppError::NotFound)?;
    if activity.user_id != claims.sub {
        return Err(AppError::Forbidden);
    }

    let (bytes, format) = db.get_raw_file(id).await?.ok_or(AppError::NotFound)?;
    let extension = match format.as_deref() {
        Some("FIT") => "fit",
        _ => "gpx",
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.{extension}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_visibility() {
        assert_eq!(parse_visibility(None).unwrap(), Visibility::Public);
        assert_eq!(
            parse_visibility(Some("followers")).unwrap(),
            Visibility::Followers
        );
        assert_eq!(
            parse_visibility(Some("PRIVATE")).unwrap(),
            Visibility::Private
        );
        assert!(parse_visibility(Some("friends")).is_err());
    }
}
