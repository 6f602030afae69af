//! Privacy zone management.

use axum::{Extension, extract::Path, http::StatusCode, response::Json};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::PrivacyZone;
use crate::store::Database;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePrivacyZoneRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1 to 100 characters"))]
    pub name: String,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude out of range"))]
    pub center_lon: f64,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude out of range"))]
    pub center_lat: f64,
    #[validate(range(min = 10.0, max = 10000.0, message = "Radius must be 10 m to 10 km"))]
    pub radius_m: f64,
}

/// List the caller's privacy zones.
#[utoipa::path(
    get,
    path = "/privacy-zones",
    tag = "privacy",
    responses(
        (status = 200, description = "Privacy zones", body = Vec<PrivacyZone>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_privacy_zones(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Vec<PrivacyZone>>, AppError> {
    Ok(Json(db.get_privacy_zones(claims.sub).await?))
}

/// Create a privacy zone. Applies to uploads from now on; existing
/// activities keep their stored geometry until re-imported.
#[utoipa::path(
    post,
    path = "/privacy-zones",
    tag = "privacy",
    request_body = CreatePrivacyZoneRequest,
    responses(
        (status = 200, description = "Created zone", body = PrivacyZone),
        (status = 400, description = "Invalid zone"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_privacy_zone(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Json(req): Json<CreatePrivacyZoneRequest>,
) -> Result<Json<PrivacyZone>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let zone = PrivacyZone {
        id: Uuid::new_v4(),
        user_id: claims.sub,
        name: req.name,
        center_lon: req.center_lon,
        center_lat: req.center_lat,
        radius_m: req.radius_m,
        active: true,
    };
    db.create_privacy_zone(&zone).await?;
    Ok(Json(zone))
}

/// Delete a privacy zone.
#[utoipa::path(
    delete,
    path = "/privacy-zones/{id}",
    tag = "privacy",
    params(("id" = Uuid, Path, description = "Zone ID")),
    responses(
        (status = 204, description = "Zone deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Zone not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_privacy_zone(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if db.delete_privacy_zone(id, claims.sub).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}
