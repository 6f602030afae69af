//! Heatmap read and rebuild handlers.

use axum::{Extension, extract::Query, http::StatusCode, response::Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::heatmap::{BASE_GRID_SIZE, normalize_grid_size};
use crate::models::HeatmapCell;
use crate::pipeline::heatmap_rebuild;
use crate::store::Database;

#[derive(Debug, Deserialize, ToSchema)]
pub struct HeatmapQuery {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    /// Requested grid size in degrees; snapped to 0.01 / 0.001 / 0.0001.
    pub grid_size: Option<f64>,
}

/// Read the caller's heatmap cells inside a bounding box.
#[utoipa::path(
    get,
    path = "/heatmap",
    tag = "heatmap",
    params(
        ("min_lon" = f64, Query, description = "West bound"),
        ("min_lat" = f64, Query, description = "South bound"),
        ("max_lon" = f64, Query, description = "East bound"),
        ("max_lat" = f64, Query, description = "North bound"),
        ("grid_size" = Option<f64>, Query, description = "Grid size in degrees")
    ),
    responses(
        (status = 200, description = "Cells ordered by descending count", body = Vec<HeatmapCell>),
        (status = 400, description = "Invalid bounding box"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_heatmap(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Query(query): Query<HeatmapQuery>,
) -> Result<Json<Vec<HeatmapCell>>, AppError> {
    if query.min_lon >= query.max_lon || query.min_lat >= query.max_lat {
        return Err(AppError::Validation("empty bounding box".to_string()));
    }
    let grid_size = normalize_grid_size(query.grid_size.unwrap_or(BASE_GRID_SIZE));
    let cells = db
        .read_heatmap_cells(
            claims.sub,
            query.min_lon,
            query.min_lat,
            query.max_lon,
            query.max_lat,
            grid_size,
        )
        .await?;
    Ok(Json(cells))
}

/// Drop and recompute the caller's heatmap from all non-indoor activities.
#[utoipa::path(
    post,
    path = "/heatmap/rebuild",
    tag = "heatmap",
    responses(
        (status = 202, description = "Rebuild finished"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn rebuild_heatmap(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
) -> Result<StatusCode, AppError> {
    heatmap_rebuild(&db, claims.sub).await?;
    Ok(StatusCode::ACCEPTED)
}
