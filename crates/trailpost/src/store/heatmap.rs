use std::collections::HashMap;

use uuid::Uuid;

use super::Database;
use crate::errors::AppError;
use crate::heatmap::{CellKey, MAX_CELLS};
use crate::models::HeatmapCell;

fn cells_to_columns(cells: &HashMap<CellKey, i64>) -> (Vec<f64>, Vec<f64>, Vec<i64>) {
    let mut lons = Vec::with_capacity(cells.len());
    let mut lats = Vec::with_capacity(cells.len());
    let mut counts = Vec::with_capacity(cells.len());
    for (key, &count) in cells {
        let (lon, lat) = key.center();
        lons.push(lon);
        lats.push(lat);
        counts.push(count);
    }
    (lons, lats, counts)
}

impl Database {
    /// Incremental heatmap update; safe under concurrency via
    /// `ON CONFLICT .. DO UPDATE count = count + EXCLUDED.count`.
    pub async fn upsert_heatmap_cells(
        &self,
        user_id: Uuid,
        cells: &HashMap<CellKey, i64>,
    ) -> Result<(), AppError> {
        if cells.is_empty() {
            return Ok(());
        }
        let (lons, lats, counts) = cells_to_columns(cells);
        sqlx::query(
            r#"
            INSERT INTO user_heatmap_grid (user_id, cell_lon, cell_lat, point_count,
                                           last_updated_at)
            SELECT $1, t.lon, t.lat, t.cnt, NOW()
            FROM UNNEST($2::float8[], $3::float8[], $4::bigint[]) AS t(lon, lat, cnt)
            ON CONFLICT (user_id, cell_lon, cell_lat) DO UPDATE
            SET point_count = user_heatmap_grid.point_count + EXCLUDED.point_count,
                last_updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(lons)
        .bind(lats)
        .bind(counts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reverse an activity's contribution (on delete); cells that drop to
    /// zero or below disappear.
    pub async fn subtract_heatmap_cells(
        &self,
        user_id: Uuid,
        cells: &HashMap<CellKey, i64>,
    ) -> Result<(), AppError> {
        if cells.is_empty() {
            return Ok(());
        }
        let (lons, lats, counts) = cells_to_columns(cells);
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE user_heatmap_grid g
            SET point_count = g.point_count - t.cnt, last_updated_at = NOW()
            FROM UNNEST($2::float8[], $3::float8[], $4::bigint[]) AS t(lon, lat, cnt)
            WHERE g.user_id = $1 AND g.cell_lon = t.lon AND g.cell_lat = t.lat
            "#,
        )
        .bind(user_id)
        .bind(lons)
        .bind(lats)
        .bind(counts)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM user_heatmap_grid WHERE user_id = $1 AND point_count <= 0")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_heatmap_cells(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM user_heatmap_grid WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bounding-box read at the requested grid size. Coarser sizes fold the
    /// stored base cells on the fly; results are capped and ordered by
    /// descending count.
    pub async fn read_heatmap_cells(
        &self,
        user_id: Uuid,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        grid_size: f64,
    ) -> Result<Vec<HeatmapCell>, AppError> {
        let cells = sqlx::query_as::<_, HeatmapCell>(
            r#"
            SELECT (FLOOR(cell_lon / $6) + 0.5) * $6 AS cell_lon,
                   (FLOOR(cell_lat / $6) + 0.5) * $6 AS cell_lat,
                   SUM(point_count)::bigint AS point_count
            FROM user_heatmap_grid
            WHERE user_id = $1
              AND cell_lon BETWEEN $2 AND $4
              AND cell_lat BETWEEN $3 AND $5
            GROUP BY 1, 2
            ORDER BY point_count DESC
            LIMIT $7
            "#,
        )
        .bind(user_id)
        .bind(min_lon)
        .bind(min_lat)
        .bind(max_lon)
        .bind(max_lat)
        .bind(grid_size)
        .bind(MAX_CELLS)
        .fetch_all(&self.pool)
        .await?;
        Ok(cells)
    }

    /// All stored cells of a user, for rebuild-idempotence checks.
    pub async fn all_heatmap_cells(&self, user_id: Uuid) -> Result<Vec<HeatmapCell>, AppError> {
        let cells = sqlx::query_as::<_, HeatmapCell>(
            r#"
            SELECT cell_lon, cell_lat, point_count
            FROM user_heatmap_grid WHERE user_id = $1
            ORDER BY cell_lon, cell_lat
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cells)
    }
}
