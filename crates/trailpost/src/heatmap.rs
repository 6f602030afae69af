//! Heatmap grid math: snap-to-grid quantization and per-cell counting.
//!
//! The base grid is 0.0001 degrees (~11 m); reads may ask for coarser
//! aggregation which the store folds in SQL. Indoor activities never reach
//! this module: the aggregator's callers filter them out.

use std::collections::HashMap;

use crate::models::TrackPoint;

/// Finest (storage) grid size in degrees.
pub const BASE_GRID_SIZE: f64 = 0.0001;

/// Grid sizes a read may request, coarse to fine.
pub const GRID_SIZES: [f64; 3] = [0.01, 0.001, 0.0001];

/// Incremental updates sample every Nth point of a new activity.
pub const SAMPLE_EVERY: usize = 10;

/// Hard cap on cells returned by one read.
pub const MAX_CELLS: i64 = 10_000;

/// Snap a coordinate to the center of its enclosing grid cell:
/// `(floor(v / size) + 0.5) * size`.
pub fn snap_to_grid(value: f64, grid_size: f64) -> f64 {
    ((value / grid_size).floor() + 0.5) * grid_size
}

/// Clamp an arbitrary requested grid size to the nearest supported one.
pub fn normalize_grid_size(requested: f64) -> f64 {
    GRID_SIZES
        .iter()
        .copied()
        .min_by(|a, b| {
            (a - requested)
                .abs()
                .partial_cmp(&(b - requested).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(BASE_GRID_SIZE)
}

/// A base-grid cell keyed by its integer indices, so float centers never
/// act as hash keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub lon_idx: i64,
    pub lat_idx: i64,
}

impl CellKey {
    pub fn from_position(lon: f64, lat: f64) -> Self {
        Self {
            lon_idx: (lon / BASE_GRID_SIZE).floor() as i64,
            lat_idx: (lat / BASE_GRID_SIZE).floor() as i64,
        }
    }

    /// The cell's center coordinates.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lon_idx as f64 + 0.5) * BASE_GRID_SIZE,
            (self.lat_idx as f64 + 0.5) * BASE_GRID_SIZE,
        )
    }
}

/// Count sampled track points per base-grid cell. Every [`SAMPLE_EVERY`]th
/// point contributes; points without a position are skipped but keep their
/// index so sampling stays aligned with the recording cadence.
pub fn sampled_cell_counts(points: &[TrackPoint]) -> HashMap<CellKey, i64> {
    let mut counts = HashMap::new();
    for point in points.iter().step_by(SAMPLE_EVERY) {
        if let (Some(lat), Some(lon)) = (point.lat, point.lon) {
            *counts.entry(CellKey::from_position(lon, lat)).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> TrackPoint {
        TrackPoint {
            time: None,
            lat: Some(lat),
            lon: Some(lon),
            ele: None,
            hr: None,
            cad: None,
            power: None,
            speed: None,
            temp: None,
        }
    }

    #[test]
    fn test_snap_to_grid_formula() {
        // floor(8.26004 / 0.0001) = 82600 -> center 8.26005
        let snapped = snap_to_grid(8.26004, BASE_GRID_SIZE);
        assert!((snapped - 8.26005).abs() < 1e-9, "snapped {snapped}");

        let negative = snap_to_grid(-0.00003, BASE_GRID_SIZE);
        assert!((negative - -0.00005).abs() < 1e-9, "snapped {negative}");
    }

    #[test]
    fn test_cell_key_center_matches_snap() {
        let (lon, lat) = (8.261234, 49.991234);
        let key = CellKey::from_position(lon, lat);
        let (clon, clat) = key.center();
        assert!((clon - snap_to_grid(lon, BASE_GRID_SIZE)).abs() < 1e-9);
        assert!((clat - snap_to_grid(lat, BASE_GRID_SIZE)).abs() < 1e-9);
    }

    #[test]
    fn test_sampling_takes_every_tenth_point() {
        // 25 points in the same cell: indices 0, 10, 20 are sampled
        let points: Vec<TrackPoint> = (0..25).map(|_| point(50.0, 8.0)).collect();
        let counts = sampled_cell_counts(&points);
        assert_eq!(counts.len(), 1);
        assert_eq!(*counts.values().next().unwrap(), 3);
    }

    #[test]
    fn test_sampling_splits_cells() {
        let mut points = Vec::new();
        for _ in 0..10 {
            points.push(point(50.0, 8.0));
        }
        for _ in 0..10 {
            points.push(point(50.1, 8.1));
        }
        let counts = sampled_cell_counts(&points);
        assert_eq!(counts.len(), 2);
        assert!(counts.values().all(|&c| c == 1));
    }

    #[test]
    fn test_normalize_grid_size() {
        assert_eq!(normalize_grid_size(0.01), 0.01);
        assert_eq!(normalize_grid_size(0.02), 0.01);
        assert_eq!(normalize_grid_size(0.0005), 0.001);
        assert_eq!(normalize_grid_size(0.00001), 0.0001);
    }
}
