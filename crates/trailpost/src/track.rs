//! Track post-processing: polyline simplification, privacy-zone masking and
//! metric backfill.
//!
//! Runs between decode and persistence. The simplified line string is what
//! timelines, share images and federation attachments see; the raw track
//! JSON keeps every point.

use geo::Coord;

use crate::decoders::AggregateMetrics;
use crate::models::{PrivacyZone, TrackPoint};

/// Default Douglas-Peucker tolerance in meters.
pub const DEFAULT_EPSILON_M: f64 = 10.0;

/// Upper bound for the stored simplified geometry; enough for web rendering.
pub const TARGET_POINTS: usize = 500;

/// With privacy masking in effect, this much of the track is cut from both
/// ends of the simplified output.
pub const ENDPOINT_TRIM_M: f64 = 100.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 points, in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Positioned samples of a track as lon/lat coordinates.
pub fn track_coords(points: &[TrackPoint]) -> Vec<Coord<f64>> {
    points
        .iter()
        .filter(|p| p.has_position())
        .map(|p| Coord {
            x: p.lon.unwrap(),
            y: p.lat.unwrap(),
        })
        .collect()
}

// Perpendicular distance from `p` to the segment a-b, in meters, via a local
// equirectangular projection anchored at `a`. Fine at simplification scale.
fn perpendicular_distance_m(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let meters_per_deg_lat = 111_320.0;
    let meters_per_deg_lon = 111_320.0 * a.y.to_radians().cos();

    let px = (p.x - a.x) * meters_per_deg_lon;
    let py = (p.y - a.y) * meters_per_deg_lat;
    let bx = (b.x - a.x) * meters_per_deg_lon;
    let by = (b.y - a.y) * meters_per_deg_lat;

    let seg_len_sq = bx * bx + by * by;
    if seg_len_sq == 0.0 {
        return (px * px + py * py).sqrt();
    }
    let t = ((px * bx + py * by) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * bx;
    let dy = py - t * by;
    (dx * dx + dy * dy).sqrt()
}

/// Douglas-Peucker with a meter tolerance. Endpoints are always preserved.
pub fn simplify(coords: &[Coord<f64>], epsilon_m: f64) -> Vec<Coord<f64>> {
    if coords.len() <= 2 {
        return coords.to_vec();
    }

    let mut keep = vec![false; coords.len()];
    keep[0] = true;
    keep[coords.len() - 1] = true;

    let mut stack = vec![(0usize, coords.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let mut max_dist = 0.0;
        let mut max_idx = start;
        for (i, &coord) in coords.iter().enumerate().take(end).skip(start + 1) {
            let dist = perpendicular_distance_m(coord, coords[start], coords[end]);
            if dist > max_dist {
                max_dist = dist;
                max_idx = i;
            }
        }
        if max_dist > epsilon_m {
            keep[max_idx] = true;
            stack.push((start, max_idx));
            stack.push((max_idx, end));
        }
    }

    coords
        .iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(*c))
        .collect()
}

/// Simplify, doubling the tolerance until the result fits the point target.
pub fn simplify_to_target(coords: &[Coord<f64>], epsilon_m: f64, target: usize) -> Vec<Coord<f64>> {
    let mut epsilon = epsilon_m;
    let mut result = simplify(coords, epsilon);
    // a handful of rounds is enough; each one halves the detail
    for _ in 0..6 {
        if result.len() <= target {
            break;
        }
        epsilon *= 2.0;
        result = simplify(coords, epsilon);
    }
    result
}

/// Drop every coordinate inside any active zone of the owner.
pub fn apply_privacy_zones(coords: &[Coord<f64>], zones: &[PrivacyZone]) -> Vec<Coord<f64>> {
    let active: Vec<&PrivacyZone> = zones.iter().filter(|z| z.active).collect();
    if active.is_empty() {
        return coords.to_vec();
    }
    coords
        .iter()
        .filter(|c| {
            !active.iter().any(|zone| {
                haversine_distance(c.y, c.x, zone.center_lat, zone.center_lon) <= zone.radius_m
            })
        })
        .copied()
        .collect()
}

/// Cut the first and last `meters` of cumulative distance off a track.
/// A track shorter than twice the cut vanishes entirely.
pub fn trim_endpoints(coords: &[Coord<f64>], meters: f64) -> Vec<Coord<f64>> {
    if coords.len() < 2 {
        return Vec::new();
    }

    let mut cumulative = vec![0.0; coords.len()];
    for i in 1..coords.len() {
        cumulative[i] = cumulative[i - 1]
            + haversine_distance(coords[i - 1].y, coords[i - 1].x, coords[i].y, coords[i].x);
    }
    let total = *cumulative.last().unwrap();
    if total <= meters * 2.0 {
        return Vec::new();
    }

    coords
        .iter()
        .zip(&cumulative)
        .filter_map(|(c, &d)| (d >= meters && d <= total - meters).then_some(*c))
        .collect()
}

/// Full simplification pipeline for the stored geometry: mask zones, trim
/// the approach and finish when masking is in effect, then simplify.
pub fn build_simplified_track(
    points: &[TrackPoint],
    zones: &[PrivacyZone],
) -> Vec<Coord<f64>> {
    let coords = track_coords(points);
    let masking = zones.iter().any(|z| z.active);

    let mut coords = apply_privacy_zones(&coords, zones);
    if masking {
        coords = trim_endpoints(&coords, ENDPOINT_TRIM_M);
    }
    simplify_to_target(&coords, DEFAULT_EPSILON_M, TARGET_POINTS)
}

/// GeoJSON-style line string coordinates: `[[lon, lat], ...]`.
pub fn coords_to_json(coords: &[Coord<f64>]) -> serde_json::Value {
    serde_json::Value::Array(
        coords
            .iter()
            .map(|c| serde_json::json!([c.x, c.y]))
            .collect(),
    )
}

/// Backfill metrics the decoder could not provide from its summary data.
pub fn fill_missing_metrics(metrics: &mut AggregateMetrics, points: &[TrackPoint]) {
    if metrics.min_elevation.is_none() {
        metrics.min_elevation = points
            .iter()
            .filter_map(|p| p.ele)
            .fold(None, |acc: Option<f64>, e| Some(acc.map_or(e, |m| m.min(e))));
    }
    if metrics.max_elevation.is_none() {
        metrics.max_elevation = points
            .iter()
            .filter_map(|p| p.ele)
            .fold(None, |acc: Option<f64>, e| Some(acc.map_or(e, |m| m.max(e))));
    }
    if metrics.average_temperature.is_none() {
        let mut sum = 0.0;
        let mut count = 0u64;
        for t in points.iter().filter_map(|p| p.temp) {
            sum += t;
            count += 1;
        }
        if count > 0 {
            metrics.average_temperature = Some(sum / count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use uuid::Uuid;

    fn c(lon: f64, lat: f64) -> Coord<f64> {
        Coord { x: lon, y: lat }
    }

    fn zone(lat: f64, lon: f64, radius_m: f64) -> PrivacyZone {
        PrivacyZone {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "home".to_string(),
            center_lon: lon,
            center_lat: lat,
            radius_m,
            active: true,
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // one degree of latitude is ~111.2 km
        let d = haversine_distance(50.0, 8.0, 51.0, 8.0);
        assert_relative_eq!(d, 111_195.0, max_relative = 0.002);

        // symmetric and zero at identity
        assert_relative_eq!(
            haversine_distance(50.0, 8.0, 50.1, 8.1),
            haversine_distance(50.1, 8.1, 50.0, 8.0),
        );
        assert_eq!(haversine_distance(50.0, 8.0, 50.0, 8.0), 0.0);
    }

    #[test]
    fn test_simplify_preserves_endpoints() {
        let coords: Vec<Coord<f64>> = (0..50)
            .map(|i| c(8.0 + i as f64 * 0.001, 50.0 + ((i % 5) as f64) * 0.0004))
            .collect();
        let simplified = simplify(&coords, 10.0);
        assert!(simplified.len() >= 2);
        assert_eq!(simplified[0], coords[0]);
        assert_eq!(*simplified.last().unwrap(), *coords.last().unwrap());
    }

    #[test]
    fn test_simplify_collapses_collinear_points() {
        let coords: Vec<Coord<f64>> = (0..100).map(|i| c(8.0 + i as f64 * 0.0001, 50.0)).collect();
        let simplified = simplify(&coords, 10.0);
        assert_eq!(simplified.len(), 2);
    }

    #[test]
    fn test_simplify_keeps_significant_corners() {
        // an L-shape: the corner must survive a 10 m tolerance
        let mut coords: Vec<Coord<f64>> = (0..10).map(|i| c(8.0 + i as f64 * 0.001, 50.0)).collect();
        coords.extend((1..10).map(|i| c(8.009, 50.0 + i as f64 * 0.001)));
        let simplified = simplify(&coords, 10.0);
        assert!(simplified.contains(&c(8.009, 50.0)));
    }

    #[test]
    fn test_simplify_to_target_caps_size() {
        // dense noisy track that a 10 m epsilon cannot reduce enough
        let coords: Vec<Coord<f64>> = (0..5000)
            .map(|i| {
                c(
                    8.0 + i as f64 * 0.0005,
                    50.0 + if i % 2 == 0 { 0.0 } else { 0.0005 },
                )
            })
            .collect();
        let simplified = simplify_to_target(&coords, DEFAULT_EPSILON_M, TARGET_POINTS);
        assert!(simplified.len() <= TARGET_POINTS, "got {}", simplified.len());
    }

    #[test]
    fn test_privacy_zone_masks_all_interior_points() {
        let coords: Vec<Coord<f64>> = (0..100).map(|i| c(8.0 + i as f64 * 0.0002, 50.0)).collect();
        let zones = vec![zone(50.0, 8.0, 300.0)];

        let masked = apply_privacy_zones(&coords, &zones);
        assert!(!masked.is_empty());
        for point in &masked {
            let d = haversine_distance(point.y, point.x, 50.0, 8.0);
            assert!(d > 300.0, "point at {d} m is inside the zone");
        }
    }

    #[test]
    fn test_inactive_zone_is_ignored() {
        let coords = vec![c(8.0, 50.0), c(8.001, 50.0)];
        let mut z = zone(50.0, 8.0, 500.0);
        z.active = false;
        assert_eq!(apply_privacy_zones(&coords, &[z]).len(), 2);
    }

    #[test]
    fn test_trim_endpoints_cuts_both_sides() {
        // ~14 m per step, 100 steps: ~1.4 km total
        let coords: Vec<Coord<f64>> = (0..100).map(|i| c(8.0 + i as f64 * 0.0002, 50.0)).collect();
        let trimmed = trim_endpoints(&coords, 100.0);
        assert!(!trimmed.is_empty());

        let first = trimmed.first().unwrap();
        let last = trimmed.last().unwrap();
        assert!(haversine_distance(50.0, 8.0, first.y, first.x) >= 100.0);
        let end = coords.last().unwrap();
        assert!(haversine_distance(end.y, end.x, last.y, last.x) >= 100.0);
    }

    #[test]
    fn test_trim_swallows_short_tracks() {
        let coords = vec![c(8.0, 50.0), c(8.0001, 50.0)];
        assert!(trim_endpoints(&coords, 100.0).is_empty());
    }

    #[test]
    fn test_simplified_track_respects_zones() {
        let points: Vec<TrackPoint> = (0..200)
            .map(|i| TrackPoint {
                time: None,
                lat: Some(50.0),
                lon: Some(8.0 + i as f64 * 0.0002),
                ele: None,
                hr: None,
                cad: None,
                power: None,
                speed: None,
                temp: None,
            })
            .collect();
        let zones = vec![zone(50.0, 8.02, 200.0)];

        let track = build_simplified_track(&points, &zones);
        for point in &track {
            let d = haversine_distance(point.y, point.x, 50.0, 8.02);
            assert!(d > 200.0, "simplified point at {d} m is inside the zone");
        }
    }

    #[test]
    fn test_coords_to_json_is_lon_lat() {
        let json = coords_to_json(&[c(8.26, 49.99)]);
        assert_eq!(json[0][0], 8.26);
        assert_eq!(json[0][1], 49.99);
    }
}
