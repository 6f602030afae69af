//! Personal records: fastest splits over the standard distances plus
//! whole-activity bests.

use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{RecordType, TrackPoint};
use crate::store::Database;
use crate::track::haversine_distance;

pub const DISTANCE_THRESHOLDS: [(RecordType, f64); 5] = [
    (RecordType::FastestOneKm, 1_000.0),
    (RecordType::FastestFiveKm, 5_000.0),
    (RecordType::FastestTenKm, 10_000.0),
    (RecordType::FastestHalfMarathon, 21_097.5),
    (RecordType::FastestMarathon, 42_195.0),
];

/// Fastest contiguous split covering `threshold_m`, in seconds, from the
/// recorded track. Two-pointer sweep over the cumulative distance profile.
pub fn fastest_split(points: &[TrackPoint], threshold_m: f64) -> Option<f64> {
    // cumulative distance and elapsed seconds at every positioned, timed point
    let mut distance = Vec::new();
    let mut elapsed = Vec::new();
    let mut total = 0.0;
    let mut prev: Option<&TrackPoint> = None;
    let mut start_time = None;

    for point in points {
        if !point.has_position() {
            continue;
        }
        let Some(time) = point.time else { continue };
        if let Some(prev) = prev {
            total += haversine_distance(
                prev.lat.unwrap(),
                prev.lon.unwrap(),
                point.lat.unwrap(),
                point.lon.unwrap(),
            );
        }
        let start = *start_time.get_or_insert(time);
        distance.push(total);
        elapsed.push((time - start).as_seconds_f64());
        prev = Some(point);
    }

    if distance.is_empty() || *distance.last().unwrap() < threshold_m {
        return None;
    }

    let mut best: Option<f64> = None;
    let mut start = 0;
    for end in 0..distance.len() {
        while distance[end] - distance[start] >= threshold_m {
            let split = elapsed[end] - elapsed[start];
            best = Some(best.map_or(split, |b: f64| b.min(split)));
            start += 1;
        }
    }
    best
}

/// Re-evaluate every record type against one activity. Runs in its own
/// transaction scope; the activity is re-loaded here rather than passed in.
pub async fn update_personal_records(db: &Database, activity_id: Uuid) -> Result<(), AppError> {
    let Some(activity) = db.get_activity(activity_id).await? else {
        debug!(%activity_id, "activity vanished before record evaluation");
        return Ok(());
    };
    let metrics = db.get_activity_metrics(activity_id).await?;
    let points = db.get_track_points(activity_id).await?;

    for (record_type, threshold) in DISTANCE_THRESHOLDS {
        if let Some(split) = fastest_split(&points, threshold) {
            db.upsert_personal_record(
                activity.user_id,
                activity.activity_type,
                record_type,
                split,
                activity_id,
                activity.started_at,
            )
            .await?;
        }
    }

    if activity.total_distance > 0.0 {
        db.upsert_personal_record(
            activity.user_id,
            activity.activity_type,
            RecordType::LongestDistance,
            activity.total_distance,
            activity_id,
            activity.started_at,
        )
        .await?;
    }
    if activity.total_duration_seconds > 0 {
        db.upsert_personal_record(
            activity.user_id,
            activity.activity_type,
            RecordType::LongestDuration,
            activity.total_duration_seconds as f64,
            activity_id,
            activity.started_at,
        )
        .await?;
    }
    if let Some(gain) = activity.elevation_gain.filter(|g| *g > 0.0) {
        db.upsert_personal_record(
            activity.user_id,
            activity.activity_type,
            RecordType::HighestElevationGain,
            gain,
            activity_id,
            activity.started_at,
        )
        .await?;
    }
    if let Some(max_speed) = metrics.as_ref().and_then(|m| m.max_speed).filter(|s| *s > 0.0) {
        db.upsert_personal_record(
            activity.user_id,
            activity.activity_type,
            RecordType::MaxSpeed,
            max_speed,
            activity_id,
            activity.started_at,
        )
        .await?;
    }
    if activity.total_distance > 0.0 && activity.total_duration_seconds > 0 {
        let pace = activity.total_duration_seconds as f64 / (activity.total_distance / 1000.0);
        db.upsert_personal_record(
            activity.user_id,
            activity.activity_type,
            RecordType::BestAveragePace,
            pace,
            activity_id,
            activity.started_at,
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    /// A straight north track: one point every `step_m` meters, one every
    /// `step_s` seconds.
    fn track(count: usize, step_m: f64, step_s: i64) -> Vec<TrackPoint> {
        let start = datetime!(2025-11-27 10:00:00 UTC);
        (0..count)
            .map(|i| TrackPoint {
                time: Some(start + time::Duration::seconds(i as i64 * step_s)),
                lat: Some(50.0 + i as f64 * (step_m / 111_195.0)),
                lon: Some(8.0),
                ele: None,
                hr: None,
                cad: None,
                power: None,
                speed: None,
                temp: None,
            })
            .collect()
    }

    #[test]
    fn test_fastest_split_constant_speed() {
        // 20 m every 10 s = 2 m/s; 1 km takes 500 s
        let points = track(100, 20.0, 10);
        let split = fastest_split(&points, 1000.0).unwrap();
        assert!((split - 500.0).abs() < 15.0, "split {split}");
    }

    #[test]
    fn test_fastest_split_finds_fast_section() {
        // slow start, fast middle, slow end
        let start = datetime!(2025-11-27 10:00:00 UTC);
        let mut points = Vec::new();
        let mut lat = 50.0;
        let mut t = 0i64;
        let mut push = |lat: &mut f64, t: &mut i64, step_m: f64, step_s: i64, n: usize| {
            for _ in 0..n {
                points.push(TrackPoint {
                    time: Some(start + time::Duration::seconds(*t)),
                    lat: Some(*lat),
                    lon: Some(8.0),
                    ele: None,
                    hr: None,
                    cad: None,
                    power: None,
                    speed: None,
                    temp: None,
                });
                *lat += step_m / 111_195.0;
                *t += step_s;
            }
        };
        push(&mut lat, &mut t, 10.0, 10, 60); // 1 m/s for 600 m
        push(&mut lat, &mut t, 40.0, 10, 30); // 4 m/s for 1200 m
        push(&mut lat, &mut t, 10.0, 10, 60); // 1 m/s again

        let split = fastest_split(&points, 1000.0).unwrap();
        // the fast section covers 1 km in ~250 s
        assert!(split < 300.0, "split {split}");
    }

    #[test]
    fn test_fastest_split_too_short() {
        let points = track(10, 20.0, 10); // only ~180 m
        assert!(fastest_split(&points, 1000.0).is_none());
    }

    #[test]
    fn test_fastest_split_ignores_untimed_points() {
        let mut points = track(100, 20.0, 10);
        points[5].time = None;
        assert!(fastest_split(&points, 1000.0).is_some());
    }
}
