//! Upload ingestion: decode, post-process the track, persist atomically.
//!
//! Shared by the single-file upload handler and the batch importer, which
//! differ only in their [`ProcessingOptions`] and error reporting.

use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::decoders::{FileFormat, ParsedActivity};
use crate::errors::AppError;
use crate::models::{Activity, ActivityMetrics, Visibility};
use crate::pipeline::PostProcessor;
use crate::store::{Database, NewActivity};
use crate::track::{
    build_simplified_track, coords_to_json, fill_missing_metrics, haversine_distance,
};

pub struct UploadRequest {
    pub user_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub timezone: Option<String>,
    pub format: FileFormat,
    pub bytes: Bytes,
}

/// Decode and persist one uploaded file. Returns the stored activity; the
/// caller decides which pipeline stages run afterwards.
pub async fn ingest_activity(
    db: &Database,
    processor: &PostProcessor,
    config: &AppConfig,
    request: UploadRequest,
) -> Result<Activity, AppError> {
    let format = if request.format == FileFormat::Unknown {
        FileFormat::detect_from_bytes(&request.bytes)
    } else {
        request.format
    };

    let raw_bytes = request.bytes.to_vec();
    let mut parsed = processor.decode_file(format, request.bytes).await?;

    let started_at = parsed
        .started_at
        .ok_or_else(|| AppError::Validation("file carries no timestamps".to_string()))?;
    // the schema requires ended_at >= started_at
    let ended_at = parsed.ended_at.filter(|end| *end >= started_at).unwrap_or(started_at);

    fill_missing_metrics(&mut parsed.metrics, &parsed.points);
    let total_distance = parsed
        .metrics
        .total_distance
        .unwrap_or_else(|| track_distance(&parsed));
    let total_duration_seconds = parsed
        .metrics
        .total_duration_seconds
        .unwrap_or_else(|| (ended_at - started_at).whole_seconds())
        .max(0);

    let indoor = parsed.indoor.is_some();
    let simplified_track = if indoor {
        None
    } else {
        let zones = db.get_privacy_zones(request.user_id).await?;
        Some(coords_to_json(&build_simplified_track(&parsed.points, &zones)))
    };

    let timezone = request
        .timezone
        .or_else(|| parsed.utc_offset_seconds.map(offset_label))
        .unwrap_or_else(|| config.default_timezone.clone());

    let title = request.title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| {
        default_title(&parsed, started_at)
    });

    let id = Uuid::new_v4();
    let metrics = ActivityMetrics {
        activity_id: id,
        average_heart_rate: parsed.metrics.average_heart_rate,
        max_heart_rate: parsed.metrics.max_heart_rate,
        average_cadence: parsed.metrics.average_cadence,
        average_power: parsed.metrics.average_power,
        max_power: parsed.metrics.max_power,
        average_speed: parsed.metrics.average_speed,
        max_speed: parsed.metrics.max_speed,
        calories: parsed.metrics.calories,
        min_elevation: parsed.metrics.min_elevation,
        max_elevation: parsed.metrics.max_elevation,
        average_temperature: parsed.metrics.average_temperature,
    };

    let new_activity = NewActivity {
        id,
        user_id: request.user_id,
        activity_type: parsed.activity_type,
        title,
        description: request.description,
        started_at,
        ended_at,
        timezone,
        visibility: request.visibility,
        total_distance,
        total_duration_seconds,
        elevation_gain: parsed.metrics.elevation_gain,
        elevation_loss: parsed.metrics.elevation_loss,
        indoor,
        indoor_detection_method: parsed.indoor,
        sub_sport: parsed.sub_sport.clone(),
        raw_file: Some(raw_bytes),
        raw_file_format: Some(format.as_str().to_string()),
        simplified_track,
        track_points: serde_json::to_value(&parsed.points)
            .map_err(|e| AppError::Parse(e.to_string()))?,
        metrics,
    };

    db.save_activity(&new_activity).await?;
    db.get_activity(id).await?.ok_or(AppError::Internal)
}

fn track_distance(parsed: &ParsedActivity) -> f64 {
    let mut distance = 0.0;
    let mut prev: Option<(f64, f64)> = None;
    for point in parsed.points.iter().filter(|p| p.has_position()) {
        let current = (point.lat.unwrap(), point.lon.unwrap());
        if let Some((lat, lon)) = prev {
            distance += haversine_distance(lat, lon, current.0, current.1);
        }
        prev = Some(current);
    }
    distance
}

/// `UTC+01:00`-style label from a device's UTC offset.
fn offset_label(offset_seconds: i32) -> String {
    let sign = if offset_seconds < 0 { '-' } else { '+' };
    let abs = offset_seconds.abs();
    format!("UTC{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
}

fn default_title(parsed: &ParsedActivity, started_at: OffsetDateTime) -> String {
    let kind = match parsed.activity_type {
        crate::models::ActivityType::Running => "Run",
        crate::models::ActivityType::Riding => "Ride",
        crate::models::ActivityType::Hiking => "Hike",
        crate::models::ActivityType::Walking => "Walk",
        crate::models::ActivityType::Swimming => "Swim",
        crate::models::ActivityType::Rowing => "Row",
        crate::models::ActivityType::Skiing => "Ski",
        crate::models::ActivityType::InlineSkating => "Skate",
        crate::models::ActivityType::Generic => "Workout",
    };
    let when = match started_at.hour() {
        0..=11 => "Morning",
        12..=17 => "Afternoon",
        _ => "Evening",
    };
    format!("{when} {kind}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_label() {
        assert_eq!(offset_label(3600), "UTC+01:00");
        assert_eq!(offset_label(-19800), "UTC-05:30");
        assert_eq!(offset_label(0), "UTC+00:00");
    }
}
