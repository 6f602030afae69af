//! GPX decoder.
//!
//! Streaming XML reader over the raw bytes; extracts `<trkpt>` positions,
//! elevation, ISO-8601 timestamps and the common Garmin TrackPointExtension
//! sensor values. Unlike FIT, GPX carries no session summary, so aggregate
//! metrics are computed from the point stream.

use quick_xml::Reader;
use quick_xml::events::Event;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{AggregateMetrics, ParseError, ParsedActivity};
use crate::models::{ActivityType, IndoorDetectionMethod, TrackPoint};
use crate::track::haversine_distance;

/// Every point within this range of the start marks a stationary recording
/// (trainer with a GPS dongle indoors, typically).
const STATIONARY_RADIUS_M: f64 = 50.0;

pub fn parse_gpx(bytes: &[u8]) -> Result<ParsedActivity, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut points: Vec<TrackPoint> = Vec::new();
    let mut track_type: Option<String> = None;

    let mut in_trkpt = false;
    let mut current: Option<TrackPoint> = None;
    // innermost element name while inside a <trkpt>, for text capture
    let mut element: Vec<u8> = Vec::new();
    let mut in_trk_type = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                match name.as_slice() {
                    b"trkpt" => {
                        if let Some(point) = trkpt_from_attributes(e)? {
                            in_trkpt = true;
                            current = Some(point);
                        }
                    }
                    b"type" if !in_trkpt => in_trk_type = true,
                    _ if in_trkpt => element = name,
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                // self-closing <trkpt/> carries only its position
                if e.local_name().as_ref().eq_ignore_ascii_case(b"trkpt") {
                    if let Some(point) = trkpt_from_attributes(e)? {
                        points.push(point);
                    }
                }
            }
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map_err(|err| ParseError::Gpx(format!("bad text: {err}")))?;
                let text = text.trim();
                if in_trk_type {
                    track_type = Some(text.to_string());
                } else if in_trkpt {
                    if let Some(ref mut point) = current {
                        match element.as_slice() {
                            b"ele" => point.ele = text.parse().ok(),
                            b"time" => {
                                point.time = OffsetDateTime::parse(text, &Rfc3339).ok();
                            }
                            b"hr" => point.hr = text.parse().ok(),
                            b"cad" => point.cad = text.parse().ok(),
                            b"power" => point.power = text.parse().ok(),
                            b"speed" => point.speed = text.parse().ok(),
                            b"atemp" | b"temp" => point.temp = text.parse().ok(),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                match name.as_slice() {
                    b"trkpt" => {
                        if let Some(point) = current.take() {
                            points.push(point);
                        }
                        in_trkpt = false;
                        element.clear();
                    }
                    b"type" => in_trk_type = false,
                    _ => element.clear(),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(ParseError::Gpx(err.to_string())),
        }
        buf.clear();
    }

    let activity_type = track_type
        .as_deref()
        .map(map_gpx_type)
        .unwrap_or(ActivityType::Generic);

    let indoor = classify_indoor(&points);
    let metrics = compute_metrics(&points);
    let started_at = points.iter().find_map(|p| p.time);
    let ended_at = points.iter().rev().find_map(|p| p.time);

    Ok(ParsedActivity {
        activity_type,
        sub_sport: None,
        started_at,
        ended_at,
        utc_offset_seconds: None,
        points,
        metrics,
        indoor,
    })
}

fn trkpt_from_attributes(
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<Option<TrackPoint>, ParseError> {
    let mut lat = None;
    let mut lon = None;
    for attr in e.attributes().flatten() {
        let key = attr.key.local_name().as_ref().to_ascii_lowercase();
        let value = attr
            .unescape_value()
            .map_err(|err| ParseError::Gpx(format!("bad attribute: {err}")))?;
        match key.as_slice() {
            b"lat" => lat = value.parse::<f64>().ok(),
            b"lon" => lon = value.parse::<f64>().ok(),
            _ => {}
        }
    }
    // points without a position are not usable
    if lat.is_none() || lon.is_none() {
        return Ok(None);
    }
    Ok(Some(TrackPoint {
        time: None,
        lat,
        lon,
        ele: None,
        hr: None,
        cad: None,
        power: None,
        speed: None,
        temp: None,
    }))
}

fn map_gpx_type(value: &str) -> ActivityType {
    match value.to_lowercase().as_str() {
        "running" | "run" | "trail_running" => ActivityType::Running,
        "cycling" | "biking" | "ride" | "mountain_biking" | "road_biking" => ActivityType::Riding,
        "hiking" | "hike" => ActivityType::Hiking,
        "walking" | "walk" => ActivityType::Walking,
        "swimming" | "swim" => ActivityType::Swimming,
        "rowing" => ActivityType::Rowing,
        "skiing" | "cross_country_skiing" => ActivityType::Skiing,
        "inline_skating" | "skating" => ActivityType::InlineSkating,
        _ => ActivityType::Generic,
    }
}

fn classify_indoor(points: &[TrackPoint]) -> Option<IndoorDetectionMethod> {
    let mut positioned = points.iter().filter(|p| p.has_position());
    let Some(first) = positioned.next() else {
        return Some(IndoorDetectionMethod::HeuristicNoGps);
    };
    let (lat0, lon0) = (first.lat.unwrap(), first.lon.unwrap());

    let all_stationary = points
        .iter()
        .filter(|p| p.has_position())
        .all(|p| haversine_distance(lat0, lon0, p.lat.unwrap(), p.lon.unwrap()) <= STATIONARY_RADIUS_M);
    all_stationary.then_some(IndoorDetectionMethod::HeuristicStationary)
}

fn compute_metrics(points: &[TrackPoint]) -> AggregateMetrics {
    let mut metrics = AggregateMetrics::default();

    let mut distance = 0.0;
    let mut ascent = 0.0;
    let mut descent = 0.0;
    let mut max_segment_speed: Option<f64> = None;
    let mut prev: Option<&TrackPoint> = None;

    for point in points.iter().filter(|p| p.has_position()) {
        if let Some(prev) = prev {
            let leg = haversine_distance(
                prev.lat.unwrap(),
                prev.lon.unwrap(),
                point.lat.unwrap(),
                point.lon.unwrap(),
            );
            distance += leg;

            if let (Some(a), Some(b)) = (prev.ele, point.ele) {
                let diff = b - a;
                if diff > 0.0 {
                    ascent += diff;
                } else {
                    descent += diff.abs();
                }
            }
            if let (Some(t0), Some(t1)) = (prev.time, point.time) {
                let secs = (t1 - t0).as_seconds_f64();
                if secs > 0.0 {
                    let speed = leg / secs;
                    max_segment_speed =
                        Some(max_segment_speed.map_or(speed, |m: f64| m.max(speed)));
                }
            }
        }
        prev = Some(point);
    }

    let started = points.iter().find_map(|p| p.time);
    let ended = points.iter().rev().find_map(|p| p.time);
    let duration = started
        .zip(ended)
        .map(|(start, end)| (end - start).whole_seconds())
        .filter(|secs| *secs >= 0);

    metrics.total_distance = (distance > 0.0).then_some(distance);
    metrics.total_duration_seconds = duration;
    metrics.elevation_gain = (ascent > 0.0).then_some(ascent);
    metrics.elevation_loss = (descent > 0.0).then_some(descent);
    metrics.average_speed = duration
        .filter(|secs| *secs > 0)
        .map(|secs| distance / secs as f64);
    metrics.max_speed = points
        .iter()
        .filter_map(|p| p.speed)
        .fold(max_segment_speed, |acc, s| {
            Some(acc.map_or(s, |m| m.max(s)))
        });

    metrics.average_heart_rate = mean(points.iter().filter_map(|p| p.hr));
    metrics.max_heart_rate = points.iter().filter_map(|p| p.hr).fold(None, fold_max);
    metrics.average_cadence = mean(points.iter().filter_map(|p| p.cad));
    metrics.average_power = mean(points.iter().filter_map(|p| p.power));
    metrics.max_power = points.iter().filter_map(|p| p.power).fold(None, fold_max);
    metrics.average_temperature = mean(points.iter().filter_map(|p| p.temp));
    metrics.min_elevation = points.iter().filter_map(|p| p.ele).fold(None, fold_min);
    metrics.max_elevation = points.iter().filter_map(|p| p.ele).fold(None, fold_max);

    metrics
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0u64;
    for v in values {
        sum += v;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

fn fold_max(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |m| m.max(v)))
}

fn fold_min(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |m| m.min(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpx_doc(trkpts: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
  <trk>
    <name>Morning run</name>
    <type>running</type>
    <trkseg>
{trkpts}
    </trkseg>
  </trk>
</gpx>"#
        )
    }

    fn trkpt(lat: f64, lon: f64, ele: f64, time: &str, hr: u32) -> String {
        format!(
            r#"<trkpt lat="{lat}" lon="{lon}">
  <ele>{ele}</ele>
  <time>{time}</time>
  <extensions><gpxtpx:TrackPointExtension>
    <gpxtpx:hr>{hr}</gpxtpx:hr>
    <gpxtpx:cad>82</gpxtpx:cad>
  </gpxtpx:TrackPointExtension></extensions>
</trkpt>"#
        )
    }

    #[test]
    fn test_parses_points_and_extensions() {
        let doc = gpx_doc(&format!(
            "{}\n{}",
            trkpt(49.99, 8.26, 120.0, "2025-11-27T14:49:09Z", 140),
            trkpt(49.995, 8.262, 130.0, "2025-11-27T14:52:09Z", 150),
        ));
        let parsed = parse_gpx(doc.as_bytes()).unwrap();

        assert_eq!(parsed.activity_type, ActivityType::Running);
        assert_eq!(parsed.points.len(), 2);
        assert_eq!(parsed.points[0].lat, Some(49.99));
        assert_eq!(parsed.points[0].hr, Some(140.0));
        assert_eq!(parsed.points[0].cad, Some(82.0));
        assert_eq!(parsed.points[1].ele, Some(130.0));
        assert_eq!(
            parsed.started_at.unwrap().unix_timestamp(),
            1_764_254_949
        );
        assert!(parsed.indoor.is_none());
    }

    #[test]
    fn test_computes_metrics_from_stream() {
        let doc = gpx_doc(&format!(
            "{}\n{}\n{}",
            trkpt(50.0, 8.0, 100.0, "2025-11-27T10:00:00Z", 120),
            trkpt(50.001, 8.0, 110.0, "2025-11-27T10:01:00Z", 130),
            trkpt(50.002, 8.0, 105.0, "2025-11-27T10:02:00Z", 140),
        ));
        let parsed = parse_gpx(doc.as_bytes()).unwrap();
        let m = &parsed.metrics;

        // 0.001 deg latitude is ~111 m per step
        let distance = m.total_distance.unwrap();
        assert!((distance - 222.4).abs() < 5.0, "distance {distance}");
        assert_eq!(m.total_duration_seconds, Some(120));
        assert!((m.elevation_gain.unwrap() - 10.0).abs() < 1e-9);
        assert!((m.elevation_loss.unwrap() - 5.0).abs() < 1e-9);
        assert!((m.average_heart_rate.unwrap() - 130.0).abs() < 1e-9);
        assert_eq!(m.max_heart_rate, Some(140.0));
        assert_eq!(m.min_elevation, Some(100.0));
        assert_eq!(m.max_elevation, Some(110.0));
        let avg = m.average_speed.unwrap();
        assert!((avg - distance / 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_stationary_track_is_indoor() {
        // ~11 m of drift around a fixed point
        let doc = gpx_doc(&format!(
            "{}\n{}\n{}",
            trkpt(50.0, 8.0, 100.0, "2025-11-27T10:00:00Z", 120),
            trkpt(50.0001, 8.0, 100.0, "2025-11-27T10:10:00Z", 130),
            trkpt(50.0, 8.0001, 100.0, "2025-11-27T10:20:00Z", 140),
        ));
        let parsed = parse_gpx(doc.as_bytes()).unwrap();
        assert_eq!(
            parsed.indoor,
            Some(IndoorDetectionMethod::HeuristicStationary)
        );
    }

    #[test]
    fn test_empty_track_is_indoor_no_gps() {
        let parsed = parse_gpx(gpx_doc("").as_bytes()).unwrap();
        assert!(parsed.points.is_empty());
        assert_eq!(parsed.indoor, Some(IndoorDetectionMethod::HeuristicNoGps));
    }

    #[test]
    fn test_rejects_malformed_xml() {
        let err = parse_gpx(b"<gpx><trk><trkseg><trkpt lat=\"x\"");
        assert!(matches!(err, Err(ParseError::Gpx(_))));
    }
}
