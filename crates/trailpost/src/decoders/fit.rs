//! FIT (Flexible and Interoperable Data Transfer) decoder.
//!
//! Reads the binary record stream directly: file header (".FIT" magic at
//! bytes 8-11), definition and data messages, compressed-timestamp headers,
//! developer fields, and the trailing CRC-16. Only the messages the
//! ingestion pipeline needs are interpreted: FileId, Record, Lap, Session
//! and Activity.
//!
//! Two wire pitfalls live here and nowhere else: FIT timestamps count
//! seconds from 1989-12-31T00:00:00Z (add [`FIT_EPOCH_OFFSET`] for POSIX),
//! and coordinates are semicircles (multiply by 180 / 2^31 for degrees).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashMap;
use time::OffsetDateTime;

use super::{AggregateMetrics, ParseError, ParsedActivity};
use crate::models::{ActivityType, IndoorDetectionMethod, TrackPoint};

/// Seconds between the FIT epoch (1989-12-31T00:00:00Z) and the Unix epoch.
pub const FIT_EPOCH_OFFSET: i64 = 631_065_600;

/// 2^31 semicircles = 180 degrees.
pub const SEMICIRCLES_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

// Global message numbers from the FIT profile.
const MSG_FILE_ID: u16 = 0;
const MSG_SESSION: u16 = 18;
const MSG_LAP: u16 = 19;
const MSG_RECORD: u16 = 20;
const MSG_ACTIVITY: u16 = 34;

/// Sub-sports that make an activity indoor regardless of GPS content.
const INDOOR_SUB_SPORTS: &[&str] = &[
    "INDOOR_CYCLING",
    "TREADMILL",
    "VIRTUAL_ACTIVITY",
    "TRAINER",
];

pub fn semicircles_to_degrees(semicircles: i32) -> f64 {
    f64::from(semicircles) * SEMICIRCLES_TO_DEGREES
}

pub fn fit_timestamp_to_datetime(fit_seconds: u32) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(i64::from(fit_seconds) + FIT_EPOCH_OFFSET).ok()
}

// ============================================================================
// CRC-16 (Garmin reference algorithm)
// ============================================================================

const CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

pub fn crc16(bytes: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for &byte in bytes {
        let mut tmp = CRC_TABLE[(sum & 0x0F) as usize];
        sum = (sum >> 4) & 0x0FFF;
        sum = sum ^ tmp ^ CRC_TABLE[(byte & 0x0F) as usize];

        tmp = CRC_TABLE[(sum & 0x0F) as usize];
        sum = (sum >> 4) & 0x0FFF;
        sum = sum ^ tmp ^ CRC_TABLE[(byte >> 4) as usize];
    }
    sum
}

// ============================================================================
// Wire structures
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct FieldDef {
    field_num: u8,
    size: u8,
    base_type: u8,
}

#[derive(Debug, Clone)]
struct MessageDef {
    global: u16,
    big_endian: bool,
    fields: Vec<FieldDef>,
    /// Total byte length of developer fields, skipped on decode.
    dev_bytes: usize,
}

/// A decoded scalar field value.
#[derive(Debug, Clone, Copy)]
enum Value {
    UInt(u64),
    SInt(i64),
    Float(f64),
}

impl Value {
    fn as_f64(self) -> f64 {
        match self {
            Value::UInt(v) => v as f64,
            Value::SInt(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    fn as_u32(self) -> Option<u32> {
        match self {
            Value::UInt(v) => u32::try_from(v).ok(),
            Value::SInt(v) => u32::try_from(v).ok(),
            Value::Float(_) => None,
        }
    }

    fn as_i32(self) -> Option<i32> {
        match self {
            Value::UInt(v) => i32::try_from(v).ok(),
            Value::SInt(v) => i32::try_from(v).ok(),
            Value::Float(_) => None,
        }
    }

    fn as_i64(self) -> Option<i64> {
        match self {
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::SInt(v) => Some(v),
            Value::Float(_) => None,
        }
    }
}

fn base_type_size(base_type: u8) -> usize {
    match base_type & 0x1F {
        0x00 | 0x01 | 0x02 | 0x0A | 0x0D => 1, // enum, sint8, uint8, uint8z, byte
        0x03 | 0x04 | 0x0B => 2,               // sint16, uint16, uint16z
        0x05 | 0x06 | 0x08 | 0x0C => 4,        // sint32, uint32, float32, uint32z
        0x07 => 1,                             // string (variable, size from def)
        0x09 | 0x0E | 0x0F | 0x10 => 8,        // float64, sint64, uint64, uint64z
        _ => 1,
    }
}

/// Decode one scalar, returning `None` for the profile's invalid sentinel.
fn decode_value(bytes: &[u8], base_type: u8, big_endian: bool) -> Option<Value> {
    let bt = base_type & 0x1F;
    match bt {
        // enum / uint8
        0x00 | 0x02 => {
            let v = bytes[0];
            (v != 0xFF).then_some(Value::UInt(u64::from(v)))
        }
        // sint8
        0x01 => {
            let v = bytes[0] as i8;
            (v != 0x7F).then_some(Value::SInt(i64::from(v)))
        }
        // uint8z
        0x0A => {
            let v = bytes[0];
            (v != 0).then_some(Value::UInt(u64::from(v)))
        }
        // byte
        0x0D => Some(Value::UInt(u64::from(bytes[0]))),
        // sint16
        0x03 => {
            let v = if big_endian {
                BigEndian::read_i16(bytes)
            } else {
                LittleEndian::read_i16(bytes)
            };
            (v != 0x7FFF).then_some(Value::SInt(i64::from(v)))
        }
        // uint16
        0x04 => {
            let v = if big_endian {
                BigEndian::read_u16(bytes)
            } else {
                LittleEndian::read_u16(bytes)
            };
            (v != 0xFFFF).then_some(Value::UInt(u64::from(v)))
        }
        // uint16z
        0x0B => {
            let v = if big_endian {
                BigEndian::read_u16(bytes)
            } else {
                LittleEndian::read_u16(bytes)
            };
            (v != 0).then_some(Value::UInt(u64::from(v)))
        }
        // sint32
        0x05 => {
            let v = if big_endian {
                BigEndian::read_i32(bytes)
            } else {
                LittleEndian::read_i32(bytes)
            };
            (v != 0x7FFF_FFFF).then_some(Value::SInt(i64::from(v)))
        }
        // uint32
        0x06 => {
            let v = if big_endian {
                BigEndian::read_u32(bytes)
            } else {
                LittleEndian::read_u32(bytes)
            };
            (v != 0xFFFF_FFFF).then_some(Value::UInt(u64::from(v)))
        }
        // uint32z
        0x0C => {
            let v = if big_endian {
                BigEndian::read_u32(bytes)
            } else {
                LittleEndian::read_u32(bytes)
            };
            (v != 0).then_some(Value::UInt(u64::from(v)))
        }
        // float32
        0x08 => {
            let v = if big_endian {
                BigEndian::read_f32(bytes)
            } else {
                LittleEndian::read_f32(bytes)
            };
            v.is_finite().then_some(Value::Float(f64::from(v)))
        }
        // float64
        0x09 => {
            let v = if big_endian {
                BigEndian::read_f64(bytes)
            } else {
                LittleEndian::read_f64(bytes)
            };
            v.is_finite().then_some(Value::Float(v))
        }
        // sint64
        0x0E => {
            let v = if big_endian {
                BigEndian::read_i64(bytes)
            } else {
                LittleEndian::read_i64(bytes)
            };
            (v != 0x7FFF_FFFF_FFFF_FFFF).then_some(Value::SInt(v))
        }
        // uint64
        0x0F => {
            let v = if big_endian {
                BigEndian::read_u64(bytes)
            } else {
                LittleEndian::read_u64(bytes)
            };
            (v != u64::MAX).then_some(Value::UInt(v))
        }
        // uint64z
        0x10 => {
            let v = if big_endian {
                BigEndian::read_u64(bytes)
            } else {
                LittleEndian::read_u64(bytes)
            };
            (v != 0).then_some(Value::UInt(v))
        }
        // strings are not interpreted by the pipeline
        _ => None,
    }
}

// ============================================================================
// Sport / sub-sport tables
// ============================================================================

fn sport_to_activity_type(sport: u8) -> ActivityType {
    match sport {
        1 => ActivityType::Running,
        2 => ActivityType::Riding,
        5 => ActivityType::Swimming,
        11 => ActivityType::Walking,
        12 | 13 => ActivityType::Skiing,
        15 => ActivityType::Rowing,
        17 => ActivityType::Hiking,
        30 => ActivityType::InlineSkating,
        _ => ActivityType::Generic,
    }
}

fn sub_sport_name(sub_sport: u8) -> Option<String> {
    let name = match sub_sport {
        0 => return None, // generic carries no information
        1 => "TREADMILL",
        2 => "STREET",
        3 => "TRAIL",
        4 => "TRACK",
        5 => "SPIN",
        6 => "INDOOR_CYCLING",
        7 => "ROAD",
        8 => "MOUNTAIN",
        9 => "DOWNHILL",
        10 => "RECUMBENT",
        11 => "CYCLOCROSS",
        12 => "HAND_CYCLING",
        13 => "TRACK_CYCLING",
        14 => "INDOOR_ROWING",
        15 => "ELLIPTICAL",
        16 => "STAIR_CLIMBING",
        17 => "LAP_SWIMMING",
        18 => "OPEN_WATER",
        58 => "VIRTUAL_ACTIVITY",
        other => return Some(format!("SUB_SPORT_{other}")),
    };
    Some(name.to_string())
}

// ============================================================================
// Decoder
// ============================================================================

#[derive(Default)]
struct SessionData {
    sport: Option<u8>,
    sub_sport: Option<u8>,
    start_time: Option<u32>,
    total_elapsed_time: Option<f64>,
    total_timer_time: Option<f64>,
    total_distance: Option<f64>,
    total_calories: Option<f64>,
    total_ascent: Option<f64>,
    total_descent: Option<f64>,
    avg_speed: Option<f64>,
    max_speed: Option<f64>,
    avg_heart_rate: Option<f64>,
    max_heart_rate: Option<f64>,
    avg_cadence: Option<f64>,
    avg_power: Option<f64>,
    max_power: Option<f64>,
    avg_temperature: Option<f64>,
}

pub fn parse_fit(bytes: &[u8]) -> Result<ParsedActivity, ParseError> {
    if bytes.len() < 12 {
        return Err(ParseError::Truncated);
    }

    let header_size = bytes[0] as usize;
    if header_size < 12 || bytes.len() < header_size {
        return Err(ParseError::Fit(format!("invalid header size {header_size}")));
    }
    if &bytes[8..12] != b".FIT" {
        return Err(ParseError::Fit("missing .FIT magic".to_string()));
    }
    let data_size = LittleEndian::read_u32(&bytes[4..8]) as usize;

    // 14-byte headers carry their own CRC over the first 12 bytes; zero
    // means the writer skipped it.
    if header_size >= 14 {
        let header_crc = LittleEndian::read_u16(&bytes[12..14]);
        if header_crc != 0 && header_crc != crc16(&bytes[0..12]) {
            return Err(ParseError::Integrity);
        }
    }

    let data_end = header_size + data_size;
    if bytes.len() < data_end + 2 {
        return Err(ParseError::Truncated);
    }

    // The file CRC covers header and data.
    let file_crc = LittleEndian::read_u16(&bytes[data_end..data_end + 2]);
    if file_crc != crc16(&bytes[0..data_end]) {
        return Err(ParseError::Integrity);
    }

    let mut defs: HashMap<u8, MessageDef> = HashMap::new();
    let mut points: Vec<TrackPoint> = Vec::new();
    let mut sessions: Vec<SessionData> = Vec::new();
    let mut utc_offset_seconds: Option<i32> = None;
    let mut last_timestamp: Option<u32> = None;
    let mut first_record_ts: Option<u32> = None;
    let mut last_record_ts: Option<u32> = None;

    let mut pos = header_size;
    while pos < data_end {
        let header = bytes[pos];
        pos += 1;

        if header & 0x80 != 0 {
            // Compressed timestamp header: 2-bit local type, 5-bit offset
            // relative to the previous timestamp.
            let local = (header >> 5) & 0x03;
            let offset = u32::from(header & 0x1F);
            let def = defs
                .get(&local)
                .ok_or_else(|| ParseError::Fit(format!("data for undefined local type {local}")))?
                .clone();
            let base = last_timestamp
                .ok_or_else(|| ParseError::Fit("compressed timestamp before any timestamp".to_string()))?;
            let mut ts = (base & !0x1F) | offset;
            if ts < base {
                ts += 0x20;
            }
            last_timestamp = Some(ts);
            let fields = read_data_message(bytes, &mut pos, data_end, &def)?;
            handle_message(
                &def,
                &fields,
                Some(ts),
                &mut points,
                &mut sessions,
                &mut utc_offset_seconds,
                &mut first_record_ts,
                &mut last_record_ts,
            );
        } else if header & 0x40 != 0 {
            // Definition message.
            let has_dev_fields = header & 0x20 != 0;
            let local = header & 0x0F;
            let def = read_definition(bytes, &mut pos, data_end, has_dev_fields)?;
            defs.insert(local, def);
        } else {
            // Normal data message.
            let local = header & 0x0F;
            let def = defs
                .get(&local)
                .ok_or_else(|| ParseError::Fit(format!("data for undefined local type {local}")))?
                .clone();
            let fields = read_data_message(bytes, &mut pos, data_end, &def)?;
            if let Some(ts) = fields.get(&253).and_then(|v| v.as_u32()) {
                last_timestamp = Some(ts);
            }
            handle_message(
                &def,
                &fields,
                last_timestamp,
                &mut points,
                &mut sessions,
                &mut utc_offset_seconds,
                &mut first_record_ts,
                &mut last_record_ts,
            );
        }
    }

    build_activity(
        points,
        sessions,
        utc_offset_seconds,
        first_record_ts,
        last_record_ts,
    )
}

fn read_definition(
    bytes: &[u8],
    pos: &mut usize,
    end: usize,
    has_dev_fields: bool,
) -> Result<MessageDef, ParseError> {
    if *pos + 5 > end {
        return Err(ParseError::Truncated);
    }
    // reserved byte, architecture, global message number, field count
    let big_endian = bytes[*pos + 1] == 1;
    let global = if big_endian {
        BigEndian::read_u16(&bytes[*pos + 2..*pos + 4])
    } else {
        LittleEndian::read_u16(&bytes[*pos + 2..*pos + 4])
    };
    let num_fields = bytes[*pos + 4] as usize;
    *pos += 5;

    if *pos + num_fields * 3 > end {
        return Err(ParseError::Truncated);
    }
    let mut fields = Vec::with_capacity(num_fields);
    for _ in 0..num_fields {
        fields.push(FieldDef {
            field_num: bytes[*pos],
            size: bytes[*pos + 1],
            base_type: bytes[*pos + 2],
        });
        *pos += 3;
    }

    let mut dev_bytes = 0;
    if has_dev_fields {
        if *pos >= end {
            return Err(ParseError::Truncated);
        }
        let num_dev = bytes[*pos] as usize;
        *pos += 1;
        if *pos + num_dev * 3 > end {
            return Err(ParseError::Truncated);
        }
        for _ in 0..num_dev {
            dev_bytes += bytes[*pos + 1] as usize;
            *pos += 3;
        }
    }

    Ok(MessageDef {
        global,
        big_endian,
        fields,
        dev_bytes,
    })
}

fn read_data_message(
    bytes: &[u8],
    pos: &mut usize,
    end: usize,
    def: &MessageDef,
) -> Result<HashMap<u8, Value>, ParseError> {
    let mut fields = HashMap::new();
    for field in &def.fields {
        let size = field.size as usize;
        if *pos + size > end {
            return Err(ParseError::Truncated);
        }
        let scalar = base_type_size(field.base_type);
        // Arrays and strings: only the first element is interpreted.
        if size >= scalar {
            if let Some(value) =
                decode_value(&bytes[*pos..*pos + scalar], field.base_type, def.big_endian)
            {
                fields.insert(field.field_num, value);
            }
        }
        *pos += size;
    }
    if *pos + def.dev_bytes > end {
        return Err(ParseError::Truncated);
    }
    *pos += def.dev_bytes;
    Ok(fields)
}

#[allow(clippy::too_many_arguments)]
fn handle_message(
    def: &MessageDef,
    fields: &HashMap<u8, Value>,
    timestamp: Option<u32>,
    points: &mut Vec<TrackPoint>,
    sessions: &mut Vec<SessionData>,
    utc_offset_seconds: &mut Option<i32>,
    first_record_ts: &mut Option<u32>,
    last_record_ts: &mut Option<u32>,
) {
    match def.global {
        MSG_RECORD => {
            let ts = fields.get(&253).and_then(|v| v.as_u32()).or(timestamp);
            if let Some(ts) = ts {
                first_record_ts.get_or_insert(ts);
                *last_record_ts = Some(ts);
            }
            let lat = fields.get(&0).and_then(|v| v.as_i32()).map(semicircles_to_degrees);
            let lon = fields.get(&1).and_then(|v| v.as_i32()).map(semicircles_to_degrees);
            // enhanced fields win over their scaled 16-bit forms
            let ele = fields
                .get(&78)
                .map(|v| v.as_f64() / 5.0 - 500.0)
                .or_else(|| fields.get(&2).map(|v| v.as_f64() / 5.0 - 500.0));
            let speed = fields
                .get(&73)
                .map(|v| v.as_f64() / 1000.0)
                .or_else(|| fields.get(&6).map(|v| v.as_f64() / 1000.0));
            points.push(TrackPoint {
                time: ts.and_then(fit_timestamp_to_datetime),
                lat,
                lon,
                ele,
                hr: fields.get(&3).map(|v| v.as_f64()),
                cad: fields.get(&4).map(|v| v.as_f64()),
                power: fields.get(&7).map(|v| v.as_f64()),
                speed,
                temp: fields.get(&13).map(|v| v.as_f64()),
            });
        }
        MSG_SESSION => {
            sessions.push(SessionData {
                sport: fields.get(&5).and_then(|v| v.as_u32()).map(|v| v as u8),
                sub_sport: fields.get(&6).and_then(|v| v.as_u32()).map(|v| v as u8),
                start_time: fields.get(&2).and_then(|v| v.as_u32()),
                total_elapsed_time: fields.get(&7).map(|v| v.as_f64() / 1000.0),
                total_timer_time: fields.get(&8).map(|v| v.as_f64() / 1000.0),
                total_distance: fields.get(&9).map(|v| v.as_f64() / 100.0),
                total_calories: fields.get(&11).map(|v| v.as_f64()),
                avg_speed: fields.get(&14).map(|v| v.as_f64() / 1000.0),
                max_speed: fields.get(&15).map(|v| v.as_f64() / 1000.0),
                avg_heart_rate: fields.get(&16).map(|v| v.as_f64()),
                max_heart_rate: fields.get(&17).map(|v| v.as_f64()),
                avg_cadence: fields.get(&18).map(|v| v.as_f64()),
                avg_power: fields.get(&20).map(|v| v.as_f64()),
                max_power: fields.get(&21).map(|v| v.as_f64()),
                total_ascent: fields.get(&22).map(|v| v.as_f64()),
                total_descent: fields.get(&23).map(|v| v.as_f64()),
                avg_temperature: fields.get(&57).map(|v| v.as_f64()),
            });
        }
        MSG_ACTIVITY => {
            // local_timestamp - timestamp yields the device's UTC offset.
            if let (Some(ts), Some(local)) = (
                fields.get(&253).and_then(|v| v.as_i64()),
                fields.get(&5).and_then(|v| v.as_i64()),
            ) {
                *utc_offset_seconds = i32::try_from(local - ts).ok();
            }
        }
        // Laps and file id are validated by presence only.
        MSG_LAP | MSG_FILE_ID => {}
        _ => {}
    }
}

fn build_activity(
    points: Vec<TrackPoint>,
    sessions: Vec<SessionData>,
    utc_offset_seconds: Option<i32>,
    first_record_ts: Option<u32>,
    last_record_ts: Option<u32>,
) -> Result<ParsedActivity, ParseError> {
    let session = sessions.into_iter().next().unwrap_or_default();

    let activity_type = session
        .sport
        .map(sport_to_activity_type)
        .unwrap_or(ActivityType::Generic);
    let sub_sport = session.sub_sport.and_then(sub_sport_name);

    let started_at = session
        .start_time
        .or(first_record_ts)
        .and_then(fit_timestamp_to_datetime);
    let duration_seconds = session
        .total_timer_time
        .or(session.total_elapsed_time)
        .map(|s| s.round() as i64);
    let ended_at = last_record_ts
        .and_then(fit_timestamp_to_datetime)
        .or_else(|| {
            started_at
                .zip(duration_seconds)
                .map(|(start, secs)| start + time::Duration::seconds(secs))
        });

    let has_gps = points.iter().any(TrackPoint::has_position);
    let indoor = match &sub_sport {
        Some(name) if INDOOR_SUB_SPORTS.contains(&name.as_str()) => {
            Some(IndoorDetectionMethod::FitSubsport)
        }
        _ if !has_gps => Some(IndoorDetectionMethod::HeuristicNoGps),
        _ => None,
    };

    let mut min_elevation: Option<f64> = None;
    let mut max_elevation: Option<f64> = None;
    for point in &points {
        if let Some(ele) = point.ele {
            min_elevation = Some(min_elevation.map_or(ele, |m| m.min(ele)));
            max_elevation = Some(max_elevation.map_or(ele, |m| m.max(ele)));
        }
    }

    let metrics = AggregateMetrics {
        total_distance: session.total_distance,
        total_duration_seconds: duration_seconds.or_else(|| {
            started_at
                .zip(ended_at)
                .map(|(start, end)| (end - start).whole_seconds())
        }),
        elevation_gain: session.total_ascent,
        elevation_loss: session.total_descent,
        average_heart_rate: session.avg_heart_rate,
        max_heart_rate: session.max_heart_rate,
        average_cadence: session.avg_cadence,
        average_power: session.avg_power,
        max_power: session.max_power,
        average_speed: session.avg_speed,
        max_speed: session.max_speed,
        calories: session.total_calories,
        min_elevation,
        max_elevation,
        average_temperature: session.avg_temperature,
    };

    Ok(ParsedActivity {
        activity_type,
        sub_sport,
        started_at,
        ended_at,
        utc_offset_seconds,
        points,
        metrics,
        indoor,
    })
}


#[cfg(test)]
mod tests {
    use super::emit::*;
    use super::*;

    /// POSIX 1_764_254_949 == 2025-11-27T14:49:09Z (scenario E1).
    const E1_POSIX: i64 = 1_764_254_949;
    const E1_FIT: u32 = (E1_POSIX - FIT_EPOCH_OFFSET) as u32;

    fn degrees_to_semicircles(deg: f64) -> i32 {
        (deg / SEMICIRCLES_TO_DEGREES) as i32
    }

    fn walking_file(points: usize) -> Vec<u8> {
        let mut b = FitBuilder::new();
        b.define(0, 18, SESSION_FIELDS);
        // sport 11 = walking, sub_sport 0 = generic
        b.data(0, &session_payload(E1_FIT, 11, 0, 2934, 3005.0));
        b.define(1, 20, RECORD_FIELDS);
        for i in 0..points {
            let lat = degrees_to_semicircles(49.99 + i as f64 * 0.0001);
            let lon = degrees_to_semicircles(8.26 + i as f64 * 0.0001);
            b.data(
                1,
                &record_payload(E1_FIT + (i as u32) * 240, lat, lon, 120.0, 110),
            );
        }
        b.build()
    }

    #[test]
    fn test_epoch_offset_constant() {
        assert_eq!(FIT_EPOCH_OFFSET, 631_065_600);
        let fit_epoch = fit_timestamp_to_datetime(0).unwrap();
        assert_eq!(fit_epoch.unix_timestamp(), FIT_EPOCH_OFFSET);
    }

    #[test]
    fn test_timestamp_roundtrip() {
        // parse(emit(t)) == t for a sweep of timestamps
        for ts in [0u32, 1, 0x10000000, E1_FIT, u32::MAX - 1] {
            let mut b = FitBuilder::new();
            b.define(0, 20, RECORD_FIELDS);
            b.data(0, &record_payload(ts, 0, 0, 0.0, 100));
            let parsed = parse_fit(&b.build()).unwrap();
            let point_time = parsed.points[0].time.unwrap();
            assert_eq!(
                point_time.unix_timestamp(),
                i64::from(ts) + FIT_EPOCH_OFFSET
            );
        }
    }

    #[test]
    fn test_walking_session_e1() {
        let parsed = parse_fit(&walking_file(12)).unwrap();
        assert_eq!(parsed.activity_type, ActivityType::Walking);
        assert_eq!(parsed.points.len(), 12);
        assert_eq!(parsed.metrics.total_distance, Some(3005.0));
        assert_eq!(parsed.metrics.total_duration_seconds, Some(2934));
        assert_eq!(parsed.started_at.unwrap().unix_timestamp(), E1_POSIX);
        assert!(parsed.indoor.is_none());

        let first = &parsed.points[0];
        assert!((first.lat.unwrap() - 49.99).abs() < 1e-5);
        assert!((first.lon.unwrap() - 8.26).abs() < 1e-5);
        assert!((first.ele.unwrap() - 120.0).abs() < 0.3);
        assert_eq!(first.hr, Some(110.0));
    }

    #[test]
    fn test_semicircle_conversion() {
        assert!((semicircles_to_degrees(i32::MAX) - 180.0).abs() < 1e-6);
        assert!((semicircles_to_degrees(0)).abs() < 1e-9);
        assert!((semicircles_to_degrees(i32::MIN) + 180.0).abs() < 1e-6);
    }

    #[test]
    fn test_indoor_cycling_subsport() {
        let mut b = FitBuilder::new();
        b.define(0, 18, SESSION_FIELDS);
        // sport 2 = cycling, sub_sport 6 = indoor_cycling
        b.data(0, &session_payload(E1_FIT, 2, 6, 1800, 15000.0));
        let parsed = parse_fit(&b.build()).unwrap();
        assert_eq!(parsed.activity_type, ActivityType::Riding);
        assert_eq!(parsed.sub_sport.as_deref(), Some("INDOOR_CYCLING"));
        assert_eq!(parsed.indoor, Some(IndoorDetectionMethod::FitSubsport));
    }

    #[test]
    fn test_no_gps_heuristic() {
        // Records without position fields: treadmill-style data
        let mut b = FitBuilder::new();
        b.define(0, 18, SESSION_FIELDS);
        b.data(0, &session_payload(E1_FIT, 1, 0, 600, 2000.0));
        b.define(1, 20, &[(253, 4, 0x86), (3, 1, 0x02)]);
        let mut payload = Vec::new();
        use byteorder::WriteBytesExt;
        payload.write_u32::<byteorder::LittleEndian>(E1_FIT).unwrap();
        payload.write_u8(150).unwrap();
        b.data(1, &payload);

        let parsed = parse_fit(&b.build()).unwrap();
        assert!(!parsed.has_gps());
        assert_eq!(parsed.indoor, Some(IndoorDetectionMethod::HeuristicNoGps));
    }

    #[test]
    fn test_invalid_lat_is_dropped() {
        let mut b = FitBuilder::new();
        b.define(0, 20, RECORD_FIELDS);
        // 0x7FFFFFFF is the sint32 invalid sentinel
        let mut payload = Vec::new();
        use byteorder::WriteBytesExt;
        payload.write_u32::<byteorder::LittleEndian>(E1_FIT).unwrap();
        payload
            .write_i32::<byteorder::LittleEndian>(0x7FFF_FFFF)
            .unwrap();
        payload
            .write_i32::<byteorder::LittleEndian>(0x7FFF_FFFF)
            .unwrap();
        payload.write_u16::<byteorder::LittleEndian>(2600).unwrap();
        payload.write_u8(0xFF).unwrap(); // invalid heart rate
        b.data(0, &payload);

        let parsed = parse_fit(&b.build()).unwrap();
        assert_eq!(parsed.points.len(), 1);
        assert!(parsed.points[0].lat.is_none());
        assert!(parsed.points[0].hr.is_none());
    }

    #[test]
    fn test_compressed_timestamp_records() {
        // a normal record seeds the timestamp, compressed ones follow with
        // 5-bit offsets
        let mut b = FitBuilder::new();
        b.define(1, 20, RECORD_FIELDS);
        let base_ts = E1_FIT & !0x1F; // aligned so offsets are unambiguous
        b.data(1, &record_payload(base_ts, 1000, 1000, 10.0, 100));

        // compressed payload: same layout minus the timestamp field
        b.define(1, 20, &RECORD_FIELDS[1..]);
        let mut payload = Vec::new();
        use byteorder::WriteBytesExt;
        payload.write_i32::<byteorder::LittleEndian>(2000).unwrap();
        payload.write_i32::<byteorder::LittleEndian>(2000).unwrap();
        payload.write_u16::<byteorder::LittleEndian>(2600).unwrap();
        payload.write_u8(101).unwrap();
        b.data_compressed(1, 5, &payload);
        b.data_compressed(1, 9, &payload);

        let parsed = parse_fit(&b.build()).unwrap();
        assert_eq!(parsed.points.len(), 3);
        let t0 = parsed.points[0].time.unwrap().unix_timestamp();
        let t1 = parsed.points[1].time.unwrap().unix_timestamp();
        let t2 = parsed.points[2].time.unwrap().unix_timestamp();
        assert_eq!(t1 - t0, 5);
        assert_eq!(t2 - t0, 9);
    }

    #[test]
    fn test_compressed_timestamp_rollover() {
        let mut b = FitBuilder::new();
        b.define(1, 20, RECORD_FIELDS);
        // base near the top of the 5-bit window: offset smaller than the
        // base's low bits means the next 32-second block
        let base_ts = (E1_FIT & !0x1F) | 30;
        b.data(1, &record_payload(base_ts, 1000, 1000, 10.0, 100));

        b.define(1, 20, &RECORD_FIELDS[1..]);
        let mut payload = Vec::new();
        use byteorder::WriteBytesExt;
        payload.write_i32::<byteorder::LittleEndian>(2000).unwrap();
        payload.write_i32::<byteorder::LittleEndian>(2000).unwrap();
        payload.write_u16::<byteorder::LittleEndian>(2600).unwrap();
        payload.write_u8(101).unwrap();
        b.data_compressed(1, 2, &payload);

        let parsed = parse_fit(&b.build()).unwrap();
        let t0 = parsed.points[0].time.unwrap().unix_timestamp();
        let t1 = parsed.points[1].time.unwrap().unix_timestamp();
        // 30 -> 32 + 2: four seconds forward, not 28 back
        assert_eq!(t1 - t0, 4);
    }

    #[test]
    fn test_big_endian_records() {
        use byteorder::{BigEndian, WriteBytesExt};
        let mut b = FitBuilder::new();
        b.define_big_endian(0, 20, RECORD_FIELDS);
        let mut payload = Vec::new();
        payload.write_u32::<BigEndian>(E1_FIT).unwrap();
        payload
            .write_i32::<BigEndian>(degrees_to_semicircles(49.99))
            .unwrap();
        payload
            .write_i32::<BigEndian>(degrees_to_semicircles(8.26))
            .unwrap();
        payload.write_u16::<BigEndian>(3100).unwrap(); // 120 m
        payload.write_u8(142).unwrap();
        b.data(0, &payload);

        let parsed = parse_fit(&b.build()).unwrap();
        let point = &parsed.points[0];
        assert_eq!(point.time.unwrap().unix_timestamp(), E1_POSIX);
        assert!((point.lat.unwrap() - 49.99).abs() < 1e-5);
        assert!((point.lon.unwrap() - 8.26).abs() < 1e-5);
        assert!((point.ele.unwrap() - 120.0).abs() < 0.3);
        assert_eq!(point.hr, Some(142.0));
    }

    #[test]
    fn test_session_metrics_are_extracted() {
        use byteorder::{LittleEndian, WriteBytesExt};
        let fields: &[(u8, u8, u8)] = &[
            (2, 4, 0x86),  // start_time
            (5, 1, 0x00),  // sport
            (8, 4, 0x86),  // total_timer_time (ms)
            (9, 4, 0x86),  // total_distance (cm)
            (11, 2, 0x84), // total_calories
            (14, 2, 0x84), // avg_speed (mm/s)
            (15, 2, 0x84), // max_speed (mm/s)
            (16, 1, 0x02), // avg_heart_rate
            (17, 1, 0x02), // max_heart_rate
            (22, 2, 0x84), // total_ascent
            (23, 2, 0x84), // total_descent
            (57, 1, 0x01), // avg_temperature
        ];
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(E1_FIT).unwrap();
        payload.write_u8(1).unwrap(); // running
        payload.write_u32::<LittleEndian>(2_934_000).unwrap();
        payload.write_u32::<LittleEndian>(300_500).unwrap();
        payload.write_u16::<LittleEndian>(210).unwrap();
        payload.write_u16::<LittleEndian>(1_024).unwrap();
        payload.write_u16::<LittleEndian>(2_048).unwrap();
        payload.write_u8(132).unwrap();
        payload.write_u8(168).unwrap();
        payload.write_u16::<LittleEndian>(48).unwrap();
        payload.write_u16::<LittleEndian>(51).unwrap();
        payload.write_u8(9).unwrap();

        let mut b = FitBuilder::new();
        b.define(0, 18, fields);
        b.data(0, &payload);
        let parsed = parse_fit(&b.build()).unwrap();

        assert_eq!(parsed.activity_type, ActivityType::Running);
        let m = &parsed.metrics;
        assert_eq!(m.total_duration_seconds, Some(2934));
        assert_eq!(m.total_distance, Some(3005.0));
        assert_eq!(m.calories, Some(210.0));
        assert_eq!(m.average_speed, Some(1.024));
        assert_eq!(m.max_speed, Some(2.048));
        assert_eq!(m.average_heart_rate, Some(132.0));
        assert_eq!(m.max_heart_rate, Some(168.0));
        assert_eq!(m.elevation_gain, Some(48.0));
        assert_eq!(m.elevation_loss, Some(51.0));
        assert_eq!(m.average_temperature, Some(9.0));
    }

    #[test]
    fn test_developer_fields_are_skipped() {
        // a definition with one developer field: 3-byte dev defs after the
        // normal ones, dev data appended to each record
        let mut b = FitBuilder::new();
        {
            use byteorder::{LittleEndian, WriteBytesExt};
            use std::io::Write;
            let data = b.raw_data_mut();
            data.write_u8(0x40 | 0x20).unwrap(); // definition + dev fields, local 0
            data.write_u8(0).unwrap();
            data.write_u8(0).unwrap(); // little endian
            data.write_u16::<LittleEndian>(20).unwrap();
            data.write_u8(2).unwrap();
            data.write_all(&[253, 4, 0x86]).unwrap(); // timestamp
            data.write_all(&[3, 1, 0x02]).unwrap(); // heart_rate
            data.write_u8(1).unwrap(); // one developer field
            data.write_all(&[0, 2, 0]).unwrap(); // num 0, 2 bytes, dev idx 0
        }
        {
            use byteorder::{LittleEndian, WriteBytesExt};
            use std::io::Write;
            let data = b.raw_data_mut();
            data.write_u8(0).unwrap(); // data, local 0
            data.write_u32::<LittleEndian>(E1_FIT).unwrap();
            data.write_u8(150).unwrap();
            data.write_all(&[0xAB, 0xCD]).unwrap(); // developer payload
        }

        let parsed = parse_fit(&b.build()).unwrap();
        assert_eq!(parsed.points.len(), 1);
        assert_eq!(parsed.points[0].hr, Some(150.0));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut file = walking_file(2);
        file[8] = b'X';
        assert!(matches!(parse_fit(&file), Err(ParseError::Fit(_))));
    }

    #[test]
    fn test_rejects_truncated_file() {
        let file = walking_file(4);
        let cut = &file[..file.len() - 10];
        assert!(matches!(parse_fit(cut), Err(ParseError::Truncated)));
    }

    #[test]
    fn test_rejects_corrupted_crc() {
        let mut b = FitBuilder::new();
        b.define(0, 20, RECORD_FIELDS);
        b.data(0, &record_payload(E1_FIT, 1000, 1000, 10.0, 100));
        let file = b.build_with(|out| {
            // flip a data byte after the CRC was computed
            let mid = out.len() / 2;
            out[mid] ^= 0xFF;
        });
        assert!(matches!(parse_fit(&file), Err(ParseError::Integrity)));
    }

    #[test]
    fn test_rejects_short_input() {
        assert!(matches!(parse_fit(&[0u8; 5]), Err(ParseError::Truncated)));
    }
}
