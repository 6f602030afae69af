//! Activity file decoders for the FIT and GPX formats.
//!
//! Both decoders produce the same [`ParsedActivity`] record so everything
//! downstream (track post-processing, persistence, analytics) is
//! format-agnostic.

pub mod fit;
pub mod gpx;

use serde::Serialize;
use time::OffsetDateTime;

use crate::models::{ActivityType, IndoorDetectionMethod, TrackPoint};

/// Upload formats accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Fit,
    Gpx,
    Unknown,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Fit => "FIT",
            FileFormat::Gpx => "GPX",
            FileFormat::Unknown => "UNKNOWN",
        }
    }

    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".fit") {
            FileFormat::Fit
        } else if lower.ends_with(".gpx") {
            FileFormat::Gpx
        } else {
            FileFormat::Unknown
        }
    }

    /// Sniff the format from the first bytes: FIT files spell ".FIT" at
    /// header bytes 8-11, GPX is XML with a `<gpx` root.
    pub fn detect_from_bytes(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[8..12] == b".FIT" {
            return FileFormat::Fit;
        }
        let head = &bytes[..bytes.len().min(512)];
        if let Ok(text) = std::str::from_utf8(head) {
            if text.contains("<gpx") {
                return FileFormat::Gpx;
            }
        }
        FileFormat::Unknown
    }
}

/// Decoder-level failure.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to parse FIT file: {0}")]
    Fit(String),
    #[error("Failed to parse GPX file: {0}")]
    Gpx(String),
    #[error("File is truncated")]
    Truncated,
    #[error("Integrity check failed")]
    Integrity,
    #[error("Unsupported file format")]
    UnsupportedFormat,
}

impl From<ParseError> for crate::errors::AppError {
    fn from(err: ParseError) -> Self {
        crate::errors::AppError::Parse(err.to_string())
    }
}

/// Aggregate metrics as the decoder saw them. FIT Sessions carry these on
/// the wire; the GPX decoder computes them from the point stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateMetrics {
    pub total_distance: Option<f64>,
    pub total_duration_seconds: Option<i64>,
    pub elevation_gain: Option<f64>,
    pub elevation_loss: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub average_cadence: Option<f64>,
    pub average_power: Option<f64>,
    pub max_power: Option<f64>,
    pub average_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub calories: Option<f64>,
    pub min_elevation: Option<f64>,
    pub max_elevation: Option<f64>,
    pub average_temperature: Option<f64>,
}

/// Normalized decode result, shared by both formats.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedActivity {
    pub activity_type: ActivityType,
    pub sub_sport: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    /// UTC offset of the recording device, when the file carries one
    /// (FIT Activity message local timestamp).
    pub utc_offset_seconds: Option<i32>,
    pub points: Vec<TrackPoint>,
    pub metrics: AggregateMetrics,
    pub indoor: Option<IndoorDetectionMethod>,
}

impl ParsedActivity {
    pub fn is_indoor(&self) -> bool {
        self.indoor.is_some()
    }

    pub fn has_gps(&self) -> bool {
        self.points.iter().any(TrackPoint::has_position)
    }
}

/// Parse an uploaded file, sniffing the format when the caller's hint is
/// `Unknown`.
pub fn parse_activity_file(
    format: FileFormat,
    bytes: &[u8],
) -> Result<ParsedActivity, ParseError> {
    let actual = if format == FileFormat::Unknown {
        FileFormat::detect_from_bytes(bytes)
    } else {
        format
    };

    match actual {
        FileFormat::Fit => fit::parse_fit(bytes),
        FileFormat::Gpx => gpx::parse_gpx(bytes),
        FileFormat::Unknown => Err(ParseError::UnsupportedFormat),
    }
}
