use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================================================
// Users
// ============================================================================

#[derive(Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub public_key_pem: String,
    #[serde(skip_serializing)]
    pub private_key_pem: String,
    pub enabled: bool,
    pub locked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// Key material must never reach logs.
impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("enabled", &self.enabled)
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

/// Public projection of a user for lists and notifications.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

// ============================================================================
// Activities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Running,
    Riding,
    Hiking,
    Walking,
    Swimming,
    Rowing,
    Skiing,
    InlineSkating,
    Generic,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Running => "RUNNING",
            ActivityType::Riding => "RIDING",
            ActivityType::Hiking => "HIKING",
            ActivityType::Walking => "WALKING",
            ActivityType::Swimming => "SWIMMING",
            ActivityType::Rowing => "ROWING",
            ActivityType::Skiing => "SKIING",
            ActivityType::InlineSkating => "INLINE_SKATING",
            ActivityType::Generic => "GENERIC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Visibility {
    Public,
    Followers,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Followers => "FOLLOWERS",
            Visibility::Private => "PRIVATE",
        }
    }
}

/// How an activity was recognized as indoor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndoorDetectionMethod {
    /// The FIT Session carried an indoor sub-sport.
    FitSubsport,
    /// No record in the file carried GPS coordinates.
    HeuristicNoGps,
    /// Every point lies within 50 m of the start.
    HeuristicStationary,
}

/// An activity row without its heavy columns (raw file, full track JSON).
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub activity_type: ActivityType,
    pub title: String,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub timezone: String,
    pub visibility: Visibility,
    pub total_distance: f64,
    pub total_duration_seconds: i64,
    pub elevation_gain: Option<f64>,
    pub elevation_loss: Option<f64>,
    pub indoor: bool,
    pub indoor_detection_method: Option<IndoorDetectionMethod>,
    pub sub_sport: Option<String>,
    pub raw_file_format: Option<String>,
    /// WGS84 line string as `[[lon, lat], ...]`.
    pub simplified_track: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ActivityMetrics {
    pub activity_id: Uuid,
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

/// One sample of the high-resolution track, stored as a JSON array element
/// on the activity row. Chronological order is the array order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackPoint {
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ele: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cad: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
}

impl TrackPoint {
    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

// ============================================================================
// Follow graph
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum FollowStatus {
    Pending,
    Accepted,
}

/// A follow edge. Exactly one of `follower_user_id` / `follower_remote_uri`
/// is set; the schema enforces this.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Follow {
    pub id: Uuid,
    pub follower_user_id: Option<Uuid>,
    pub follower_remote_uri: Option<String>,
    pub following_actor_uri: String,
    pub status: FollowStatus,
    pub activity_pub_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// ============================================================================
// Federation cache
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RemoteActor {
    pub actor_uri: String,
    pub preferred_username: String,
    pub inbox_url: String,
    pub shared_inbox_url: Option<String>,
    pub public_key_id: String,
    pub public_key_pem: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub summary: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_fetched_at: OffsetDateTime,
}

impl RemoteActor {
    /// Delivery target: shared inbox when the instance offers one.
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox_url.as_deref().unwrap_or(&self.inbox_url)
    }
}

/// Denormalized copy of a remote workout Note for timeline display.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct RemoteActivity {
    pub activity_uri: String,
    pub actor_uri: String,
    pub content: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub visibility: Visibility,
    pub activity_type: Option<String>,
    pub distance: Option<f64>,
    pub duration_seconds: Option<i64>,
    pub average_pace: Option<String>,
    pub elevation_gain: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub map_image_url: Option<String>,
    pub track_geojson_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

// ============================================================================
// Likes / comments / notifications
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Comment {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub user_id: Option<Uuid>,
    pub remote_actor_uri: Option<String>,
    pub content: String,
    pub activity_pub_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Liked,
    Commented,
    Followed,
    FollowAccepted,
}

/// Actor display data is captured at creation time, not joined live, so a
/// notification stays readable after the actor is gone.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub actor_display_name: String,
    pub actor_uri: Option<String>,
    pub activity_id: Option<Uuid>,
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// ============================================================================
// Heatmap / privacy zones
// ============================================================================

/// One grid cell in a heatmap read, already aggregated to the requested
/// grid size.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct HeatmapCell {
    pub cell_lon: f64,
    pub cell_lat: f64,
    pub point_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct PrivacyZone {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub center_lon: f64,
    pub center_lat: f64,
    pub radius_m: f64,
    pub active: bool,
}

// ============================================================================
// Batch import
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum ImportJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum ImportFileStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportErrorType {
    ValidationError,
    ParsingError,
    UnsupportedFormat,
    IoError,
    DatabaseError,
    UnknownError,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct BatchImportJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: ImportJobStatus,
    pub total_files: i32,
    pub success_count: i32,
    pub failed_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct BatchImportFileResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub file_name: String,
    pub position: i32,
    pub status: ImportFileStatus,
    pub error_type: Option<ImportErrorType>,
    pub error_message: Option<String>,
    pub activity_id: Option<Uuid>,
}

// ============================================================================
// Analytics rollups
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    FastestOneKm,
    FastestFiveKm,
    FastestTenKm,
    FastestHalfMarathon,
    FastestMarathon,
    LongestDistance,
    LongestDuration,
    HighestElevationGain,
    MaxSpeed,
    BestAveragePace,
}

impl RecordType {
    /// True when a smaller value is better (times, paces).
    pub fn lower_is_better(&self) -> bool {
        matches!(
            self,
            RecordType::FastestOneKm
                | RecordType::FastestFiveKm
                | RecordType::FastestTenKm
                | RecordType::FastestHalfMarathon
                | RecordType::FastestMarathon
                | RecordType::BestAveragePace
        )
    }
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct PersonalRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub activity_type: ActivityType,
    pub record_type: RecordType,
    pub value: f64,
    pub activity_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub achieved_at: OffsetDateTime,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AchievementType {
    FirstActivity,
    TenActivities,
    FiftyActivities,
    HundredActivities,
    CumulativeHundredKm,
    CumulativeThousandKm,
    WeekStreak,
    MonthStreak,
    AllRounder,
    EarlyBird,
    NightOwl,
    MarathonDistance,
    BigClimb,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Achievement {
    pub id: Uuid,
    pub user_id: Uuid,
    pub achievement_type: AchievementType,
    pub activity_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub earned_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum FormStatus {
    Fresh,
    Optimal,
    Fatigued,
}

impl FormStatus {
    /// FRESH above +5, FATIGUED below -5, OPTIMAL in between.
    pub fn from_tsb(tsb: f64) -> Self {
        if tsb > 5.0 {
            FormStatus::Fresh
        } else if tsb < -5.0 {
            FormStatus::Fatigued
        } else {
            FormStatus::Optimal
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct TrainingLoad {
    pub user_id: Uuid,
    pub day: time::Date,
    pub tss: f64,
    pub atl: f64,
    pub ctl: f64,
    pub tsb: f64,
    pub form_status: FormStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum PeriodType {
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ActivitySummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period_type: PeriodType,
    pub period_start: time::Date,
    pub period_end: time::Date,
    pub activity_count: i32,
    pub total_duration_seconds: i64,
    pub total_distance: f64,
    pub total_elevation_gain: f64,
    pub max_speed: Option<f64>,
    pub average_speed: Option<f64>,
    pub by_activity_type: serde_json::Value,
    pub personal_record_count: i32,
    pub achievement_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_status_thresholds() {
        assert_eq!(FormStatus::from_tsb(5.1), FormStatus::Fresh);
        assert_eq!(FormStatus::from_tsb(5.0), FormStatus::Optimal);
        assert_eq!(FormStatus::from_tsb(0.0), FormStatus::Optimal);
        assert_eq!(FormStatus::from_tsb(-5.0), FormStatus::Optimal);
        assert_eq!(FormStatus::from_tsb(-5.1), FormStatus::Fatigued);
    }

    #[test]
    fn test_track_point_json_shape() {
        let pt = TrackPoint {
            time: None,
            lat: Some(49.99),
            lon: Some(8.26),
            ele: Some(120.0),
            hr: None,
            cad: None,
            power: None,
            speed: None,
            temp: None,
        };
        let json = serde_json::to_value(&pt).unwrap();
        assert_eq!(json["lat"], 49.99);
        // absent samples are omitted, not serialized as null
        assert!(json.get("hr").is_none());
    }

    #[test]
    fn test_wire_enum_spellings() {
        assert_eq!(
            serde_json::to_value(IndoorDetectionMethod::FitSubsport).unwrap(),
            "FIT_SUBSPORT"
        );
        assert_eq!(
            serde_json::to_value(IndoorDetectionMethod::HeuristicNoGps).unwrap(),
            "HEURISTIC_NO_GPS"
        );
        assert_eq!(serde_json::to_value(Visibility::Followers).unwrap(), "FOLLOWERS");
        assert_eq!(
            serde_json::to_value(NotificationType::FollowAccepted).unwrap(),
            "FOLLOW_ACCEPTED"
        );
        assert_eq!(
            serde_json::to_value(ImportErrorType::UnsupportedFormat).unwrap(),
            "UNSUPPORTED_FORMAT"
        );
    }

    #[test]
    fn test_delivery_inbox_prefers_shared() {
        let mut actor = RemoteActor {
            actor_uri: "https://remote/users/alice".into(),
            preferred_username: "alice".into(),
            inbox_url: "https://remote/users/alice/inbox".into(),
            shared_inbox_url: Some("https://remote/inbox".into()),
            public_key_id: "https://remote/users/alice#main-key".into(),
            public_key_pem: String::new(),
            display_name: None,
            avatar_url: None,
            summary: None,
            last_fetched_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert_eq!(actor.delivery_inbox(), "https://remote/inbox");
        actor.shared_inbox_url = None;
        assert_eq!(actor.delivery_inbox(), "https://remote/users/alice/inbox");
    }
}
