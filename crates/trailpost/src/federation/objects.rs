//! ActivityPub document shapes.
//!
//! Typed builders for everything this server puts on the wire (actor
//! documents, Create/Note with the `workoutData` extension, Accept, Follow,
//! Undo, Delete, WebFinger, OrderedCollections) and the small pure helpers
//! the inbox needs to read audience fields.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::AppConfig;
use crate::models::{Activity, ActivityMetrics, User, Visibility};

/// The ActivityStreams public-audience collection.
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// JSON-LD context for every outbound document.
pub fn default_context() -> serde_json::Value {
    serde_json::json!([
        "https://www.w3.org/ns/activitystreams",
        "https://w3id.org/security/v1",
    ])
}

// ============================================================================
// WebFinger / NodeInfo
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebFingerResponse {
    pub subject: String,
    pub aliases: Vec<String>,
    pub links: Vec<WebFingerLink>,
}

impl WebFingerResponse {
    pub fn for_user(config: &AppConfig, username: &str) -> Self {
        let actor_uri = config.actor_uri(username);
        Self {
            subject: format!("acct:{username}@{}", config.domain),
            aliases: vec![actor_uri.clone()],
            links: vec![WebFingerLink {
                rel: "self".to_string(),
                media_type: Some("application/activity+json".to_string()),
                href: Some(actor_uri),
            }],
        }
    }

    /// The actor URI from a fetched WebFinger document.
    pub fn self_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| {
                l.rel == "self"
                    && l.media_type
                        .as_deref()
                        .is_some_and(|t| t.contains("activity+json"))
            })
            .or_else(|| self.links.iter().find(|l| l.rel == "self"))
            .and_then(|l| l.href.as_deref())
    }
}

// ============================================================================
// Actor document
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyDocument {
    pub id: String,
    pub owner: String,
    pub public_key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorDocument {
    #[serde(rename = "@context")]
    pub context: serde_json::Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub preferred_username: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub inbox: String,
    pub outbox: String,
    pub followers: String,
    pub following: String,
    pub public_key: PublicKeyDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<ImageDocument>,
}

impl ActorDocument {
    pub fn for_user(config: &AppConfig, user: &User) -> Self {
        let actor_uri = config.actor_uri(&user.username);
        Self {
            context: default_context(),
            id: actor_uri.clone(),
            kind: "Person".to_string(),
            preferred_username: user.username.clone(),
            name: user.display_name.clone(),
            summary: None,
            inbox: format!("{actor_uri}/inbox"),
            outbox: format!("{actor_uri}/outbox"),
            followers: format!("{actor_uri}/followers"),
            following: format!("{actor_uri}/following"),
            public_key: PublicKeyDocument {
                id: config.key_id(&user.username),
                owner: actor_uri,
                public_key_pem: user.public_key_pem.clone(),
            },
            icon: user.avatar_url.as_ref().map(|url| ImageDocument {
                kind: "Image".to_string(),
                url: url.clone(),
            }),
        }
    }
}

// ============================================================================
// Workout notes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub url: String,
}

/// The workout extension carried inside the Note, consumed by peer
/// instances for timeline rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_pace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation_gain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_heart_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub attributed_to: String,
    pub content: String,
    pub published: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout_data: Option<WorkoutData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivity {
    #[serde(rename = "@context")]
    pub context: serde_json::Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    pub published: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub object: NoteObject,
}

/// Public URL of an activity's simplified-track GeoJSON, when it has one.
pub fn track_geojson_url(config: &AppConfig, activity: &Activity) -> Option<String> {
    activity
        .simplified_track
        .as_ref()
        .and_then(|v| v.as_array())
        .filter(|coords| !coords.is_empty())
        .map(|_| format!("{}/track.geojson", config.activity_uri(activity.id)))
}

/// `mm:ss /km` pace from meters and seconds.
pub fn format_pace(distance_m: f64, duration_s: i64) -> Option<String> {
    if distance_m <= 0.0 || duration_s <= 0 {
        return None;
    }
    let seconds_per_km = duration_s as f64 / (distance_m / 1000.0);
    let minutes = (seconds_per_km / 60.0).floor() as i64;
    let seconds = (seconds_per_km % 60.0).round() as i64;
    Some(format!("{minutes}:{seconds:02} /km"))
}

fn audience_for(config: &AppConfig, username: &str, visibility: Visibility) -> (Vec<String>, Vec<String>) {
    let followers = format!("{}/followers", config.actor_uri(username));
    match visibility {
        Visibility::Public => (vec![PUBLIC_AUDIENCE.to_string()], vec![followers]),
        // FOLLOWERS and PRIVATE never address the public collection; private
        // activities are not published at all, callers guard that.
        _ => (vec![followers], Vec::new()),
    }
}

/// Build the Create(Note) announcing a local activity.
pub fn build_workout_create(
    config: &AppConfig,
    user: &User,
    activity: &Activity,
    metrics: Option<&ActivityMetrics>,
    map_image_url: Option<String>,
    track_geojson_url: Option<String>,
) -> CreateActivity {
    let actor_uri = config.actor_uri(&user.username);
    let activity_uri = config.activity_uri(activity.id);
    let published = activity
        .created_at
        .format(&Rfc3339)
        .unwrap_or_default();
    let (to, cc) = audience_for(config, &user.username, activity.visibility);

    let mut attachment = Vec::new();
    if let Some(url) = map_image_url {
        attachment.push(Attachment {
            kind: "Image".to_string(),
            media_type: Some("image/png".to_string()),
            url,
        });
    }
    if let Some(url) = track_geojson_url {
        attachment.push(Attachment {
            kind: "Document".to_string(),
            media_type: Some("application/geo+json".to_string()),
            url,
        });
    }

    let content = match &activity.description {
        Some(description) => format!("<p>{}</p><p>{}</p>", activity.title, description),
        None => format!("<p>{}</p>", activity.title),
    };

    let note = NoteObject {
        id: activity_uri.clone(),
        kind: "Note".to_string(),
        attributed_to: actor_uri.clone(),
        content,
        published: published.clone(),
        to: to.clone(),
        cc: cc.clone(),
        attachment,
        workout_data: Some(WorkoutData {
            distance: Some(activity.total_distance),
            duration: Some(activity.total_duration_seconds),
            activity_type: Some(activity.activity_type.as_str().to_string()),
            average_pace: format_pace(activity.total_distance, activity.total_duration_seconds),
            elevation_gain: activity.elevation_gain,
            average_heart_rate: metrics.and_then(|m| m.average_heart_rate),
        }),
    };

    CreateActivity {
        context: default_context(),
        id: format!("{activity_uri}/create"),
        kind: "Create".to_string(),
        actor: actor_uri,
        published,
        to,
        cc,
        object: note,
    }
}

// ============================================================================
// Plain activities (Accept / Follow / Undo / Delete)
// ============================================================================

pub fn build_accept(
    config: &AppConfig,
    acceptor_username: &str,
    follow_activity: &serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "@context": default_context(),
        "id": format!("{}/activities/{}", config.base_url, uuid::Uuid::new_v4()),
        "type": "Accept",
        "actor": config.actor_uri(acceptor_username),
        "object": follow_activity,
    })
}

pub fn build_follow(
    config: &AppConfig,
    follower_username: &str,
    target_actor_uri: &str,
) -> serde_json::Value {
    serde_json::json!({
        "@context": default_context(),
        "id": format!("{}/activities/{}", config.base_url, uuid::Uuid::new_v4()),
        "type": "Follow",
        "actor": config.actor_uri(follower_username),
        "object": target_actor_uri,
    })
}

pub fn build_undo(
    config: &AppConfig,
    actor_username: &str,
    inner: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "@context": default_context(),
        "id": format!("{}/activities/{}", config.base_url, uuid::Uuid::new_v4()),
        "type": "Undo",
        "actor": config.actor_uri(actor_username),
        "object": inner,
    })
}

/// Delete for a single published object (e.g. a removed activity).
pub fn build_object_delete(
    config: &AppConfig,
    username: &str,
    object_uri: &str,
) -> serde_json::Value {
    serde_json::json!({
        "@context": default_context(),
        "id": format!("{}/activities/{}", config.base_url, uuid::Uuid::new_v4()),
        "type": "Delete",
        "actor": config.actor_uri(username),
        "to": [PUBLIC_AUDIENCE],
        "object": object_uri,
    })
}

/// The actor-level Delete emitted before an account is removed.
pub fn build_actor_delete(config: &AppConfig, username: &str) -> serde_json::Value {
    let actor_uri = config.actor_uri(username);
    serde_json::json!({
        "@context": default_context(),
        "id": format!("{}/activities/{}", config.base_url, uuid::Uuid::new_v4()),
        "type": "Delete",
        "actor": actor_uri,
        "to": [PUBLIC_AUDIENCE],
        "object": actor_uri,
    })
}

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    #[serde(rename = "@context")]
    pub context: serde_json::Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub total_items: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    #[serde(rename = "@context")]
    pub context: serde_json::Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub part_of: String,
    pub ordered_items: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

pub const COLLECTION_PAGE_SIZE: i64 = 20;

impl OrderedCollection {
    pub fn new(id: String, total_items: i64) -> Self {
        Self {
            context: default_context(),
            first: (total_items > 0).then(|| format!("{id}?page=1")),
            id,
            kind: "OrderedCollection".to_string(),
            total_items,
        }
    }
}

impl OrderedCollectionPage {
    pub fn new(
        collection_id: String,
        page: i64,
        items: Vec<serde_json::Value>,
        has_more: bool,
    ) -> Self {
        Self {
            context: default_context(),
            id: format!("{collection_id}?page={page}"),
            kind: "OrderedCollectionPage".to_string(),
            part_of: collection_id.clone(),
            next: has_more.then(|| format!("{collection_id}?page={}", page + 1)),
            prev: (page > 1).then(|| format!("{collection_id}?page={}", page - 1)),
            ordered_items: items,
        }
    }
}

// ============================================================================
// Audience helpers (inbound)
// ============================================================================

/// Derive stored visibility from an inbound object's `to`/`cc`: presence of
/// the public collection means PUBLIC, anything else FOLLOWERS.
pub fn visibility_from_audience(to: &[String], cc: &[String]) -> Visibility {
    let is_public = to
        .iter()
        .chain(cc.iter())
        .any(|a| a == PUBLIC_AUDIENCE || a == "as:Public" || a == "Public");
    if is_public {
        Visibility::Public
    } else {
        Visibility::Followers
    }
}

/// Audience fields come as string-or-array on the wire.
pub fn audience_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn parse_published(value: Option<&serde_json::Value>) -> Option<OffsetDateTime> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}
