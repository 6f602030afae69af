//! Inbound activity processing.
//!
//! One entry point, [`InboxProcessor::process`]: the HTTP layer has already
//! verified the signature and answered `202 Accepted`. Handlers dispatch on
//! the activity `type`; every one of them is idempotent because peers
//! retry deliveries. Unknown types are logged and ignored.

use std::sync::LazyLock;

use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::actors::ActorResolver;
use super::objects::{
    WorkoutData, audience_list, build_accept, parse_published, visibility_from_audience,
};
use super::outbox::OutboxDispatcher;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::{FollowStatus, NotificationType, RemoteActivity, User};
use crate::store::Database;

#[derive(Clone)]
pub struct InboxProcessor {
    db: Database,
    resolver: ActorResolver,
    outbox: OutboxDispatcher,
    config: AppConfig,
}

impl InboxProcessor {
    pub fn new(
        db: Database,
        resolver: ActorResolver,
        outbox: OutboxDispatcher,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            resolver,
            outbox,
            config,
        }
    }

    /// Dispatch one verified inbound activity addressed to `recipient`.
    pub async fn process(
        &self,
        recipient: &User,
        activity: serde_json::Value,
    ) -> Result<(), AppError> {
        let activity_type = activity["type"].as_str().unwrap_or_default().to_string();
        let actor = activity["actor"]
            .as_str()
            .ok_or_else(|| AppError::Validation("activity has no actor".to_string()))?
            .to_string();

        match activity_type.as_str() {
            "Follow" => self.handle_follow(recipient, &actor, &activity).await,
            "Undo" => self.handle_undo(&actor, &activity).await,
            "Accept" => self.handle_accept(&actor, &activity).await,
            "Create" => self.handle_create(recipient, &actor, &activity).await,
            "Like" => self.handle_like(&actor, &activity).await,
            "Delete" => self.handle_delete(&actor, &activity).await,
            other => {
                // forward compatibility: peers send types we do not speak
                info!(activity_type = other, actor, "ignoring unsupported activity type");
                Ok(())
            }
        }
    }

    async fn handle_follow(
        &self,
        recipient: &User,
        actor: &str,
        activity: &serde_json::Value,
    ) -> Result<(), AppError> {
        let recipient_uri = self.config.actor_uri(&recipient.username);
        let object = object_id(&activity["object"]);
        if object != Some(recipient_uri.as_str()) {
            return Err(AppError::Validation(format!(
                "Follow object {object:?} does not match recipient {recipient_uri}"
            )));
        }

        let sender = self.resolver.resolve(actor).await?;
        let follow_id = activity["id"].as_str();

        // Auto-accept policy: the edge is created ACCEPTED. A replayed
        // delivery finds the row and does nothing more.
        let created = self
            .db
            .create_remote_follow(actor, &recipient_uri, follow_id, FollowStatus::Accepted)
            .await?;
        if !created {
            debug!(actor, "duplicate Follow delivery ignored");
            return Ok(());
        }

        self.db
            .create_notification(
                recipient.id,
                NotificationType::Followed,
                sender.display_name.as_deref().unwrap_or(&sender.preferred_username),
                Some(actor),
                None,
            )
            .await?;

        // The Accept goes to the follower's own inbox, signed by the
        // recipient.
        let accept = build_accept(&self.config, &recipient.username, activity);
        self.outbox
            .deliver_to_inbox(recipient, &sender.inbox_url, &accept)
            .await?;
        Ok(())
    }

    async fn handle_undo(&self, actor: &str, activity: &serde_json::Value) -> Result<(), AppError> {
        let inner = &activity["object"];
        match inner["type"].as_str() {
            Some("Follow") => {
                let removed = if let Some(follow_id) = inner["id"].as_str() {
                    self.db.delete_follow_by_activity_pub_id(follow_id).await?
                } else if let Some(target) = object_id(&inner["object"]) {
                    self.db.delete_remote_follow(actor, target).await?
                } else {
                    false
                };
                if !removed {
                    debug!(actor, "Undo(Follow) matched no follow");
                }
                Ok(())
            }
            Some("Like") => {
                if let Some(activity_id) = object_id(&inner["object"])
                    .and_then(|uri| local_activity_id(&self.config.base_url, uri))
                {
                    self.db.remove_like_remote(activity_id, actor).await?;
                }
                Ok(())
            }
            other => {
                info!(actor, inner_type = ?other, "ignoring Undo of unsupported type");
                Ok(())
            }
        }
    }

    async fn handle_accept(
        &self,
        actor: &str,
        activity: &serde_json::Value,
    ) -> Result<(), AppError> {
        // The object is our earlier Follow (inline or by id).
        let Some(follow_id) = object_id(&activity["object"]) else {
            return Err(AppError::Validation("Accept without object id".to_string()));
        };
        let Some(follow) = self.db.accept_follow_by_activity_pub_id(follow_id).await? else {
            debug!(actor, follow_id, "Accept matched no pending follow");
            return Ok(());
        };

        if let Some(follower) = follow.follower_user_id {
            let display_name = match self.db.get_remote_actor(actor).await? {
                Some(remote) => remote
                    .display_name
                    .unwrap_or(remote.preferred_username),
                None => actor.to_string(),
            };
            self.db
                .create_notification(
                    follower,
                    NotificationType::FollowAccepted,
                    &display_name,
                    Some(actor),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_create(
        &self,
        recipient: &User,
        actor: &str,
        activity: &serde_json::Value,
    ) -> Result<(), AppError> {
        let note = &activity["object"];
        if note["type"].as_str() != Some("Note") {
            info!(actor, "ignoring Create of non-Note object");
            return Ok(());
        }
        let Some(note_id) = note["id"].as_str() else {
            return Err(AppError::Validation("Note without id".to_string()));
        };

        if let Some(reply_target) = note["inReplyTo"].as_str() {
            // A reply to one of our activities becomes a comment.
            let Some(activity_id) = local_activity_id(&self.config.base_url, reply_target) else {
                debug!(actor, reply_target, "reply to unknown object ignored");
                return Ok(());
            };
            let Some(local) = self.db.get_activity(activity_id).await? else {
                debug!(actor, %activity_id, "reply to missing activity ignored");
                return Ok(());
            };

            let sender = self.resolver.resolve(actor).await?;
            let content = strip_html(note["content"].as_str().unwrap_or_default());
            let inserted = self
                .db
                .add_comment(activity_id, None, Some(actor), &content, Some(note_id))
                .await?;
            if inserted.is_some() {
                self.db
                    .create_notification(
                        local.user_id,
                        NotificationType::Commented,
                        sender.display_name.as_deref().unwrap_or(&sender.preferred_username),
                        Some(actor),
                        Some(activity_id),
                    )
                    .await?;
            }
            return Ok(());
        }

        // A top-level Note is a remote workout post; only accepted when the
        // recipient actually follows the author.
        if !self.db.is_following_uri(recipient.id, actor).await? {
            debug!(actor, "Create from unfollowed actor ignored");
            return Ok(());
        }
        // ensure the actor row exists for the foreign key
        self.resolver.resolve(actor).await?;

        let remote = build_remote_activity(actor, note_id, note);
        self.db.upsert_remote_activity(&remote).await?;
        Ok(())
    }

    async fn handle_like(&self, actor: &str, activity: &serde_json::Value) -> Result<(), AppError> {
        let Some(activity_id) = object_id(&activity["object"])
            .and_then(|uri| local_activity_id(&self.config.base_url, uri))
        else {
            debug!(actor, "Like of non-local object ignored");
            return Ok(());
        };
        let Some(local) = self.db.get_activity(activity_id).await? else {
            debug!(actor, %activity_id, "Like of missing activity ignored");
            return Ok(());
        };

        let sender = self.resolver.resolve(actor).await?;
        let new = self.db.add_like_remote(activity_id, actor).await?;
        if new {
            self.db
                .create_notification(
                    local.user_id,
                    NotificationType::Liked,
                    sender.display_name.as_deref().unwrap_or(&sender.preferred_username),
                    Some(actor),
                    Some(activity_id),
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_delete(
        &self,
        actor: &str,
        activity: &serde_json::Value,
    ) -> Result<(), AppError> {
        let Some(object) = object_id(&activity["object"]) else {
            return Ok(());
        };
        if object == actor {
            // actor deletion removes the cached actor and all its activities
            let removed = self.db.delete_remote_actor(actor).await?;
            if removed {
                info!(actor, "removed deleted remote actor");
            }
        } else {
            // only the owner may delete an object
            self.db.delete_remote_activity_of(object, actor).await?;
        }
        Ok(())
    }
}

/// The `object` field may be an id string or an embedded object.
pub fn object_id(value: &serde_json::Value) -> Option<&str> {
    value.as_str().or_else(|| value["id"].as_str())
}

/// Map `https://{host}/activities/{uuid}` under our origin to the local id.
pub fn local_activity_id(base_url: &str, uri: &str) -> Option<Uuid> {
    uri.strip_prefix(base_url)?
        .strip_prefix("/activities/")?
        .parse()
        .ok()
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

/// Strip markup from remote HTML content; comments are stored as plain
/// text.
pub fn strip_html(content: &str) -> String {
    let without_tags = TAG_RE.replace_all(content, " ");
    let decoded = without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Denormalize a remote workout Note into its timeline row.
pub fn build_remote_activity(
    actor_uri: &str,
    note_id: &str,
    note: &serde_json::Value,
) -> RemoteActivity {
    let to = audience_list(note.get("to"));
    let cc = audience_list(note.get("cc"));
    let published = parse_published(note.get("published"));

    let workout: WorkoutData = note
        .get("workoutData")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let mut map_image_url = None;
    let mut track_geojson_url = None;
    if let Some(attachments) = note["attachment"].as_array() {
        for attachment in attachments {
            let url = attachment["url"].as_str().map(String::from);
            match attachment["type"].as_str() {
                Some("Image") if map_image_url.is_none() => map_image_url = url,
                Some("Document")
                    if attachment["mediaType"].as_str() == Some("application/geo+json") =>
                {
                    track_geojson_url = url
                }
                _ => {}
            }
        }
    }

    RemoteActivity {
        activity_uri: note_id.to_string(),
        actor_uri: actor_uri.to_string(),
        content: note["content"].as_str().map(strip_html),
        published_at: published,
        started_at: published,
        visibility: visibility_from_audience(&to, &cc),
        activity_type: workout.activity_type,
        distance: workout.distance,
        duration_seconds: workout.duration,
        average_pace: workout.average_pace,
        elevation_gain: workout.elevation_gain,
        average_heart_rate: workout.average_heart_rate,
        map_image_url,
        track_geojson_url,
        received_at: OffsetDateTime::now_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Visibility;

    #[test]
    fn test_object_id_string_or_embedded() {
        let as_string = serde_json::json!("https://remote/users/alice");
        assert_eq!(object_id(&as_string), Some("https://remote/users/alice"));

        let embedded = serde_json::json!({"id": "https://remote/activities/1", "type": "Follow"});
        assert_eq!(object_id(&embedded), Some("https://remote/activities/1"));

        assert_eq!(object_id(&serde_json::json!(42)), None);
    }

    #[test]
    fn test_local_activity_id() {
        let base = "https://trailpost.example";
        let id = Uuid::new_v4();
        let uri = format!("{base}/activities/{id}");
        assert_eq!(local_activity_id(base, &uri), Some(id));

        assert_eq!(
            local_activity_id(base, "https://other.example/activities/abc"),
            None
        );
        assert_eq!(local_activity_id(base, &format!("{base}/users/bob")), None);
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<p>Nice <b>run</b>!</p>"),
            "Nice run !"
        );
        assert_eq!(strip_html("a &amp; b &lt;3"), "a & b <3");
        assert_eq!(strip_html("plain"), "plain");
        assert_eq!(strip_html("<script>alert(1)</script>hey"), "alert(1) hey");
    }

    #[test]
    fn test_build_remote_activity_from_workout_note() {
        let note = serde_json::json!({
            "id": "https://remote/activities/xyz",
            "type": "Note",
            "attributedTo": "https://remote/users/alice",
            "content": "<p>Morning run</p>",
            "published": "2025-11-27T07:00:00Z",
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
            "cc": ["https://remote/users/alice/followers"],
            "attachment": [
                {"type": "Image", "url": "https://remote/media/map.png"},
                {"type": "Document", "mediaType": "application/geo+json",
                 "url": "https://remote/media/track.geojson"}
            ],
            "workoutData": {
                "distance": 8012.5,
                "duration": 2400,
                "activityType": "RUNNING",
                "averagePace": "4:59 /km",
                "elevationGain": 87.0,
                "averageHeartRate": 152.0
            }
        });

        let remote =
            build_remote_activity("https://remote/users/alice", "https://remote/activities/xyz", &note);
        assert_eq!(remote.activity_uri, "https://remote/activities/xyz");
        assert_eq!(remote.visibility, Visibility::Public);
        assert_eq!(remote.distance, Some(8012.5));
        assert_eq!(remote.duration_seconds, Some(2400));
        assert_eq!(remote.activity_type.as_deref(), Some("RUNNING"));
        assert_eq!(remote.average_pace.as_deref(), Some("4:59 /km"));
        assert_eq!(remote.map_image_url.as_deref(), Some("https://remote/media/map.png"));
        assert_eq!(
            remote.track_geojson_url.as_deref(),
            Some("https://remote/media/track.geojson")
        );
        assert_eq!(remote.content.as_deref(), Some("Morning run"));
        assert!(remote.published_at.is_some());
    }

    #[test]
    fn test_build_remote_activity_without_public_audience() {
        let note = serde_json::json!({
            "id": "https://remote/activities/private-ish",
            "type": "Note",
            "content": "followers only",
            "to": ["https://remote/users/alice/followers"],
        });
        let remote = build_remote_activity(
            "https://remote/users/alice",
            "https://remote/activities/private-ish",
            &note,
        );
        assert_eq!(remote.visibility, Visibility::Followers);
        assert!(remote.distance.is_none());
    }
}
