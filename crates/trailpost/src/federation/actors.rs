//! Remote actor resolution and caching.
//!
//! Actors are cached in `remote_actors` and refreshed when older than the
//! TTL. Resolution starts from an actor URI, or from an `acct:` handle via
//! WebFinger discovery.

use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::objects::WebFingerResponse;
use crate::errors::AppError;
use crate::models::RemoteActor;
use crate::store::Database;

/// Cached actors older than this are refetched.
pub const ACTOR_TTL: Duration = Duration::hours(1);

#[derive(Clone)]
pub struct ActorResolver {
    db: Database,
    http: reqwest::Client,
}

impl ActorResolver {
    pub fn new(db: Database, http: reqwest::Client) -> Self {
        Self { db, http }
    }

    /// Resolve an actor URI, via cache when fresh.
    pub async fn resolve(&self, actor_uri: &str) -> Result<RemoteActor, AppError> {
        if let Some(cached) = self.db.get_remote_actor(actor_uri).await? {
            if OffsetDateTime::now_utc() - cached.last_fetched_at < ACTOR_TTL {
                return Ok(cached);
            }
        }
        self.fetch_and_cache(actor_uri).await
    }

    /// Resolve a `user@host` / `acct:user@host` handle through WebFinger.
    pub async fn resolve_handle(&self, handle: &str) -> Result<RemoteActor, AppError> {
        let handle = handle
            .strip_prefix("acct:")
            .unwrap_or(handle)
            .trim_start_matches('@');
        let (user, host) = handle
            .split_once('@')
            .ok_or_else(|| AppError::Validation(format!("not a user@host handle: {handle}")))?;

        let url = format!(
            "https://{host}/.well-known/webfinger?resource=acct:{user}@{host}"
        );
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/jrd+json, application/json")
            .send()
            .await
            .map_err(|e| AppError::RemoteUnreachable(format!("webfinger {host}: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::RemoteUnreachable(format!(
                "webfinger {host} returned {}",
                response.status()
            )));
        }
        let webfinger: WebFingerResponse = response
            .json()
            .await
            .map_err(|e| AppError::MalformedActor(format!("webfinger body: {e}")))?;

        let actor_uri = webfinger
            .self_link()
            .ok_or_else(|| AppError::MalformedActor("webfinger has no self link".to_string()))?
            .to_string();
        self.resolve(&actor_uri).await
    }

    async fn fetch_and_cache(&self, actor_uri: &str) -> Result<RemoteActor, AppError> {
        debug!(actor_uri, "fetching remote actor");
        let response = self
            .http
            .get(actor_uri)
            .header("Accept", "application/activity+json")
            .send()
            .await
            .map_err(|e| AppError::RemoteUnreachable(format!("{actor_uri}: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::RemoteUnreachable(format!(
                "{actor_uri} returned {}",
                response.status()
            )));
        }
        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::MalformedActor(format!("{actor_uri}: {e}")))?;

        let actor = parse_actor_document(actor_uri, &document)?;
        self.db.upsert_remote_actor(&actor).await?;
        Ok(actor)
    }
}

/// Extract the fields the cache stores. Missing inbox or public key makes
/// the document unusable for federation.
pub fn parse_actor_document(
    actor_uri: &str,
    document: &serde_json::Value,
) -> Result<RemoteActor, AppError> {
    let preferred_username = document["preferredUsername"]
        .as_str()
        .ok_or_else(|| AppError::MalformedActor("missing preferredUsername".to_string()))?
        .to_string();
    let inbox_url = document["inbox"]
        .as_str()
        .ok_or_else(|| AppError::MalformedActor("missing inbox".to_string()))?
        .to_string();
    let public_key_pem = document["publicKey"]["publicKeyPem"]
        .as_str()
        .ok_or_else(|| AppError::MalformedActor("missing publicKey.publicKeyPem".to_string()))?
        .to_string();
    let public_key_id = document["publicKey"]["id"]
        .as_str()
        .ok_or_else(|| AppError::MalformedActor("missing publicKey.id".to_string()))?
        .to_string();

    Ok(RemoteActor {
        actor_uri: actor_uri.to_string(),
        preferred_username,
        inbox_url,
        shared_inbox_url: document["endpoints"]["sharedInbox"]
            .as_str()
            .map(String::from),
        public_key_id,
        public_key_pem,
        display_name: document["name"].as_str().map(String::from),
        avatar_url: document["icon"]["url"].as_str().map(String::from),
        summary: document["summary"].as_str().map(String::from),
        last_fetched_at: OffsetDateTime::now_utc(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor_json() -> serde_json::Value {
        serde_json::json!({
            "@context": ["https://www.w3.org/ns/activitystreams"],
            "id": "https://remote.example/users/alice",
            "type": "Person",
            "preferredUsername": "alice",
            "name": "Alice",
            "inbox": "https://remote.example/users/alice/inbox",
            "endpoints": { "sharedInbox": "https://remote.example/inbox" },
            "publicKey": {
                "id": "https://remote.example/users/alice#main-key",
                "owner": "https://remote.example/users/alice",
                "publicKeyPem": "-----BEGIN PUBLIC KEY-----\nAAA\n-----END PUBLIC KEY-----\n"
            },
            "icon": { "type": "Image", "url": "https://remote.example/avatar.png" },
            "summary": "runs a lot"
        })
    }

    #[test]
    fn test_parse_full_actor() {
        let actor =
            parse_actor_document("https://remote.example/users/alice", &actor_json()).unwrap();
        assert_eq!(actor.preferred_username, "alice");
        assert_eq!(actor.inbox_url, "https://remote.example/users/alice/inbox");
        assert_eq!(
            actor.shared_inbox_url.as_deref(),
            Some("https://remote.example/inbox")
        );
        assert_eq!(
            actor.public_key_id,
            "https://remote.example/users/alice#main-key"
        );
        assert_eq!(actor.display_name.as_deref(), Some("Alice"));
        assert_eq!(
            actor.avatar_url.as_deref(),
            Some("https://remote.example/avatar.png")
        );
    }

    #[test]
    fn test_parse_actor_without_optional_fields() {
        let mut json = actor_json();
        json.as_object_mut().unwrap().remove("endpoints");
        json.as_object_mut().unwrap().remove("icon");
        json.as_object_mut().unwrap().remove("name");
        let actor = parse_actor_document("https://remote.example/users/alice", &json).unwrap();
        assert!(actor.shared_inbox_url.is_none());
        assert!(actor.display_name.is_none());
    }

    #[test]
    fn test_parse_rejects_missing_key() {
        let mut json = actor_json();
        json.as_object_mut().unwrap().remove("publicKey");
        let err = parse_actor_document("https://remote.example/users/alice", &json).unwrap_err();
        assert!(matches!(err, AppError::MalformedActor(_)));
    }

    #[test]
    fn test_parse_rejects_missing_inbox() {
        let mut json = actor_json();
        json.as_object_mut().unwrap().remove("inbox");
        let err = parse_actor_document("https://remote.example/users/alice", &json).unwrap_err();
        assert!(matches!(err, AppError::MalformedActor(_)));
    }
}
