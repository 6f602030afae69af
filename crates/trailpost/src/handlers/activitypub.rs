//! ActivityPub wire endpoints: WebFinger, NodeInfo, actor documents, the
//! signed inbox, the public collections and the Note view of activities.
//!
//! Inbox deliveries answer `202 Accepted` (never `200`): malformed JSON is
//! `400`, a failed signature `401`, and processing that exceeds its budget
//! continues detached after the response.

use std::time::Duration;

use axum::{
    Extension, Json,
    extract::{OriginalUri, Path, Query},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::OptionalAuthUser;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::federation::actors::ActorResolver;
use crate::federation::inbox::InboxProcessor;
use crate::federation::objects::{
    ActorDocument, COLLECTION_PAGE_SIZE, OrderedCollection, OrderedCollectionPage,
    WebFingerResponse, build_workout_create, track_geojson_url,
};
use crate::models::Visibility;
use crate::signatures::{parse_signature_header, verify_request};
use crate::store::Database;

pub const ACTIVITY_JSON: &str = "application/activity+json";

/// Processing budget for one inbound delivery; past it the peer already has
/// its 202 and the handler finishes in the background.
const INBOX_BUDGET_SECONDS: u64 = 30;

fn activity_json_response<T: serde::Serialize>(body: &T) -> Response {
    (
        [(header::CONTENT_TYPE, ACTIVITY_JSON)],
        serde_json::to_string(body).unwrap_or_default(),
    )
        .into_response()
}

fn wants_activity_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| {
            accept.contains("activity+json") || accept.contains("ld+json")
        })
}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WebFingerQuery {
    pub resource: String,
}

/// `GET /.well-known/webfinger?resource=acct:user@host`
pub async fn webfinger(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Json<WebFingerResponse>, AppError> {
    let resource = query.resource.strip_prefix("acct:").unwrap_or(&query.resource);
    let (username, host) = resource
        .split_once('@')
        .ok_or_else(|| AppError::Validation("resource is not an acct: handle".to_string()))?;
    if host != config.domain {
        return Err(AppError::NotFound);
    }

    let user = db
        .get_user_by_username(username)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(WebFingerResponse::for_user(&config, &user.username)))
}

/// `GET /.well-known/nodeinfo` discovery document.
pub async fn nodeinfo(Extension(config): Extension<AppConfig>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "links": [{
            "rel": "http://nodeinfo.diaspora.software/ns/schema/2.0",
            "href": format!("{}/nodeinfo/2.0", config.base_url),
        }]
    }))
}

/// `GET /nodeinfo/2.0`
pub async fn nodeinfo_document(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
) -> Result<Json<serde_json::Value>, AppError> {
    let users = db.count_users().await?;
    Ok(Json(serde_json::json!({
        "version": "2.0",
        "software": { "name": "trailpost", "version": env!("CARGO_PKG_VERSION") },
        "protocols": ["activitypub"],
        "services": { "inbound": [], "outbound": [] },
        "openRegistrations": config.registration_enabled,
        "usage": { "users": { "total": users } },
        "metadata": {},
    })))
}

// ============================================================================
// Actor
// ============================================================================

/// `GET /users/{username}` as application/activity+json.
pub async fn actor_document(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let user = db
        .get_user_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;
    let document = ActorDocument::for_user(&config, &user);
    Ok(activity_json_response(&document))
}

// ============================================================================
// Inbox
// ============================================================================

/// `POST /users/{username}/inbox`
pub async fn inbox_post(
    Extension(db): Extension<Database>,
    Extension(resolver): Extension<ActorResolver>,
    Extension(processor): Extension<InboxProcessor>,
    Path(username): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let user = db
        .get_user_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;

    // Signature first: nothing is parsed from an unverified body.
    let signature_value = headers
        .get("signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::SignatureInvalid("missing Signature header".to_string()))?;
    let parsed = parse_signature_header(signature_value)?;

    let sender = resolver
        .resolve(parsed.actor_uri())
        .await
        .map_err(|e| match e {
            AppError::RemoteUnreachable(msg) | AppError::MalformedActor(msg) => {
                AppError::KeyUnavailable(msg)
            }
            other => other,
        })?;

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    verify_request(
        &parsed,
        &sender.public_key_pem,
        "POST",
        &path_and_query,
        &headers,
        &body,
        OffsetDateTime::now_utc(),
    )?;

    let activity: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed activity JSON: {e}")))?;

    // Deferred processing: the peer gets its 202 within the budget, the
    // handler keeps running if it needs longer.
    let handle = tokio::spawn(async move { processor.process(&user, activity).await });
    match tokio::time::timeout(Duration::from_secs(INBOX_BUDGET_SECONDS), handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(username, "inbox processing failed: {e}"),
        Ok(Err(e)) => warn!(username, "inbox task panicked: {e}"),
        Err(_) => debug!(username, "inbox processing continues past response"),
    }

    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CollectionQuery {
    pub page: Option<i64>,
}

fn collection_response(
    collection_id: String,
    total: i64,
    page: Option<i64>,
    items: Vec<serde_json::Value>,
) -> Response {
    match page {
        None => activity_json_response(&OrderedCollection::new(collection_id, total)),
        Some(page) => {
            let has_more = page * COLLECTION_PAGE_SIZE < total;
            activity_json_response(&OrderedCollectionPage::new(
                collection_id,
                page,
                items,
                has_more,
            ))
        }
    }
}

/// `GET /users/{username}/outbox`
pub async fn outbox_collection(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    Path(username): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Result<Response, AppError> {
    let user = db
        .get_user_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;
    let total = db.public_activity_count(user.id).await?;
    let collection_id = format!("{}/outbox", config.actor_uri(&username));

    let items = match query.page {
        None => Vec::new(),
        Some(page) => {
            let offset = (page.max(1) - 1) * COLLECTION_PAGE_SIZE;
            let ids = db
                .outbox_activity_ids(user.id, COLLECTION_PAGE_SIZE, offset)
                .await?;
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(activity) = db.get_activity(id).await? {
                    let metrics = db.get_activity_metrics(id).await?;
                    let geojson = track_geojson_url(&config, &activity);
                    let create = build_workout_create(
                        &config,
                        &user,
                        &activity,
                        metrics.as_ref(),
                        None,
                        geojson,
                    );
                    items.push(serde_json::to_value(create).unwrap_or_default());
                }
            }
            items
        }
    };
    Ok(collection_response(collection_id, total, query.page, items))
}

/// `GET /users/{username}/followers`
pub async fn followers_collection(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    Path(username): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Result<Response, AppError> {
    db.get_user_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;
    let actor_uri = config.actor_uri(&username);
    let total = db.follower_count(&actor_uri).await?;
    let collection_id = format!("{actor_uri}/followers");

    let items = match query.page {
        None => Vec::new(),
        Some(page) => {
            let offset = (page.max(1) - 1) * COLLECTION_PAGE_SIZE;
            db.follower_uris(&actor_uri, COLLECTION_PAGE_SIZE, offset)
                .await?
                .into_iter()
                .map(serde_json::Value::String)
                .collect()
        }
    };
    Ok(collection_response(collection_id, total, query.page, items))
}

/// `GET /users/{username}/following`
pub async fn following_collection(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    Path(username): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Result<Response, AppError> {
    let user = db
        .get_user_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;
    let total = db.following_count(user.id).await?;
    let collection_id = format!("{}/following", config.actor_uri(&username));

    let items = match query.page {
        None => Vec::new(),
        Some(page) => {
            let offset = (page.max(1) - 1) * COLLECTION_PAGE_SIZE;
            db.following_uris(user.id, COLLECTION_PAGE_SIZE, offset)
                .await?
                .into_iter()
                .map(serde_json::Value::String)
                .collect()
        }
    };
    Ok(collection_response(collection_id, total, query.page, items))
}

// ============================================================================
// Activity object
// ============================================================================

/// `GET /activities/{id}`: the Note document for federation peers, or the
/// JSON API view for browsers, negotiated on the Accept header.
pub async fn public_activity_note(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if !wants_activity_json(&headers) {
        let viewer = claims.map(|c| c.sub);
        let activity = db.get_visible_activity(id, viewer).await?;
        return Ok(Json(activity).into_response());
    }

    // only PUBLIC activities exist for anonymous federation fetches
    let activity = db.get_activity(id).await?.ok_or(AppError::NotFound)?;
    if activity.visibility != Visibility::Public {
        return Err(AppError::NotFound);
    }
    let user = db
        .get_user(activity.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let metrics = db.get_activity_metrics(id).await?;
    let geojson = track_geojson_url(&config, &activity);
    let create = build_workout_create(&config, &user, &activity, metrics.as_ref(), None, geojson);
    Ok(activity_json_response(&create.object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_accept_negotiation() {
        let mut headers = HeaderMap::new();
        assert!(!wants_activity_json(&headers));

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(!wants_activity_json(&headers));

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/activity+json"),
        );
        assert!(wants_activity_json(&headers));

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"",
            ),
        );
        assert!(wants_activity_json(&headers));
    }
}
