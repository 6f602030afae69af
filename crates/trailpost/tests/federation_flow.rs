//! Integration tests for the federation and ingestion write paths.
//!
//! These verify the cross-table invariants: visibility-based access,
//! heatmap exclusion of indoor activities and rebuild idempotence, and
//! inbox idempotence for replayed Follow deliveries.
//!
//! To run them you need a PostgreSQL database with the migrations applied
//! and DATABASE_URL set; without it every test skips. Tests create and
//! clean up their own rows using unique ids, so a development database is
//! safe.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{PgPool, postgres::PgPoolOptions};
use time::OffsetDateTime;
use uuid::Uuid;

use trailpost::config::AppConfig;
use trailpost::decoders::FileFormat;
use trailpost::federation::actors::ActorResolver;
use trailpost::federation::inbox::InboxProcessor;
use trailpost::federation::outbox::{DeliveryTransport, OutboxDispatcher};
use trailpost::ingest::{UploadRequest, ingest_activity};
use trailpost::keys::generate_keypair;
use trailpost::models::{RemoteActor, User, Visibility};
use trailpost::pipeline::{PostProcessor, heatmap_increment, heatmap_rebuild};
use trailpost::signatures::SignedHeaders;
use trailpost::store::Database;
use trailpost::weather::WeatherService;

const BASE_URL: &str = "https://local.test";

async fn get_test_pool() -> Option<PgPool> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: DATABASE_URL not set");
            return None;
        }
    };
    match PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            eprintln!("Skipping test: failed to connect to database: {e}");
            None
        }
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        domain: "local.test".to_string(),
        base_url: BASE_URL.to_string(),
        port: 0,
        database_url: String::new(),
        jwt_secret: "test".to_string(),
        jwt_expiration_ms: 60_000,
        weather_enabled: false,
        weather_api_key: None,
        osm_tiles_enabled: false,
        registration_enabled: true,
        default_timezone: "UTC".to_string(),
    }
}

async fn create_test_user(db: &Database, prefix: &str) -> User {
    let keypair = generate_keypair().expect("keygen");
    let suffix = Uuid::new_v4().simple().to_string();
    let user = User {
        id: Uuid::new_v4(),
        username: format!("{prefix}{}", &suffix[..10]),
        email: format!("{prefix}-{suffix}@example.com"),
        password_hash: "x".to_string(),
        display_name: prefix.to_string(),
        avatar_url: None,
        public_key_pem: keypair.public_key_pem,
        private_key_pem: keypair.private_key_pem,
        enabled: true,
        locked: false,
        created_at: OffsetDateTime::now_utc(),
    };
    db.create_user(&user).await.expect("create user");
    user
}

async fn cleanup_user(pool: &PgPool, user_id: Uuid) {
    let _ = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await;
}

async fn cleanup_remote_actor(pool: &PgPool, actor_uri: &str) {
    let _ = sqlx::query("DELETE FROM follows WHERE follower_remote_uri = $1")
        .bind(actor_uri)
        .execute(pool)
        .await;
    let _ = sqlx::query("DELETE FROM remote_actors WHERE actor_uri = $1")
        .bind(actor_uri)
        .execute(pool)
        .await;
}

/// Transport that records every outbound POST and answers 202.
struct RecordingTransport {
    calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn post(
        &self,
        inbox_url: &str,
        _headers: &SignedHeaders,
        body: &[u8],
    ) -> Result<u16, String> {
        self.calls
            .lock()
            .unwrap()
            .push((inbox_url.to_string(), body.to_vec()));
        Ok(202)
    }
}

struct TestHarness {
    db: Database,
    config: AppConfig,
    processor: PostProcessor,
    inbox: InboxProcessor,
    transport: Arc<RecordingTransport>,
}

fn build_harness(pool: PgPool) -> TestHarness {
    let config = test_config();
    let db = Database::new(pool, BASE_URL);
    let transport = Arc::new(RecordingTransport::new());
    let outbox = OutboxDispatcher::new(db.clone(), transport.clone(), config.clone());
    let resolver = ActorResolver::new(db.clone(), reqwest::Client::new());
    let inbox = InboxProcessor::new(db.clone(), resolver, outbox.clone(), config.clone());
    let processor = PostProcessor::new(
        db.clone(),
        WeatherService::disabled(),
        outbox,
        config.clone(),
    );
    TestHarness {
        db,
        config,
        processor,
        inbox,
        transport,
    }
}

fn gpx_file(start_lat: f64, start_lon: f64, points: usize, step_deg: f64) -> Bytes {
    let mut trkpts = String::new();
    for i in 0..points {
        let lat = start_lat + i as f64 * step_deg;
        let minute = i / 60;
        let second = i % 60;
        trkpts.push_str(&format!(
            "<trkpt lat=\"{lat}\" lon=\"{start_lon}\"><ele>100</ele>\
             <time>2025-11-27T14:{minute:02}:{second:02}Z</time></trkpt>\n"
        ));
    }
    Bytes::from(format!(
        "<?xml version=\"1.0\"?><gpx version=\"1.1\" \
         xmlns=\"http://www.topografix.com/GPX/1/1\">\
         <trk><type>running</type><trkseg>{trkpts}</trkseg></trk></gpx>"
    ))
}

async fn upload(
    harness: &TestHarness,
    user_id: Uuid,
    visibility: Visibility,
    file: Bytes,
) -> trailpost::models::Activity {
    ingest_activity(
        &harness.db,
        &harness.processor,
        &harness.config,
        UploadRequest {
            user_id,
            title: Some("Test activity".to_string()),
            description: None,
            visibility,
            timezone: None,
            format: FileFormat::Gpx,
            bytes: file,
        },
    )
    .await
    .expect("ingest")
}

async fn seed_remote_actor(db: &Database, host: &str, name: &str) -> RemoteActor {
    let actor = RemoteActor {
        actor_uri: format!("https://{host}/users/{name}"),
        preferred_username: name.to_string(),
        inbox_url: format!("https://{host}/users/{name}/inbox"),
        shared_inbox_url: Some(format!("https://{host}/inbox")),
        public_key_id: format!("https://{host}/users/{name}#main-key"),
        public_key_pem: "-----BEGIN PUBLIC KEY-----\nunused\n-----END PUBLIC KEY-----\n"
            .to_string(),
        display_name: Some(name.to_string()),
        avatar_url: None,
        summary: None,
        // fresh, so the resolver answers from cache without network
        last_fetched_at: OffsetDateTime::now_utc(),
    };
    db.upsert_remote_actor(&actor).await.expect("seed actor");
    actor
}

#[tokio::test]
async fn test_visibility_rules() {
    let Some(pool) = get_test_pool().await else { return };
    let harness = build_harness(pool.clone());

    let owner = create_test_user(&harness.db, "owner").await;
    let follower = create_test_user(&harness.db, "follower").await;
    let stranger = create_test_user(&harness.db, "stranger").await;

    // follower -> owner, ACCEPTED
    harness
        .db
        .create_local_follow(
            follower.id,
            &harness.config.actor_uri(&owner.username),
            trailpost::models::FollowStatus::Accepted,
            None,
        )
        .await
        .expect("follow");

    let public = upload(&harness, owner.id, Visibility::Public, gpx_file(50.0, 8.0, 30, 0.0002)).await;
    let followers_only =
        upload(&harness, owner.id, Visibility::Followers, gpx_file(50.1, 8.0, 30, 0.0002)).await;
    let private =
        upload(&harness, owner.id, Visibility::Private, gpx_file(50.2, 8.0, 30, 0.0002)).await;

    // anyone reads PUBLIC
    for viewer in [None, Some(follower.id), Some(stranger.id), Some(owner.id)] {
        assert!(harness.db.get_visible_activity(public.id, viewer).await.is_ok());
    }
    // FOLLOWERS: owner and accepted follower only
    assert!(harness.db.get_visible_activity(followers_only.id, Some(owner.id)).await.is_ok());
    assert!(harness.db.get_visible_activity(followers_only.id, Some(follower.id)).await.is_ok());
    assert!(harness.db.get_visible_activity(followers_only.id, Some(stranger.id)).await.is_err());
    assert!(harness.db.get_visible_activity(followers_only.id, None).await.is_err());
    // PRIVATE: owner only
    assert!(harness.db.get_visible_activity(private.id, Some(owner.id)).await.is_ok());
    assert!(harness.db.get_visible_activity(private.id, Some(follower.id)).await.is_err());
    assert!(harness.db.get_visible_activity(private.id, Some(stranger.id)).await.is_err());

    for user in [owner, follower, stranger] {
        cleanup_user(&pool, user.id).await;
    }
}

#[tokio::test]
async fn test_heatmap_excludes_indoor_and_rebuild_is_idempotent() {
    let Some(pool) = get_test_pool().await else { return };
    let harness = build_harness(pool.clone());
    let user = create_test_user(&harness.db, "heat").await;

    let outdoor = upload(&harness, user.id, Visibility::Public, gpx_file(50.0, 8.0, 60, 0.0005)).await;
    assert!(!outdoor.indoor);
    heatmap_increment(&harness.db, outdoor.id).await.expect("increment");

    let after_outdoor = harness.db.all_heatmap_cells(user.id).await.expect("cells");
    assert!(!after_outdoor.is_empty());

    // a stationary track classifies indoor and must never touch the grid
    let indoor = upload(&harness, user.id, Visibility::Public, gpx_file(50.5, 8.5, 40, 0.0)).await;
    assert!(indoor.indoor);
    heatmap_increment(&harness.db, indoor.id).await.expect("indoor increment");
    let after_indoor = harness.db.all_heatmap_cells(user.id).await.expect("cells");
    assert_eq!(cell_snapshot(&after_outdoor), cell_snapshot(&after_indoor));

    // rebuild twice: identical contents
    heatmap_rebuild(&harness.db, user.id).await.expect("rebuild");
    let first = harness.db.all_heatmap_cells(user.id).await.expect("cells");
    heatmap_rebuild(&harness.db, user.id).await.expect("rebuild again");
    let second = harness.db.all_heatmap_cells(user.id).await.expect("cells");
    assert_eq!(cell_snapshot(&first), cell_snapshot(&second));
    assert_eq!(cell_snapshot(&first), cell_snapshot(&after_outdoor));

    cleanup_user(&pool, user.id).await;
}

fn cell_snapshot(cells: &[trailpost::models::HeatmapCell]) -> Vec<(i64, i64, i64)> {
    let mut snapshot: Vec<(i64, i64, i64)> = cells
        .iter()
        .map(|c| {
            (
                (c.cell_lon * 1e7).round() as i64,
                (c.cell_lat * 1e7).round() as i64,
                c.point_count,
            )
        })
        .collect();
    snapshot.sort();
    snapshot
}

#[tokio::test]
async fn test_follow_handshake_is_idempotent() {
    let Some(pool) = get_test_pool().await else { return };
    let harness = build_harness(pool.clone());
    let bob = create_test_user(&harness.db, "bob").await;

    let host = format!("{}.remote.test", Uuid::new_v4().simple());
    let alice = seed_remote_actor(&harness.db, &host, "alice").await;

    let follow = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("https://{host}/activities/abc"),
        "type": "Follow",
        "actor": alice.actor_uri,
        "object": harness.config.actor_uri(&bob.username),
    });

    harness
        .inbox
        .process(&bob, follow.clone())
        .await
        .expect("first delivery");

    let follow_count = || async {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM follows WHERE follower_remote_uri = $1")
                .bind(&alice.actor_uri)
                .fetch_one(&pool)
                .await
                .unwrap();
        count
    };
    assert_eq!(follow_count().await, 1);

    // exactly one outbound Accept, to alice's own inbox
    let calls = harness.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, alice.inbox_url);
    let accept: serde_json::Value = serde_json::from_slice(&calls[0].1).unwrap();
    assert_eq!(accept["type"], "Accept");
    assert_eq!(accept["actor"], harness.config.actor_uri(&bob.username));
    assert_eq!(accept["object"]["id"], format!("https://{host}/activities/abc"));

    // a replayed delivery is a no-op: no new rows, no new posts
    harness
        .inbox
        .process(&bob, follow)
        .await
        .expect("replayed delivery");
    assert_eq!(follow_count().await, 1);
    assert_eq!(harness.transport.calls().len(), 1);

    cleanup_remote_actor(&pool, &alice.actor_uri).await;
    cleanup_user(&pool, bob.id).await;
}

#[tokio::test]
async fn test_remote_like_is_deduplicated() {
    let Some(pool) = get_test_pool().await else { return };
    let harness = build_harness(pool.clone());
    let bob = create_test_user(&harness.db, "liked").await;
    let host = format!("{}.remote.test", Uuid::new_v4().simple());
    let alice = seed_remote_actor(&harness.db, &host, "alice").await;

    let activity = upload(&harness, bob.id, Visibility::Public, gpx_file(50.0, 8.0, 30, 0.0002)).await;

    let like = serde_json::json!({
        "id": format!("https://{host}/activities/like-1"),
        "type": "Like",
        "actor": alice.actor_uri,
        "object": harness.config.activity_uri(activity.id),
    });
    harness.inbox.process(&bob, like.clone()).await.expect("like");
    harness.inbox.process(&bob, like).await.expect("replayed like");

    assert_eq!(harness.db.like_count(activity.id).await.unwrap(), 1);
    // only the first delivery notified the owner
    assert_eq!(harness.db.unread_notification_count(bob.id).await.unwrap(), 1);

    cleanup_remote_actor(&pool, &alice.actor_uri).await;
    cleanup_user(&pool, bob.id).await;
}

/// Provider that always fails, for the stage-isolation property.
struct BrokenWeather;

#[async_trait]
impl trailpost::weather::WeatherProvider for BrokenWeather {
    async fn observe(
        &self,
        _lat: f64,
        _lon: f64,
        _at: OffsetDateTime,
    ) -> Result<trailpost::weather::WeatherObservation, trailpost::errors::AppError> {
        Err(trailpost::errors::AppError::Transient(
            "weather provider down".to_string(),
        ))
    }
}

fn gpx_file_recent(points: usize) -> Bytes {
    // timestamps within the last hour, so the weather stage actually runs
    let start = OffsetDateTime::now_utc() - time::Duration::hours(1);
    let mut trkpts = String::new();
    for i in 0..points {
        let lat = 49.99 + i as f64 * 0.0003;
        let at = (start + time::Duration::seconds(i as i64))
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap();
        trkpts.push_str(&format!(
            "<trkpt lat=\"{lat}\" lon=\"8.26\"><ele>100</ele><time>{at}</time></trkpt>\n"
        ));
    }
    Bytes::from(format!(
        "<?xml version=\"1.0\"?><gpx version=\"1.1\" \
         xmlns=\"http://www.topografix.com/GPX/1/1\">\
         <trk><type>running</type><trkseg>{trkpts}</trkseg></trk></gpx>"
    ))
}

#[tokio::test]
async fn test_weather_failure_does_not_block_publish() {
    let Some(pool) = get_test_pool().await else { return };
    let config = test_config();
    let db = Database::new(pool.clone(), BASE_URL);
    let transport = Arc::new(RecordingTransport::new());
    let outbox = OutboxDispatcher::new(db.clone(), transport.clone(), config.clone());
    let broken_provider: Arc<dyn trailpost::weather::WeatherProvider> = Arc::new(BrokenWeather);
    let broken_weather = trailpost::weather::WeatherService::new(Some(broken_provider));
    let processor = PostProcessor::new(db.clone(), broken_weather, outbox, config.clone());

    let bob = create_test_user(&db, "pub").await;
    let host = format!("{}.remote.test", Uuid::new_v4().simple());
    let alice = seed_remote_actor(&db, &host, "alice").await;
    db.create_remote_follow(
        &alice.actor_uri,
        &config.actor_uri(&bob.username),
        None,
        trailpost::models::FollowStatus::Accepted,
    )
    .await
    .expect("follow edge");

    let activity = trailpost::ingest::ingest_activity(
        &db,
        &processor,
        &config,
        UploadRequest {
            user_id: bob.id,
            title: Some("Evening run".to_string()),
            description: None,
            visibility: Visibility::Public,
            timezone: None,
            format: FileFormat::Gpx,
            bytes: gpx_file_recent(60),
        },
    )
    .await
    .expect("ingest");

    processor.submit(activity.id);
    processor.drain().await;

    // the weather stage failed, the publish still reached the follower's
    // shared inbox
    let calls = harness_calls_to(&transport, &alice);
    assert_eq!(calls.len(), 1);
    let create: serde_json::Value = serde_json::from_slice(&calls[0]).unwrap();
    assert_eq!(create["type"], "Create");
    assert_eq!(create["object"]["workoutData"]["activityType"], "RUNNING");

    // and the activity row is untouched by the failure
    let stored = db.get_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(stored.id, activity.id);

    cleanup_remote_actor(&pool, &alice.actor_uri).await;
    cleanup_user(&pool, bob.id).await;
}

fn harness_calls_to(transport: &RecordingTransport, actor: &RemoteActor) -> Vec<Vec<u8>> {
    transport
        .calls()
        .into_iter()
        .filter(|(url, _)| url == actor.shared_inbox_url.as_deref().unwrap_or(&actor.inbox_url))
        .map(|(_, body)| body)
        .collect()
}

#[tokio::test]
async fn test_gpx_upload_end_to_end() {
    let Some(pool) = get_test_pool().await else { return };
    let harness = build_harness(pool.clone());
    let user = create_test_user(&harness.db, "runner").await;

    let activity = upload(&harness, user.id, Visibility::Public, gpx_file(49.99, 8.26, 120, 0.0002)).await;

    assert_eq!(activity.user_id, user.id);
    assert!(!activity.indoor);
    assert_eq!(activity.started_at.unix_timestamp(), 1_764_252_000); // 2025-11-27T14:00:00Z
    assert!(activity.total_distance > 2_000.0);
    assert!(activity.total_duration_seconds > 0);
    assert!(activity.simplified_track.is_some());

    let metrics = harness
        .db
        .get_activity_metrics(activity.id)
        .await
        .unwrap()
        .expect("metrics row");
    assert!(metrics.average_speed.is_some());

    let points = harness.db.get_track_points(activity.id).await.unwrap();
    assert_eq!(points.len(), 120);

    cleanup_user(&pool, user.id).await;
}
