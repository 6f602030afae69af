//! Integration test for the batch import coordinator: a mixed archive must
//! complete with per-file classified errors and leave the heatmap
//! reflecting exactly the successful activities.
//!
//! Requires DATABASE_URL with migrations applied; skips otherwise.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{PgPool, postgres::PgPoolOptions};
use time::OffsetDateTime;
use uuid::Uuid;
use zip::write::SimpleFileOptions;

use trailpost::config::AppConfig;
use trailpost::federation::outbox::{DeliveryTransport, OutboxDispatcher};
use trailpost::imports::BatchImporter;
use trailpost::keys::generate_keypair;
use trailpost::models::{ImportErrorType, ImportFileStatus, ImportJobStatus, User};
use trailpost::pipeline::{PostProcessor, heatmap_rebuild};
use trailpost::signatures::SignedHeaders;
use trailpost::store::Database;
use trailpost::weather::WeatherService;

struct NullTransport;

#[async_trait]
impl DeliveryTransport for NullTransport {
    async fn post(
        &self,
        _inbox_url: &str,
        _headers: &SignedHeaders,
        _body: &[u8],
    ) -> Result<u16, String> {
        Ok(202)
    }
}

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
        base_url: "https://local.test".to_string(),
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

async fn create_test_user(db: &Database) -> User {
    let keypair = generate_keypair().expect("keygen");
    let suffix = Uuid::new_v4().simple().to_string();
    let user = User {
        id: Uuid::new_v4(),
        username: format!("importer{}", &suffix[..10]),
        email: format!("importer-{suffix}@example.com"),
        password_hash: "x".to_string(),
        display_name: "Importer".to_string(),
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

fn good_gpx(start_lat: f64) -> Vec<u8> {
    let mut trkpts = String::new();
    for i in 0..30 {
        let lat = start_lat + i as f64 * 0.0003;
        trkpts.push_str(&format!(
            "<trkpt lat=\"{lat}\" lon=\"8.26\"><ele>100</ele>\
             <time>2025-11-27T10:00:{i:02}Z</time></trkpt>"
        ));
    }
    format!(
        "<?xml version=\"1.0\"?><gpx version=\"1.1\" \
         xmlns=\"http://www.topografix.com/GPX/1/1\">\
         <trk><type>running</type><trkseg>{trkpts}</trkseg></trk></gpx>"
    )
    .into_bytes()
}

fn build_archive(entries: &[(&str, Vec<u8>)]) -> Bytes {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut cursor);
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
    Bytes::from(cursor.into_inner())
}

#[tokio::test]
async fn test_mixed_archive_import() {
    let Some(pool) = get_test_pool().await else { return };
    let config = test_config();
    let db = Database::new(pool.clone(), config.base_url.clone());
    let outbox = OutboxDispatcher::new(db.clone(), Arc::new(NullTransport), config.clone());
    let processor = PostProcessor::new(
        db.clone(),
        WeatherService::disabled(),
        outbox,
        config.clone(),
    );
    let importer = BatchImporter::new(db.clone(), processor, config);
    let user = create_test_user(&db).await;

    // three good files and three failures with distinct classifications
    let archive = build_archive(&[
        ("2025/run-a.gpx", good_gpx(49.99)),
        ("2025/run-b.gpx", good_gpx(50.10)),
        ("notes.txt", b"not an activity".to_vec()),
        ("2025/garbage.gpx", b"random bytes, no xml".to_vec()),
        ("2025/broken.gpx", b"<gpx><trk><trkseg><trkpt lat=".to_vec()),
        ("2025/empty.gpx", good_gpx_empty()),
        ("2025/run-c.gpx", good_gpx(50.20)),
    ]);

    let job = importer
        .start_import(user.id, archive)
        .await
        .expect("job created");
    // the response returns immediately, before files are processed
    assert_eq!(job.status, ImportJobStatus::Pending);
    assert_eq!(job.total_files, 6); // notes.txt is never enqueued

    importer.drain().await;

    let finished = db
        .get_import_job(job.id, user.id)
        .await
        .unwrap()
        .expect("job row");
    assert_eq!(finished.status, ImportJobStatus::Completed);
    assert_eq!(finished.success_count, 3);
    assert_eq!(finished.failed_count, 3);

    let files = db.get_import_files(job.id).await.unwrap();
    assert_eq!(files.len(), 6);
    // archive order is preserved
    assert_eq!(files[0].file_name, "2025/run-a.gpx");
    assert_eq!(files[5].file_name, "2025/run-c.gpx");

    for file in &files {
        match file.file_name.as_str() {
            "2025/garbage.gpx" => {
                assert_eq!(file.status, ImportFileStatus::Failed);
                assert_eq!(file.error_type, Some(ImportErrorType::UnsupportedFormat));
            }
            "2025/broken.gpx" => {
                assert_eq!(file.status, ImportFileStatus::Failed);
                assert_eq!(file.error_type, Some(ImportErrorType::ParsingError));
            }
            "2025/empty.gpx" => {
                assert_eq!(file.status, ImportFileStatus::Failed);
                assert_eq!(file.error_type, Some(ImportErrorType::ValidationError));
            }
            _ => {
                assert_eq!(file.status, ImportFileStatus::Success, "{}", file.file_name);
                assert!(file.activity_id.is_some());
            }
        }
    }

    // the heatmap was rebuilt and reflects exactly the successful imports
    let cells = db.all_heatmap_cells(user.id).await.unwrap();
    assert!(!cells.is_empty());
    heatmap_rebuild(&db, user.id).await.unwrap();
    let rebuilt = db.all_heatmap_cells(user.id).await.unwrap();
    assert_eq!(cells.len(), rebuilt.len());

    let _ = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(&pool)
        .await;
}

/// Well-formed GPX with zero track points: decodes, then fails validation
/// for carrying no timestamps.
fn good_gpx_empty() -> Vec<u8> {
    b"<?xml version=\"1.0\"?><gpx version=\"1.1\" \
      xmlns=\"http://www.topografix.com/GPX/1/1\">\
      <trk><trkseg></trkseg></trk></gpx>"
        .to_vec()
}
