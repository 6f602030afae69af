pub mod analytics;
pub mod auth;
pub mod config;
pub mod decoders;
pub mod errors;
pub mod federation;
pub mod handlers;
pub mod heatmap;
pub mod imports;
pub mod ingest;
pub mod keys;
pub mod models;
pub mod pipeline;
pub mod request_id;
pub mod signatures;
pub mod store;
pub mod track;
pub mod weather;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post},
};
use sqlx::PgPool;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::federation::actors::ActorResolver;
use crate::federation::inbox::InboxProcessor;
use crate::federation::outbox::{HttpTransport, OutboxDispatcher};
use crate::imports::BatchImporter;
use crate::pipeline::PostProcessor;
use crate::request_id::request_id_middleware;
use crate::store::Database;
use crate::weather::{OpenWeatherClient, WeatherService};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Trailpost API",
        description = "Federated activity sharing: workout ingestion, timelines and ActivityPub federation",
        version = "0.1.0",
        license(name = "MIT"),
    ),
    tags(
        (name = "auth", description = "Authentication endpoints"),
        (name = "activities", description = "Activity upload and management"),
        (name = "timeline", description = "Merged timelines"),
        (name = "social", description = "Likes, comments and notifications"),
        (name = "federation", description = "Remote follow management"),
        (name = "heatmap", description = "Per-user heatmap grid"),
        (name = "imports", description = "Batch archive imports"),
        (name = "analytics", description = "Records, achievements, training load, summaries"),
        (name = "privacy", description = "Privacy zones"),
        (name = "users", description = "Account management"),
        (name = "health", description = "Service health"),
    ),
    paths(
        auth::register,
        auth::login,
        auth::me,
        handlers::activities::upload_activity,
        handlers::activities::update_activity,
        handlers::activities::delete_activity,
        handlers::activities::get_activity_track,
        handlers::activities::get_activity_geojson,
        handlers::activities::download_raw_file,
        handlers::users::get_user_activities,
        handlers::users::delete_account,
        handlers::users::health_check,
        handlers::timeline::federated_timeline,
        handlers::timeline::public_timeline,
        handlers::heatmap::get_heatmap,
        handlers::heatmap::rebuild_heatmap,
        handlers::imports::start_import,
        handlers::imports::get_import_status,
        handlers::social::like_activity,
        handlers::social::unlike_activity,
        handlers::social::add_comment,
        handlers::social::get_comments,
        handlers::social::delete_comment,
        handlers::social::follow_remote,
        handlers::social::unfollow_remote,
        handlers::social::get_notifications,
        handlers::social::mark_notification_read,
        handlers::social::mark_all_notifications_read,
        handlers::analytics::get_personal_records,
        handlers::analytics::get_achievements,
        handlers::analytics::get_training_load,
        handlers::analytics::get_summaries,
        handlers::privacy::list_privacy_zones,
        handlers::privacy::create_privacy_zone,
        handlers::privacy::delete_privacy_zone,
    ),
    components(
        schemas(
            auth::RegisterRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            auth::UserResponse,
            models::Activity,
            models::ActivityMetrics,
            models::ActivityType,
            models::Visibility,
            models::IndoorDetectionMethod,
            models::TrackPoint,
            models::FollowStatus,
            models::RemoteActivity,
            models::Comment,
            models::Notification,
            models::NotificationType,
            models::HeatmapCell,
            models::PrivacyZone,
            models::BatchImportJob,
            models::BatchImportFileResult,
            models::ImportJobStatus,
            models::ImportFileStatus,
            models::ImportErrorType,
            models::PersonalRecord,
            models::RecordType,
            models::Achievement,
            models::AchievementType,
            models::TrainingLoad,
            models::FormStatus,
            models::ActivitySummary,
            models::PeriodType,
            models::UserSummary,
            store::LocalTimelineActivity,
            store::TimelineEntry,
            handlers::activities::UpdateActivityRequest,
            handlers::social::AddCommentRequest,
            handlers::social::FollowRequest,
            handlers::social::FollowResponse,
            handlers::social::LikeResponse,
            handlers::social::NotificationsResponse,
            handlers::imports::ImportStatusResponse,
            handlers::privacy::CreatePrivacyZoneRequest,
        )
    ),
    security(("bearer_auth" = [])),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            );
        }
    }
}

/// The wired component set. One construction root builds everything and
/// passes it by handle; nothing global.
#[derive(Clone)]
pub struct AppComponents {
    pub db: Database,
    pub config: AppConfig,
    pub processor: PostProcessor,
    pub importer: BatchImporter,
    pub resolver: ActorResolver,
    pub outbox: OutboxDispatcher,
    pub inbox: InboxProcessor,
}

pub fn build_components(pool: PgPool, config: AppConfig) -> AppComponents {
    let db = Database::new(pool, config.base_url.clone());

    // one client per outbound concern, each with its own timeout budget
    let delivery_client = reqwest::Client::builder()
        .user_agent(format!("trailpost/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("delivery http client");
    let actor_client = reqwest::Client::builder()
        .user_agent(format!("trailpost/{}", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(10))
        .build()
        .expect("actor http client");

    let resolver = ActorResolver::new(db.clone(), actor_client);
    let outbox = OutboxDispatcher::new(
        db.clone(),
        Arc::new(HttpTransport::new(delivery_client)),
        config.clone(),
    );
    let inbox = InboxProcessor::new(
        db.clone(),
        resolver.clone(),
        outbox.clone(),
        config.clone(),
    );

    let weather = if config.weather_enabled {
        match &config.weather_api_key {
            Some(key) => {
                let weather_client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(crate::weather::WEATHER_TIMEOUT_SECONDS))
                    .build()
                    .expect("weather http client");
                let provider: Arc<dyn crate::weather::WeatherProvider> =
                    Arc::new(OpenWeatherClient::new(weather_client, key.clone()));
                WeatherService::new(Some(provider))
            }
            None => {
                tracing::warn!("WEATHER_ENABLED is set without WEATHER_API_KEY; disabling");
                WeatherService::disabled()
            }
        }
    } else {
        WeatherService::disabled()
    };

    let processor = PostProcessor::new(db.clone(), weather, outbox.clone(), config.clone());
    let importer = BatchImporter::new(db.clone(), processor.clone(), config.clone());

    AppComponents {
        db,
        config,
        processor,
        importer,
        resolver,
        outbox,
        inbox,
    }
}

pub fn create_router(components: AppComponents) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Discovery
        .route("/.well-known/webfinger", get(handlers::webfinger))
        .route("/.well-known/nodeinfo", get(handlers::nodeinfo))
        .route("/nodeinfo/2.0", get(handlers::nodeinfo_document))
        // ActivityPub actors and inboxes
        .route("/users/{username}", get(handlers::actor_document))
        .route("/users/{username}/inbox", post(handlers::inbox_post))
        .route("/users/{username}/outbox", get(handlers::outbox_collection))
        .route(
            "/users/{username}/followers",
            get(handlers::followers_collection),
        )
        .route(
            "/users/{username}/following",
            get(handlers::following_collection),
        )
        // Auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        // Activities
        .route("/activities", post(handlers::upload_activity))
        .route(
            "/activities/{id}",
            get(handlers::public_activity_note)
                .patch(handlers::update_activity)
                .delete(handlers::delete_activity),
        )
        .route("/activities/{id}/track", get(handlers::get_activity_track))
        .route(
            "/activities/{id}/track.geojson",
            get(handlers::get_activity_geojson),
        )
        .route(
            "/activities/{id}/download",
            get(handlers::download_raw_file),
        )
        .route(
            "/users/{username}/activities",
            get(handlers::get_user_activities),
        )
        .route("/users/me", delete(handlers::delete_account))
        // Timelines
        .route("/timeline", get(handlers::federated_timeline))
        .route("/timeline/public", get(handlers::public_timeline))
        // Heatmap
        .route("/heatmap", get(handlers::get_heatmap))
        .route("/heatmap/rebuild", post(handlers::rebuild_heatmap))
        // Batch imports
        .route("/imports", post(handlers::start_import))
        .route("/imports/{id}", get(handlers::get_import_status))
        // Social
        .route(
            "/activities/{id}/likes",
            post(handlers::like_activity).delete(handlers::unlike_activity),
        )
        .route(
            "/activities/{id}/comments",
            get(handlers::get_comments).post(handlers::add_comment),
        )
        .route("/comments/{id}", delete(handlers::delete_comment))
        .route(
            "/federation/follow",
            post(handlers::follow_remote).delete(handlers::unfollow_remote),
        )
        // Notifications
        .route("/notifications", get(handlers::get_notifications))
        .route(
            "/notifications/{id}/read",
            post(handlers::mark_notification_read),
        )
        .route(
            "/notifications/read-all",
            post(handlers::mark_all_notifications_read),
        )
        // Privacy zones
        .route(
            "/privacy-zones",
            get(handlers::list_privacy_zones).post(handlers::create_privacy_zone),
        )
        .route(
            "/privacy-zones/{id}",
            delete(handlers::delete_privacy_zone),
        )
        // Analytics
        .route("/analytics/records", get(handlers::get_personal_records))
        .route("/analytics/achievements", get(handlers::get_achievements))
        .route("/analytics/training-load", get(handlers::get_training_load))
        .route("/analytics/summaries", get(handlers::get_summaries))
        // OpenAPI / Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // archives are large; single activity files less so
        .layer(DefaultBodyLimit::max(crate::imports::MAX_ARCHIVE_BYTES + 1024))
        .layer(Extension(components.db))
        .layer(Extension(components.config))
        .layer(Extension(components.processor))
        .layer(Extension(components.importer))
        .layer(Extension(components.resolver))
        .layer(Extension(components.outbox))
        .layer(Extension(components.inbox))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(request_id_middleware))
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

pub async fn run_server(pool: PgPool, config: AppConfig) -> anyhow::Result<()> {
    let components = build_components(pool, config.clone());
    let importer = components.importer.clone();
    let processor = components.processor.clone();

    let app = create_router(components);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(domain = config.domain, port = config.port, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // drain order: running imports first, then the post-processing pool
    importer.drain().await;
    processor.drain().await;
    Ok(())
}
