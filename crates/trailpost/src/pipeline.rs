//! Post-processing pipeline.
//!
//! After the activity store commit, a synchronous stage set (achievements,
//! training load, summaries) runs inside the upload request, then the async
//! stages fan out on a bounded worker pool: personal records, heatmap
//! increment, and the weather -> federation-publish chain. Every stage is
//! fault-isolated: it logs with the activity id and never affects its
//! siblings or the stored activity. Stages receive the activity id by value
//! and re-load the row in their own scope.
//!
//! CPU-bound work (file decoding, simplification) runs on a rayon pool so
//! the I/O executor never blocks on it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analytics::{achievements, records, summaries, training_load};
use crate::config::AppConfig;
use crate::decoders::{FileFormat, ParsedActivity, parse_activity_file};
use crate::errors::AppError;
use crate::federation::objects::{build_workout_create, track_geojson_url};
use crate::federation::outbox::OutboxDispatcher;
use crate::heatmap::sampled_cell_counts;
use crate::models::Visibility;
use crate::store::Database;
use crate::weather::WeatherService;

/// Per-upload processing switches. Batch imports disable all side effects
/// and rebuild analytics once after the whole archive.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingOptions {
    pub side_effects: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self { side_effects: true }
    }
}

impl ProcessingOptions {
    pub fn batch_import() -> Self {
        Self {
            side_effects: false,
        }
    }
}

#[derive(Clone)]
pub struct PostProcessor {
    db: Database,
    weather: WeatherService,
    outbox: OutboxDispatcher,
    config: AppConfig,
    cpu_pool: Arc<rayon::ThreadPool>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    drained: Arc<Notify>,
}

impl PostProcessor {
    pub fn new(
        db: Database,
        weather: WeatherService,
        outbox: OutboxDispatcher,
        config: AppConfig,
    ) -> Self {
        let cpu_pool = rayon::ThreadPoolBuilder::new()
            .build()
            .expect("rayon pool");
        let workers = 2 * std::thread::available_parallelism().map_or(2, |n| n.get());
        Self {
            db,
            weather,
            outbox,
            config,
            cpu_pool: Arc::new(cpu_pool),
            permits: Arc::new(Semaphore::new(workers)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Decode an uploaded file off the async executor.
    pub async fn decode_file(
        &self,
        format: FileFormat,
        bytes: Bytes,
    ) -> Result<ParsedActivity, AppError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.cpu_pool.spawn(move || {
            let _ = tx.send(parse_activity_file(format, &bytes));
        });
        rx.await.map_err(|_| AppError::Internal)?.map_err(Into::into)
    }

    /// Everything that happens after the store commit: the synchronous
    /// stage set, then the async fan-out. With side effects disabled (batch
    /// import) this is a no-op and the importer rebuilds analytics once at
    /// the end.
    pub async fn run_post_commit(&self, activity_id: Uuid, options: ProcessingOptions) {
        if !options.side_effects {
            return;
        }
        self.run_synchronous_stages(activity_id).await;
        self.submit(activity_id);
    }

    /// The synchronous stage set, run in the upload request after the store
    /// commit. Each sub-step logs its own failure; none rolls back the
    /// write.
    pub async fn run_synchronous_stages(&self, activity_id: Uuid) {
        if let Err(e) = achievements::evaluate_achievements(&self.db, activity_id).await {
            warn!(%activity_id, "achievement evaluation failed: {e}");
        }

        match self.db.get_activity(activity_id).await {
            Ok(Some(activity)) => {
                let day = activity.started_at.date();
                if let Err(e) =
                    training_load::update_training_load(&self.db, activity.user_id, day).await
                {
                    warn!(%activity_id, "training load update failed: {e}");
                }
                if let Err(e) =
                    summaries::update_summaries(&self.db, activity.user_id, day).await
                {
                    warn!(%activity_id, "summary update failed: {e}");
                }
            }
            Ok(None) => debug!(%activity_id, "activity gone before synchronous stages"),
            Err(e) => warn!(%activity_id, "loading activity for synchronous stages failed: {e}"),
        }
    }

    /// Fan out the async stages. Personal records and the heatmap update are
    /// independent; weather must finish (succeed or fail) before the
    /// federation publish.
    pub fn submit(&self, activity_id: Uuid) {
        self.spawn_stage(activity_id, "personal_records", {
            let db = self.db.clone();
            async move { records::update_personal_records(&db, activity_id).await }
        });

        self.spawn_stage(activity_id, "heatmap", {
            let db = self.db.clone();
            async move { heatmap_increment(&db, activity_id).await }
        });

        self.spawn_stage(activity_id, "weather_publish", {
            let db = self.db.clone();
            let weather = self.weather.clone();
            let outbox = self.outbox.clone();
            let config = self.config.clone();
            async move {
                // in-order chain; a weather failure is logged and publish
                // still runs
                if let Err(e) = weather.apply(&db, activity_id).await {
                    warn!(%activity_id, "weather stage failed: {e}");
                }
                publish_activity(&db, &outbox, &config, activity_id).await
            }
        });
    }

    fn spawn_stage<F>(&self, activity_id: Uuid, stage: &'static str, task: F)
    where
        F: std::future::Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let token = Uuid::new_v4();
        self.in_flight.lock().unwrap().insert(token);

        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();
        let drained = self.drained.clone();
        tokio::spawn(async move {
            let _permit = permits.acquire().await;
            if let Err(e) = task.await {
                warn!(%activity_id, stage, "pipeline stage failed: {e}");
            }
            let mut set = in_flight.lock().unwrap();
            set.remove(&token);
            if set.is_empty() {
                drained.notify_waiters();
            }
        });
    }

    /// Wait for in-flight stages to finish; used by graceful shutdown after
    /// uploads stop.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.lock().unwrap().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Incremental heatmap update for one activity. Indoor activities never
/// contribute.
pub async fn heatmap_increment(db: &Database, activity_id: Uuid) -> Result<(), AppError> {
    let Some(activity) = db.get_activity(activity_id).await? else {
        return Ok(());
    };
    if activity.indoor {
        return Ok(());
    }
    let points = db.get_track_points(activity_id).await?;
    let cells = sampled_cell_counts(&points);
    db.upsert_heatmap_cells(activity.user_id, &cells).await
}

/// Reverse an activity's heatmap contribution before it is deleted.
pub async fn heatmap_remove(db: &Database, activity_id: Uuid) -> Result<(), AppError> {
    let Some(activity) = db.get_activity(activity_id).await? else {
        return Ok(());
    };
    if activity.indoor {
        return Ok(());
    }
    let points = db.get_track_points(activity_id).await?;
    let cells = sampled_cell_counts(&points);
    db.subtract_heatmap_cells(activity.user_id, &cells).await
}

/// Full rebuild: drop the user's cells, recompute across every non-indoor
/// activity. Running it twice yields identical contents.
pub async fn heatmap_rebuild(db: &Database, user_id: Uuid) -> Result<(), AppError> {
    db.delete_heatmap_cells(user_id).await?;
    for activity_id in db.outdoor_activity_ids(user_id).await? {
        let points = db.get_track_points(activity_id).await?;
        let cells = sampled_cell_counts(&points);
        db.upsert_heatmap_cells(user_id, &cells).await?;
    }
    Ok(())
}

/// Federation publish: emit the Create(Note) to every ACCEPTED follower.
/// PRIVATE activities are never published.
pub async fn publish_activity(
    db: &Database,
    outbox: &OutboxDispatcher,
    config: &AppConfig,
    activity_id: Uuid,
) -> Result<(), AppError> {
    let Some(activity) = db.get_activity(activity_id).await? else {
        return Ok(());
    };
    if activity.visibility == Visibility::Private {
        return Ok(());
    }
    let Some(user) = db.get_user(activity.user_id).await? else {
        return Ok(());
    };
    let metrics = db.get_activity_metrics(activity_id).await?;

    let geojson = track_geojson_url(config, &activity);
    let create = build_workout_create(config, &user, &activity, metrics.as_ref(), None, geojson);
    let create = serde_json::to_value(create).map_err(|_| AppError::Internal)?;
    let delivered = outbox.deliver_to_followers(&user, &create).await?;
    debug!(%activity_id, delivered, "published activity");
    Ok(())
}
