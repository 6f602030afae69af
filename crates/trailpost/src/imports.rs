//! Batch import coordinator.
//!
//! Accepts an uploaded archive, creates the parent job and its per-file
//! children, and processes the files sequentially on a dedicated task. One
//! bad file fails only itself, with a classified error stored on its row.
//! After the last file a single analytics rebuild runs: full heatmap
//! rebuild plus record/achievement/training-load/summary re-evaluation per
//! imported activity.

use std::io::Read;

use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::{achievements, records, summaries, training_load};
use crate::config::AppConfig;
use crate::decoders::FileFormat;
use crate::errors::AppError;
use crate::ingest::{UploadRequest, ingest_activity};
use crate::models::{BatchImportJob, ImportErrorType, ImportJobStatus, Visibility};
use crate::pipeline::{PostProcessor, ProcessingOptions, heatmap_rebuild};
use crate::store::Database;

pub const MAX_ARCHIVE_BYTES: usize = 500 * 1024 * 1024;
pub const MAX_FILES: usize = 1000;
pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct BatchImporter {
    db: Database,
    processor: PostProcessor,
    config: AppConfig,
    running: std::sync::Arc<std::sync::Mutex<std::collections::HashSet<Uuid>>>,
    drained: std::sync::Arc<tokio::sync::Notify>,
}

impl BatchImporter {
    pub fn new(db: Database, processor: PostProcessor, config: AppConfig) -> Self {
        Self {
            db,
            processor,
            config,
            running: std::sync::Arc::new(std::sync::Mutex::new(std::collections::HashSet::new())),
            drained: std::sync::Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Wait for running import jobs to finish; shutdown drains imports
    /// before the post-processing pool.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.running.lock().unwrap().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Validate the archive, create the job and return it immediately;
    /// processing continues on a dedicated task and progress is polled.
    pub async fn start_import(
        &self,
        user_id: Uuid,
        archive: Bytes,
    ) -> Result<BatchImportJob, AppError> {
        if archive.len() > MAX_ARCHIVE_BYTES {
            return Err(AppError::Validation(format!(
                "archive exceeds {} MB",
                MAX_ARCHIVE_BYTES / (1024 * 1024)
            )));
        }

        let names = list_activity_entries(&archive)?;
        if names.is_empty() {
            return Err(AppError::Validation(
                "archive contains no .fit or .gpx files".to_string(),
            ));
        }
        if names.len() > MAX_FILES {
            return Err(AppError::Validation(format!(
                "archive contains more than {MAX_FILES} activity files"
            )));
        }

        let job = self.db.create_import_job(user_id, &names).await?;

        let importer = self.clone();
        let job_id = job.id;
        self.running.lock().unwrap().insert(job_id);
        tokio::spawn(async move {
            if let Err(e) = importer.process_job(job_id, user_id, archive).await {
                warn!(%job_id, "import job failed: {e}");
                let _ = importer
                    .db
                    .set_import_job_status(job_id, ImportJobStatus::Failed)
                    .await;
            }
            let mut running = importer.running.lock().unwrap();
            running.remove(&job_id);
            if running.is_empty() {
                importer.drained.notify_waiters();
            }
        });

        Ok(job)
    }

    /// Files strictly in archive order, each in its own scope; the rebuild
    /// starts only after the last file terminated.
    async fn process_job(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        archive: Bytes,
    ) -> Result<(), AppError> {
        self.db
            .set_import_job_status(job_id, ImportJobStatus::Processing)
            .await?;

        let files = self.db.get_import_files(job_id).await?;
        for file in &files {
            self.db.set_import_file_processing(file.id).await?;

            match self.import_one(user_id, &archive, &file.file_name).await {
                Ok(activity_id) => {
                    self.db.set_import_file_success(file.id, activity_id).await?;
                }
                Err(e) => {
                    let error_type = classify_import_error(&e);
                    warn!(%job_id, file = file.file_name, ?error_type, "file import failed: {e}");
                    self.db
                        .set_import_file_failed(file.id, error_type, &e.to_string())
                        .await?;
                }
            }
        }

        let job = self.db.finish_import_job(job_id).await?;
        info!(
            %job_id,
            success = job.success_count,
            failed = job.failed_count,
            "import finished, rebuilding analytics"
        );

        self.rebuild_analytics(job_id, user_id).await;
        Ok(())
    }

    async fn import_one(
        &self,
        user_id: Uuid,
        archive: &Bytes,
        name: &str,
    ) -> Result<Uuid, AppError> {
        let bytes = extract_entry(archive, name).await?;
        if bytes.is_empty() {
            return Err(AppError::Validation("file is empty".to_string()));
        }

        let format = FileFormat::from_file_name(name);
        let detected = FileFormat::detect_from_bytes(&bytes);
        if detected == FileFormat::Unknown {
            return Err(AppError::Parse("unsupported file format".to_string()));
        }
        let format = if format == FileFormat::Unknown {
            detected
        } else {
            format
        };

        let activity = ingest_activity(
            &self.db,
            &self.processor,
            &self.config,
            UploadRequest {
                user_id,
                title: None,
                description: None,
                visibility: Visibility::Private,
                timezone: None,
                format,
                bytes: Bytes::from(bytes),
            },
        )
        .await?;
        // disabled side effects: analytics are rebuilt batch-wise afterwards
        self.processor
            .run_post_commit(activity.id, ProcessingOptions::batch_import())
            .await;
        Ok(activity.id)
    }

    /// Batch-wise analytics pass. Errors are logged per step, never
    /// propagated: the import itself already completed.
    async fn rebuild_analytics(&self, job_id: Uuid, user_id: Uuid) {
        if let Err(e) = heatmap_rebuild(&self.db, user_id).await {
            warn!(%job_id, "heatmap rebuild failed: {e}");
        }

        let imported: Vec<Uuid> = match self.db.get_import_files(job_id).await {
            Ok(files) => files.into_iter().filter_map(|f| f.activity_id).collect(),
            Err(e) => {
                warn!(%job_id, "listing imported files failed: {e}");
                return;
            }
        };

        for activity_id in &imported {
            if let Err(e) = records::update_personal_records(&self.db, *activity_id).await {
                warn!(%activity_id, "record re-evaluation failed: {e}");
            }
            if let Err(e) = achievements::evaluate_achievements(&self.db, *activity_id).await {
                warn!(%activity_id, "achievement re-evaluation failed: {e}");
            }
            match self.db.get_activity(*activity_id).await {
                Ok(Some(activity)) => {
                    let day = activity.started_at.date();
                    if let Err(e) =
                        training_load::update_training_load(&self.db, user_id, day).await
                    {
                        warn!(%activity_id, "training load re-evaluation failed: {e}");
                    }
                    if let Err(e) = summaries::update_summaries(&self.db, user_id, day).await {
                        warn!(%activity_id, "summary re-evaluation failed: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%activity_id, "loading imported activity failed: {e}"),
            }
        }
    }
}

/// Activity file names in archive order, with the per-file size limit
/// enforced during enumeration.
fn list_activity_entries(archive: &Bytes) -> Result<Vec<String>, AppError> {
    let cursor = std::io::Cursor::new(archive.as_ref());
    let mut zip = zip::ZipArchive::new(cursor)
        .map_err(|e| AppError::Validation(format!("not a readable archive: {e}")))?;

    let mut names = Vec::new();
    for index in 0..zip.len() {
        let entry = zip
            .by_index(index)
            .map_err(|e| AppError::Validation(format!("unreadable archive entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if FileFormat::from_file_name(&name) == FileFormat::Unknown {
            continue;
        }
        if entry.size() > MAX_FILE_BYTES {
            return Err(AppError::Validation(format!(
                "{name} exceeds {} MB",
                MAX_FILE_BYTES / (1024 * 1024)
            )));
        }
        names.push(name);
    }
    Ok(names)
}

/// Pull one entry's bytes off the async executor.
async fn extract_entry(archive: &Bytes, name: &str) -> Result<Vec<u8>, AppError> {
    let archive = archive.clone();
    let name = name.to_string();
    tokio::task::spawn_blocking(move || {
        let cursor = std::io::Cursor::new(archive.as_ref());
        let mut zip = zip::ZipArchive::new(cursor)
            .map_err(|e| AppError::Io(std::io::Error::other(e)))?;
        let mut entry = zip
            .by_name(&name)
            .map_err(|e| AppError::Io(std::io::Error::other(e)))?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(AppError::Io)?;
        Ok(bytes)
    })
    .await
    .map_err(|_| AppError::Internal)?
}

pub fn classify_import_error(err: &AppError) -> ImportErrorType {
    match err {
        AppError::Validation(_) => ImportErrorType::ValidationError,
        AppError::Parse(msg) if msg.to_lowercase().contains("unsupported") => {
            ImportErrorType::UnsupportedFormat
        }
        AppError::Parse(_) => ImportErrorType::ParsingError,
        AppError::Io(_) => ImportErrorType::IoError,
        AppError::Database(_) => ImportErrorType::DatabaseError,
        _ => ImportErrorType::UnknownError,
    }
}
