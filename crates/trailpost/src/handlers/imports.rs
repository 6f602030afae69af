//! Batch import handlers: archive upload and job polling.

use axum::{
    Extension,
    extract::{Multipart, Path},
    response::Json,
};
use bytes::BytesMut;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::imports::BatchImporter;
use crate::models::{BatchImportFileResult, BatchImportJob};
use crate::store::Database;

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportStatusResponse {
    #[serde(flatten)]
    pub job: BatchImportJob,
    pub files: Vec<BatchImportFileResult>,
}

/// Upload an archive of FIT/GPX files. Responds as soon as the job rows
/// exist; progress is polled via the status endpoint.
#[utoipa::path(
    post,
    path = "/imports",
    tag = "imports",
    request_body(content_type = "multipart/form-data", description = "zip archive upload"),
    responses(
        (status = 200, description = "Created import job", body = BatchImportJob),
        (status = 400, description = "Invalid archive"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn start_import(
    Extension(importer): Extension<BatchImporter>,
    AuthUser(claims): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<BatchImportJob>, AppError> {
    let mut archive = BytesMut::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::Validation("failed to process multipart data".to_string()))?
    {
        if field.name() == Some("file") || field.name() == Some("archive") {
            let chunk = field
                .bytes()
                .await
                .map_err(|_| AppError::Validation("failed to read archive data".to_string()))?;
            archive.extend(chunk);
        }
    }
    if archive.is_empty() {
        return Err(AppError::Validation("no archive provided".to_string()));
    }

    let job = importer.start_import(claims.sub, archive.freeze()).await?;
    Ok(Json(job))
}

/// Poll an import job's status and per-file results.
#[utoipa::path(
    get,
    path = "/imports/{id}",
    tag = "imports",
    params(("id" = Uuid, Path, description = "Import job ID")),
    responses(
        (status = 200, description = "Job status with per-file results", body = ImportStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_import_status(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportStatusResponse>, AppError> {
    let job = db
        .get_import_job(id, claims.sub)
        .await?
        .ok_or(AppError::NotFound)?;
    let files = db.get_import_files(id).await?;
    Ok(Json(ImportStatusResponse { job, files }))
}
