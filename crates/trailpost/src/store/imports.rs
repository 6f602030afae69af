use time::OffsetDateTime;
use uuid::Uuid;

use super::Database;
use crate::errors::AppError;
use crate::models::{BatchImportFileResult, BatchImportJob, ImportErrorType, ImportJobStatus};

const JOB_COLUMNS: &str =
    "id, user_id, status, total_files, success_count, failed_count, created_at, finished_at";

const FILE_COLUMNS: &str =
    "id, job_id, file_name, position, status, error_type, error_message, activity_id";

impl Database {
    /// Create the parent job and one PENDING child per file in a single
    /// transaction; the upload response returns as soon as this commits.
    pub async fn create_import_job(
        &self,
        user_id: Uuid,
        file_names: &[String],
    ) -> Result<BatchImportJob, AppError> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, BatchImportJob>(&format!(
            r#"
            INSERT INTO batch_import_jobs (id, user_id, status, total_files)
            VALUES ($1, $2, 'PENDING', $3)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(file_names.len() as i32)
        .fetch_one(&mut *tx)
        .await?;

        for (position, name) in file_names.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO batch_import_files (id, job_id, file_name, position, status)
                VALUES ($1, $2, $3, $4, 'PENDING')
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(job.id)
            .bind(name)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    pub async fn get_import_job(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BatchImportJob>, AppError> {
        let job = sqlx::query_as::<_, BatchImportJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM batch_import_jobs WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn get_import_files(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<BatchImportFileResult>, AppError> {
        let files = sqlx::query_as::<_, BatchImportFileResult>(&format!(
            "SELECT {FILE_COLUMNS} FROM batch_import_files WHERE job_id = $1 ORDER BY position"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn set_import_job_status(
        &self,
        id: Uuid,
        status: ImportJobStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE batch_import_jobs SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_import_file_processing(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE batch_import_files SET status = 'PROCESSING' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_import_file_success(
        &self,
        id: Uuid,
        activity_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE batch_import_files
            SET status = 'SUCCESS', activity_id = $2, finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(activity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_import_file_failed(
        &self,
        id: Uuid,
        error_type: ImportErrorType,
        error_message: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE batch_import_files
            SET status = 'FAILED', error_type = $2, error_message = $3, finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_type)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close the parent job from its children's final states. The job
    /// completes successfully even when individual files failed; FAILED is
    /// reserved for jobs where nothing was imported.
    pub async fn finish_import_job(&self, id: Uuid) -> Result<BatchImportJob, AppError> {
        let (success, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE status = 'SUCCESS'),
                   COUNT(*) FILTER (WHERE status = 'FAILED')
            FROM batch_import_files WHERE job_id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let status = if success == 0 && failed > 0 {
            ImportJobStatus::Failed
        } else {
            ImportJobStatus::Completed
        };

        let job = sqlx::query_as::<_, BatchImportJob>(&format!(
            r#"
            UPDATE batch_import_jobs
            SET status = $2, success_count = $3, failed_count = $4, finished_at = $5
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(success as i32)
        .bind(failed as i32)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }
}
