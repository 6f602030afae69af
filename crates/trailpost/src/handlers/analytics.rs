//! Analytics read handlers: records, achievements, training load and
//! summaries.

use axum::{Extension, extract::Query, response::Json};
use serde::Deserialize;
use time::{Date, Duration, OffsetDateTime};
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{Achievement, ActivitySummary, PersonalRecord, PeriodType, TrainingLoad};
use crate::store::Database;

/// The caller's personal records.
#[utoipa::path(
    get,
    path = "/analytics/records",
    tag = "analytics",
    responses(
        (status = 200, description = "Personal records", body = Vec<PersonalRecord>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_personal_records(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Vec<PersonalRecord>>, AppError> {
    Ok(Json(db.get_personal_records(claims.sub).await?))
}

/// The caller's achievements.
#[utoipa::path(
    get,
    path = "/analytics/achievements",
    tag = "analytics",
    responses(
        (status = 200, description = "Achievements", body = Vec<Achievement>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_achievements(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Vec<Achievement>>, AppError> {
    Ok(Json(db.get_achievements(claims.sub).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TrainingLoadQuery {
    pub from: Option<Date>,
    pub to: Option<Date>,
}

/// Daily training load (TSS/ATL/CTL/TSB) over a date range, defaulting to
/// the last three months.
#[utoipa::path(
    get,
    path = "/analytics/training-load",
    tag = "analytics",
    params(
        ("from" = Option<String>, Query, description = "Start date (YYYY-MM-DD)"),
        ("to" = Option<String>, Query, description = "End date (YYYY-MM-DD)")
    ),
    responses(
        (status = 200, description = "Training load rows in day order", body = Vec<TrainingLoad>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_training_load(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Query(query): Query<TrainingLoadQuery>,
) -> Result<Json<Vec<TrainingLoad>>, AppError> {
    let to = query.to.unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let from = query.from.unwrap_or(to - Duration::days(90));
    if from > to {
        return Err(AppError::Validation("from is after to".to_string()));
    }
    Ok(Json(db.training_load_range(claims.sub, from, to).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SummariesQuery {
    /// WEEKLY, MONTHLY or YEARLY.
    pub period: Option<PeriodType>,
    #[serde(default = "default_summary_limit")]
    pub limit: i64,
}

fn default_summary_limit() -> i64 {
    12
}

/// Period summaries, newest first.
#[utoipa::path(
    get,
    path = "/analytics/summaries",
    tag = "analytics",
    params(
        ("period" = Option<String>, Query, description = "WEEKLY, MONTHLY or YEARLY"),
        ("limit" = Option<i64>, Query, description = "Number of periods")
    ),
    responses(
        (status = 200, description = "Summaries", body = Vec<ActivitySummary>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_summaries(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
    Query(query): Query<SummariesQuery>,
) -> Result<Json<Vec<ActivitySummary>>, AppError> {
    let period = query.period.unwrap_or(PeriodType::Weekly);
    let limit = query.limit.clamp(1, 100);
    Ok(Json(
        db.get_activity_summaries(claims.sub, period, limit).await?,
    ))
}
