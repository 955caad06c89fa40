//! Persistence for report jobs.
//!
//! All writes that move a job forward go through [`ReportJobRepository::persist`],
//! which enforces the status transition table and an optimistic version check so
//! that two concurrent steppers can never both commit against the same snapshot.

use axum::http::StatusCode;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs::{InputRow, JobStatus, parse_job_status};
use crate::models::report_job::{ActiveModel, Column, Entity, Model};

/// The full post-step state of a job, written atomically by [`ReportJobRepository::persist`].
///
/// Callers start from [`JobChange::from_model`] (a copy of the current row) and
/// override only the fields their step actually changed.
#[derive(Debug, Clone)]
pub struct JobChange {
    /// Target status; must be reachable from the loaded status.
    pub status: JobStatus,
    /// Rows completed so far.
    pub processed: i32,
    /// Accumulated per-row results (JSON array).
    pub results: serde_json::Value,
    /// Opaque resume cursor observed by the most recent step.
    pub last_id: Option<String>,
    /// Public URL of the generated workbook, once built.
    pub result_file: Option<String>,
    /// Terminal failure description.
    pub error: Option<String>,
    /// When the first step began executing.
    pub started_at: Option<sea_orm::prelude::DateTimeWithTimeZone>,
    /// When the job reached a terminal status.
    pub finished_at: Option<sea_orm::prelude::DateTimeWithTimeZone>,
}

impl JobChange {
    /// Snapshot the mutable fields of a loaded job as the starting point for a change.
    pub fn from_model(job: &Model) -> Result<Self, ApiError> {
        Ok(Self {
            status: job_status(job)?,
            processed: job.processed,
            results: job.results.clone(),
            last_id: job.last_id.clone(),
            result_file: job.result_file.clone(),
            error: job.error.clone(),
            started_at: job.started_at,
            finished_at: job.finished_at,
        })
    }
}

/// Decode the persisted status string, treating unknown values as data corruption.
pub fn job_status(job: &Model) -> Result<JobStatus, ApiError> {
    parse_job_status(&job.status).ok_or_else(|| {
        tracing::error!(job_id = %job.id, status = %job.status, "Unknown job status in database");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Unknown job status",
        )
    })
}

/// Repository for report job records.
#[derive(Clone)]
pub struct ReportJobRepository {
    db: DatabaseConnection,
}

impl ReportJobRepository {
    /// Create a new repository instance.
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a new pending job for the given period and parsed input rows.
    pub async fn create(
        &self,
        period_from: chrono::NaiveDate,
        period_to: chrono::NaiveDate,
        input_rows: &[InputRow],
    ) -> Result<Model, ApiError> {
        let rows = serde_json::to_value(input_rows).map_err(|e| {
            tracing::error!("Failed to serialize input rows: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to serialize input rows",
            )
        })?;

        let now = Utc::now();
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            status: Set(JobStatus::Pending.as_str().to_string()),
            period_from: Set(period_from),
            period_to: Set(period_to),
            total: Set(input_rows.len() as i32),
            processed: Set(0),
            input_rows: Set(rows),
            results: Set(serde_json::json!([])),
            last_id: Set(None),
            result_file: Set(None),
            error: Set(None),
            lock_version: Set(0),
            started_at: Set(None),
            finished_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let model = job.insert(&self.db).await.map_err(|e| {
            tracing::error!("Failed to create report job: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to create report job",
            )
        })?;

        tracing::info!(
            job_id = %model.id,
            total = model.total,
            period_from = %model.period_from,
            period_to = %model.period_to,
            "Created report job"
        );

        Ok(model)
    }

    /// Find a job by its ID.
    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, ApiError> {
        Entity::find_by_id(job_id).one(&self.db).await.map_err(|e| {
            tracing::error!("Failed to find report job {}: {}", job_id, e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to find report job",
            )
        })
    }

    /// List jobs, newest first, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: u64,
    ) -> Result<Vec<Model>, ApiError> {
        let mut query = Entity::find().order_by_desc(Column::CreatedAt);

        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }

        query.limit(limit).all(&self.db).await.map_err(|e| {
            tracing::error!("Failed to list report jobs: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to list report jobs",
            )
        })
    }

    /// Jobs eligible for background stepping, oldest first.
    pub async fn find_runnable(&self, limit: u64) -> Result<Vec<Model>, ApiError> {
        Entity::find()
            .filter(Column::Status.is_in([
                JobStatus::Pending.as_str(),
                JobStatus::Running.as_str(),
            ]))
            .order_by_asc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find runnable report jobs: {}", e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to find runnable report jobs",
                )
            })
    }

    /// Commit a change against the snapshot the caller loaded.
    ///
    /// The write only lands if the row still carries the snapshot's
    /// `lock_version`; any interleaved commit bumps the version and this
    /// call returns `409 CONFLICT` so the caller can reload and retry.
    pub async fn persist(&self, job: &Model, change: JobChange) -> Result<Model, ApiError> {
        let current = job_status(job)?;
        if !current.can_transition(change.status) {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                format!(
                    "Illegal status transition {} -> {}",
                    current, change.status
                ),
            ));
        }

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(change.status.as_str()))
            .col_expr(Column::Processed, Expr::value(change.processed))
            .col_expr(Column::Results, Expr::value(change.results))
            .col_expr(Column::LastId, Expr::value(change.last_id))
            .col_expr(Column::ResultFile, Expr::value(change.result_file))
            .col_expr(Column::Error, Expr::value(change.error))
            .col_expr(Column::StartedAt, Expr::value(change.started_at))
            .col_expr(Column::FinishedAt, Expr::value(change.finished_at))
            .col_expr(Column::LockVersion, Expr::value(job.lock_version + 1))
            .col_expr(
                Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(Column::Id.eq(job.id))
            .filter(Column::LockVersion.eq(job.lock_version))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to persist report job {}: {}", job.id, e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to persist report job",
                )
            })?;

        if result.rows_affected == 0 {
            tracing::warn!(
                job_id = %job.id,
                lock_version = job.lock_version,
                "Stale job snapshot, refusing to persist"
            );
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "Job was modified concurrently",
            ));
        }

        self.find(job.id).await?.ok_or_else(|| {
            tracing::error!(job_id = %job.id, "Report job disappeared after update");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Report job disappeared after update",
            )
        })
    }

    /// Record the report artifact URL without touching the job status.
    ///
    /// Used after a terminal status has already been committed (cancel and
    /// finishing paths build their workbook best-effort afterwards), so the
    /// transition table never has to admit a terminal re-entry.
    pub async fn attach_result_file(&self, job: &Model, url: &str) -> Result<Model, ApiError> {
        let result = Entity::update_many()
            .col_expr(Column::ResultFile, Expr::value(Some(url.to_string())))
            .col_expr(Column::LockVersion, Expr::value(job.lock_version + 1))
            .col_expr(
                Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(Column::Id.eq(job.id))
            .filter(Column::LockVersion.eq(job.lock_version))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to attach result file to job {}: {}", job.id, e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to attach result file",
                )
            })?;

        if result.rows_affected == 0 {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "Job was modified concurrently",
            ));
        }

        self.find(job.id).await?.ok_or_else(|| {
            tracing::error!(job_id = %job.id, "Report job disappeared after update");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Report job disappeared after update",
            )
        })
    }

    /// Fold a finished extraction step into a job that was canceled mid-step.
    ///
    /// A step that loses the version race to a concurrent stop still carries a
    /// completed row result. The canceled status stays in place; only the
    /// result payload, counters and cursor advance, and only while the row
    /// still holds the reloaded snapshot's version and canceled status.
    pub async fn merge_step_into_canceled(
        &self,
        job: &Model,
        results: serde_json::Value,
        processed: i32,
        last_id: Option<String>,
    ) -> Result<Model, ApiError> {
        let result = Entity::update_many()
            .col_expr(Column::Results, Expr::value(results))
            .col_expr(Column::Processed, Expr::value(processed))
            .col_expr(Column::LastId, Expr::value(last_id))
            .col_expr(Column::LockVersion, Expr::value(job.lock_version + 1))
            .col_expr(
                Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(Column::Id.eq(job.id))
            .filter(Column::LockVersion.eq(job.lock_version))
            .filter(Column::Status.eq(JobStatus::Canceled.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to merge step into canceled job {}: {}", job.id, e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to merge step into canceled job",
                )
            })?;

        if result.rows_affected == 0 {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "Job was modified concurrently",
            ));
        }

        self.find(job.id).await?.ok_or_else(|| {
            tracing::error!(job_id = %job.id, "Report job disappeared after update");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Report job disappeared after update",
            )
        })
    }
}
