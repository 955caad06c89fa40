//! # Report Job API Handlers
//!
//! Handlers for creating report jobs from uploaded workbooks, inspecting and
//! listing them, driving them forward one step at a time, and streaming their
//! progress as server-sent events.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{
        Json,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::NaiveDate;
use futures::stream::Stream;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, validation_error};
use crate::joblog::JobLog;
use crate::jobs::engine::decode_results;
use crate::jobs::{ALL_JOB_STATUSES, RowResult, parse_job_status};
use crate::models::report_job::Model;
use crate::repositories::{ReportJobRepository, job_status};
use crate::server::AppState;
use crate::workbook::reader::read_input_rows;

/// Query parameters for listing report jobs
#[derive(Debug, Deserialize)]
pub struct ListReportsQuery {
    /// Filter by job status (one of: pending, running, done, error, canceled)
    pub status: Option<String>,
    /// Maximum number of jobs to return (default: 50, max: 100)
    pub limit: Option<u32>,
}

/// Documented job status values for OpenAPI enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatusParam {
    Pending,
    Running,
    Done,
    Error,
    Canceled,
}

/// Report job summary response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportJobInfo {
    /// Unique identifier for the report job
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    /// Current status of the job
    #[schema(example = "running")]
    pub status: String,
    /// First month of the requested statistics range (YYYY-MM-DD)
    #[schema(example = "2024-01-01")]
    pub period_from: String,
    /// Last month of the requested statistics range (YYYY-MM-DD)
    #[schema(example = "2024-03-31")]
    pub period_to: String,
    /// Number of input rows accepted at creation
    #[schema(example = 120)]
    pub total: i32,
    /// Number of rows processed so far
    #[schema(example = 37)]
    pub processed: i32,
    /// Upstream pagination cursor carried between steps
    pub last_id: Option<String>,
    /// Durable URL of the generated report, once one was stored
    pub result_file: Option<String>,
    /// Failure description when the job errored
    pub error: Option<String>,
    /// Timestamp when the job was created
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub created_at: String,
    /// Timestamp when the job was last updated
    #[schema(example = "2024-01-15T10:31:00Z")]
    pub updated_at: String,
    /// Timestamp when the first step began execution
    pub started_at: Option<String>,
    /// Timestamp when the job reached a terminal status
    pub finished_at: Option<String>,
}

impl From<&Model> for ReportJobInfo {
    fn from(model: &Model) -> Self {
        Self {
            id: model.id.to_string(),
            status: model.status.clone(),
            period_from: model.period_from.format("%Y-%m-%d").to_string(),
            period_to: model.period_to.format("%Y-%m-%d").to_string(),
            total: model.total,
            processed: model.processed,
            last_id: model.last_id.clone(),
            result_file: model.result_file.clone(),
            error: model.error.clone(),
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Report job response including the accumulated per-row results
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportJobDetail {
    /// Unique identifier for the report job
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    /// Current status of the job
    #[schema(example = "running")]
    pub status: String,
    /// First month of the requested statistics range (YYYY-MM-DD)
    #[schema(example = "2024-01-01")]
    pub period_from: String,
    /// Last month of the requested statistics range (YYYY-MM-DD)
    #[schema(example = "2024-03-31")]
    pub period_to: String,
    /// Number of input rows accepted at creation
    #[schema(example = 120)]
    pub total: i32,
    /// Number of rows processed so far
    #[schema(example = 37)]
    pub processed: i32,
    /// Ordered per-row extraction results accumulated so far
    pub results: Vec<RowResult>,
    /// Upstream pagination cursor carried between steps
    pub last_id: Option<String>,
    /// Durable URL of the generated report, once one was stored
    pub result_file: Option<String>,
    /// Failure description when the job errored
    pub error: Option<String>,
    /// Timestamp when the job was created
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub created_at: String,
    /// Timestamp when the job was last updated
    #[schema(example = "2024-01-15T10:31:00Z")]
    pub updated_at: String,
    /// Timestamp when the first step began execution
    pub started_at: Option<String>,
    /// Timestamp when the job reached a terminal status
    pub finished_at: Option<String>,
}

impl ReportJobDetail {
    fn from_model(model: &Model) -> Result<Self, ApiError> {
        let info = ReportJobInfo::from(model);
        Ok(Self {
            id: info.id,
            status: info.status,
            period_from: info.period_from,
            period_to: info.period_to,
            total: info.total,
            processed: info.processed,
            results: decode_results(model)?,
            last_id: info.last_id,
            result_file: info.result_file,
            error: info.error,
            created_at: info.created_at,
            updated_at: info.updated_at,
            started_at: info.started_at,
            finished_at: info.finished_at,
        })
    }
}

/// Response payload for the report jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportsResponse {
    /// Jobs matching the query, newest first
    pub reports: Vec<ReportJobInfo>,
}

/// Create a report job from an uploaded workbook
#[utoipa::path(
    post,
    path = "/reports",
    request_body(
        content_type = "multipart/form-data",
        description = "Form fields: `file` (xlsx with article/brand columns), `period_from` and `period_to` (YYYY-MM-DD)"
    ),
    responses(
        (status = 201, description = "Report job created", body = ReportJobDetail),
        (status = 400, description = "Missing or invalid upload fields", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "reports"
)]
pub async fn create_report(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ReportJobDetail>), ApiError> {
    let mut file: Option<Bytes> = None;
    let mut period_from_raw: Option<String> = None;
    let mut period_to_raw: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => file = Some(field.bytes().await?),
            Some("period_from") => period_from_raw = Some(field.text().await?),
            Some("period_to") => period_to_raw = Some(field.text().await?),
            // Unknown parts are ignored so clients may send extra metadata
            _ => {}
        }
    }

    let Some(file) = file else {
        return Err(validation_error(
            "Missing file",
            json!({
                "file": "multipart field 'file' with the xlsx upload is required"
            }),
        ));
    };
    let period_from = parse_period_field(period_from_raw.as_deref(), "period_from")?;
    let period_to = parse_period_field(period_to_raw.as_deref(), "period_to")?;
    if period_from > period_to {
        return Err(validation_error(
            "Invalid period",
            json!({
                "period_from": "must not be after period_to"
            }),
        ));
    }

    let input_rows = read_input_rows(&file, state.config.ingest.max_rows)?;

    let repo = ReportJobRepository::new(state.db.clone());
    let job = repo.create(period_from, period_to, &input_rows).await?;
    state
        .joblog
        .append(
            job.id,
            &format!(
                "job created: {} rows, period {} - {}",
                job.total,
                job.period_from.format("%Y-%m-%d"),
                job.period_to.format("%Y-%m-%d"),
            ),
        )
        .await;

    Ok((StatusCode::CREATED, Json(ReportJobDetail::from_model(&job)?)))
}

fn parse_period_field(raw: Option<&str>, field: &str) -> Result<NaiveDate, ApiError> {
    let Some(raw) = raw else {
        return Err(validation_error(
            "Missing period",
            json!({ field: "multipart field is required (YYYY-MM-DD)" }),
        ));
    };
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        validation_error(
            "Invalid period",
            json!({ field: "must be a date in YYYY-MM-DD format" }),
        )
    })
}

/// List report jobs, newest first
#[utoipa::path(
    get,
    path = "/reports",
    params(
        ("status" = Option<ReportStatusParam>, Query, description = "Filter by job status"),
        ("limit" = Option<u32>, Query, description = "Maximum number of jobs to return (default 50, max 100)")
    ),
    responses(
        (status = 200, description = "Report jobs matching the query", body = ReportsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "reports"
)]
pub async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ListReportsQuery>,
) -> Result<Json<ReportsResponse>, ApiError> {
    let limit = if let Some(limit_val) = params.limit {
        if limit_val > 100 {
            return Err(validation_error(
                "Invalid limit",
                json!({
                    "limit": "Maximum allowed limit is 100"
                }),
            ));
        } else if limit_val == 0 {
            return Err(validation_error(
                "Invalid limit",
                json!({
                    "limit": "Minimum allowed limit is 1"
                }),
            ));
        }
        limit_val
    } else {
        50 // Default limit
    };

    let status_filter = if let Some(status_str) = &params.status {
        match parse_job_status(status_str) {
            Some(status) => Some(status),
            None => {
                let allowed = ALL_JOB_STATUSES
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(validation_error(
                    "Invalid status",
                    json!({
                        "status": format!("Must be one of: {}", allowed)
                    }),
                ));
            }
        }
    } else {
        None
    };

    let repo = ReportJobRepository::new(state.db.clone());
    let jobs = repo.list(status_filter, u64::from(limit)).await?;

    Ok(Json(ReportsResponse {
        reports: jobs.iter().map(ReportJobInfo::from).collect(),
    }))
}

/// Fetch one report job including its accumulated results
#[utoipa::path(
    get,
    path = "/reports/{id}",
    params(
        ("id" = String, Path, description = "Report job identifier (UUID)")
    ),
    responses(
        (status = 200, description = "Report job", body = ReportJobDetail),
        (status = 400, description = "Malformed job identifier", body = ApiError),
        (status = 404, description = "No such report job", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "reports"
)]
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportJobDetail>, ApiError> {
    let job_id = parse_report_id(&id)?;
    let repo = ReportJobRepository::new(state.db.clone());
    let job = repo.find(job_id).await?.ok_or_else(report_not_found)?;
    Ok(Json(ReportJobDetail::from_model(&job)?))
}

/// Advance a report job by exactly one input row
#[utoipa::path(
    post,
    path = "/reports/{id}/step",
    params(
        ("id" = String, Path, description = "Report job identifier (UUID)")
    ),
    responses(
        (status = 200, description = "Job after the step; terminal jobs are returned unchanged", body = ReportJobDetail),
        (status = 400, description = "Malformed job identifier", body = ApiError),
        (status = 404, description = "No such report job", body = ApiError),
        (status = 409, description = "A concurrent writer advanced the job first", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "reports"
)]
pub async fn step_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportJobDetail>, ApiError> {
    let job_id = parse_report_id(&id)?;
    let job = state.engine.step(job_id).await?;
    Ok(Json(ReportJobDetail::from_model(&job)?))
}

/// Cancel a report job and store a partial report best-effort
#[utoipa::path(
    post,
    path = "/reports/{id}/stop",
    params(
        ("id" = String, Path, description = "Report job identifier (UUID)")
    ),
    responses(
        (status = 200, description = "The canceled job; already-terminal jobs are returned unchanged", body = ReportJobDetail),
        (status = 400, description = "Malformed job identifier", body = ApiError),
        (status = 404, description = "No such report job", body = ApiError),
        (status = 409, description = "Concurrent steps kept winning the version race", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "reports"
)]
pub async fn stop_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportJobDetail>, ApiError> {
    let job_id = parse_report_id(&id)?;
    let job = state.engine.stop(job_id).await?;
    Ok(Json(ReportJobDetail::from_model(&job)?))
}

/// Generate and attach the full-range report for a completed job
#[utoipa::path(
    post,
    path = "/reports/{id}/finalize",
    params(
        ("id" = String, Path, description = "Report job identifier (UUID)")
    ),
    responses(
        (status = 200, description = "Job with the report attached; idempotent once done", body = ReportJobDetail),
        (status = 400, description = "Malformed job identifier", body = ApiError),
        (status = 404, description = "No such report job", body = ApiError),
        (status = 409, description = "Job is canceled or has not processed all rows", body = ApiError),
        (status = 500, description = "Report generation or storage failed", body = ApiError)
    ),
    tag = "reports"
)]
pub async fn finalize_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportJobDetail>, ApiError> {
    let job_id = parse_report_id(&id)?;
    let job = state.engine.finalize(job_id).await?;
    Ok(Json(ReportJobDetail::from_model(&job)?))
}

/// Stream job progress as server-sent events
///
/// Emits a `snapshot` event whenever the job row changed and a `log` event per
/// new job log line, polling at the configured cadence. The stream closes
/// after the terminal snapshot has been sent.
#[utoipa::path(
    get,
    path = "/reports/{id}/stream",
    params(
        ("id" = String, Path, description = "Report job identifier (UUID)")
    ),
    responses(
        (status = 200, description = "text/event-stream of snapshot and log events, closing once the job is terminal"),
        (status = 400, description = "Malformed job identifier", body = ApiError),
        (status = 404, description = "No such report job", body = ApiError)
    ),
    tag = "reports"
)]
pub async fn stream_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let job_id = parse_report_id(&id)?;
    let repo = ReportJobRepository::new(state.db.clone());
    repo.find(job_id).await?.ok_or_else(report_not_found)?;

    let cursor = StreamCursor {
        repo,
        joblog: state.joblog.clone(),
        job_id,
        poll: Duration::from_millis(state.config.jobs.stream_poll_ms),
        last_updated: None,
        log_offset: 0,
        queued: VecDeque::new(),
        closing: false,
        started: false,
    };
    let stream = futures::stream::unfold(cursor, next_stream_event);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// Polling state threaded through the SSE stream.
struct StreamCursor {
    repo: ReportJobRepository,
    joblog: JobLog,
    job_id: Uuid,
    poll: Duration,
    last_updated: Option<DateTimeWithTimeZone>,
    log_offset: u64,
    queued: VecDeque<Event>,
    closing: bool,
    started: bool,
}

/// Produce the next SSE event, polling the job row and tailing its log.
///
/// Events queue up per poll (log lines first, then the snapshot) so the
/// terminal snapshot is always the final event before the stream ends.
async fn next_stream_event(
    mut cursor: StreamCursor,
) -> Option<(Result<Event, Infallible>, StreamCursor)> {
    loop {
        if let Some(event) = cursor.queued.pop_front() {
            return Some((Ok(event), cursor));
        }
        if cursor.closing {
            return None;
        }

        if cursor.started {
            tokio::time::sleep(cursor.poll).await;
        }
        cursor.started = true;

        let (lines, next_offset) = cursor.joblog.read_from(cursor.job_id, cursor.log_offset).await;
        cursor.log_offset = next_offset;
        for line in lines {
            cursor.queued.push_back(Event::default().event("log").data(line));
        }

        let job = match cursor.repo.find(cursor.job_id).await {
            Ok(Some(job)) => job,
            // A vanished row or a failing poll ends the stream after any
            // queued lines drain.
            Ok(None) | Err(_) => {
                cursor.closing = true;
                continue;
            }
        };

        if cursor.last_updated != Some(job.updated_at) {
            cursor.last_updated = Some(job.updated_at);
            match Event::default()
                .event("snapshot")
                .json_data(ReportJobInfo::from(&job))
            {
                Ok(event) => cursor.queued.push_back(event),
                Err(err) => warn!(job_id = %job.id, error = %err, "failed to encode snapshot event"),
            }
        }

        let terminal = job_status(&job).map(|s| s.is_terminal()).unwrap_or(true);
        if terminal {
            cursor.closing = true;
        }
    }
}

fn parse_report_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        validation_error(
            "Invalid report id",
            json!({
                "id": "Must be a valid UUID"
            }),
        )
    })
}

fn report_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Report job not found")
}
