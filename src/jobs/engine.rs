//! Step engine for report jobs.
//!
//! A job advances one extraction unit per invocation: the row at index
//! `results.len()` is scraped, its result appended and the whole change
//! committed through the repository's version-guarded persist. The engine is
//! shared by the HTTP step/stop/finalize handlers and the background driver,
//! so concurrent invocations against the same job are expected; the loser of
//! a version race reloads and either gives up with a conflict or, when a stop
//! won mid-extraction, folds its finished row into the canceled job.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::joblog::JobLog;
use crate::jobs::finalizer::ReportPublisher;
use crate::jobs::{InputRow, JobStatus, RowResult};
use crate::models::report_job::Model;
use crate::repositories::{JobChange, ReportJobRepository, job_status};
use crate::scrape::{RowExtract, Scraper};

/// How many times stop re-reads and retries when steps keep winning the
/// version race.
const STOP_RETRIES: usize = 3;

/// Advances report jobs one row at a time.
#[derive(Clone)]
pub struct StepEngine {
    repo: ReportJobRepository,
    scraper: Arc<Scraper>,
    publisher: ReportPublisher,
    joblog: JobLog,
    row_timeout: Duration,
}

impl StepEngine {
    pub fn new(
        repo: ReportJobRepository,
        scraper: Arc<Scraper>,
        publisher: ReportPublisher,
        joblog: JobLog,
        row_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            scraper,
            publisher,
            joblog,
            row_timeout,
        }
    }

    /// Process exactly one input row and persist the advanced state.
    ///
    /// Terminal jobs are returned unchanged. The final row's step also flips
    /// the job to done and attempts the report best-effort; a report failure
    /// leaves `result_file` empty but never undoes the done status.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn step(&self, job_id: Uuid) -> Result<Model, ApiError> {
        let mut job = self.load(job_id).await?;
        let status = job_status(&job)?;
        if status.is_terminal() {
            debug!(status = %status, "step on a terminal job is a no-op");
            return Ok(job);
        }

        // The first step commits the running status before any work happens,
        // so the result commit below is always made from `running` and
        // observers see the job start right away.
        if status == JobStatus::Pending {
            let mut start = JobChange::from_model(&job)?;
            start.status = JobStatus::Running;
            start.started_at = Some(Utc::now().into());
            job = self.repo.persist(&job, start).await?;
        }

        let input_rows = self.decode_or_fail(&job, decode_input_rows(&job)).await?;
        let mut results = self.decode_or_fail(&job, decode_results(&job)).await?;
        let index = results.len();

        if index >= input_rows.len() {
            // All rows already accounted for but the job never closed out.
            return self.finish(job, &input_rows, &results).await;
        }

        let row = input_rows[index].clone();
        info!(
            article = %row.article,
            brand = %row.brand,
            index,
            total = job.total,
            "Stepping report job"
        );

        let started = std::time::Instant::now();
        let extract = self.extract_with_timeout(&row, &job).await;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            prices = extract.prices.len(),
            months = extract.stats.len(),
            "Row extraction finished"
        );

        let result = RowResult {
            article: row.article.clone(),
            brand: row.brand.clone(),
            prices: extract.prices,
            stats: extract.stats,
            ai: extract.ai,
        };
        let line = step_line(index, input_rows.len(), &result);

        results.push(result);
        let processed = results.len() as i32;
        let next_last_id = extract.next_cursor.or_else(|| job.last_id.clone());

        let mut change = JobChange::from_model(&job)?;
        change.status = JobStatus::Running;
        change.processed = processed;
        change.results = encode_results(&results)?;
        change.last_id = next_last_id.clone();

        let finished = processed as usize >= input_rows.len();
        if finished {
            change.status = JobStatus::Done;
            change.finished_at = Some(Utc::now().into());
        }

        let updated = match self.repo.persist(&job, change).await {
            Ok(updated) => updated,
            Err(err) if err.status == StatusCode::CONFLICT => {
                return self
                    .merge_after_cancel(job_id, results, next_last_id, err)
                    .await;
            }
            Err(err) => return Err(err),
        };

        self.joblog.append(job_id, &line).await;

        if finished {
            self.joblog
                .append(
                    job_id,
                    &format!("job done: {}/{} rows", updated.processed, updated.total),
                )
                .await;
            info!(processed = updated.processed, "Report job finished");
            return Ok(self.try_publish_full(updated, &input_rows, &results).await);
        }

        Ok(updated)
    }

    /// Cancel a job and build a best-effort partial report from whatever it
    /// produced so far. Already-terminal jobs are returned unchanged.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn stop(&self, job_id: Uuid) -> Result<Model, ApiError> {
        let mut job = self.load(job_id).await?;

        for _ in 0..STOP_RETRIES {
            let status = job_status(&job)?;
            if status.is_terminal() {
                debug!(status = %status, "stop on a terminal job is a no-op");
                return Ok(job);
            }

            let mut change = JobChange::from_model(&job)?;
            change.status = JobStatus::Canceled;
            change.finished_at = Some(Utc::now().into());

            match self.repo.persist(&job, change).await {
                Ok(updated) => {
                    self.joblog
                        .append(
                            job_id,
                            &format!(
                                "job canceled at {}/{} rows",
                                updated.processed, updated.total
                            ),
                        )
                        .await;
                    info!(
                        processed = updated.processed,
                        total = updated.total,
                        "Report job canceled"
                    );
                    return Ok(self.publish_after_cancel(updated).await);
                }
                // A step slipped in between our read and write; re-read and retry.
                Err(err) if err.status == StatusCode::CONFLICT => {
                    job = self.load(job_id).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Err(ApiError::new(
            StatusCode::CONFLICT,
            "CONFLICT",
            "Job kept advancing while being canceled",
        )
        .with_retry_after(1))
    }

    /// Build and store the full-range report, transitioning the job to done
    /// when it is not there yet.
    ///
    /// Conflicts when the job has unprocessed rows, produced no results, or
    /// was canceled. A done job that already carries a result file is
    /// returned unchanged.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn finalize(&self, job_id: Uuid) -> Result<Model, ApiError> {
        let job = self.load(job_id).await?;
        let status = job_status(&job)?;

        if status == JobStatus::Canceled {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "Canceled job cannot be finalized",
            ));
        }
        if job.processed < job.total {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "Job has not processed all rows yet",
            ));
        }
        let results = decode_results(&job)?;
        if results.is_empty() {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "Job has no results to report",
            ));
        }
        if status == JobStatus::Done && job.result_file.is_some() {
            debug!("finalize on a finalized job is a no-op");
            return Ok(job);
        }

        let input_rows = decode_input_rows(&job)?;
        let url = self.publisher.publish_full(&job, &input_rows, &results).await?;

        let updated = if status == JobStatus::Done {
            self.repo.attach_result_file(&job, &url).await?
        } else {
            let mut change = JobChange::from_model(&job)?;
            change.status = JobStatus::Done;
            change.result_file = Some(url.clone());
            change.finished_at = Some(Utc::now().into());
            if change.started_at.is_none() {
                change.started_at = Some(Utc::now().into());
            }
            self.repo.persist(&job, change).await?
        };

        self.joblog
            .append(job_id, &format!("report finalized: {url}"))
            .await;
        Ok(updated)
    }

    async fn load(&self, job_id: Uuid) -> Result<Model, ApiError> {
        self.repo.find(job_id).await?.ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Report job not found")
        })
    }

    /// Mark the job failed when its stored payloads cannot be decoded, then
    /// surface the decode error.
    async fn decode_or_fail<T>(
        &self,
        job: &Model,
        decoded: Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        match decoded {
            Ok(value) => Ok(value),
            Err(err) => {
                self.fail_job(job, "corrupt job payload").await;
                Err(err)
            }
        }
    }

    async fn fail_job(&self, job: &Model, message: &str) {
        let change = match JobChange::from_model(job) {
            Ok(mut change) => {
                change.status = JobStatus::Error;
                change.error = Some(message.to_string());
                change.finished_at = Some(Utc::now().into());
                change
            }
            Err(_) => return,
        };
        if let Err(err) = self.repo.persist(job, change).await {
            warn!(job_id = %job.id, error = %err.message, "Could not mark job as failed");
        } else {
            self.joblog
                .append(job.id, &format!("job failed: {message}"))
                .await;
        }
    }

    /// Close out a running job whose rows are all accounted for.
    async fn finish(
        &self,
        job: Model,
        input_rows: &[InputRow],
        results: &[RowResult],
    ) -> Result<Model, ApiError> {
        let mut change = JobChange::from_model(&job)?;
        change.status = JobStatus::Done;
        change.finished_at = Some(Utc::now().into());

        let updated = self.repo.persist(&job, change).await?;
        self.joblog
            .append(
                updated.id,
                &format!("job done: {}/{} rows", updated.processed, updated.total),
            )
            .await;
        Ok(self.try_publish_full(updated, input_rows, results).await)
    }

    async fn extract_with_timeout(&self, row: &InputRow, job: &Model) -> RowExtract {
        match tokio::time::timeout(
            self.row_timeout,
            self.scraper
                .extract_row(row, job.last_id.as_deref(), job.period_from, job.period_to),
        )
        .await
        {
            Ok(extract) => extract,
            Err(_) => {
                warn!(article = %row.article, brand = %row.brand, "Row extraction timed out");
                RowExtract {
                    ai: Some(format!(
                        "extraction timed out after {}s",
                        self.row_timeout.as_secs()
                    )),
                    ..RowExtract::default()
                }
            }
        }
    }

    /// A completed step lost the version race; keep its row if a stop won.
    async fn merge_after_cancel(
        &self,
        job_id: Uuid,
        results: Vec<RowResult>,
        last_id: Option<String>,
        original: ApiError,
    ) -> Result<Model, ApiError> {
        let Some(reloaded) = self.repo.find(job_id).await? else {
            return Err(original);
        };
        if job_status(&reloaded)? != JobStatus::Canceled {
            return Err(original);
        }

        // Only fold our row in if nothing else advanced the job meanwhile.
        let reloaded_results = decode_results(&reloaded)?;
        if reloaded_results.len() + 1 != results.len() {
            return Err(original);
        }

        let merged = self
            .repo
            .merge_step_into_canceled(
                &reloaded,
                encode_results(&results)?,
                results.len() as i32,
                last_id,
            )
            .await?;
        self.joblog
            .append(job_id, "step result folded into canceled job")
            .await;
        info!("Folded completed step into canceled job");
        Ok(merged)
    }

    async fn try_publish_full(
        &self,
        job: Model,
        input_rows: &[InputRow],
        results: &[RowResult],
    ) -> Model {
        match self.publisher.publish_full(&job, input_rows, results).await {
            Ok(url) => self.record_result_file(job, &url).await,
            Err(err) => {
                warn!(job_id = %job.id, error = %err.message, "Report generation failed");
                self.joblog
                    .append(job.id, &format!("report generation failed: {}", err.message))
                    .await;
                job
            }
        }
    }

    async fn publish_after_cancel(&self, job: Model) -> Model {
        let input_rows = match decode_input_rows(&job) {
            Ok(rows) => rows,
            Err(_) => return job,
        };
        let results = match decode_results(&job) {
            Ok(results) => results,
            Err(_) => return job,
        };
        if results.is_empty() {
            return job;
        }

        match self
            .publisher
            .publish_partial(&job, &input_rows, &results)
            .await
        {
            Ok(url) => self.record_result_file(job, &url).await,
            Err(err) => {
                warn!(job_id = %job.id, error = %err.message, "Partial report generation failed");
                self.joblog
                    .append(job.id, &format!("report generation failed: {}", err.message))
                    .await;
                job
            }
        }
    }

    async fn record_result_file(&self, job: Model, url: &str) -> Model {
        self.joblog
            .append(job.id, &format!("report stored: {url}"))
            .await;
        match self.repo.attach_result_file(&job, url).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(job_id = %job.id, error = %err.message, "Could not record result file");
                job
            }
        }
    }
}

/// Decode the stored input rows, treating malformed payloads as corruption.
pub fn decode_input_rows(job: &Model) -> Result<Vec<InputRow>, ApiError> {
    serde_json::from_value(job.input_rows.clone()).map_err(|e| {
        tracing::error!(job_id = %job.id, "Corrupt input rows payload: {}", e);
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Corrupt input rows payload",
        )
    })
}

/// Decode the accumulated row results.
pub fn decode_results(job: &Model) -> Result<Vec<RowResult>, ApiError> {
    serde_json::from_value(job.results.clone()).map_err(|e| {
        tracing::error!(job_id = %job.id, "Corrupt results payload: {}", e);
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Corrupt results payload",
        )
    })
}

fn encode_results(results: &[RowResult]) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(results).map_err(|e| {
        tracing::error!("Failed to serialize results: {}", e);
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Failed to serialize results",
        )
    })
}

fn step_line(index: usize, total: usize, result: &RowResult) -> String {
    let detail = match &result.ai {
        Some(note) if result.prices.is_empty() && result.stats.is_empty() => {
            format!("failed: {note}")
        }
        Some(note) => format!(
            "{} price(s), {} month(s), note: {note}",
            result.prices.len(),
            result.stats.len()
        ),
        None => format!(
            "{} price(s), {} month(s)",
            result.prices.len(),
            result.stats.len()
        ),
    };
    format!(
        "step {}/{}: {} / {} -> {}",
        index + 1,
        total,
        result.article,
        result.brand,
        detail
    )
}
