//! # Job Driver
//!
//! Optional background service that keeps runnable report jobs moving without
//! an external caller hitting the step endpoint. Each tick claims jobs that
//! are pending or running and steps every one of them at most once through
//! the same engine the HTTP handlers use; the persist-time version guard
//! resolves any race with manual steps or a concurrent driver instance.

use std::sync::Arc;

use metrics::{counter, histogram};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::DriverConfig;
use crate::error::ApiError;
use crate::jobs::StepEngine;
use crate::repositories::ReportJobRepository;

/// Background driver advancing report jobs on a fixed tick.
#[derive(Clone)]
pub struct JobDriver {
    engine: StepEngine,
    repo: ReportJobRepository,
    config: DriverConfig,
}

#[derive(Debug, Default)]
struct TickStats {
    jobs_claimed: u64,
    steps_succeeded: u64,
    steps_conflicted: u64,
    steps_failed: u64,
}

impl JobDriver {
    pub fn new(engine: StepEngine, repo: ReportJobRepository, config: DriverConfig) -> Self {
        Self {
            engine,
            repo,
            config,
        }
    }

    /// Run the driver loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ApiError> {
        info!(
            tick_ms = self.config.tick_ms,
            concurrency = self.config.concurrency,
            "Starting job driver"
        );
        let tick_interval = TokioDuration::from_millis(self.config.tick_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job driver shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Job driver tick failed");
                    }
                    histogram!("job_driver_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Job driver stopped");
        Ok(())
    }

    /// Execute one tick: step every runnable job at most once.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<(), ApiError> {
        let mut stats = TickStats::default();

        let jobs = self.repo.find_runnable(self.config.claim_batch).await?;
        if jobs.is_empty() {
            debug!("No runnable report jobs");
            return Ok(());
        }
        stats.jobs_claimed = jobs.len() as u64;

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.concurrency));
        let mut handles = Vec::new();

        for job in jobs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| {
                    error!("Failed to acquire driver permit");
                    ApiError::new(
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_SERVER_ERROR",
                        "Failed to acquire driver permit",
                    )
                })?;

            let engine = self.engine.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                engine.step(job.id).await
            });
            handles.push(handle);
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => stats.steps_succeeded += 1,
                Ok(Err(e)) if e.status == axum::http::StatusCode::CONFLICT => {
                    // Someone else advanced or canceled the job first; expected.
                    stats.steps_conflicted += 1;
                    debug!(error = %e.message, "Driver step lost a version race");
                }
                Ok(Err(e)) => {
                    stats.steps_failed += 1;
                    error!(error = ?e, "Driver step failed");
                }
                Err(e) => {
                    stats.steps_failed += 1;
                    error!(error = ?e, "Driver step panicked or was cancelled");
                }
            }
        }

        counter!("report_job_steps_total").increment(stats.steps_succeeded);
        counter!("report_job_step_conflicts_total").increment(stats.steps_conflicted);
        counter!("report_job_step_failures_total").increment(stats.steps_failed);

        debug!(
            jobs_claimed = stats.jobs_claimed,
            steps_succeeded = stats.steps_succeeded,
            steps_conflicted = stats.steps_conflicted,
            steps_failed = stats.steps_failed,
            "Job driver tick completed"
        );

        Ok(())
    }
}
