//! Publication of report workbooks to durable storage.

use axum::http::StatusCode;
use tracing::info;

use crate::error::ApiError;
use crate::jobs::{InputRow, RowResult};
use crate::models::report_job::Model;
use crate::report;
use crate::storage::ArtifactStore;

/// Builds the result workbook for a job and uploads it, returning the public URL.
#[derive(Clone)]
pub struct ReportPublisher {
    store: ArtifactStore,
}

impl ReportPublisher {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Workbook spanning every month of the job's requested period.
    pub async fn publish_full(
        &self,
        job: &Model,
        input_rows: &[InputRow],
        results: &[RowResult],
    ) -> Result<String, ApiError> {
        let bytes = report::full_range_report(input_rows, results, job.period_from, job.period_to)
            .map_err(|e| {
                tracing::error!(job_id = %job.id, "Failed to build report workbook: {}", e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to build report workbook",
                )
            })?;
        self.store_workbook(job, bytes).await
    }

    /// Workbook spanning only the months the partial results observed.
    pub async fn publish_partial(
        &self,
        job: &Model,
        input_rows: &[InputRow],
        results: &[RowResult],
    ) -> Result<String, ApiError> {
        let bytes = report::partial_report(input_rows, results).map_err(|e| {
            tracing::error!(job_id = %job.id, "Failed to build partial report workbook: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to build report workbook",
            )
        })?;
        self.store_workbook(job, bytes).await
    }

    async fn store_workbook(&self, job: &Model, bytes: Vec<u8>) -> Result<String, ApiError> {
        // Stable name per job: a finalize after stop overwrites the partial artifact.
        let name = format!("report-{}.xlsx", job.id);
        let url = self.store.put(&name, &bytes).await.map_err(|e| {
            tracing::error!(job_id = %job.id, "Failed to store report workbook: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to store report workbook",
            )
        })?;

        info!(job_id = %job.id, url = %url, bytes = bytes.len(), "Stored report workbook");
        Ok(url)
    }
}
