//! Batch report jobs: the status machine, row payload types, and the engine
//! that advances a job one extraction unit at a time.

pub mod engine;
pub mod finalizer;
pub mod status;
pub mod types;

pub use engine::StepEngine;
pub use finalizer::ReportPublisher;
pub use status::{ALL_JOB_STATUSES, JobStatus, parse_job_status};
pub use types::{InputRow, RowResult, normalize_cell};
