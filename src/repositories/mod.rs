//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for database entities, providing a clean API for data access.

pub mod report_job;

pub use report_job::{JobChange, ReportJobRepository, job_status};
