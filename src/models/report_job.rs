//! ReportJob entity model
//!
//! This module contains the SeaORM entity model for the report_jobs table,
//! which represents long-running price report builds over an uploaded list of
//! (article, brand) rows.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// ReportJob entity representing one resumable price report build
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "report_jobs")]
pub struct Model {
    /// Unique identifier for the report job (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Current status of the job (pending, running, done, error, canceled)
    pub status: String,

    /// First month of the requested statistics range (inclusive)
    pub period_from: Date,

    /// Last month of the requested statistics range (inclusive)
    pub period_to: Date,

    /// Number of input rows accepted at creation; never changes afterwards
    pub total: i32,

    /// Number of rows processed so far; grows monotonically up to total
    pub processed: i32,

    /// Ordered input rows as uploaded, post-normalization
    #[sea_orm(column_type = "JsonBinary")]
    pub input_rows: JsonValue,

    /// Ordered per-row extraction results accumulated so far
    #[sea_orm(column_type = "JsonBinary")]
    pub results: JsonValue,

    /// Upstream pagination cursor carried between steps of the same row
    pub last_id: Option<String>,

    /// Durable URL of the generated report, if one was stored
    pub result_file: Option<String>,

    /// Human-readable failure description when status is error
    pub error: Option<String>,

    /// Optimistic concurrency guard; every persisted step increments it
    pub lock_version: i32,

    /// Timestamp when the first step began execution
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job reached a terminal status
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the report job was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the report job was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
