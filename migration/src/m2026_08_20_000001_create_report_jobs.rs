//! Migration to create the report_jobs table.
//!
//! This migration creates the report_jobs table which represents long-running
//! price report builds: the uploaded input rows, per-row extraction results,
//! status, progress counters, and the produced report artifact.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReportJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReportJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(ReportJobs::PeriodFrom).date().not_null())
                    .col(ColumnDef::new(ReportJobs::PeriodTo).date().not_null())
                    .col(
                        ColumnDef::new(ReportJobs::Total)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::Processed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::InputRows)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::Results)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReportJobs::LastId).text().null())
                    .col(ColumnDef::new(ReportJobs::ResultFile).text().null())
                    .col(ColumnDef::new(ReportJobs::Error).text().null())
                    .col(
                        ColumnDef::new(ReportJobs::LockVersion)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ReportJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for claiming runnable jobs and for status-filtered listings,
        // newest first, using raw SQL for the DESC ordering
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_report_jobs_status_created ON report_jobs (status, created_at DESC)".to_string(),
            ))
            .await?;

        // Index for unfiltered newest-first listings
        manager
            .create_index(
                Index::create()
                    .name("idx_report_jobs_created")
                    .table(ReportJobs::Table)
                    .col(ReportJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_report_jobs_status_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_report_jobs_created").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ReportJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ReportJobs {
    Table,
    Id,
    Status,
    PeriodFrom,
    PeriodTo,
    Total,
    Processed,
    InputRows,
    Results,
    LastId,
    ResultFile,
    Error,
    LockVersion,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}
