//! # Pricehound API Library
//!
//! Core functionality for the Pricehound service: competitor price extraction
//! from an authenticated pricing-site session, resumable report jobs, and the
//! HTTP surface that drives them.

pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod joblog;
pub mod jobs;
pub mod models;
pub mod report;
pub mod repositories;
pub mod scrape;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod workbook;
pub use migration;
