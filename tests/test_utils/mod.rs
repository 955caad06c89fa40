//! Test utilities for integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied, a step
//! engine wired to temp-dir storage, workbook builders, and canned pages for
//! the mocked pricing site.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use url::Url;

use pricehound::joblog::JobLog;
use pricehound::jobs::{ReportPublisher, StepEngine};
use pricehound::repositories::ReportJobRepository;
use pricehound::scrape::{ScrapeConfig, Scraper};
use pricehound::storage::ArtifactStore;
use pricehound::workbook::{Cell, writer::write_workbook};

/// Public URL prefix the test artifact store hands out.
#[allow(dead_code)]
pub const ARTIFACT_BASE: &str = "http://files.test/reports/";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Scrape configuration pointed at a mock site, with the cookie jar persisted
/// under `dir`.
#[allow(dead_code)]
pub fn site_config(site_base: &str, dir: &Path) -> Arc<ScrapeConfig> {
    Arc::new(ScrapeConfig {
        base_url: Url::parse(site_base).expect("mock site URI parses"),
        login_path: "/login".to_string(),
        stats_path: "/statistic".to_string(),
        username: "tester@example.com".to_string(),
        password: "hunter2".to_string(),
        user_agent: "pricehound-tests".to_string(),
        session_file: dir.join("session.json"),
        session_ttl: Duration::from_secs(12 * 3600),
        nav_timeout: Duration::from_secs(5),
    })
}

/// A step engine plus the handles tests assert against.
#[allow(dead_code)]
pub struct TestEngine {
    pub engine: StepEngine,
    pub repo: ReportJobRepository,
    pub joblog: JobLog,
    pub storage_root: PathBuf,
}

/// Wire a step engine against `db` and a (possibly unreachable) site base.
#[allow(dead_code)]
pub fn build_engine(
    db: &DatabaseConnection,
    site_base: &str,
    dir: &Path,
    row_timeout: Duration,
) -> TestEngine {
    let storage_root = dir.join("artifacts");
    let store = ArtifactStore::new(
        storage_root.clone(),
        Url::parse(ARTIFACT_BASE).expect("artifact base parses"),
    );
    let joblog = JobLog::new(dir.join("job-logs"));
    let repo = ReportJobRepository::new(db.clone());
    let engine = StepEngine::new(
        repo.clone(),
        Arc::new(Scraper::new(site_config(site_base, dir))),
        ReportPublisher::new(store),
        joblog.clone(),
        row_timeout,
    );
    TestEngine {
        engine,
        repo,
        joblog,
        storage_root,
    }
}

/// Build an uploadable input workbook with the standard Cyrillic headers.
#[allow(dead_code)]
pub fn input_workbook(rows: &[(&str, &str)]) -> Vec<u8> {
    let mut grid = vec![vec![Cell::text("Артикул"), Cell::text("Бренд")]];
    for (article, brand) in rows {
        grid.push(vec![Cell::text(*article), Cell::text(*brand)]);
    }
    write_workbook("Лист1", &grid).expect("input workbook builds")
}

/// Resolve an artifact URL produced by the test store to its on-disk path.
#[allow(dead_code)]
pub fn artifact_path(storage_root: &Path, url: &str) -> PathBuf {
    let key = url
        .strip_prefix(ARTIFACT_BASE)
        .expect("artifact URL carries the test base");
    storage_root.join(key)
}

/// Boundary used by [`multipart_upload`].
#[allow(dead_code)]
pub const MULTIPART_BOUNDARY: &str = "pricehound-int-tests";

/// Encode a report-creation upload: the workbook plus both period fields.
#[allow(dead_code)]
pub fn multipart_upload(file: &[u8], period_from: &str, period_to: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"rows.xlsx\"\r\nContent-Type: application/vnd.openxmlformats-officedocument.spreadsheetml.sheet\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    for (name, value) in [("period_from", period_from), ("period_to", period_to)] {
        body.extend_from_slice(
            format!(
                "\r\n--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

/// Home page carrying a logout affordance, the authenticated-session marker.
#[allow(dead_code)]
pub fn home_page_html() -> String {
    r#"<html><body><nav><a href="/logout">Выйти</a></nav></body></html>"#.to_string()
}

/// Login page with a standard credential form posting back to `/login`.
#[allow(dead_code)]
pub fn login_page_html() -> String {
    r#"<html><body>
        <form id="login" action="/login" method="post">
          <input type="text" name="login">
          <input type="password" name="password">
        </form>
    </body></html>"#
        .to_string()
}

/// Offers page: one `div.offer-item` per line, plus an optional statistics
/// link and an optional `rel=next` pagination link.
#[allow(dead_code)]
pub fn offers_page_html(
    offer_lines: &[&str],
    stats_href: Option<&str>,
    next_href: Option<&str>,
) -> String {
    let mut html = String::from("<html><body><div class=\"offers-list\">");
    for line in offer_lines {
        html.push_str(&format!("<div class=\"offer-item\">{line}</div>"));
    }
    html.push_str("</div>");
    if let Some(href) = stats_href {
        html.push_str(&format!("<a href=\"{href}\">Статистика</a>"));
    }
    if let Some(href) = next_href {
        html.push_str(&format!("<a rel=\"next\" href=\"{href}\">→</a>"));
    }
    html.push_str("</body></html>");
    html
}

/// Statistics page whose script references one in-page data endpoint.
#[allow(dead_code)]
pub fn stats_page_html(data_href: &str) -> String {
    format!("<html><body><div id=\"chart\"></div><script>fetch('{data_href}');</script></body></html>")
}

/// Chart-config payload with two months of the demand series.
#[allow(dead_code)]
pub fn stats_json() -> serde_json::Value {
    serde_json::json!({
        "categories": ["янв-24", "фев-24"],
        "series": [
            {"name": "Цена", "data": [990, 1010]},
            {"name": "Запросы", "data": [10, 20]}
        ]
    })
}
