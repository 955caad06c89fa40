//! Extraction pipeline against the third-party pricing site.
//!
//! One call to [`Scraper::extract_row`] drives the full per-row pipeline:
//! session check, offers-page navigation, statistics capture, and price
//! disambiguation. Every failure along the way degrades to an empty result —
//! the site is unreliable and partial batches remain valuable.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub mod capture;
pub mod navigator;
pub mod offers;
pub mod price;
pub mod series;
pub mod session;

use crate::jobs::types::InputRow;
use navigator::Navigator;
use session::SessionManager;

/// Everything the pipeline needs to know about the target site.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Site origin, e.g. `https://supplier-prices.example/`
    pub base_url: Url,
    /// Login page path relative to the origin
    pub login_path: String,
    /// Path fragment identifying statistics endpoints
    pub stats_path: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    /// Where the persisted cookie jar lives
    pub session_file: PathBuf,
    /// How long a persisted session is trusted before re-login
    pub session_ttl: Duration,
    /// Bound on every single page/endpoint fetch
    pub nav_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("session store io: {0}")]
    SessionStore(#[from] std::io::Error),
}

/// Outcome of one row's extraction. All fields empty is a legitimate result.
#[derive(Debug, Default)]
pub struct RowExtract {
    /// Up to three competitor unit prices
    pub prices: Vec<f64>,
    /// Monthly statistic values within the job's period, canonical labels
    pub stats: BTreeMap<String, f64>,
    /// Extraction annotation, when something had to be overridden
    pub ai: Option<String>,
    /// Pagination cursor observed on the offers page, if any
    pub next_cursor: Option<String>,
}

pub struct Scraper {
    config: Arc<ScrapeConfig>,
    session: SessionManager,
}

impl Scraper {
    pub fn new(config: Arc<ScrapeConfig>) -> Self {
        let session = SessionManager::new(config.clone());
        Self { config, session }
    }

    /// Run the full pipeline for one input row.
    pub async fn extract_row(
        &self,
        row: &InputRow,
        last_id: Option<&str>,
        period_from: NaiveDate,
        period_to: NaiveDate,
    ) -> RowExtract {
        let session = match self.session.ensure_logged_in().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "could not open a site session");
                return RowExtract {
                    ai: Some(format!("site session unavailable: {err}")),
                    ..RowExtract::default()
                };
            }
        };
        if !session.authenticated {
            debug!(article = %row.article, "extracting without an authenticated session");
        }

        let navigator = Navigator::new(session.client.clone(), self.config.clone());

        let offers_page = navigator
            .open_offers(&row.article, &row.brand, last_id)
            .await;
        if offers_page.is_empty() {
            return RowExtract {
                ai: Some("offers page unavailable".to_string()),
                ..RowExtract::default()
            };
        }

        let stats_page = navigator.open_statistics(&offers_page).await;
        let points = capture::capture_series(&stats_page, &self.config.stats_path);
        let stats = points
            .iter()
            .filter(|p| month_in_range(p.year, p.month, period_from, period_to))
            .map(|p| (p.canonical_label(), p.value))
            .collect();

        let (offers, ai) = offers::extract_offers(offers_page.html().unwrap_or(""));
        let prices = offers.iter().map(|offer| offer.price).collect();
        let next_cursor = navigator.next_cursor(&offers_page);

        RowExtract {
            prices,
            stats,
            ai,
            next_cursor,
        }
    }
}

/// Whether `(year, month)` lies within the inclusive month range spanned by
/// two dates.
pub fn month_in_range(year: i32, month: u32, from: NaiveDate, to: NaiveDate) -> bool {
    let point = (year, month);
    point >= (from.year(), from.month()) && point <= (to.year(), to.month())
}
