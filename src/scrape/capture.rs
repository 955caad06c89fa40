//! Recorded page traffic and statistics-response selection.
//!
//! Driving a page yields a sequence of HTTP exchanges. The statistics data
//! hides among chart-image refreshes and throwaway preliminary calls, so the
//! qualifying responses are scored and only the best one is parsed.

use super::series::{self, TimeSeriesPoint};

/// Query markers identifying re-rendered chart images rather than data.
const EXCLUDED_QUERY_MARKERS: &[&str] = &["refresh", "img", "image"];

/// One recorded HTTP exchange made while driving a page.
#[derive(Debug, Clone)]
pub struct CapturedExchange {
    /// Position in the recording; later exchanges win score ties.
    pub seq: u64,
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// A driven page: the document itself plus every exchange recorded while it
/// was alive. An unreachable page is represented by an empty handle, never an
/// error, so one dead row cannot fail a batch.
#[derive(Debug, Default)]
pub struct PageHandle {
    url: Option<String>,
    html: Option<String>,
    exchanges: Vec<CapturedExchange>,
}

impl PageHandle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_document(url: String, html: String) -> Self {
        Self {
            url: Some(url),
            html: Some(html),
            exchanges: Vec::new(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn exchanges(&self) -> &[CapturedExchange] {
        &self.exchanges
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_none() && self.exchanges.is_empty()
    }

    /// Record one exchange, assigning the next sequence number.
    pub fn record(&mut self, url: String, status: u16, content_type: String, body: String) {
        let seq = self.exchanges.len() as u64;
        self.exchanges.push(CapturedExchange {
            seq,
            url,
            status,
            content_type,
            body,
        });
    }

    /// Move every exchange recorded on `other` onto this handle, renumbering.
    pub fn absorb(&mut self, other: PageHandle) {
        for exchange in other.exchanges {
            self.record(
                exchange.url,
                exchange.status,
                exchange.content_type,
                exchange.body,
            );
        }
    }
}

/// Extract the monthly series from a driven statistics page. Zero points is a
/// valid outcome: the row still counts as processed.
pub fn capture_series(handle: &PageHandle, stats_path: &str) -> Vec<TimeSeriesPoint> {
    let Some(best) = select_statistics_response(handle.exchanges(), stats_path) else {
        return Vec::new();
    };
    series::parse_series(&best.body)
}

/// Pick the qualifying exchange with the highest payload score, preferring
/// the most recent one on ties.
pub fn select_statistics_response<'a>(
    exchanges: &'a [CapturedExchange],
    stats_path: &str,
) -> Option<&'a CapturedExchange> {
    exchanges
        .iter()
        .filter(|e| qualifies(e, stats_path))
        .max_by(|a, b| score(a).cmp(&score(b)).then(a.seq.cmp(&b.seq)))
}

fn qualifies(exchange: &CapturedExchange, stats_path: &str) -> bool {
    if !(200..300).contains(&exchange.status) {
        return false;
    }

    let (path, query) = match exchange.url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (exchange.url.as_str(), ""),
    };
    if !path.contains(stats_path) {
        return false;
    }

    let query = query.to_lowercase();
    !EXCLUDED_QUERY_MARKERS.iter().any(|m| query.contains(m))
}

/// `json_like * 10 + structured * 5 + min(5, body_len / 1000)`.
fn score(exchange: &CapturedExchange) -> i64 {
    let content_type = exchange.content_type.to_lowercase();
    let json_like = content_type.contains("json") || content_type.contains("javascript");

    let trimmed = exchange.body.trim_start();
    let structured = trimmed.starts_with('{') || trimmed.starts_with('[');

    let mut score = 0;
    if json_like {
        score += 10;
    }
    if structured {
        score += 5;
    }
    score + (exchange.body.len() as i64 / 1000).min(5)
}
