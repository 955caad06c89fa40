//! Shared job data shapes: uploaded input rows and per-row extraction results.
//!
//! Both shapes are stored inside the job's JSON columns and surfaced verbatim
//! through the API, so they carry serde and schema derives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Normalize one uploaded cell: trim, drop dashes, collapse inner whitespace
/// runs to a single space, uppercase.
///
/// The same normalization produces the match key used when results are joined
/// back to input rows, so matching stays stable across re-parses.
pub fn normalize_cell(raw: &str) -> String {
    let without_dashes = raw.replace('-', "");
    without_dashes
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// One uploaded (article, brand) pair, post-normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct InputRow {
    /// Supplier article code
    pub article: String,
    /// Brand or manufacturer name
    pub brand: String,
}

impl InputRow {
    /// Build a row from raw spreadsheet cells. Returns `None` when either
    /// side normalizes to empty, so blank lines never enter a job.
    pub fn from_cells(article: &str, brand: &str) -> Option<Self> {
        let article = normalize_cell(article);
        let brand = normalize_cell(brand);
        if article.is_empty() || brand.is_empty() {
            return None;
        }
        Some(Self { article, brand })
    }

    /// Match key for joining results back to rows.
    pub fn key(&self) -> (String, String) {
        (normalize_cell(&self.article), normalize_cell(&self.brand))
    }
}

/// Per-row extraction outcome carried in the job's results array, in input
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RowResult {
    /// Article code this result belongs to
    pub article: String,
    /// Brand this result belongs to
    pub brand: String,
    /// Up to three competitor unit prices, best candidates first
    #[serde(default)]
    pub prices: Vec<f64>,
    /// Monthly statistic values keyed by the label observed on the site
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    /// Optional extraction annotation (which strategy produced the prices)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<String>,
}

impl RowResult {
    /// An empty result for a row that yielded no data. The row still counts
    /// as processed.
    pub fn empty(row: &InputRow) -> Self {
        Self {
            article: row.article.clone(),
            brand: row.brand.clone(),
            prices: Vec::new(),
            stats: BTreeMap::new(),
            ai: None,
        }
    }

    /// Match key for joining this result back to its input row.
    pub fn key(&self) -> (String, String) {
        (normalize_cell(&self.article), normalize_cell(&self.brand))
    }
}
