//! Report assembly: stored job results laid out as a one-sheet workbook.
//!
//! Two variants share the same grid shape. A finalized report spans every
//! month of the requested period; a stop-time report only spans the months
//! actually observed, so partial progress is never discarded.

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate};

use crate::jobs::types::{InputRow, RowResult};
use crate::workbook::{Cell, WorkbookError, writer};

const REPORT_TITLE: &str = "Отчет по ценам конкурентов";
const SHEET_NAME: &str = "Prices";
const PRICE_COLUMNS: usize = 3;

/// Report over the full requested month range, one column per month whether
/// observed or not.
pub fn full_range_report(
    input_rows: &[InputRow],
    results: &[RowResult],
    period_from: NaiveDate,
    period_to: NaiveDate,
) -> Result<Vec<u8>, WorkbookError> {
    let labels = month_labels_in_range(period_from, period_to);
    let grid = assemble(input_rows, results, &labels);
    writer::write_workbook(SHEET_NAME, &grid)
}

/// Best-effort report over whatever was observed: month columns are the
/// union of labels present in the results.
pub fn partial_report(
    input_rows: &[InputRow],
    results: &[RowResult],
) -> Result<Vec<u8>, WorkbookError> {
    let labels = observed_month_labels(results);
    let grid = assemble(input_rows, results, &labels);
    writer::write_workbook(SHEET_NAME, &grid)
}

/// One data row per input row in original order. Results are joined by the
/// normalized (article, brand) key with the stored index as fallback, so
/// partially processed jobs keep every produced result.
fn assemble(input_rows: &[InputRow], results: &[RowResult], labels: &[String]) -> Vec<Vec<Cell>> {
    let mut by_key: HashMap<(String, String), &RowResult> = HashMap::new();
    for result in results {
        by_key.entry(result.key()).or_insert(result);
    }

    let mut grid = Vec::with_capacity(input_rows.len() + 2);
    grid.push(vec![Cell::text(REPORT_TITLE)]);
    grid.push(header_row(labels));

    for (idx, row) in input_rows.iter().enumerate() {
        let result = by_key
            .get(&row.key())
            .copied()
            .or_else(|| results.get(idx).filter(|r| r.key() == row.key()));
        grid.push(data_row(row, result, labels));
    }

    grid
}

fn header_row(labels: &[String]) -> Vec<Cell> {
    let mut header = vec![Cell::text("Article"), Cell::text("Brand")];
    for i in 1..=PRICE_COLUMNS {
        header.push(Cell::text(format!("Price {i}")));
    }
    for label in labels {
        header.push(Cell::text(label.clone()));
    }
    header.push(Cell::text("AI note"));
    header
}

fn data_row(row: &InputRow, result: Option<&RowResult>, labels: &[String]) -> Vec<Cell> {
    let mut cells = vec![Cell::text(row.article.clone()), Cell::text(row.brand.clone())];

    for i in 0..PRICE_COLUMNS {
        match result.and_then(|r| r.prices.get(i)) {
            Some(price) => cells.push(Cell::Number(*price)),
            None => cells.push(Cell::Empty),
        }
    }

    for label in labels {
        match result.and_then(|r| r.stats.get(label)) {
            Some(value) => cells.push(Cell::Number(*value)),
            None => cells.push(Cell::Empty),
        }
    }

    match result.and_then(|r| r.ai.as_deref()) {
        Some(note) => cells.push(Cell::text(note)),
        None => cells.push(Cell::Empty),
    }
    cells
}

/// Canonical labels for every month between two dates, inclusive.
pub fn month_labels_in_range(from: NaiveDate, to: NaiveDate) -> Vec<String> {
    let mut labels = Vec::new();
    let (mut year, mut month) = (from.year(), from.month());
    let end = (to.year(), to.month());
    while (year, month) <= end {
        labels.push(format!("{year:04}-{month:02}"));
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    labels
}

/// Sorted union of month labels present in the results. Canonical labels
/// sort chronologically.
pub fn observed_month_labels(results: &[RowResult]) -> Vec<String> {
    let labels: BTreeSet<String> = results
        .iter()
        .flat_map(|r| r.stats.keys().cloned())
        .collect();
    labels.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(article: &str, brand: &str) -> InputRow {
        InputRow::from_cells(article, brand).unwrap()
    }

    fn result(article: &str, brand: &str, prices: &[f64], stats: &[(&str, f64)]) -> RowResult {
        RowResult {
            article: article.to_string(),
            brand: brand.to_string(),
            prices: prices.to_vec(),
            stats: stats
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            ai: None,
        }
    }

    #[test]
    fn spans_every_month_of_the_period() {
        let labels = month_labels_in_range(
            NaiveDate::from_ymd_opt(2023, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
        );
        assert_eq!(labels, ["2023-11", "2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn grid_has_title_header_and_one_row_per_input() {
        let inputs = [row("A1", "Acme"), row("B2", "Brandco"), row("C3", "Corp")];
        let results = [
            result("A1", "ACME", &[100.0, 120.0], &[("2024-01", 5.0)]),
            result("B2", "BRANDCO", &[90.0], &[("2024-02", 2.0)]),
            result("C3", "CORP", &[], &[]),
        ];
        let grid = assemble(&inputs, &results, &["2024-01".into(), "2024-02".into()]);

        assert_eq!(grid.len(), 5);
        // Article, Brand, 3 price slots, 2 months, AI note
        assert_eq!(grid[1].len(), 8);
        assert_eq!(grid[2][2], Cell::Number(100.0));
        assert_eq!(grid[2][5], Cell::Number(5.0));
        assert_eq!(grid[3][6], Cell::Number(2.0));
        // Third row timed out: every price slot blank
        assert_eq!(grid[4][2], Cell::Empty);
        assert_eq!(grid[4][3], Cell::Empty);
        assert_eq!(grid[4][4], Cell::Empty);
    }

    #[test]
    fn joins_results_by_normalized_key() {
        let inputs = [row("a-1", "acme"), row("b-2", "brandco")];
        // Results stored in reverse order; the key join must still land them.
        let results = [
            result("B2", "BRANDCO", &[50.0], &[]),
            result("A1", "ACME", &[75.0], &[]),
        ];
        let grid = assemble(&inputs, &results, &[]);
        assert_eq!(grid[2][2], Cell::Number(75.0));
        assert_eq!(grid[3][2], Cell::Number(50.0));
    }

    #[test]
    fn partial_labels_are_the_observed_union_sorted() {
        let results = [
            result("A", "B", &[], &[("2024-03", 1.0), ("2024-01", 2.0)]),
            result("C", "D", &[], &[("2023-12", 9.0)]),
        ];
        assert_eq!(
            observed_month_labels(&results),
            ["2023-12", "2024-01", "2024-03"]
        );
    }
}
