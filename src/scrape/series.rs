//! Monthly statistics parsing.
//!
//! The statistics payload arrives in whatever shape the site's chart stack
//! produced that week: clean chart-config JSON, JSON wrapped in markup, or a
//! raw script fragment with bare `categories`/`data` arrays. Parsing is a
//! cascade of pure functions over the body text; the first stage that yields
//! at least one point wins, and an empty series is a valid outcome.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// One resolved statistics point.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    pub year: i32,
    pub month: u32,
    pub value: f64,
}

impl TimeSeriesPoint {
    /// Canonical month key used across stored stats and report columns.
    pub fn canonical_label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Series names hinting at the demand statistic this pipeline is after.
const PREFERRED_SERIES_HINTS: &[&str] = &[
    "запрос", "поиск", "просмотр", "показ", "request", "search", "view",
];

static JSON_SUBSTRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json substring pattern is valid"));

static CATEGORIES_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"categories\s*:\s*\[([^\]]*)\]").expect("categories pattern is valid")
});

static DATA_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"data\s*:\s*\[([^\]]*)\]").expect("data pattern is valid"));

static DAY_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$").expect("dmy pattern is valid"));

static MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[.\-](\d{4})$").expect("my pattern is valid"));

static NAMED_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\p{L}+)[\s.\-]*(\d{4}|\d{2})$").expect("named month pattern is valid")
});

static PACKED_YEAR_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})(\d{2})$").expect("packed pattern is valid"));

/// Fixed month-name prefixes, Cyrillic and Latin.
const MONTH_PREFIXES: &[(&str, u32)] = &[
    ("янв", 1),
    ("фев", 2),
    ("мар", 3),
    ("апр", 4),
    ("май", 5),
    ("мая", 5),
    ("июн", 6),
    ("июл", 7),
    ("авг", 8),
    ("сен", 9),
    ("окт", 10),
    ("ноя", 11),
    ("дек", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

/// Parse a statistics body through the fallback cascade. Each stage returns
/// as soon as it produced at least one resolvable point.
pub fn parse_series(body: &str) -> Vec<TimeSeriesPoint> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let points = points_from_chart_config(&value);
        if !points.is_empty() {
            return points;
        }
    }

    if let Some(candidate) = JSON_SUBSTRING.find(body) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate.as_str()) {
            let points = points_from_chart_config(&value);
            if !points.is_empty() {
                return points;
            }
        }
    }

    points_from_script_text(body)
}

/// Stage 1/2: chart-config JSON with `categories` + `series` arrays.
fn points_from_chart_config(value: &Value) -> Vec<TimeSeriesPoint> {
    let Some(categories) = chart_categories(value) else {
        return Vec::new();
    };
    let Some(data) = chart_series_data(value) else {
        return Vec::new();
    };

    zip_points(&categories, &data)
}

fn chart_categories(value: &Value) -> Option<Vec<String>> {
    let raw = value
        .get("categories")
        .or_else(|| value.get("xAxis").and_then(|x| x.get("categories")))?
        .as_array()?;
    Some(
        raw.iter()
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

/// Pick the series whose name matches the demand-statistic hints, falling
/// back to the first one that carries data at all.
fn chart_series_data(value: &Value) -> Option<Vec<f64>> {
    let series = value.get("series")?.as_array()?;

    let preferred = series.iter().find(|s| {
        s.get("name")
            .and_then(Value::as_str)
            .map(|name| {
                let name = name.to_lowercase();
                PREFERRED_SERIES_HINTS.iter().any(|hint| name.contains(hint))
            })
            .unwrap_or(false)
    });

    let chosen = preferred.or_else(|| series.iter().find(|s| s.get("data").is_some()))?;
    let data = chosen.get("data")?.as_array()?;
    Some(data.iter().filter_map(numeric_value).collect())
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Stage 3: bare `categories: [...]` / `data: [...]` arrays inside script
/// text, split on commas with quotes stripped.
fn points_from_script_text(body: &str) -> Vec<TimeSeriesPoint> {
    let Some(categories) = CATEGORIES_ARRAY.captures(body) else {
        return Vec::new();
    };
    let Some(data) = DATA_ARRAY.captures(body) else {
        return Vec::new();
    };

    let labels = split_array_items(&categories[1]);
    let values: Vec<f64> = split_array_items(&data[1])
        .iter()
        .filter_map(|item| item.parse().ok())
        .collect();

    zip_points(&labels, &values)
}

fn split_array_items(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| {
            item.trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

fn zip_points(labels: &[String], values: &[f64]) -> Vec<TimeSeriesPoint> {
    labels
        .iter()
        .zip(values.iter())
        .filter_map(|(label, value)| {
            let (year, month) = resolve_month_label(label)?;
            Some(TimeSeriesPoint {
                year,
                month,
                value: *value,
            })
        })
        .collect()
}

/// Resolve one category label to `(year, month)`.
///
/// Tried in order: `DD.MM.YYYY` / `MM.YYYY` / `MM-YYYY` numerics, a fixed
/// month-name table (two-digit years assumed ≥ 2000), packed `YYYYMM`.
/// Anything that does not land on a month in 1..=12 is dropped silently.
pub fn resolve_month_label(label: &str) -> Option<(i32, u32)> {
    let label = label.trim();

    if let Some(caps) = DAY_MONTH_YEAR.captures(label) {
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return valid(year, month);
    }

    if let Some(caps) = MONTH_YEAR.captures(label) {
        let month: u32 = caps[1].parse().ok()?;
        let year: i32 = caps[2].parse().ok()?;
        return valid(year, month);
    }

    if let Some(caps) = NAMED_MONTH.captures(label) {
        let name = caps[1].to_lowercase();
        let month = MONTH_PREFIXES
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|(_, m)| *m)?;
        let year: i32 = caps[2].parse().ok()?;
        let year = if caps[2].len() == 2 { 2000 + year } else { year };
        return valid(year, month);
    }

    if let Some(caps) = PACKED_YEAR_MONTH.captures(label) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        return valid(year, month);
    }

    None
}

fn valid(year: i32, month: u32) -> Option<(i32, u32)> {
    ((1..=12).contains(&month)).then_some((year, month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chart_config_json() {
        let body = r#"{"categories":["янв-24","фев-24"],"series":[{"data":[10,20]}]}"#;
        let points = parse_series(body);
        assert_eq!(
            points,
            vec![
                TimeSeriesPoint {
                    year: 2024,
                    month: 1,
                    value: 10.0
                },
                TimeSeriesPoint {
                    year: 2024,
                    month: 2,
                    value: 20.0
                },
            ]
        );
    }

    #[test]
    fn prefers_demand_series_by_name() {
        let body = r#"{
            "categories": ["01.2024"],
            "series": [
                {"name": "Цена", "data": [99]},
                {"name": "Запросы", "data": [1500]}
            ]
        }"#;
        let points = parse_series(body);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 1500.0);
    }

    #[test]
    fn extracts_json_wrapped_in_markup() {
        let body = r#"<pre>{"categories":["03-2024"],"series":[{"data":[7]}]}</pre>"#;
        let points = parse_series(body);
        assert_eq!(points, vec![TimeSeriesPoint {
            year: 2024,
            month: 3,
            value: 7.0
        }]);
    }

    #[test]
    fn falls_back_to_script_text_arrays() {
        let body = r#"
            var chart = Highcharts.chart('stats', {
                xAxis: { categories: ['янв-24', 'фев-24', 'мар-24'] },
                series: [{ name: 'Запросы', data: [5, 0, 12] }]
            });
        "#;
        let points = parse_series(body);
        assert_eq!(points.len(), 3);
        assert_eq!(points[2], TimeSeriesPoint {
            year: 2024,
            month: 3,
            value: 12.0
        });
    }

    #[test]
    fn empty_body_yields_empty_series() {
        assert!(parse_series("").is_empty());
        assert!(parse_series("<html><body>нет данных</body></html>").is_empty());
    }

    #[test]
    fn resolves_numeric_labels() {
        assert_eq!(resolve_month_label("15.03.2024"), Some((2024, 3)));
        assert_eq!(resolve_month_label("03.2024"), Some((2024, 3)));
        assert_eq!(resolve_month_label("03-2024"), Some((2024, 3)));
        assert_eq!(resolve_month_label("13-2024"), None);
    }

    #[test]
    fn resolves_named_months() {
        assert_eq!(resolve_month_label("янв-24"), Some((2024, 1)));
        assert_eq!(resolve_month_label("Сентябрь 2023"), Some((2023, 9)));
        assert_eq!(resolve_month_label("dec 24"), Some((2024, 12)));
        assert_eq!(resolve_month_label("мая 2024"), Some((2024, 5)));
        assert_eq!(resolve_month_label("börk 2024"), None);
    }

    #[test]
    fn resolves_packed_labels() {
        assert_eq!(resolve_month_label("202406"), Some((2024, 6)));
        assert_eq!(resolve_month_label("202413"), None);
    }

    #[test]
    fn canonical_labels_sort_chronologically() {
        let a = TimeSeriesPoint {
            year: 2023,
            month: 12,
            value: 0.0,
        };
        let b = TimeSeriesPoint {
            year: 2024,
            month: 2,
            value: 0.0,
        };
        assert!(a.canonical_label() < b.canonical_label());
        assert_eq!(b.canonical_label(), "2024-02");
    }
}
