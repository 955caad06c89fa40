//! Unit-price disambiguation over raw offer excerpts.
//!
//! Offer fragments on the target site frequently contain more than one number
//! with a currency attached: a minimum-order threshold ("Заказ от 3 000р."),
//! promotional figures, and the actual unit price. The scan is re-anchored on
//! currency tokens and each candidate is scored by its textual surroundings,
//! so the unit price survives even when an upstream pre-extraction already
//! guessed wrong.

use std::sync::LazyLock;

use regex::Regex;

/// A number immediately followed by a currency token. Thousand groups may be
/// separated by regular or non-breaking spaces, decimals by comma or point.
static CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<num>\d+(?:[ \u{A0}]\d{3})*(?:[.,]\d{1,2})?)[ \u{A0}]*(?P<cur>₽|руб\.?|р\.|rub|\$|usd|€|eur|₸|kzt)",
    )
    .expect("candidate pattern is valid")
});

/// Phrases marking a minimum-order threshold rather than a unit price.
const MIN_ORDER_PHRASES: &[&str] = &[
    "заказ от",
    "от партии",
    "минимальный заказ",
    "min. order",
    "order from",
];

/// Phrases marking an explicit unit-price context.
const PRICE_PHRASES: &[&str] = &["цена", "price"];

/// Characters of context inspected on each side of a candidate.
const CONTEXT_WINDOW: usize = 40;

/// One disambiguated unit price.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePick {
    pub value: f64,
    /// ISO-ish currency code the matched token canonicalizes to.
    pub currency: String,
}

/// Extract the most plausible unit price from a raw offer excerpt.
///
/// Candidates are every currency-anchored number in the text. Scoring:
/// a minimum-order phrase within the surrounding window costs 2, an explicit
/// price word earns 2, anything else is neutral. The best score wins; among
/// equals the later occurrence wins, because real prices tend to follow an
/// earlier min-order mention. Returns `None` when nothing qualifies — offers
/// are never fabricated.
pub fn pick_unit_price(raw: &str, declared_currency: Option<&str>) -> Option<PricePick> {
    let mut best: Option<(i32, usize, f64, String)> = None;

    for caps in CANDIDATE.captures_iter(raw) {
        let whole = caps.get(0)?;
        let num = caps.name("num")?;
        let cur = caps.name("cur")?;

        let Some(value) = parse_number(num.as_str()) else {
            continue;
        };
        if value <= 0.0 {
            continue;
        }

        let window = context_window(raw, whole.start(), whole.end());
        let score = score_context(&window);
        let currency = canonical_currency(cur.as_str(), declared_currency);

        let replace = match &best {
            None => true,
            // Position descending breaks score ties: later wins.
            Some((s, pos, _, _)) => score > *s || (score == *s && whole.start() > *pos),
        };
        if replace {
            best = Some((score, whole.start(), value, currency));
        }
    }

    best.map(|(_, _, value, currency)| {
        let value = if is_native_currency(&currency) {
            value.round()
        } else {
            value
        };
        PricePick { value, currency }
    })
}

/// Whether the excerpt carries a minimum-order phrase at all. Used by offer
/// extraction to annotate rows where a threshold figure had to be ignored.
pub fn contains_min_order_phrase(text: &str) -> bool {
    let text = text.to_lowercase();
    MIN_ORDER_PHRASES.iter().any(|p| text.contains(p))
}

fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{A0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse().ok()
}

/// Lowercased text surrounding a match, `CONTEXT_WINDOW` characters on each
/// side, excluding the match itself.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let before: String = text[..start]
        .chars()
        .rev()
        .take(CONTEXT_WINDOW)
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    let after: String = text[end..].chars().take(CONTEXT_WINDOW).collect();
    let mut window = before;
    window.push(' ');
    window.push_str(&after);
    window.to_lowercase()
}

fn score_context(window: &str) -> i32 {
    if MIN_ORDER_PHRASES.iter().any(|p| window.contains(p)) {
        -2
    } else if PRICE_PHRASES.iter().any(|p| window.contains(p)) {
        2
    } else {
        0
    }
}

fn canonical_currency(token: &str, declared: Option<&str>) -> String {
    let token = token.to_lowercase();
    let code = match token.as_str() {
        "₽" | "руб" | "руб." | "р." | "rub" => "RUB",
        "$" | "usd" => "USD",
        "€" | "eur" => "EUR",
        "₸" | "kzt" => "KZT",
        _ => "",
    };
    if code.is_empty() {
        declared.unwrap_or("RUB").to_uppercase()
    } else {
        code.to_string()
    }
}

/// The target site's native currency is never fractional in practice, so a
/// parsed value is rounded to the nearest whole unit.
fn is_native_currency(code: &str) -> bool {
    code == "RUB"
}
