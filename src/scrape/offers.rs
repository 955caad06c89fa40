//! Competitor offer extraction from a driven offers page.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::debug;

use super::price;

/// Up to this many offers are retained per row.
pub const MAX_OFFERS: usize = 3;

/// How many candidate blocks are scanned before giving up on a page.
const MAX_BLOCKS_SCANNED: usize = 12;

/// Ordered offer-block selectors. The site has shipped several generations of
/// offer markup; the first selector that matches anything wins for the page.
static OFFER_BLOCKS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "div.offer-item",
        "li.offer",
        "tr.offer-row",
        "[data-offer-id]",
        "div.offers-list > div",
        "table.offers tr",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("offer selector is valid"))
    .collect()
});

/// One competitor price listing observed for a row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedOffer {
    pub price: f64,
    pub currency: String,
    /// Source excerpt the price was picked from.
    pub raw: String,
}

/// Extract up to [`MAX_OFFERS`] offers from the page, plus an annotation when
/// a minimum-order figure had to be ignored along the way.
pub fn extract_offers(html: &str) -> (Vec<ExtractedOffer>, Option<String>) {
    let document = Html::parse_document(html);

    for selector in OFFER_BLOCKS.iter() {
        let blocks: Vec<_> = document.select(selector).take(MAX_BLOCKS_SCANNED).collect();
        if blocks.is_empty() {
            continue;
        }

        let mut offers = Vec::new();
        let mut overridden = 0usize;

        for block in blocks {
            if offers.len() == MAX_OFFERS {
                break;
            }

            let raw = block.text().collect::<String>().trim().to_string();
            if raw.is_empty() {
                continue;
            }

            let declared = block.value().attr("data-currency");
            let Some(pick) = price::pick_unit_price(&raw, declared) else {
                continue;
            };

            if price::contains_min_order_phrase(&raw) {
                overridden += 1;
            }
            offers.push(ExtractedOffer {
                price: pick.value,
                currency: pick.currency,
                raw,
            });
        }

        debug!(offers = offers.len(), "extracted offers from page");
        let note = (overridden > 0)
            .then(|| format!("min-order figure ignored in {overridden} offer(s)"));
        return (offers, note);
    }

    (Vec::new(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_up_to_three_offers() {
        let html = r#"
            <div class="offers-list">
              <div class="offer-item">Поставщик А 1 200р.</div>
              <div class="offer-item">Поставщик Б 1 150р.</div>
              <div class="offer-item">Поставщик В 1 310р.</div>
              <div class="offer-item">Поставщик Г 1 420р.</div>
            </div>
        "#;
        let (offers, note) = extract_offers(html);
        assert_eq!(offers.len(), 3);
        assert_eq!(offers[0].price, 1200.0);
        assert_eq!(offers[2].price, 1310.0);
        assert!(note.is_none());
    }

    #[test]
    fn annotates_overridden_min_order_figures() {
        let html = r#"
            <div class="offer-item">Заказ от 3 000р. 9 272р.</div>
        "#;
        let (offers, note) = extract_offers(html);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].price, 9272.0);
        assert_eq!(note.as_deref(), Some("min-order figure ignored in 1 offer(s)"));
    }

    #[test]
    fn falls_back_through_selector_generations() {
        let html = r#"
            <table class="offers">
              <tr><td>ООО Ромашка</td><td>540₽</td></tr>
              <tr><td>ИП Иванов</td><td>№ 17-Б</td></tr>
            </table>
        "#;
        let (offers, _) = extract_offers(html);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].price, 540.0);
    }

    #[test]
    fn priceless_page_yields_no_offers() {
        let html = r#"<div class="offer-item">нет предложений</div>"#;
        let (offers, note) = extract_offers(html);
        assert!(offers.is_empty());
        assert!(note.is_none());
    }
}
