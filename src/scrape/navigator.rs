//! Page navigation against the pricing site.
//!
//! The site's routing has changed several times, so navigation tries an
//! ordered list of URL shapes and stops at the first one that answers with a
//! document. Every fetch is recorded on the resulting [`PageHandle`] so the
//! series extractor can inspect the traffic afterwards. A failed navigation
//! yields an empty handle, never an error.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::ScrapeConfig;
use super::capture::PageHandle;

/// Candidate offer-search URL shapes, tried in order. `{query}` is the
/// article, `{brand}` the brand filter. The site's hash-routed search shape
/// is absent here: fragments never reach the wire, so over plain HTTP it
/// degenerates to the home page.
const SEARCH_TEMPLATES: &[&str] = &[
    "/search/{query}",
    "/search?text={query}",
    "/catalog?q={query}&brand={brand}",
];

/// Query parameter carrying the resume cursor on paginated search shapes.
const CURSOR_PARAM: &str = "after";

mod selectors {
    use super::*;

    pub static ANCHORS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").unwrap());

    pub static STATS_CONTROLS: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("[data-stats-url], button.stats[data-url], a.statistics[data-url]").unwrap()
    });

    pub static IFRAMES: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("iframe[src]").unwrap());

    pub static SCRIPTS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("script[src]").unwrap());

    pub static NEXT_LINK: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[rel='next']").unwrap());
}

/// How many secondary data endpoints are fetched per statistics page.
const MAX_DATA_ENDPOINTS: usize = 4;

pub struct Navigator {
    client: Client,
    config: Arc<ScrapeConfig>,
    data_url: Regex,
}

impl Navigator {
    pub fn new(client: Client, config: Arc<ScrapeConfig>) -> Self {
        // Quoted URLs mentioning the statistics path inside scripts or
        // attributes; these carry the chart data on some renderings.
        let pattern = format!(
            r#"["']([^"'\s]*{}[^"'\s]*)["']"#,
            regex::escape(&config.stats_path)
        );
        let data_url = Regex::new(&pattern).expect("escaped statistics path is a valid pattern");
        Self {
            client,
            config,
            data_url,
        }
    }

    /// Open the offers page for one row, trying each search shape in order.
    pub async fn open_offers(
        &self,
        article: &str,
        brand: &str,
        last_id: Option<&str>,
    ) -> PageHandle {
        for template in SEARCH_TEMPLATES {
            let Some(url) = self.build_search_url(template, article, brand, last_id) else {
                continue;
            };

            if let Some((status, content_type, body)) = self.fetch(url.clone()).await {
                if (200..300).contains(&status) && !body.trim().is_empty() {
                    let mut handle = PageHandle::with_document(url.to_string(), body.clone());
                    handle.record(url.to_string(), status, content_type, body);
                    return handle;
                }
            }
        }

        debug!(article, brand, "no search shape produced an offers page");
        PageHandle::empty()
    }

    /// Open the statistics page referenced by an offers page, then pull the
    /// in-page data endpoints it mentions. Cookies ride along on the shared
    /// client, so authentication survives the hop.
    pub async fn open_statistics(&self, offers: &PageHandle) -> PageHandle {
        let Some(html) = offers.html() else {
            return PageHandle::empty();
        };

        let Some(stats_href) = self.find_statistics_href(html) else {
            debug!("offers page exposes no statistics affordance");
            return PageHandle::empty();
        };
        let Some(url) = self.resolve(offers.url(), &stats_href) else {
            return PageHandle::empty();
        };

        let Some((status, content_type, body)) = self.fetch(url.clone()).await else {
            return PageHandle::empty();
        };
        if !(200..300).contains(&status) {
            return PageHandle::empty();
        }

        let mut handle = PageHandle::with_document(url.to_string(), body.clone());
        handle.record(url.to_string(), status, content_type, body.clone());

        for endpoint in self.data_endpoints(&body).into_iter().take(MAX_DATA_ENDPOINTS) {
            let Some(endpoint_url) = self.resolve(Some(url.as_str()), &endpoint) else {
                continue;
            };
            if let Some((status, content_type, body)) = self.fetch(endpoint_url.clone()).await {
                handle.record(endpoint_url.to_string(), status, content_type, body);
            }
        }

        handle
    }

    /// Resume cursor advertised by the offers page, if any.
    pub fn next_cursor(&self, offers: &PageHandle) -> Option<String> {
        let html = offers.html()?;
        let document = Html::parse_document(html);
        let href = document
            .select(&selectors::NEXT_LINK)
            .find_map(|a| a.value().attr("href").map(str::to_string))?;
        let url = self.resolve(offers.url(), &href)?;
        url.query_pairs()
            .find(|(key, _)| key == CURSOR_PARAM)
            .map(|(_, value)| value.into_owned())
    }

    /// Statistics affordance cascade: direct link, control with a data URL,
    /// then an embedded iframe.
    fn find_statistics_href(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let stats_path = self.config.stats_path.as_str();

        document
            .select(&selectors::ANCHORS)
            .find_map(|a| {
                a.value()
                    .attr("href")
                    .filter(|href| href.contains(stats_path))
                    .map(str::to_string)
            })
            .or_else(|| {
                document.select(&selectors::STATS_CONTROLS).find_map(|el| {
                    el.value()
                        .attr("data-stats-url")
                        .or_else(|| el.value().attr("data-url"))
                        .map(str::to_string)
                })
            })
            .or_else(|| {
                document.select(&selectors::IFRAMES).find_map(|frame| {
                    frame
                        .value()
                        .attr("src")
                        .filter(|src| src.contains(stats_path))
                        .map(str::to_string)
                })
            })
    }

    /// Data endpoints referenced by the statistics document: script sources
    /// and quoted URLs mentioning the statistics path.
    fn data_endpoints(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let stats_path = self.config.stats_path.as_str();
        let mut endpoints: Vec<String> = document
            .select(&selectors::SCRIPTS)
            .filter_map(|script| {
                script
                    .value()
                    .attr("src")
                    .filter(|src| src.contains(stats_path))
                    .map(str::to_string)
            })
            .collect();

        for caps in self.data_url.captures_iter(html) {
            let candidate = caps[1].to_string();
            if !endpoints.contains(&candidate) {
                endpoints.push(candidate);
            }
        }
        endpoints
    }

    fn build_search_url(
        &self,
        template: &str,
        article: &str,
        brand: &str,
        last_id: Option<&str>,
    ) -> Option<Url> {
        let filled = template
            .replace("{query}", &urlencode(article))
            .replace("{brand}", &urlencode(brand));
        let mut url = self.config.base_url.join(&filled).ok()?;
        if let Some(cursor) = last_id {
            url.query_pairs_mut().append_pair(CURSOR_PARAM, cursor);
        }
        Some(url)
    }

    fn resolve(&self, page_url: Option<&str>, href: &str) -> Option<Url> {
        let base = page_url
            .and_then(|u| Url::parse(u).ok())
            .unwrap_or_else(|| self.config.base_url.clone());
        base.join(href).ok()
    }

    async fn fetch(&self, url: Url) -> Option<(u16, String, String)> {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %url, error = %err, "navigation fetch failed");
                return None;
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.ok()?;
        Some((status, content_type, body))
    }
}

fn urlencode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
