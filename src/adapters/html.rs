//! HTML page scraper driven by a per-source CSS selector.
//!
//! Every element matched by the selector is a candidate item: its visible
//! text is the title and its `href` (or the `href` of the first link inside
//! it) is the item URL, resolved against the page address when relative.
//! Candidates with five characters of text or fewer are navigation noise and
//! are dropped before ranks are assigned.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use super::SourceAdapter;
use crate::error::FetchError;
use crate::models::{NormalizedItem, SourceDefinition, SourceKind};
use crate::session::Session;
use crate::utils::collapse_whitespace;

/// Candidates whose text is this many characters or fewer are discarded.
pub const MIN_TITLE_CHARS: usize = 5;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlScrapeAdapter;

#[async_trait]
impl SourceAdapter for HtmlScrapeAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::HtmlScrape
    }

    #[instrument(level = "debug", skip_all, fields(source = %source.name))]
    async fn fetch(&self, session: &Session, source: &SourceDefinition) -> Result<Vec<NormalizedItem>, FetchError> {
        let body = session.get_text(&source.url, source.effective_timeout()).await?;
        parse_page(&body, source)
    }
}

/// Apply the source's selector to `body`.
///
/// A source without a selector yields no items. At most the first 20
/// matches are considered; ranks count only the candidates that survive the
/// noise filter.
///
/// # Arguments
///
/// * `body` - The page HTML
/// * `source` - Supplies the selector, the name stamped on items and the
///   base URL relative links are resolved against
///
/// # Errors
///
/// [`FetchError::Payload`] when the selector does not parse.
pub fn parse_page(body: &str, source: &SourceDefinition) -> Result<Vec<NormalizedItem>, FetchError> {
    let Some(selector_text) = source.selector.as_deref() else {
        debug!(source = %source.name, "No selector configured; nothing to extract");
        return Ok(Vec::new());
    };
    let selector = Selector::parse(selector_text)
        .map_err(|e| FetchError::Payload(format!("invalid selector `{selector_text}`: {e}")))?;

    let document = Html::parse_document(body);
    let mut items = Vec::new();
    for element in document.select(&selector).take(SourceKind::HtmlScrape.item_cap()) {
        let title = collapse_whitespace(&element.text().collect::<String>());
        if title.chars().count() <= MIN_TITLE_CHARS {
            continue;
        }
        let url = link_of(element)
            .map(|href| resolve(&source.url, href))
            .unwrap_or_default();
        items.push(NormalizedItem::new(title, &source.name, items.len() as u32 + 1, url, ""));
    }

    debug!(count = items.len(), source = %source.name, "Scraped page items");
    Ok(items)
}

fn link_of(element: ElementRef<'_>) -> Option<&str> {
    element
        .value()
        .attr("href")
        .or_else(|| element.select(&ANCHOR).next().and_then(|a| a.value().attr("href")))
        .map(str::trim)
        .filter(|href| !href.is_empty())
}

fn resolve(base: &Url, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match base.join(href) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}
