//! Structured JSON API adapter.
//!
//! Expects a JSON object with an `items` array, each entry carrying a
//! `title` and a `url`. API sources are title-only, so `description` is
//! always empty.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::SourceAdapter;
use crate::error::FetchError;
use crate::models::{NormalizedItem, SourceDefinition, SourceKind};
use crate::session::Session;
use crate::utils::{collapse_whitespace, truncate_for_log};

pub const UNTITLED: &str = "Untitled";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredApiAdapter;

#[async_trait]
impl SourceAdapter for StructuredApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::StructuredApi
    }

    #[instrument(level = "debug", skip_all, fields(source = %source.name))]
    async fn fetch(&self, session: &Session, source: &SourceDefinition) -> Result<Vec<NormalizedItem>, FetchError> {
        let body = session.get_text(&source.url, source.effective_timeout()).await?;
        parse_items(&body, &source.name)
    }
}

/// Map a JSON API body to items, keeping at most the first 50 entries.
///
/// # Arguments
///
/// * `body` - A JSON object with an `items` array
/// * `source_name` - Stamped on every item
///
/// # Returns
///
/// Items ranked from 1; a body that is not such an object is a
/// [`FetchError::Payload`].
pub fn parse_items(body: &str, source_name: &str) -> Result<Vec<NormalizedItem>, FetchError> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Payload(format!("{e}; body: {}", truncate_for_log(body, 60))))?;

    let items: Vec<NormalizedItem> = response
        .items
        .into_iter()
        .take(SourceKind::StructuredApi.item_cap())
        .enumerate()
        .map(|(idx, item)| {
            let title = item
                .title
                .map(|t| collapse_whitespace(&t))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string());
            NormalizedItem::new(title, source_name, idx as u32 + 1, item.url.unwrap_or_default(), "")
        })
        .collect();

    debug!(count = items.len(), "Parsed API items");
    Ok(items)
}
