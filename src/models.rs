//! Data models for source definitions and the items fetched from them.
//!
//! - [`SourceKind`]: the transport type of a source, which decides the adapter,
//!   the default timeout and how many items are kept
//! - [`SourceDefinition`]: one validated catalog entry
//! - [`NormalizedItem`]: the uniform record every adapter produces
//! - [`SourceSummary`]: the listing view of a source

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Transport type of a source.
///
/// The serialized names match the group keys of the catalog payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    /// A JSON endpoint answering with an `items` array.
    #[serde(rename = "newsnow_api", alias = "api", alias = "structured_api")]
    StructuredApi,
    /// An RSS or Atom feed.
    #[serde(rename = "rss", alias = "feed", alias = "feed_document")]
    FeedDocument,
    /// An HTML page read through a CSS selector.
    #[serde(rename = "web_scraper", alias = "html", alias = "html_scrape")]
    HtmlScrape,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::StructuredApi,
        SourceKind::FeedDocument,
        SourceKind::HtmlScrape,
    ];

    /// Timeout used when the source does not set its own.
    ///
    /// APIs usually answer fastest, feeds a bit slower, full pages slowest.
    pub fn default_timeout(self) -> Duration {
        match self {
            SourceKind::StructuredApi => Duration::from_secs(5),
            SourceKind::FeedDocument => Duration::from_secs(8),
            SourceKind::HtmlScrape => Duration::from_secs(15),
        }
    }

    /// Maximum number of entries taken from one response.
    pub fn item_cap(self) -> usize {
        match self {
            SourceKind::StructuredApi => 50,
            SourceKind::FeedDocument => 30,
            SourceKind::HtmlScrape => 20,
        }
    }

    /// Name used for this kind in catalog payloads.
    pub fn config_key(self) -> &'static str {
        match self {
            SourceKind::StructuredApi => "newsnow_api",
            SourceKind::FeedDocument => "rss",
            SourceKind::HtmlScrape => "web_scraper",
        }
    }

    /// Resolve a catalog group key, accepting the same aliases as serde.
    pub fn from_config_key(key: &str) -> Option<SourceKind> {
        match key.trim().to_ascii_lowercase().as_str() {
            "newsnow_api" | "api" | "structured_api" => Some(SourceKind::StructuredApi),
            "rss" | "feed" | "feed_document" => Some(SourceKind::FeedDocument),
            "web_scraper" | "html" | "html_scrape" => Some(SourceKind::HtmlScrape),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// A validated source entry. Immutable once the catalog is built, apart from
/// the `enabled` flag which the owning catalog may toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDefinition {
    /// Unique within a catalog.
    pub id: String,
    /// Display name, copied into every item as `source_name`.
    pub name: String,
    pub kind: SourceKind,
    pub url: Url,
    /// CSS selector, only meaningful for [`SourceKind::HtmlScrape`].
    pub selector: Option<String>,
    pub enabled: bool,
    /// Per-source override of [`SourceKind::default_timeout`].
    pub timeout: Option<Duration>,
}

impl SourceDefinition {
    /// Convenience constructor for programmatic catalogs: enabled, no
    /// selector, default timeout.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SourceKind, url: Url) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            url,
            selector: None,
            enabled: true,
            timeout: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The source override if present, else the default for its kind.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.kind.default_timeout())
    }
}

/// The uniform record produced from any source.
///
/// Items are never merged across sources; `rank` is the 1-based position
/// within the producing source's result for one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub title: String,
    pub source_name: String,
    pub rank: u32,
    pub url: String,
    /// Creation time of the record, not the publication time of the story.
    pub timestamp: DateTime<Utc>,
    /// Empty for API sources; feed summaries are truncated.
    #[serde(default)]
    pub description: String,
}

impl NormalizedItem {
    pub fn new(
        title: impl Into<String>,
        source_name: impl Into<String>,
        rank: u32,
        url: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            source_name: source_name.into(),
            rank,
            url: url.into(),
            timestamp: Utc::now(),
            description: description.into(),
        }
    }

    /// Equality ignoring `timestamp`.
    pub fn same_content(&self, other: &NormalizedItem) -> bool {
        self.title == other.title
            && self.source_name == other.source_name
            && self.rank == other.rank
            && self.url == other.url
            && self.description == other.description
    }
}

/// Listing view of a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub enabled: bool,
}

impl From<&SourceDefinition> for SourceSummary {
    fn from(source: &SourceDefinition) -> Self {
        Self {
            id: source.id.clone(),
            name: source.name.clone(),
            kind: source.kind,
            enabled: source.enabled,
        }
    }
}
