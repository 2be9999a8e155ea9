//! Transport adapters, one per source type.
//!
//! Each adapter turns one remote payload into [`NormalizedItem`]s:
//!
//! | Type | Adapter | Payload | Cap |
//! |------|---------|---------|-----|
//! | `newsnow_api` | [`api::StructuredApiAdapter`] | JSON object with an `items` array | 50 |
//! | `rss` | [`feed::FeedAdapter`] | RSS 2.0, RSS 1.0 or Atom | 30 |
//! | `web_scraper` | [`html::HtmlScrapeAdapter`] | HTML page plus a CSS selector | 20 |
//!
//! Adapters report a typed [`FetchError`] for a single attempt so the retry
//! layer can tell a timeout from a malformed payload. Nothing above the
//! retry layer ever sees that error: the orchestrator only gets items or an
//! empty result.
//!
//! Dispatch goes through [`AdapterSet`], keyed by [`SourceKind`]. A new
//! transport is a new `SourceKind` variant plus a registered adapter; the
//! orchestrator does not change.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{NormalizedItem, SourceDefinition, SourceKind};
use crate::session::Session;

pub mod api;
pub mod feed;
pub mod html;

pub use api::StructuredApiAdapter;
pub use feed::FeedAdapter;
pub use html::HtmlScrapeAdapter;

/// One transport strategy.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source type this adapter serves.
    fn kind(&self) -> SourceKind;

    /// Make one attempt at fetching `source`, honouring its effective
    /// timeout. Ranks in the result are 1-based and follow parse order.
    async fn fetch(&self, session: &Session, source: &SourceDefinition) -> Result<Vec<NormalizedItem>, FetchError>;
}

/// Registry of adapters keyed by the kind they serve.
#[derive(Clone)]
pub struct AdapterSet {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl AdapterSet {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// The three built-in transports.
    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.register(StructuredApiAdapter);
        set.register(FeedAdapter);
        set.register(HtmlScrapeAdapter);
        set
    }

    /// Register `adapter` for its kind, returning the adapter it replaced.
    pub fn register<A>(&mut self, adapter: A) -> Option<Arc<dyn SourceAdapter>>
    where
        A: SourceAdapter + 'static,
    {
        self.adapters.insert(adapter.kind(), Arc::new(adapter))
    }

    pub fn get(&self, kind: SourceKind) -> Option<&dyn SourceAdapter> {
        self.adapters.get(&kind).map(|a| a.as_ref())
    }
}

impl Default for AdapterSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().collect();
        kinds.sort();
        f.debug_struct("AdapterSet").field("kinds", &kinds).finish()
    }
}
