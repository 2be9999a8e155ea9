//! # News Radar
//!
//! Fetches items from a large, mixed set of remote sources (JSON endpoints,
//! RSS/Atom feeds and HTML pages read through CSS selectors), normalizes them
//! into one record type and returns whatever could be gathered, even when
//! individual sources fail or time out.
//!
//! ## Architecture
//!
//! 1. **Catalog**: load, validate and flatten source definitions
//!    ([`catalog::SourceCatalog`])
//! 2. **Budget**: size the concurrency budget ([`concurrency::resolve`])
//! 3. **Fetch**: run one task per enabled source, each an adapter call
//!    ([`adapters`]) wrapped in bounded retry ([`retry::RetryPolicy`])
//! 4. **Aggregate**: concatenate what came back
//!    ([`orchestrator::FetchOrchestrator`])
//!
//! ```ignore
//! let (catalog, _warnings) = SourceCatalog::load("news_sources.json");
//! let items = FetchOrchestrator::new().fetch_all(&catalog).await;
//! ```

pub mod adapters;
pub mod catalog;
pub mod cli;
pub mod concurrency;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod utils;

pub use adapters::{AdapterSet, SourceAdapter};
pub use catalog::{CatalogWarning, LoadOptions, PayloadFormat, SourceCatalog};
pub use error::{ConfigError, FetchError};
pub use models::{NormalizedItem, SourceDefinition, SourceKind, SourceSummary};
pub use orchestrator::{FetchOrchestrator, FetchReport, SourceOutcome};
pub use retry::{FailureReason, FetchOutcome, RetryPolicy};
pub use session::Session;
