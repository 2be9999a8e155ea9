//! Source catalog loading, validation and reload.
//!
//! A catalog payload groups source entries by transport type:
//!
//! ```json
//! {
//!   "type_defaults": { "web_scraper": false },
//!   "news_sources": {
//!     "newsnow_api": [ { "id": "weibo", "name": "Weibo", "url": "https://..." } ],
//!     "rss":         [ { "id": "hn", "name": "Hacker News", "url": "https://...", "timeout": 10 } ],
//!     "web_scraper": [ { "id": "lite", "name": "Lite", "url": "https://...", "selector": "h3 a" } ]
//!   }
//! }
//! ```
//!
//! Loading never fails outright. A payload that cannot be read or parsed at
//! the top level yields an empty catalog and a logged error; an individual
//! entry that fails validation is dropped with a [`CatalogWarning`].
//!
//! A catalog is a snapshot. [`SourceCatalog::reload`] builds a new one from
//! the same origin and carries over every source's current `enabled` flag by
//! id, so explicit overrides survive a refresh while everything else is
//! replaced.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use itertools::Itertools;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::error::ConfigError;
use crate::models::{SourceDefinition, SourceKind, SourceSummary};
use crate::utils::truncate_for_log;

/// Syntax of a catalog payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Yaml,
}

impl PayloadFormat {
    /// `.yaml` and `.yml` files are YAML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => PayloadFormat::Yaml,
            _ => PayloadFormat::Json,
        }
    }
}

/// Load-time overrides supplied from outside the payload.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Whole-type enable defaults. These take precedence over the payload's
    /// `type_defaults`, but an explicit per-source `enabled` still wins.
    pub type_enabled: HashMap<SourceKind, bool>,
}

impl LoadOptions {
    pub fn disable_type(mut self, kind: SourceKind) -> Self {
        self.type_enabled.insert(kind, false);
        self
    }
}

/// A catalog entry that was dropped during load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogWarning {
    /// Name (or id) of the offending entry, `"unknown"` if it has neither.
    pub source: String,
    pub reason: String,
}

impl fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid source {}: {}", self.source, self.reason)
    }
}

#[derive(Debug, Clone, Default)]
enum CatalogOrigin {
    #[default]
    Programmatic,
    File(PathBuf),
    Payload { text: String, format: PayloadFormat },
}

/// Ordered, validated collection of source definitions.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: Vec<SourceDefinition>,
    origin: CatalogOrigin,
    options: LoadOptions,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    id: String,
    name: String,
    url: String,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    timeout: Option<u64>,
}

impl SourceCatalog {
    /// Load a catalog file with no external overrides.
    pub fn load(path: impl AsRef<Path>) -> (SourceCatalog, Vec<CatalogWarning>) {
        Self::load_with(path, &LoadOptions::default())
    }

    /// Load a catalog file. Read or top-level parse failures are logged and
    /// degrade to an empty catalog.
    ///
    /// # Arguments
    ///
    /// * `path` - JSON or YAML catalog; the extension picks the format
    /// * `options` - Type-level overrides applied on top of `type_defaults`
    ///
    /// # Returns
    ///
    /// The catalog and one warning per entry that was dropped.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_with(path: impl AsRef<Path>, options: &LoadOptions) -> (SourceCatalog, Vec<CatalogWarning>) {
        let path = path.as_ref();
        let origin = CatalogOrigin::File(path.to_path_buf());
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(source) => {
                let err = ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                };
                error!(error = %err, "Catalog unavailable; continuing with zero sources");
                return (Self::empty(origin, options), Vec::new());
            }
        };
        Self::build(&text, PayloadFormat::from_path(path), origin, options)
    }

    /// Build a catalog from an in-memory payload.
    pub fn from_payload(text: &str, format: PayloadFormat, options: &LoadOptions) -> (SourceCatalog, Vec<CatalogWarning>) {
        let origin = CatalogOrigin::Payload {
            text: text.to_string(),
            format,
        };
        Self::build(text, format, origin, options)
    }

    /// Build a catalog from definitions constructed in code.
    ///
    /// Entries with a duplicate id are dropped with a warning, like any other
    /// invalid entry.
    pub fn from_sources(sources: Vec<SourceDefinition>) -> (SourceCatalog, Vec<CatalogWarning>) {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(sources.len());
        let mut warnings = Vec::new();
        for source in sources {
            if seen.insert(source.id.clone()) {
                kept.push(source);
            } else {
                let warning = CatalogWarning {
                    source: source.name.clone(),
                    reason: format!("duplicate id `{}`", source.id),
                };
                warn!(%warning, "Dropping source entry");
                warnings.push(warning);
            }
        }
        let catalog = SourceCatalog {
            sources: kept,
            origin: CatalogOrigin::Programmatic,
            options: LoadOptions::default(),
        };
        (catalog, warnings)
    }

    /// Build a fresh snapshot from the same origin, keeping the current
    /// `enabled` flag of every source whose id survives.
    ///
    /// Programmatic catalogs have nothing to re-read and come back as a copy.
    /// `self` is left untouched, so a fetch already running over it is not
    /// affected.
    ///
    /// # Returns
    ///
    /// The new catalog and the warnings produced while re-reading it.
    #[instrument(level = "info", skip_all)]
    pub fn reload(&self) -> (SourceCatalog, Vec<CatalogWarning>) {
        info!("Reloading source catalog");
        let (mut fresh, warnings) = match &self.origin {
            CatalogOrigin::Programmatic => (self.clone(), Vec::new()),
            CatalogOrigin::File(path) => Self::load_with(path, &self.options),
            CatalogOrigin::Payload { text, format } => Self::from_payload(text, *format, &self.options),
        };

        let previous: HashMap<&str, bool> = self
            .sources
            .iter()
            .map(|s| (s.id.as_str(), s.enabled))
            .collect();
        for source in &mut fresh.sources {
            if let Some(&enabled) = previous.get(source.id.as_str()) {
                source.enabled = enabled;
            }
        }
        (fresh, warnings)
    }

    pub fn sources(&self) -> &[SourceDefinition] {
        &self.sources
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceDefinition> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_sources().count()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SourceDefinition> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Set the enabled flag of one source. Returns `false` if no source has
    /// that id.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.sources.iter_mut().find(|s| s.id == id) {
            Some(source) => {
                source.enabled = enabled;
                info!(id, enabled, "Source override applied");
                true
            }
            None => false,
        }
    }

    pub fn summaries(&self) -> Vec<SourceSummary> {
        self.sources.iter().map(SourceSummary::from).collect()
    }

    fn empty(origin: CatalogOrigin, options: &LoadOptions) -> SourceCatalog {
        SourceCatalog {
            sources: Vec::new(),
            origin,
            options: options.clone(),
        }
    }

    fn build(
        text: &str,
        format: PayloadFormat,
        origin: CatalogOrigin,
        options: &LoadOptions,
    ) -> (SourceCatalog, Vec<CatalogWarning>) {
        match parse_payload(text, format, options) {
            Ok((sources, warnings)) => {
                let by_kind = sources.iter().counts_by(|s| s.kind);
                info!(
                    count = sources.len(),
                    enabled = sources.iter().filter(|s| s.enabled).count(),
                    api = by_kind.get(&SourceKind::StructuredApi).copied().unwrap_or(0),
                    feed = by_kind.get(&SourceKind::FeedDocument).copied().unwrap_or(0),
                    html = by_kind.get(&SourceKind::HtmlScrape).copied().unwrap_or(0),
                    dropped = warnings.len(),
                    "Loaded source catalog"
                );
                let catalog = SourceCatalog {
                    sources,
                    origin,
                    options: options.clone(),
                };
                (catalog, warnings)
            }
            Err(err) => {
                error!(
                    error = %truncate_for_log(&err.to_string(), 120),
                    "Catalog payload rejected; continuing with zero sources"
                );
                (Self::empty(origin, options), Vec::new())
            }
        }
    }
}

fn parse_payload(
    text: &str,
    format: PayloadFormat,
    options: &LoadOptions,
) -> Result<(Vec<SourceDefinition>, Vec<CatalogWarning>), ConfigError> {
    if text.trim().is_empty() {
        return Err(ConfigError::Missing);
    }
    let root: Value = match format {
        PayloadFormat::Json => serde_json::from_str(text)?,
        PayloadFormat::Yaml => serde_yaml::from_str(text)?,
    };
    let root = match root {
        Value::Object(map) => map,
        Value::Null => return Err(ConfigError::Missing),
        other => return Err(ConfigError::NotAMapping(value_kind(&other))),
    };

    let mut type_enabled: HashMap<SourceKind, bool> = HashMap::new();
    if let Some(Value::Object(defaults)) = root.get("type_defaults") {
        for (key, value) in defaults {
            match (SourceKind::from_config_key(key), value.as_bool()) {
                (Some(kind), Some(enabled)) => {
                    type_enabled.insert(kind, enabled);
                }
                _ => warn!(key = %key, "Ignoring unrecognised type default"),
            }
        }
    }
    type_enabled.extend(options.type_enabled.iter().map(|(k, v)| (*k, *v)));

    let mut sources = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    let Some(Value::Object(groups)) = root.get("news_sources") else {
        warn!("Catalog payload has no `news_sources` mapping");
        return Ok((sources, warnings));
    };

    for (key, entries) in groups {
        let Some(kind) = SourceKind::from_config_key(key) else {
            warn!(group = %key, "Skipping unknown source type group");
            continue;
        };
        let Value::Array(entries) = entries else {
            warn!(group = %key, "Source type group is not a list; skipping");
            continue;
        };
        let group_enabled = type_enabled.get(&kind).copied().unwrap_or(true);

        for entry in entries {
            match validate_entry(entry, kind, group_enabled) {
                Ok(source) if !seen.insert(source.id.clone()) => {
                    let warning = CatalogWarning {
                        source: source.name.clone(),
                        reason: format!("duplicate id `{}`", source.id),
                    };
                    warn!(%warning, "Dropping source entry");
                    warnings.push(warning);
                }
                Ok(source) => sources.push(source),
                Err(reason) => {
                    let warning = CatalogWarning {
                        source: entry_label(entry),
                        reason,
                    };
                    warn!(%warning, "Dropping source entry");
                    warnings.push(warning);
                }
            }
        }
    }

    Ok((sources, warnings))
}

fn validate_entry(entry: &Value, kind: SourceKind, group_enabled: bool) -> Result<SourceDefinition, String> {
    let raw = RawSource::deserialize(entry).map_err(|e| truncate_for_log(&e.to_string(), 80))?;

    let id = raw.id.trim();
    if id.is_empty() {
        return Err("empty id".to_string());
    }
    let name = raw.name.trim();
    if name.is_empty() {
        return Err("empty name".to_string());
    }

    let url = Url::parse(raw.url.trim()).map_err(|e| format!("bad url `{}`: {e}", raw.url))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(format!("url `{url}` is not an http(s) address"));
    }

    let timeout = match raw.timeout {
        Some(0) => return Err("timeout must be positive".to_string()),
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    let selector = raw
        .selector
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(SourceDefinition {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        url,
        selector,
        enabled: raw.enabled.unwrap_or(group_enabled),
        timeout,
    })
}

fn entry_label(entry: &Value) -> String {
    ["name", "id"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PAYLOAD: &str = r#"{
        "type_defaults": { "web_scraper": false },
        "news_sources": {
            "newsnow_api": [
                { "id": "weibo", "name": "Weibo", "url": "https://api.example.com/s?id=weibo" },
                { "id": "zhihu", "name": "Zhihu", "url": "https://api.example.com/s?id=zhihu", "enabled": false }
            ],
            "rss": [
                { "id": "hn", "name": "Hacker News", "url": "https://news.example.com/rss", "timeout": 12 }
            ],
            "web_scraper": [
                { "id": "lite", "name": "Lite", "url": "https://lite.example.com", "selector": ".card a" },
                { "id": "forced", "name": "Forced", "url": "https://forced.example.com", "selector": "h2", "enabled": true }
            ]
        }
    }"#;

    fn load_payload(text: &str) -> (SourceCatalog, Vec<CatalogWarning>) {
        SourceCatalog::from_payload(text, PayloadFormat::Json, &LoadOptions::default())
    }

    #[test]
    fn test_flattens_groups_in_order() {
        let (catalog, warnings) = load_payload(PAYLOAD);
        assert!(warnings.is_empty());
        let ids: Vec<_> = catalog.sources().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["weibo", "zhihu", "hn", "lite", "forced"]);
        assert_eq!(catalog.get("hn").unwrap().kind, SourceKind::FeedDocument);
        assert_eq!(catalog.get("hn").unwrap().effective_timeout(), Duration::from_secs(12));
        assert_eq!(catalog.get("lite").unwrap().selector.as_deref(), Some(".card a"));
    }

    #[test]
    fn test_type_default_disables_group_but_explicit_flag_wins() {
        let (catalog, _) = load_payload(PAYLOAD);
        assert!(!catalog.get("lite").unwrap().enabled);
        assert!(catalog.get("forced").unwrap().enabled);
        assert!(!catalog.get("zhihu").unwrap().enabled);
        assert!(catalog.get("weibo").unwrap().enabled);
        assert_eq!(catalog.enabled_count(), 3);
    }

    #[test]
    fn test_load_options_override_payload_type_defaults() {
        let options = LoadOptions::default().disable_type(SourceKind::FeedDocument);
        let (catalog, _) = SourceCatalog::from_payload(PAYLOAD, PayloadFormat::Json, &options);
        assert!(!catalog.get("hn").unwrap().enabled);
        assert!(catalog.get("weibo").unwrap().enabled);
    }

    #[test]
    fn test_invalid_entries_are_dropped_with_warnings() {
        let payload = r#"{
            "news_sources": {
                "rss": [
                    { "id": "ok", "name": "Ok", "url": "https://ok.example.com/feed" },
                    { "id": "nourl", "name": "No Url" },
                    { "id": "badurl", "name": "Bad Url", "url": "not a url" },
                    { "id": "ftp", "name": "Ftp", "url": "ftp://files.example.com/feed" },
                    { "id": "zero", "name": "Zero", "url": "https://z.example.com", "timeout": 0 },
                    { "id": "ok", "name": "Duplicate", "url": "https://dup.example.com" },
                    { "name": "Anonymous", "url": "https://anon.example.com" }
                ]
            }
        }"#;
        let (catalog, warnings) = load_payload(payload);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.sources()[0].name, "Ok");
        assert_eq!(warnings.len(), 6);
        let named: Vec<_> = warnings.iter().map(|w| w.source.as_str()).collect();
        assert!(named.contains(&"No Url"));
        assert!(named.contains(&"Duplicate"));
        assert!(named.contains(&"Anonymous"));
    }

    #[test]
    fn test_unknown_group_and_non_list_group_are_skipped() {
        let payload = r#"{
            "news_sources": {
                "gopher": [ { "id": "g", "name": "G", "url": "https://g.example.com" } ],
                "rss": { "id": "x" },
                "api": [ { "id": "a", "name": "A", "url": "https://a.example.com" } ]
            }
        }"#;
        let (catalog, _) = load_payload(payload);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.sources()[0].kind, SourceKind::StructuredApi);
    }

    #[test]
    fn test_unparsable_payload_degrades_to_empty() {
        let (catalog, warnings) = load_payload("{ not json");
        assert!(catalog.is_empty());
        assert!(warnings.is_empty());

        let (catalog, _) = load_payload("   ");
        assert!(catalog.is_empty());

        let (catalog, _) = load_payload("[1, 2, 3]");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_missing_news_sources_is_empty_not_error() {
        let (catalog, warnings) = load_payload(r#"{ "type_defaults": {} }"#);
        assert!(catalog.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, warnings) = SourceCatalog::load(dir.path().join("absent.json"));
        assert!(catalog.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_yaml_payload() {
        let yaml = r#"
type_defaults:
  rss: false
news_sources:
  rss:
    - id: hn
      name: Hacker News
      url: https://news.example.com/rss
  web_scraper:
    - id: lite
      name: Lite
      url: https://lite.example.com
      selector: "h3 a"
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.yaml");
        fs::write(&path, yaml).unwrap();

        let (catalog, warnings) = SourceCatalog::load(&path);
        assert!(warnings.is_empty());
        assert_eq!(catalog.len(), 2);
        assert!(!catalog.get("hn").unwrap().enabled);
        assert!(catalog.get("lite").unwrap().enabled);
    }

    #[test]
    fn test_reload_preserves_enabled_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news_sources.json");
        fs::write(&path, PAYLOAD).unwrap();

        let (mut catalog, _) = SourceCatalog::load(&path);
        assert!(catalog.set_enabled("weibo", false));
        assert!(catalog.set_enabled("lite", true));
        assert!(!catalog.set_enabled("missing", false));

        let (reloaded, _) = catalog.reload();
        assert!(!reloaded.get("weibo").unwrap().enabled);
        assert!(reloaded.get("lite").unwrap().enabled);
        assert_eq!(reloaded.len(), catalog.len());
    }

    #[test]
    fn test_reload_picks_up_changes_but_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news_sources.json");
        fs::write(&path, PAYLOAD).unwrap();
        let (mut catalog, _) = SourceCatalog::load(&path);
        catalog.set_enabled("hn", false);

        let changed = PAYLOAD.replace("\"timeout\": 12", "\"timeout\": 3").replace(
            "{ \"id\": \"zhihu\"",
            "{ \"id\": \"douyin\", \"name\": \"Douyin\", \"url\": \"https://api.example.com/s?id=douyin\" },\n{ \"id\": \"zhihu\"",
        );
        fs::write(&path, changed).unwrap();

        let (reloaded, _) = catalog.reload();
        let hn = reloaded.get("hn").unwrap();
        assert!(!hn.enabled);
        assert_eq!(hn.effective_timeout(), Duration::from_secs(3));
        assert!(reloaded.get("douyin").unwrap().enabled);
        // the old snapshot is untouched
        assert!(catalog.get("douyin").is_none());
    }

    #[test]
    fn test_reload_of_inline_payload() {
        let (mut catalog, _) = load_payload(PAYLOAD);
        catalog.set_enabled("hn", false);
        let (reloaded, _) = catalog.reload();
        assert!(!reloaded.get("hn").unwrap().enabled);
    }

    #[test]
    fn test_from_sources_drops_duplicate_ids() {
        let url = Url::parse("https://a.example.com").unwrap();
        let (catalog, warnings) = SourceCatalog::from_sources(vec![
            SourceDefinition::new("a", "A", SourceKind::StructuredApi, url.clone()),
            SourceDefinition::new("a", "A2", SourceKind::FeedDocument, url.clone()),
            SourceDefinition::new("b", "B", SourceKind::HtmlScrape, url).disabled(),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert_eq!(catalog.enabled_count(), 1);
    }

    #[test]
    fn test_payload_format_from_path() {
        assert_eq!(PayloadFormat::from_path(Path::new("a.yml")), PayloadFormat::Yaml);
        assert_eq!(PayloadFormat::from_path(Path::new("a.YAML")), PayloadFormat::Yaml);
        assert_eq!(PayloadFormat::from_path(Path::new("a.json")), PayloadFormat::Json);
        assert_eq!(PayloadFormat::from_path(Path::new("sources")), PayloadFormat::Json);
    }
}
