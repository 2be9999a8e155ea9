//! Command-line interface definitions for News Radar.
//!
//! All options can be given as flags or, where noted, environment variables.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;

use crate::catalog::LoadOptions;
use crate::models::SourceKind;

/// Command-line arguments for the `news_radar` binary.
///
/// # Examples
///
/// ```sh
/// # Fetch everything in the default catalog
/// news_radar
///
/// # A YAML catalog, at most 8 fetches in flight, no HTML scraping
/// news_radar -s sources.yaml --max-concurrent 8 --disable-type web_scraper
///
/// # Show what the catalog contains
/// news_radar --list-sources
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the source catalog (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long, env = "NEWS_SOURCES_PATH", default_value = "news_sources.json")]
    pub sources: PathBuf,

    /// Maximum number of fetches in flight; derived from the catalog when omitted
    #[arg(long, env = "NEWS_MAX_CONCURRENT")]
    pub max_concurrent: Option<NonZeroUsize>,

    /// Disable a whole source type (newsnow_api, rss, web_scraper); repeatable
    #[arg(long = "disable-type", value_parser = parse_kind)]
    pub disabled_types: Vec<SourceKind>,

    /// Disable one source by id; repeatable
    #[arg(long = "disable")]
    pub disabled_sources: Vec<String>,

    /// Print the catalog as JSON and exit without fetching
    #[arg(long)]
    pub list_sources: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,
}

impl Cli {
    pub fn load_options(&self) -> LoadOptions {
        self.disabled_types
            .iter()
            .fold(LoadOptions::default(), |options, kind| options.disable_type(*kind))
    }
}

fn parse_kind(s: &str) -> Result<SourceKind, String> {
    SourceKind::from_config_key(s).ok_or_else(|| format!("unknown source type `{s}` (expected newsnow_api, rss or web_scraper)"))
}
