//! # News Radar
//!
//! Command-line front end: load a source catalog, fetch every enabled source
//! concurrently and print the normalized items as JSON on stdout. Logs go to
//! stderr.
//!
//! ## Usage
//!
//! ```sh
//! news_radar -s news_sources.json --pretty
//! ```

use std::error::Error;

use clap::Parser;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

use news_radar::cli::Cli;
use news_radar::{FetchOrchestrator, SourceCatalog};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_radar starting up");

    let args = Cli::parse();
    debug!(?args.sources, ?args.max_concurrent, "Parsed CLI arguments");

    // ---- Catalog ----
    let (mut catalog, warnings) = SourceCatalog::load_with(&args.sources, &args.load_options());
    if !warnings.is_empty() {
        warn!(dropped = warnings.len(), "Some catalog entries were invalid and skipped");
    }
    for id in &args.disabled_sources {
        if !catalog.set_enabled(id, false) {
            warn!(%id, "No source with this id to disable");
        }
    }

    if args.list_sources {
        println!("{}", serde_json::to_string_pretty(&catalog.summaries())?);
        return Ok(());
    }

    // ---- Fetch ----
    let orchestrator = FetchOrchestrator::new().with_max_concurrent(args.max_concurrent);
    let items = orchestrator.fetch_all(&catalog).await;

    let json = if args.pretty {
        serde_json::to_string_pretty(&items)?
    } else {
        serde_json::to_string(&items)?
    };
    println!("{json}");

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        items = items.len(),
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
