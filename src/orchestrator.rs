//! Fan-out/fan-in over every enabled source in a catalog.
//!
//! One run moves through `Idle → Dispatching → Joining → Done`:
//!
//! 1. **Idle**: filter the catalog to enabled sources and size the budget
//! 2. **Dispatching**: build one shared [`Session`] and start one task per
//!    source, at most `budget` in flight
//! 3. **Joining**: wait for every task; a failing source never cancels its
//!    siblings
//! 4. **Done**: concatenate the per-source results and log the tally
//!
//! Each task is `RetryPolicy::run(adapter.fetch(session, source))`. Nothing
//! survives between runs.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::AdapterSet;
use crate::catalog::SourceCatalog;
use crate::concurrency;
use crate::error::FetchError;
use crate::models::{NormalizedItem, SourceDefinition, SourceKind};
use crate::retry::{FailureReason, FetchOutcome, RetryPolicy};
use crate::session::Session;
use crate::utils::truncate_for_log;

/// Stage of a fetch run, reported in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Dispatching,
    Joining,
    Done,
}

/// What happened to one source during a run.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
}

/// The aggregate of one run plus the per-source tally.
///
/// `items` is exactly what [`FetchOrchestrator::fetch_all`] returns. The
/// counts let an operator tell an empty source from a dead one.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub items: Vec<NormalizedItem>,
    /// Sources dispatched.
    pub enabled: usize,
    /// Sources that returned at least one item.
    pub succeeded: usize,
    /// Sources that answered with nothing.
    pub empty: usize,
    /// Sources given up on.
    pub failed: usize,
    pub budget: usize,
    /// One entry per dispatched source, in catalog order.
    pub outcomes: Vec<SourceOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOrchestrator {
    adapters: AdapterSet,
    retry: RetryPolicy,
    max_concurrent: Option<NonZeroUsize>,
}

impl FetchOrchestrator {
    /// Standard adapters, default retry policy, derived concurrency.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Explicit concurrency budget; `None` derives it from the catalog.
    pub fn with_max_concurrent(mut self, max_concurrent: Option<NonZeroUsize>) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Fetch every enabled source and return all items found.
    ///
    /// Never fails: sources that time out, error or return garbage simply
    /// contribute nothing. Items from one source stay in rank order; the
    /// order of sources follows the catalog.
    pub async fn fetch_all(&self, catalog: &SourceCatalog) -> Vec<NormalizedItem> {
        self.fetch_report(catalog).await.items
    }

    /// Like [`fetch_all`](Self::fetch_all), keeping the per-source tally.
    #[instrument(level = "info", skip_all, fields(sources = catalog.len()))]
    pub async fn fetch_report(&self, catalog: &SourceCatalog) -> FetchReport {
        let run_t0 = Instant::now();
        debug!(phase = ?RunPhase::Idle, "Fetch run starting");

        let enabled: Vec<&SourceDefinition> = catalog.enabled_sources().collect();
        if enabled.is_empty() {
            warn!("No enabled sources; nothing to fetch");
            return FetchReport::default();
        }

        let budget = concurrency::resolve(self.max_concurrent, enabled.len());
        let session = match Session::build(budget) {
            Ok(session) => session,
            Err(e) => return session_failure(&enabled, budget, &e, run_t0),
        };

        debug!(phase = ?RunPhase::Dispatching, tasks = enabled.len(), budget, "Dispatching source fetches");
        let pending = stream::iter(enabled.iter().copied().enumerate())
            .map(|(idx, source)| {
                let session = &session;
                async move { (idx, self.fetch_source(session, source).await) }
            })
            .buffer_unordered(budget);

        debug!(phase = ?RunPhase::Joining, "Waiting for every source");
        let mut finished: Vec<(usize, SourceOutcome)> = pending.collect().await;
        finished.sort_by_key(|(idx, _)| *idx);

        tally(budget, finished.into_iter().map(|(_, outcome)| outcome), run_t0)
    }

    async fn fetch_source(&self, session: &Session, source: &SourceDefinition) -> SourceOutcome {
        let t0 = Instant::now();
        let outcome = match self.adapters.get(source.kind) {
            Some(adapter) => self.retry.run(source, move || adapter.fetch(session, source)).await,
            None => {
                warn!(source = %source.name, kind = %source.kind, "No adapter registered for source type");
                FetchOutcome::Failed(FailureReason::NoAdapter(source.kind))
            }
        };
        SourceOutcome::new(source, outcome, t0.elapsed())
    }
}

impl SourceOutcome {
    fn new(source: &SourceDefinition, outcome: FetchOutcome, elapsed: Duration) -> Self {
        SourceOutcome {
            id: source.id.clone(),
            name: source.name.clone(),
            kind: source.kind,
            outcome,
            elapsed,
        }
    }

    /// Metrics label for this outcome.
    pub fn label(&self) -> &'static str {
        match &self.outcome {
            FetchOutcome::Items(items) if !items.is_empty() => "items",
            FetchOutcome::Items(_) => "empty",
            FetchOutcome::Failed(_) => "failed",
        }
    }
}

/// Report for a run whose session never came up: every source failed.
fn session_failure(sources: &[&SourceDefinition], budget: usize, err: &FetchError, run_t0: Instant) -> FetchReport {
    error!(error = %err, "Could not build HTTP session; every source fails this run");
    let reason = FailureReason::SessionUnavailable(truncate_for_log(&err.to_string(), 50));
    let outcomes = sources
        .iter()
        .map(|source| SourceOutcome::new(source, FetchOutcome::Failed(reason.clone()), Duration::ZERO));
    tally(budget, outcomes, run_t0)
}

/// Fold per-source outcomes, already in catalog order, into a report.
///
/// Every outcome is counted in `radar_source_fetch_total` here, so the
/// metrics always agree with the report, whichever path produced it.
///
/// # Arguments
///
/// * `budget` - The concurrency budget the run used
/// * `outcomes` - One outcome per dispatched source
/// * `run_t0` - When the run started, for the elapsed log field
fn tally(budget: usize, outcomes: impl IntoIterator<Item = SourceOutcome>, run_t0: Instant) -> FetchReport {
    let mut report = FetchReport {
        budget,
        ..FetchReport::default()
    };
    for source_outcome in outcomes {
        counter!("radar_source_fetch_total", "outcome" => source_outcome.label()).increment(1);
        histogram!("radar_fetch_duration_ms").record(source_outcome.elapsed.as_secs_f64() * 1_000.0);
        match &source_outcome.outcome {
            FetchOutcome::Items(items) if !items.is_empty() => {
                report.succeeded += 1;
                report.items.extend(items.iter().cloned());
            }
            FetchOutcome::Items(_) => report.empty += 1,
            FetchOutcome::Failed(reason) => {
                warn!(source = %source_outcome.name, %reason, "Source produced no items");
                report.failed += 1;
            }
        }
        report.enabled += 1;
        report.outcomes.push(source_outcome);
    }

    counter!("radar_items_total").increment(report.items.len() as u64);
    debug!(phase = ?RunPhase::Done, "Fetch run finished");
    info!(
        items = report.items.len(),
        enabled = report.enabled,
        succeeded = report.succeeded,
        empty = report.empty,
        failed = report.failed,
        budget,
        elapsed_ms = run_t0.elapsed().as_millis() as u64,
        "Fetched {} items from {} of {} sources",
        report.items.len(),
        report.succeeded,
        report.enabled
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SourceAdapter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use url::Url;

    #[derive(Debug, Clone)]
    enum Script {
        Items(u32),
        Transient,
        Hang,
        Garbage,
    }

    #[derive(Default)]
    struct Tally {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    struct Scripted {
        kind: SourceKind,
        scripts: HashMap<String, Script>,
        tally: Arc<Tally>,
        delay: Duration,
    }

    #[async_trait]
    impl SourceAdapter for Scripted {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn fetch(&self, _: &Session, source: &SourceDefinition) -> Result<Vec<NormalizedItem>, FetchError> {
            self.tally.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.tally.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.tally.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let result = match self.scripts.get(&source.id).cloned().unwrap_or(Script::Items(1)) {
                Script::Items(n) => Ok((1..=n)
                    .map(|r| NormalizedItem::new(format!("{} #{r}", source.id), &source.name, r, "", ""))
                    .collect()),
                Script::Transient => Err(FetchError::Status(reqwest::StatusCode::BAD_GATEWAY)),
                Script::Hang => {
                    tokio::time::sleep(source.effective_timeout()).await;
                    Err(FetchError::Timeout(source.effective_timeout()))
                }
                Script::Garbage => Err(FetchError::Payload("not json".into())),
            };
            self.tally.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn api(id: &str) -> SourceDefinition {
        SourceDefinition::new(
            id,
            format!("Source {id}"),
            SourceKind::StructuredApi,
            Url::parse(&format!("https://{id}.example.com/api")).unwrap(),
        )
    }

    fn orchestrator(scripts: &[(&str, Script)], delay: Duration) -> (FetchOrchestrator, Arc<Tally>) {
        let tally = Arc::new(Tally::default());
        let scripts: HashMap<String, Script> = scripts.iter().map(|(id, s)| (id.to_string(), s.clone())).collect();
        let mut adapters = AdapterSet::empty();
        for kind in SourceKind::ALL {
            adapters.register(Scripted {
                kind,
                scripts: scripts.clone(),
                tally: tally.clone(),
                delay,
            });
        }
        (FetchOrchestrator::new().with_adapters(adapters), tally)
    }

    fn ranks_of(items: &[NormalizedItem], name: &str) -> Vec<u32> {
        items.iter().filter(|i| i.source_name == name).map(|i| i.rank).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failures_do_not_affect_survivors() {
        let (orchestrator, tally) = orchestrator(
            &[
                ("a", Script::Items(3)),
                ("b", Script::Transient),
                ("c", Script::Items(5)),
                ("d", Script::Transient),
                ("e", Script::Items(7)),
            ],
            Duration::ZERO,
        );
        let (catalog, _) = SourceCatalog::from_sources(["a", "b", "c", "d", "e"].map(api).to_vec());

        let report = orchestrator.fetch_report(&catalog).await;
        assert_eq!(report.items.len(), 15);
        assert_eq!(ranks_of(&report.items, "Source a"), vec![1, 2, 3]);
        assert_eq!(ranks_of(&report.items, "Source c"), vec![1, 2, 3, 4, 5]);
        assert_eq!(ranks_of(&report.items, "Source e"), (1..=7).collect::<Vec<_>>());
        assert!(report.items.iter().all(|i| !i.source_name.ends_with('b') && !i.source_name.ends_with('d')));
        assert_eq!((report.enabled, report.succeeded, report.empty, report.failed), (5, 3, 0, 2));
        // 3 successes once each, 2 failures three times each
        assert_eq!(tally.calls.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_disabled_sources_are_never_dispatched() {
        let (orchestrator, tally) = orchestrator(&[], Duration::ZERO);
        let sources = (0..10)
            .map(|i| {
                let source = api(&format!("s{i}"));
                if i % 5 < 2 { source.disabled() } else { source }
            })
            .collect();
        let (catalog, _) = SourceCatalog::from_sources(sources);
        assert_eq!(catalog.enabled_count(), 6);

        let items = orchestrator.fetch_all(&catalog).await;
        assert_eq!(tally.calls.load(Ordering::SeqCst), 6);
        assert_eq!(items.len(), 6);
        assert!(items.iter().all(|i| !["s0", "s1", "s5", "s6"].iter().any(|d| i.title.starts_with(&format!("{d} ")))));
    }

    #[tokio::test]
    async fn test_repeated_runs_agree_up_to_timestamps() {
        let (orchestrator, _) = orchestrator(
            &[("a", Script::Items(4)), ("b", Script::Items(2)), ("c", Script::Garbage)],
            Duration::from_millis(1),
        );
        let (catalog, _) = SourceCatalog::from_sources(["a", "b", "c"].map(api).to_vec());

        let first = orchestrator.fetch_all(&catalog).await;
        let second = orchestrator.fetch_all(&catalog).await;
        assert_eq!(first.len(), 6);
        assert_eq!(first.len(), second.len());
        assert!(first.iter().zip(&second).all(|(a, b)| a.same_content(b)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_a_source_that_always_times_out_is_bounded() {
        let (orchestrator, tally) = orchestrator(&[("slow", Script::Hang), ("fast", Script::Items(2))], Duration::ZERO);
        let (catalog, _) = SourceCatalog::from_sources(vec![api("slow").with_timeout(Duration::from_secs(1)), api("fast")]);

        let t0 = tokio::time::Instant::now();
        let report = orchestrator.fetch_report(&catalog).await;
        let elapsed = t0.elapsed();

        // 3 timeouts of 1s plus 100ms and 200ms of backoff
        assert!(elapsed >= Duration::from_millis(3_300), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3_500), "elapsed {elapsed:?}");
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.failed, 1);
        assert_eq!(tally.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_fetches_respect_the_budget() {
        let (orchestrator, tally) = orchestrator(&[], Duration::from_millis(50));
        let orchestrator = orchestrator.with_max_concurrent(NonZeroUsize::new(4));
        let (catalog, _) = SourceCatalog::from_sources((0..30).map(|i| api(&format!("s{i}"))).collect());

        let report = orchestrator.fetch_report(&catalog).await;
        assert_eq!(report.budget, 4);
        assert_eq!(report.items.len(), 30);
        assert_eq!(tally.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_derived_budget_follows_enabled_count() {
        let (orchestrator, _) = orchestrator(&[], Duration::ZERO);
        let (catalog, _) = SourceCatalog::from_sources((0..50).map(|i| api(&format!("s{i}"))).collect());
        let report = orchestrator.fetch_report(&catalog).await;
        assert_eq!(report.budget, 20);
    }

    #[tokio::test]
    async fn test_empty_sources_are_counted_apart_from_failures() {
        let (orchestrator, _) = orchestrator(&[("quiet", Script::Items(0)), ("broken", Script::Garbage)], Duration::ZERO);
        let (catalog, _) = SourceCatalog::from_sources(vec![api("quiet"), api("broken")]);

        let report = orchestrator.fetch_report(&catalog).await;
        assert!(report.items.is_empty());
        assert_eq!((report.succeeded, report.empty, report.failed), (0, 1, 1));
        let ids: Vec<_> = report.outcomes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["quiet", "broken"]);
    }

    #[tokio::test]
    async fn test_no_enabled_sources_returns_empty() {
        let (orchestrator, tally) = orchestrator(&[], Duration::ZERO);
        let (catalog, _) = SourceCatalog::from_sources(vec![api("a").disabled()]);
        assert!(orchestrator.fetch_all(&catalog).await.is_empty());
        assert_eq!(tally.calls.load(Ordering::SeqCst), 0);

        let report = orchestrator.fetch_report(&SourceCatalog::default()).await;
        assert_eq!(report.enabled, 0);
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_only_that_source() {
        let tally = Arc::new(Tally::default());
        let mut adapters = AdapterSet::empty();
        adapters.register(Scripted {
            kind: SourceKind::StructuredApi,
            scripts: HashMap::new(),
            tally: tally.clone(),
            delay: Duration::ZERO,
        });
        let orchestrator = FetchOrchestrator::new().with_adapters(adapters);
        let feed = SourceDefinition::new(
            "feed",
            "Feed",
            SourceKind::FeedDocument,
            Url::parse("https://feed.example.com/rss").unwrap(),
        );
        let (catalog, _) = SourceCatalog::from_sources(vec![api("a"), feed]);

        let report = orchestrator.fetch_report(&catalog).await;
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.outcomes[1].outcome,
            FetchOutcome::Failed(FailureReason::NoAdapter(SourceKind::FeedDocument))
        ));
    }

    /// Counts `radar_source_fetch_total{outcome="failed"}` increments.
    #[derive(Default)]
    struct FailedCounter(Arc<AtomicU64>);

    impl Recorder for FailedCounter {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let failed = key.name() == "radar_source_fetch_total"
                && key.labels().any(|l| l.key() == "outcome" && l.value() == "failed");
            if failed { Counter::from_arc(self.0.clone()) } else { Counter::noop() }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_session_failure_reports_and_counts_every_source() {
        let sources = [api("a"), api("b"), api("c")];
        let enabled: Vec<&SourceDefinition> = sources.iter().collect();
        let recorder = FailedCounter::default();

        let report = metrics::with_local_recorder(&recorder, || {
            session_failure(&enabled, 3, &FetchError::Payload("no TLS backend".into()), Instant::now())
        });

        assert_eq!((report.enabled, report.failed, report.succeeded), (3, 3, 0));
        assert!(report.items.is_empty());
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(report.outcomes.iter().all(|o| matches!(
            o.outcome,
            FetchOutcome::Failed(FailureReason::SessionUnavailable(_))
        )));
        assert_eq!(recorder.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_outcome_labels() {
        let source = api("a");
        let label = |outcome| SourceOutcome::new(&source, outcome, Duration::ZERO).label();
        assert_eq!(label(FetchOutcome::Items(Vec::new())), "empty");
        assert_eq!(label(FetchOutcome::Failed(FailureReason::Unexpected("x".into()))), "failed");
        let one = NormalizedItem::new("t", "S", 1, "", "");
        assert_eq!(label(FetchOutcome::Items(vec![one])), "items");
    }
}
