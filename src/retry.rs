//! Bounded retry with exponential backoff around one source fetch.
//!
//! # Retry Strategy
//!
//! - At most 3 attempts in total
//! - Transient failures (timeouts, transport and status errors) back off
//!   `base_delay * 2^attempt` before the next attempt: 100 ms, then 200 ms
//! - Any other failure abandons the source immediately
//! - A successful attempt ends the loop, even when it returned no items
//!
//! Nothing escapes [`RetryPolicy::run`] as an error. The caller gets a
//! [`FetchOutcome`], which separates "fetched, possibly empty" from "gave
//! up", and logs carry the reason.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::error::FetchError;
use crate::models::{NormalizedItem, SourceDefinition, SourceKind};
use crate::utils::truncate_for_log;

/// Length unexpected error messages are cut to in logs and outcomes.
const ERROR_PREVIEW: usize = 50;

/// Result of driving one source through the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The source answered; the list may legitimately be empty.
    Items(Vec<NormalizedItem>),
    /// The source was given up on.
    Failed(FailureReason),
}

impl FetchOutcome {
    /// The items, with a failure read as an empty list.
    pub fn into_items(self) -> Vec<NormalizedItem> {
        match self {
            FetchOutcome::Items(items) => items,
            FetchOutcome::Failed(_) => Vec::new(),
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            FetchOutcome::Items(items) => items.len(),
            FetchOutcome::Failed(_) => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed(_))
    }
}

/// Why a source produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Every attempt failed transiently.
    RetriesExhausted { attempts: usize, last_error: String },
    /// A non-retryable failure, message truncated.
    Unexpected(String),
    /// No adapter is registered for the source's type.
    NoAdapter(SourceKind),
    /// The shared HTTP session could not be built, so nothing was sent.
    SessionUnavailable(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RetriesExhausted { attempts, last_error } => {
                write!(f, "gave up after {attempts} attempts: {last_error}")
            }
            FailureReason::Unexpected(message) => write!(f, "unexpected error: {message}"),
            FailureReason::NoAdapter(kind) => write!(f, "no adapter for source type {kind}"),
            FailureReason::SessionUnavailable(message) => write!(f, "no HTTP session: {message}"),
        }
    }
}

/// Retry settings for one source fetch.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    max_attempts: usize,
    /// Wait before the second attempt; doubles after each transient failure.
    base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: usize = 3;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

    /// A policy making `max_attempts` attempts (at least one).
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay after the transient failure of attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Drive `call` until it succeeds, fails unexpectedly or runs out of
    /// attempts.
    ///
    /// # Arguments
    ///
    /// * `source` - The source being fetched, used for log context
    /// * `call` - Produces one fresh attempt each time it is invoked
    ///
    /// # Returns
    ///
    /// [`FetchOutcome::Items`] from the first successful attempt, otherwise
    /// [`FetchOutcome::Failed`] with the reason. Never an error.
    #[instrument(level = "debug", skip_all, fields(source = %source.name))]
    pub async fn run<F, Fut>(&self, source: &SourceDefinition, mut call: F) -> FetchOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<NormalizedItem>, FetchError>>,
    {
        let total_t0 = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            let attempt_t0 = Instant::now();
            match call().await {
                Ok(items) => {
                    if !items.is_empty() {
                        info!(source = %source.name, count = items.len(), attempt = attempt + 1, "Fetched items");
                    }
                    return FetchOutcome::Items(items);
                }
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt + 1 == self.max_attempts {
                        break;
                    }
                    let delay = self.backoff(attempt);
                    counter!("radar_fetch_retries_total").increment(1);
                    warn!(
                        source = %source.name,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        kind = e.kind(),
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "Fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    let message = truncate_for_log(&e.to_string(), ERROR_PREVIEW);
                    error!(
                        source = %source.name,
                        attempt = attempt + 1,
                        kind = e.kind(),
                        error = %message,
                        "Unexpected fetch error; abandoning source"
                    );
                    return FetchOutcome::Failed(FailureReason::Unexpected(message));
                }
            }
        }

        error!(
            source = %source.name,
            attempts = self.max_attempts,
            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
            error = %last_error,
            "Fetch exhausted retries"
        );
        FetchOutcome::Failed(FailureReason::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_BASE_DELAY)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}
