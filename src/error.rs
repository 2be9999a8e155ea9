//! Error types for catalog loading and per-source fetching.
//!
//! Neither type ever escapes [`crate::orchestrator::FetchOrchestrator::fetch_all`]:
//! a [`ConfigError`] degrades to an empty catalog and a [`FetchError`] is
//! downgraded to an empty per-source result by the retry layer. They exist so
//! the layers in between can tell a retryable failure from a fatal one and
//! log something useful.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// The catalog payload could not be read or parsed at the top level.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("catalog file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("catalog payload is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("catalog payload must be a mapping at the top level, found {0}")]
    NotAMapping(&'static str),

    #[error("catalog payload is empty")]
    Missing,
}

/// A single fetch attempt against one source failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server answered with status {0}")]
    Status(StatusCode),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl FetchError {
    /// Timeouts and transport-level response failures are worth another
    /// attempt; anything wrong with the payload itself is not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::Payload(_))
    }

    /// Classify a `reqwest` error raised while talking to a source.
    ///
    /// `timeout` is the limit that was in force for the request, reported
    /// back in the [`FetchError::Timeout`] variant.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else if let Some(status) = err.status() {
            FetchError::Status(status)
        } else if err.is_decode() {
            FetchError::Payload(err.to_string())
        } else {
            FetchError::Transport(err)
        }
    }

    /// Short label used as a log field and metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Status(_) => "status",
            FetchError::Transport(_) => "transport",
            FetchError::Payload(_) => "payload",
        }
    }
}
