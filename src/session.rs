//! The HTTP session shared by every adapter call in one fetch run.
//!
//! One `reqwest::Client` carries browser-like default headers and a
//! connection pool sized to the concurrency budget. It is built once per run
//! and only read afterwards, so concurrent tasks share it without locking.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use crate::error::FetchError;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_CEILING: Duration = Duration::from_secs(60);
const IDLE_LIFETIME: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    budget: usize,
}

impl Session {
    /// Build the shared client for a run with the given concurrency budget.
    #[instrument(level = "debug")]
    pub fn build(budget: usize) -> Result<Session, FetchError> {
        let client = Client::builder()
            .default_headers(default_headers())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_CEILING)
            .pool_max_idle_per_host(budget)
            .pool_idle_timeout(IDLE_LIFETIME)
            .build()
            .map_err(FetchError::Transport)?;
        Ok(Session { client, budget })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// GET `url` with a per-request timeout, failing on non-success status.
    pub async fn get(&self, url: &Url, timeout: Duration) -> Result<Response, FetchError> {
        debug!(%url, ?timeout, "GET");
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response)
    }

    /// GET `url` and read the whole body as text.
    pub async fn get_text(&self, url: &Url, timeout: Duration) -> Result<String, FetchError> {
        self.get(url, timeout)
            .await?
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, application/rss+xml, application/atom+xml, text/html;q=0.9, */*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}
