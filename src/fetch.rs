use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

const USER_AGENT: &str = concat!("award_harvest/", env!("CARGO_PKG_VERSION"));

/// An opaque fetched document plus provenance. Immutable once fetched.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawPage {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        RawPage {
            url: url.into(),
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("timeout fetching {0}")]
    Timeout(String),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
}

/// Transport collaborator. Retry/backoff policy lives behind implementations
/// of this trait, not in the pipeline; implementations must be idempotent and
/// safe to call repeatedly with the same URL.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RawPage, FetchError>> + Send;
}

/// reqwest-backed fetcher with a per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(HttpFetcher { client })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        Ok(RawPage::new(url, body))
    }
}

/// Canned in-memory fetcher for tests: URL -> body, anything else is a 404.
#[cfg(test)]
pub struct StaticFetcher {
    pages: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl StaticFetcher {
    pub fn new(pages: &[(&str, String)]) -> Self {
        StaticFetcher {
            pages: pages
                .iter()
                .map(|(u, b)| (u.to_string(), b.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
impl Fetch for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        match self.pages.get(url) {
            Some(body) => Ok(RawPage::new(url, body.clone())),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
