use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::debug::DEBUG;
use crate::error::debug_error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("failed to scrape: {0}")]
    Failed(surf::Error),
    #[error("scrape returned status {0}")]
    Status(surf::StatusCode),
    #[error("scrape timed out")]
    Timeout,
}

pub type ScrapeResult = std::result::Result<String, ScrapeError>;

/// How often to retry a failed scrape, and how long to wait in between
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 5,
            delay: Duration::from_secs(10),
        }
    }
}

pub struct ScrapeTarget {
    /// The url to be scraped.
    ///
    /// e.g. http://localhost:9025/metrics
    pub url: String,

    /// How long to wait for a single response
    pub timeout: Duration,
}

impl ScrapeTarget {
    pub fn new(host: &str, port: u16, path: &str, timeout: Duration) -> Self {
        ScrapeTarget {
            url: scrape_url(host, port, path),
            timeout,
        }
    }

    /// Make a request to the scrape target and return the response
    pub async fn scrape(&self) -> ScrapeResult {
        async_std::future::timeout(self.timeout, async {
            let mut response = surf::get(&self.url).await.map_err(ScrapeError::Failed)?;
            if !response.status().is_success() {
                return Err(ScrapeError::Status(response.status()));
            }
            let body = response.body_string().await.map_err(ScrapeError::Failed)?;
            if body.is_empty() {
                warn!(url = %self.url, "no metrics in scrape response");
            }
            Ok::<_, ScrapeError>(body)
        })
        .await
        .map_err(|_| ScrapeError::Timeout)?
    }

    /// Scrape, retrying failures according to `policy`
    pub async fn scrape_with_retry(&self, policy: RetryPolicy) -> ScrapeResult {
        retry(policy, || self.scrape()).await
    }
}

/// Runs `attempt` until it succeeds or `policy.retries` retries have failed,
/// sleeping `policy.delay` between attempts. Returns the last error.
pub async fn retry<F, Fut, T, E>(policy: RetryPolicy, mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let mut failures = 0;
    loop {
        match attempt().await {
            Ok(value) => {
                DEBUG.scrape_succeeded();
                return Ok(value);
            }
            Err(err) => {
                DEBUG.scrape_failed();
                debug_error(&err);
                if failures >= policy.retries {
                    return Err(err);
                }
                failures += 1;
                warn!(
                    error = %err,
                    attempt = failures,
                    retries = policy.retries,
                    "scrape failed, retrying in {:?}",
                    policy.delay
                );
                async_std::task::sleep(policy.delay).await;
            }
        }
    }
}

/// Builds the url to scrape; a path of `/` means no path, and a trailing `/` is dropped
pub fn scrape_url(host: &str, port: u16, path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        format!("http://{}:{}", host, port)
    } else if path.starts_with('/') {
        format!("http://{}:{}{}", host, port, path)
    } else {
        format!("http://{}:{}/{}", host, port, path)
    }
}
