//! HTTP fetch utilities: bounded retry with transient/fatal classification,
//! fixed inter-page pacing, optional raw payload archiving.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

use crate::archive::RawPayloadStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
    /// Fixed sleep between consecutive page fetches toward one source.
    pub page_delay: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            page_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err) == RetryDisposition::Retryable,
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| classify_status(s) == RetryDisposition::Retryable)
                .unwrap_or(false),
        }
    }
}

/// Sequential HTTP client for the collectors. Retries transient failures with
/// capped exponential backoff; archives successful page bodies when an archive
/// is attached.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
    page_delay: Duration,
    archive: Option<RawPayloadStore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
            page_delay: config.page_delay,
            archive: None,
        })
    }

    pub fn with_archive(mut self, archive: RawPayloadStore) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Sleep the fixed inter-page delay. Called between consecutive page
    /// fetches against the same upstream source.
    pub async fn page_pause(&self) {
        tokio::time::sleep(self.page_delay).await;
    }

    pub async fn get(
        &self,
        source_id: &str,
        url: &str,
        headers: HeaderMap,
    ) -> Result<FetchedResponse, FetchError> {
        self.execute_with_retry(source_id, url, || {
            self.client.get(url).headers(headers.clone())
        })
        .await
    }

    pub async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        headers: HeaderMap,
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        self.execute_with_retry(source_id, url, || {
            self.client.post(url).headers(headers.clone()).json(body)
        })
        .await
    }

    async fn execute_with_retry(
        &self,
        source_id: &str,
        url: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        let fetch = async {
            let mut last_request_error: Option<reqwest::Error> = None;

            for attempt in 0..=self.backoff.max_retries {
                match build().send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        let final_url = resp.url().to_string();
                        let content_type = resp
                            .headers()
                            .get(CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();

                        if status.is_success() {
                            let body = resp.bytes().await?.to_vec();
                            self.archive_body(source_id, &content_type, &body);
                            return Ok(FetchedResponse {
                                status,
                                final_url,
                                body,
                            });
                        }

                        if classify_status(status) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            continue;
                        }

                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            last_request_error = Some(err);
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            continue;
                        }
                        return Err(FetchError::Request(err));
                    }
                }
            }

            Err(FetchError::Request(
                last_request_error.expect("retry loop should capture a request error"),
            ))
        };

        fetch.instrument(span).await
    }

    fn archive_body(&self, source_id: &str, content_type: &str, body: &[u8]) {
        let Some(archive) = &self.archive else {
            return;
        };
        let ext = if content_type.starts_with("application/json") {
            "json"
        } else if content_type.starts_with("text/") {
            "txt"
        } else {
            "bin"
        };
        if let Err(err) = archive.archive(Utc::now(), source_id, ext, body) {
            warn!(source_id, error = %err, "failed to archive raw payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn status_errors_report_transience() {
        let throttled = FetchError::HttpStatus {
            status: 429,
            url: "http://openapi.seoul.go.kr:8088/x".into(),
        };
        let forbidden = FetchError::HttpStatus {
            status: 403,
            url: "http://openapi.seoul.go.kr:8088/x".into(),
        };
        assert!(throttled.is_transient());
        assert!(!forbidden.is_transient());
    }
}
