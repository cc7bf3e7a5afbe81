//! HTTP plumbing for source-system reads: bounded concurrency, an optional
//! request quota, and exponential backoff on transient failures.
//!
//! Only idempotent reads (and the token exchange) go through here, so retrying
//! them is safe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

/// Throttling and server-side failures; everything else is the caller's fault.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial: Duration::from_millis(500),
            ceiling: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    /// `initial * 2^retry`, capped at `ceiling`.
    pub fn delay(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.ceiling, |d| d.min(self.ceiling))
    }
}

/// API allowance: at most `requests` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestQuota {
    pub requests: u32,
    pub window: Duration,
}

impl RequestQuota {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests: requests.max(1),
            window: Duration::from_secs(60),
        }
    }

    /// Time it takes to earn back one request.
    pub fn interval(&self) -> Duration {
        self.window / self.requests.max(1)
    }
}

#[derive(Debug)]
struct Allowance {
    available: u32,
    refreshed: Instant,
}

/// Starts with the full allowance and earns one request back per interval.
#[derive(Debug)]
pub(crate) struct QuotaGate {
    quota: RequestQuota,
    allowance: Mutex<Allowance>,
}

impl QuotaGate {
    pub(crate) fn new(quota: RequestQuota) -> Self {
        Self {
            quota,
            allowance: Mutex::new(Allowance {
                available: quota.requests.max(1),
                refreshed: Instant::now(),
            }),
        }
    }

    pub(crate) async fn admit(&self) {
        let interval = self.quota.interval().max(Duration::from_millis(1));
        loop {
            let pause = {
                let mut allowance = self.allowance.lock().await;
                let earned = u32::try_from(
                    allowance.refreshed.elapsed().as_nanos() / interval.as_nanos(),
                )
                .unwrap_or(u32::MAX);
                if earned >= self.quota.requests {
                    allowance.available = self.quota.requests;
                    allowance.refreshed = Instant::now();
                } else if earned > 0 {
                    allowance.available = allowance.available.saturating_add(earned).min(self.quota.requests);
                    allowance.refreshed += interval * earned;
                }
                if allowance.available > 0 {
                    allowance.available -= 1;
                    return;
                }
                interval.saturating_sub(allowance.refreshed.elapsed())
            };
            debug!(wait_ms = pause.as_millis() as u64, "request quota exhausted");
            tokio::time::sleep(pause).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub quota: Option<RequestQuota>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            max_concurrency: 4,
            backoff: BackoffPolicy::default(),
            quota: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("request to {0} cannot be retried (streaming body)")]
    NotCloneable(String),
    #[error("http client closed")]
    Closed,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct FetchedBody {
    final_url: String,
    bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    quota: Option<QuotaGate>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            in_flight: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            quota: config.quota.map(QuotaGate::new),
            backoff: config.backoff,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let body = self.send(url, request).await?;
        decode_json(&body)
    }

    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let request = self.client.post(url).form(form);
        let body = self.send(url, request).await?;
        decode_json(&body)
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<FetchedBody, FetchError> {
        let _permit = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;
        self.send_with_retry(url, request)
            .instrument(info_span!("http_fetch", url))
            .await
    }

    async fn send_with_retry(&self, url: &str, request: RequestBuilder) -> Result<FetchedBody, FetchError> {
        let mut retry = 0;
        loop {
            if let Some(gate) = &self.quota {
                gate.admit().await;
            }
            let attempt = request
                .try_clone()
                .ok_or_else(|| FetchError::NotCloneable(url.to_string()))?;
            let can_retry = retry < self.backoff.retries;

            let resp = match attempt.send().await {
                Ok(resp) => resp,
                Err(err) if can_retry && is_transient_error(&err) => {
                    warn!(error = %err, retry, "retrying source request");
                    tokio::time::sleep(self.backoff.delay(retry)).await;
                    retry += 1;
                    continue;
                }
                Err(err) => return Err(FetchError::Request(err)),
            };

            let status = resp.status();
            let final_url = resp.url().to_string();
            if status.is_success() {
                let bytes = resp.bytes().await?.to_vec();
                debug!(status = status.as_u16(), bytes = bytes.len(), "fetched");
                return Ok(FetchedBody { final_url, bytes });
            }
            if can_retry && is_transient_status(status) {
                warn!(status = status.as_u16(), retry, "retrying source request");
                tokio::time::sleep(self.backoff.delay(retry)).await;
                retry += 1;
                continue;
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
                body,
            });
        }
    }
}

fn decode_json<T: DeserializeOwned>(body: &FetchedBody) -> Result<T, FetchError> {
    serde_json::from_slice(&body.bytes).map_err(|source| FetchError::Decode {
        url: body.final_url.clone(),
        source,
    })
}
