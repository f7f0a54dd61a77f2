mod tests;
pub mod xrpc;

use crate::config::{
    DID_ENDPOINT_CACHE_SIZE, MAX_RETRIES, SERVICE_CONCURRENCY, SERVICE_INTERVAL,
    SERVICE_INTERVAL_CAP,
};
use dashmap::DashMap;
use lru::LruCache;
use pinakes_identity::{get_pds_endpoint, DidResolver, DidResolverOpts};
use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Timeouts and aborted transports. Never retried here; the task queue
    /// owns re-queueing of cancelled work.
    #[error("request cancelled: {0}")]
    Cancelled(String),
    #[error("http {status}: {message}")]
    Status {
        status: u16,
        message: String,
        ratelimit_reset: Option<u64>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    /// Positive not-found from the remote (missing record, missing thread).
    #[error("not found: {0}")]
    NotFound(String),
    #[error("did not found: {0}")]
    DidNotFound(String),
    #[error("identity error: {0}")]
    Identity(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RpcError::Cancelled(err.to_string())
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

impl RpcError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RpcError::Cancelled(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::NotFound(_) | RpcError::DidNotFound(_))
    }

    fn ratelimit_reset(&self) -> Option<u64> {
        match self {
            RpcError::Status {
                ratelimit_reset, ..
            } => *ratelimit_reset,
            _ => None,
        }
    }

    fn is_retryable_status(&self) -> bool {
        matches!(
            self,
            RpcError::Status {
                status: 408 | 429 | 500 | 502 | 503 | 504,
                ..
            }
        )
    }

    fn is_transient_transport(&self) -> bool {
        match self {
            RpcError::Transport(message) => {
                let message = message.to_ascii_lowercase();
                ["tcp", "network", "dns"]
                    .iter()
                    .any(|marker| message.contains(marker))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Surface,
    /// Sleep until this absolute epoch second, then retry without consuming
    /// an attempt.
    SleepUntil(u64),
    Backoff(Duration),
}

/// The retry ladder: cancellations surface (the task queue re-queues them),
/// a rate-limit reset header overrides backoff, retryable statuses and
/// transient transport markers back off exponentially, everything else
/// surfaces.
pub fn retry_decision(err: &RpcError, attempt: u32) -> RetryDecision {
    if err.is_cancellation() {
        return RetryDecision::Surface;
    }
    if let Some(reset) = err.ratelimit_reset() {
        return RetryDecision::SleepUntil(reset);
    }
    if attempt >= MAX_RETRIES {
        return RetryDecision::Surface;
    }
    if err.is_retryable_status() || err.is_transient_transport() {
        return RetryDecision::Backoff(Duration::from_secs(3u64.pow(attempt + 1)));
    }
    RetryDecision::Surface
}

/// Per-host client: an in-flight cap plus a sliding request window.
pub struct ServiceClient {
    pub base: String,
    pub http: reqwest::Client,
    limiter: Semaphore,
    window: Mutex<VecDeque<Instant>>,
    interval: Duration,
    interval_cap: usize,
}

impl ServiceClient {
    fn new(base: String) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
            limiter: Semaphore::new(SERVICE_CONCURRENCY),
            window: Mutex::new(VecDeque::new()),
            interval: SERVICE_INTERVAL,
            interval_cap: SERVICE_INTERVAL_CAP,
        }
    }

    /// Wait until the sliding window admits another request.
    async fn throttle(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().unwrap();
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|start| now.duration_since(*start) >= self.interval)
                {
                    window.pop_front();
                }
                if window.len() < self.interval_cap {
                    window.push_back(now);
                    None
                } else {
                    window
                        .front()
                        .map(|start| self.interval - now.duration_since(*start))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

/// Per-service HTTP client pool with retries, rate limiting and a cached
/// DID -> service-endpoint resolution step.
pub struct RpcManager {
    services: DashMap<String, Arc<ServiceClient>>,
    resolver: DidResolver,
    /// DID -> PDS endpoint; `None` caches a positive not-found so a dead DID
    /// is not re-resolved on every reference to it.
    endpoints: Mutex<LruCache<String, Option<String>>>,
}

impl RpcManager {
    pub fn new(plc_url: String) -> Self {
        Self {
            services: DashMap::new(),
            resolver: DidResolver::new(DidResolverOpts {
                plc_url: Some(plc_url),
                ..Default::default()
            }),
            endpoints: Mutex::new(LruCache::new(
                NonZeroUsize::new(DID_ENDPOINT_CACHE_SIZE).unwrap(),
            )),
        }
    }

    pub fn service(&self, base: &str) -> Arc<ServiceClient> {
        let base = base.trim_end_matches('/');
        self.services
            .entry(base.to_string())
            .or_insert_with(|| Arc::new(ServiceClient::new(base.to_string())))
            .clone()
    }

    /// Run `op` against `service` within its rate limits, retrying per the
    /// ladder in [`retry_decision`].
    pub async fn query<R, F, Fut>(&self, service: &str, op: F) -> Result<R, RpcError>
    where
        F: Fn(reqwest::Client, String) -> Fut,
        Fut: Future<Output = Result<R, RpcError>>,
    {
        let client = self.service(service);
        let mut attempt: u32 = 0;
        loop {
            let result = {
                let _permit = client.limiter.acquire().await.expect("limiter closed");
                client.throttle().await;
                op(client.http.clone(), client.base.clone()).await
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match retry_decision(&err, attempt) {
                RetryDecision::Surface => return Err(err),
                RetryDecision::SleepUntil(epoch_secs) => {
                    sleep_until_epoch(epoch_secs).await;
                }
                RetryDecision::Backoff(delay) => {
                    tracing::debug!(
                        "retrying against {service} after {delay:?} (attempt {attempt}): {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run `op` once, without retries. For callers whose own orchestration
    /// supersedes retrying (fallback paths, queue-level re-queueing).
    pub async fn query_no_retry<R, F, Fut>(&self, service: &str, op: F) -> Result<R, RpcError>
    where
        F: Fn(reqwest::Client, String) -> Fut,
        Fut: Future<Output = Result<R, RpcError>>,
    {
        let client = self.service(service);
        let _permit = client.limiter.acquire().await.expect("limiter closed");
        client.throttle().await;
        op(client.http.clone(), client.base.clone()).await
    }

    /// Resolve `did` to its service endpoint (cached), then run `op` there.
    pub async fn query_by_did<R, F, Fut>(&self, did: &str, op: F) -> Result<R, RpcError>
    where
        F: Fn(reqwest::Client, String) -> Fut,
        Fut: Future<Output = Result<R, RpcError>>,
    {
        let endpoint = self.resolve_did_endpoint(did).await?;
        self.query(&endpoint, op).await
    }

    pub async fn resolve_did_endpoint(&self, did: &str) -> Result<String, RpcError> {
        if let Some(cached) = self.endpoints.lock().unwrap().get(did) {
            return cached
                .clone()
                .ok_or_else(|| RpcError::DidNotFound(did.to_string()));
        }

        match self.resolver.resolve(did).await {
            Ok(None) => {
                self.endpoints.lock().unwrap().put(did.to_string(), None);
                Err(RpcError::DidNotFound(did.to_string()))
            }
            Ok(Some(doc)) => {
                let endpoint = get_pds_endpoint(&doc)
                    .map_err(|e| RpcError::Identity(e.to_string()))?
                    .ok_or_else(|| {
                        RpcError::Identity(format!("no pds endpoint in did document for {did}"))
                    })?;
                self.endpoints
                    .lock()
                    .unwrap()
                    .put(did.to_string(), Some(endpoint.clone()));
                Ok(endpoint)
            }
            Err(err) => Err(RpcError::Identity(err.to_string())),
        }
    }
}

async fn sleep_until_epoch(epoch_secs: u64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if epoch_secs > now {
        tokio::time::sleep(Duration::from_secs(epoch_secs - now)).await;
    }
}
