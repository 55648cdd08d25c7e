//! Fetch capability consumed by the crawl orchestrator, plus the reqwest
//! implementation and the proxy pool it rotates through.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use url::Url;

use crate::error::TransportError;

pub const DEFAULT_RETRY_STATUSES: &[u16] = &[403, 408, 429, 500, 502, 503, 504, 522, 524];

/// Opaque routing directive attached to a request (a proxy URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHint(String);

impl TransportHint {
    pub fn new(proxy: impl Into<String>) -> Self {
        Self(proxy.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub hint: Option<TransportHint>,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// Which HTTP statuses are worth resubmitting, and how many times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: usize,
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }

    /// 403 and 429 always need a fresh hint before resubmission.
    pub fn is_blocked(&self, status: u16) -> bool {
        matches!(status, 403 | 429)
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.is_blocked(status) || self.statuses.contains(&status)
    }
}

/// Shared proxy list. `pick` rotates round-robin; `mark_bad` removes a hint
/// for the rest of the run. Both are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    hints: Vec<TransportHint>,
    next: usize,
}

impl ProxyPool {
    pub fn new<I, S>(proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut hints: Vec<TransportHint> = Vec::new();
        for proxy in proxies {
            let hint = TransportHint::new(proxy);
            if !hints.contains(&hint) {
                hints.push(hint);
            }
        }
        Self {
            state: Mutex::new(PoolState { hints, next: 0 }),
        }
    }

    pub fn pick(&self) -> Option<TransportHint> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.hints.is_empty() {
            return None;
        }
        let idx = state.next % state.hints.len();
        state.next = idx + 1;
        Some(state.hints[idx].clone())
    }

    /// Returns how many hints remain.
    pub fn mark_bad(&self, hint: &TransportHint) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = state.hints.iter().position(|h| h == hint) {
            state.hints.remove(pos);
            if pos < state.next {
                state.next -= 1;
            }
        }
        state.hints.len()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hints
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// reqwest-backed transport. One client per hint, built lazily.
pub struct HttpTransport {
    timeout: Duration,
    clients: Mutex<HashMap<Option<TransportHint>, reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, hint: Option<&TransportHint>) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&hint.cloned()) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(hint) = hint {
            let proxy = reqwest::Proxy::all(hint.as_str())
                .map_err(|err| TransportError::Connect(format!("invalid proxy {hint}: {err}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| TransportError::Connect(format!("build http client: {err}")))?;
        clients.insert(hint.cloned(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let client = self.client_for(request.hint.as_ref())?;
        let response = client
            .get(request.url.clone())
            .header(USER_AGENT, "alkoteka/0.1")
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::Connect(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Body(err.to_string())
            }
        })?;
        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_rotates_round_robin() {
        let pool = ProxyPool::new(["http://p1", "http://p2", "http://p1"]);
        assert_eq!(pool.len(), 2);
        let picks: Vec<String> = (0..4)
            .map(|_| pool.pick().unwrap().as_str().to_owned())
            .collect();
        assert_eq!(picks, ["http://p1", "http://p2", "http://p1", "http://p2"]);
    }

    #[test]
    fn mark_bad_removes_hint() {
        let pool = ProxyPool::new(["http://p1", "http://p2", "http://p3"]);
        let first = pool.pick().unwrap();
        assert_eq!(pool.mark_bad(&first), 2);
        assert_eq!(pool.pick().unwrap().as_str(), "http://p2");
        assert_eq!(pool.pick().unwrap().as_str(), "http://p3");
        assert_eq!(pool.pick().unwrap().as_str(), "http://p2");

        assert_eq!(pool.mark_bad(&TransportHint::new("http://p2")), 1);
        assert_eq!(pool.mark_bad(&TransportHint::new("http://p3")), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.pick(), None);
    }

    #[test]
    fn retry_policy_classifies_statuses() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 4);
        for status in [403, 429] {
            assert!(policy.is_blocked(status));
            assert!(policy.is_retryable(status));
        }
        for status in [408, 500, 503] {
            assert!(!policy.is_blocked(status));
            assert!(policy.is_retryable(status));
        }
        for status in [200, 400, 404] {
            assert!(!policy.is_retryable(status));
        }
    }
}
