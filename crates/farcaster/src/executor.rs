//! Resilient call executor.
//!
//! Every upstream request goes through [`CallExecutor::execute`], which:
//! 1. Takes a token from the shared [`RateGate`] (blocks when exhausted)
//! 2. Issues the request under a fixed per-attempt timeout
//! 3. Returns the token as soon as the physical call completes
//! 4. Retries `429 Too Many Requests` with linear backoff plus jitter
//!
//! Transport failures and any other non-success status are returned
//! immediately without retrying.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use pollcast_common::config::AppConfig;

use crate::error::GatewayError;
use crate::rate_gate::RateGate;

/// Status code the upstream uses to signal throttling.
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Maximum number of response body bytes kept in an error message.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// Raw response of a single physical request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// One physical HTTP exchange with the upstream.
///
/// Implementations must report network-level failures as
/// [`GatewayError::Transport`] and return every HTTP status as a response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, GatewayError>;
}

/// `reqwest`-backed transport that authenticates with the Neynar API key.
pub struct ReqwestTransport {
    client: reqwest::Client,
    api_key: String,
}

impl ReqwestTransport {
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, GatewayError> {
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        }
        .header("api_key", &self.api_key)
        .header(reqwest::header::ACCEPT, "application/json");

        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{method} {url}: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(format!("reading body of {url}: {e}")))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Retry and timeout parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed while the upstream keeps throttling.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n × base_delay` plus jitter.
    pub base_delay: Duration,
    /// Upper bound of the uniform random jitter.
    pub max_jitter: Duration,
    /// Timeout of each physical request.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 12,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.api_max_retries,
            base_delay: Duration::from_millis(config.api_base_delay_ms),
            max_jitter: Duration::from_millis(config.api_max_jitter_ms),
            request_timeout: Duration::from_secs(config.api_request_timeout_secs),
        }
    }

    /// Delay before the attempt following the throttled attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay.saturating_mul(attempt) + Duration::from_millis(jitter)
    }
}

/// State of one in-progress request, carried through the retry loop.
#[derive(Debug)]
struct CallAttempt<'a> {
    url: &'a str,
    method: HttpMethod,
    body: Option<&'a [u8]>,
    attempt: u32,
}

/// Executes upstream requests with bounded concurrency, timeouts and retries.
#[derive(Clone)]
pub struct CallExecutor {
    transport: Arc<dyn Transport>,
    gate: RateGate,
    policy: RetryPolicy,
}

impl CallExecutor {
    pub fn new(transport: Arc<dyn Transport>, gate: RateGate, policy: RetryPolicy) -> Self {
        Self {
            transport,
            gate,
            policy,
        }
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Perform a request and return the raw response body on success.
    pub async fn execute(
        &self,
        url: &str,
        method: HttpMethod,
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>, GatewayError> {
        let mut call = CallAttempt {
            url,
            method,
            body,
            attempt: 0,
        };

        while call.attempt < self.policy.max_retries {
            call.attempt += 1;

            match self.attempt_once(&call).await {
                Err(GatewayError::RateLimited { .. }) => {
                    if call.attempt == self.policy.max_retries {
                        break;
                    }
                    let delay = self.policy.backoff(call.attempt);
                    tracing::debug!(
                        attempt = call.attempt,
                        url = call.url,
                        method = %call.method,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited by upstream, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }

        tracing::warn!(
            attempts = call.attempt,
            url = call.url,
            method = %call.method,
            "Upstream retry limit exceeded"
        );
        Err(GatewayError::RetryExhausted {
            attempts: call.attempt,
            url: url.to_string(),
        })
    }

    /// One physical request. The gate token is held only for its duration.
    async fn attempt_once(&self, call: &CallAttempt<'_>) -> Result<Vec<u8>, GatewayError> {
        let result = {
            let _permit = self.gate.acquire().await?;
            tokio::time::timeout(
                self.policy.request_timeout,
                self.transport.send(call.method, call.url, call.body),
            )
            .await
        };

        let response = match result {
            Ok(response) => response?,
            Err(_) => {
                return Err(GatewayError::Transport(format!(
                    "{} {} timed out after {}ms",
                    call.method,
                    call.url,
                    self.policy.request_timeout.as_millis()
                )));
            }
        };

        match response.status {
            STATUS_TOO_MANY_REQUESTS => Err(GatewayError::RateLimited {
                url: call.url.to_string(),
            }),
            status if (200..300).contains(&status) => Ok(response.body),
            status => Err(GatewayError::Upstream {
                status,
                url: call.url.to_string(),
                body: truncate_body(&response.body),
            }),
        }
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::task::JoinSet;

    use super::*;
    use crate::testing::{FakeTransport, Reply};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        }
    }

    fn executor(transport: Arc<FakeTransport>, capacity: usize, max_retries: u32) -> CallExecutor {
        CallExecutor::new(transport, RateGate::new(capacity), policy(max_retries))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_body() {
        let transport = Arc::new(FakeTransport::new(vec![Reply::ok(r#"{"ok":true}"#)]));
        let exec = executor(transport.clone(), 2, 12);

        let body = exec
            .execute("https://api/x", HttpMethod::Get, None)
            .await
            .unwrap();
        assert_eq!(body, br#"{"ok":true}"#);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success_takes_k_plus_one_attempts() {
        for k in [1usize, 3, 11] {
            let mut replies = vec![Reply::status(429); k];
            replies.push(Reply::ok("done"));
            let transport = Arc::new(FakeTransport::new(replies));
            let exec = executor(transport.clone(), 2, 12);

            let body = exec
                .execute("https://api/x", HttpMethod::Get, None)
                .await
                .unwrap();
            assert_eq!(body, b"done");
            assert_eq!(transport.calls(), k + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_after_max_attempts() {
        let transport = Arc::new(FakeTransport::new(vec![Reply::status(429); 20]));
        let exec = executor(transport.clone(), 2, 12);

        let err = exec
            .execute("https://api/x", HttpMethod::Get, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RetryExhausted { attempts: 12, .. }));
        assert_eq!(transport.calls(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_error_is_not_retried() {
        let transport = Arc::new(FakeTransport::new(vec![
            Reply::status(500),
            Reply::ok("unreachable"),
        ]));
        let exec = executor(transport.clone(), 2, 12);

        let err = exec
            .execute("https://api/x", HttpMethod::Post, Some(b"{}".as_slice()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_not_retried() {
        let transport = Arc::new(FakeTransport::new(vec![
            Reply::transport_error("connection refused"),
            Reply::ok("unreachable"),
        ]));
        let exec = executor(transport.clone(), 2, 12);

        let err = exec
            .execute("https://api/x", HttpMethod::Get, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_transport_error() {
        let transport = Arc::new(
            FakeTransport::new(vec![Reply::ok("late")]).with_latency(Duration::from_secs(30)),
        );
        let exec = executor(transport.clone(), 2, 12);

        let err = exec
            .execute("https://api/x", HttpMethod::Get, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(msg) if msg.contains("timed out")));
        assert_eq!(exec.gate().available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_concurrent_physical_calls() {
        let transport = Arc::new(
            FakeTransport::new(vec![Reply::ok("x"); 16]).with_latency(Duration::from_millis(100)),
        );
        let exec = Arc::new(executor(transport.clone(), 2, 12));

        let mut tasks = JoinSet::new();
        for i in 0..16 {
            let exec = exec.clone();
            tasks.spawn(async move {
                exec.execute(&format!("https://api/{i}"), HttpMethod::Get, None)
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(transport.calls(), 16);
        assert_eq!(transport.peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_not_held_during_backoff() {
        let transport = Arc::new(FakeTransport::new(vec![Reply::status(429), Reply::ok("x")]));
        let exec = Arc::new(executor(transport.clone(), 1, 12));

        let task = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute("https://api/x", HttpMethod::Get, None).await })
        };
        // First attempt completes instantly; the task is now sleeping in backoff.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(exec.gate().available(), 1);

        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn test_backoff_is_linear_plus_bounded_jitter() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));

        let jittered = RetryPolicy::default();
        for attempt in 1..=12 {
            let delay = jittered.backoff(attempt);
            let floor = Duration::from_secs(attempt as u64);
            assert!(delay >= floor);
            assert!(delay <= floor + Duration::from_millis(2000));
        }
    }

    #[test]
    fn test_truncate_body() {
        let long = "a".repeat(2000);
        let truncated = truncate_body(long.as_bytes());
        assert!(truncated.chars().count() <= ERROR_BODY_LIMIT + 1);
        assert_eq!(truncate_body(b"short"), "short");
    }
}
