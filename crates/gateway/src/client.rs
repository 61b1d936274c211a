//! Resilience wrapper for outbound provider calls: bounded retries with
//! exponential backoff, no side effects beyond the HTTP request itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One outbound call, described declaratively so the retry loop can replay it.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub bearer_token: Option<SecretString>,
    pub body: Option<Value>,
    /// When set, a 4xx response fails immediately instead of retrying.
    pub non_retryable_client_errors: bool,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            bearer_token: None,
            body: None,
            non_retryable_client_errors: false,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            bearer_token: None,
            body: Some(body),
            non_retryable_client_errors: false,
        }
    }

    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.bearer_token = Some(token);
        self
    }

    pub fn fail_fast_on_client_error(mut self) -> Self {
        self.non_retryable_client_errors = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

/// Why the most recent attempt failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Terminal error after the retry budget is spent (or a fail-fast status).
#[derive(Debug, Error)]
#[error("gateway call failed after {attempts} attempt(s): {last_cause}")]
pub struct GatewayError {
    pub attempts: u32,
    pub last_cause: AttemptFailure,
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, spec: &RequestSpec) -> Result<TransportResponse, AttemptFailure>;
}

pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(|err| {
            GatewayError { attempts: 0, last_cause: AttemptFailure::Transport(err.to_string()) }
        })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, spec: &RequestSpec) -> Result<TransportResponse, AttemptFailure> {
        let mut request = self.http.request(spec.method.as_reqwest(), &spec.url);
        if let Some(token) = &spec.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AttemptFailure::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| AttemptFailure::Transport(err.to_string()))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(TransportResponse { status, body })
    }
}

pub struct GatewayClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl GatewayClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn over_http(timeout: Duration, policy: RetryPolicy) -> Result<Self, GatewayError> {
        Ok(Self::new(Arc::new(HttpTransport::new(timeout)?), policy))
    }

    /// Execute with retries. Retries transport failures and retryable non-2xx
    /// statuses; returns the decoded body of the first successful response.
    pub async fn call(&self, spec: RequestSpec) -> Result<Value, GatewayError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_cause = AttemptFailure::Transport("no attempt made".into());

        for attempt in 1..=max_attempts {
            match self.transport.execute(&spec).await {
                Ok(response) if response.is_success() => {
                    debug!(
                        event_name = "gateway_call_ok",
                        url = %spec.url,
                        status = response.status,
                        attempt,
                        "gateway call succeeded"
                    );
                    return Ok(response.body);
                }
                Ok(response) => {
                    let failure = AttemptFailure::Status {
                        status: response.status,
                        body: response.body.to_string(),
                    };
                    let fail_fast = spec.non_retryable_client_errors
                        && (400..500).contains(&response.status);
                    warn!(
                        event_name = "gateway_attempt_failed",
                        url = %spec.url,
                        status = response.status,
                        attempt,
                        max_attempts,
                        fail_fast,
                        "gateway call attempt failed"
                    );
                    if fail_fast {
                        return Err(GatewayError { attempts: attempt, last_cause: failure });
                    }
                    last_cause = failure;
                }
                Err(failure) => {
                    warn!(
                        event_name = "gateway_attempt_failed",
                        url = %spec.url,
                        error = %failure,
                        attempt,
                        max_attempts,
                        "gateway call attempt failed"
                    );
                    last_cause = failure;
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.backoff(attempt);
                debug!(
                    event_name = "gateway_retry_scheduled",
                    url = %spec.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying gateway call"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(GatewayError { attempts: max_attempts, last_cause })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::{
        AttemptFailure, GatewayClient, RequestSpec, RetryPolicy, Transport, TransportResponse,
    };

    struct FakeTransport {
        calls: AtomicU32,
        /// Status to return per attempt; the last entry repeats.
        statuses: Vec<u16>,
    }

    impl FakeTransport {
        fn new(statuses: Vec<u16>) -> Arc<Self> {
            Arc::new(Self { calls: AtomicU32::new(0), statuses })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn execute(
            &self,
            _spec: &RequestSpec,
        ) -> Result<TransportResponse, AttemptFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let status = *self
                .statuses
                .get(call)
                .or(self.statuses.last())
                .expect("at least one status");
            Ok(TransportResponse { status, body: json!({"call": call}) })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 4, base_delay: Duration::from_secs(1) }
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_endpoint_is_tried_exactly_four_times() {
        let transport = FakeTransport::new(vec![500]);
        let client = GatewayClient::new(transport.clone(), policy());

        let err = client
            .call(RequestSpec::get("https://gateway.test/broken"))
            .await
            .expect_err("exhausted");
        assert_eq!(err.attempts, 4);
        assert_eq!(transport.calls(), 4);
        assert!(matches!(err.last_cause, AttemptFailure::Status { status: 500, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = FakeTransport::new(vec![500, 503, 200]);
        let client = GatewayClient::new(transport.clone(), policy());

        let body = client
            .call(RequestSpec::get("https://gateway.test/flaky"))
            .await
            .expect("eventual success");
        assert_eq!(body, json!({"call": 2}));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_client_error_skips_retries() {
        let transport = FakeTransport::new(vec![404]);
        let client = GatewayClient::new(transport.clone(), policy());

        let err = client
            .call(RequestSpec::get("https://gateway.test/missing").fail_fast_on_client_error())
            .await
            .expect_err("fail fast");
        assert_eq!(err.attempts, 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_from_the_base_delay() {
        let transport = FakeTransport::new(vec![500]);
        let client = GatewayClient::new(transport.clone(), policy());

        let started = tokio::time::Instant::now();
        let _ = client.call(RequestSpec::get("https://gateway.test/broken")).await;
        // 1s + 2s + 4s between the four attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }
}
