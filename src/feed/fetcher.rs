use super::HttpTransport;
use crate::config::BearerToken;
use crate::error::{ErrorKind, PipelineError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One logical GET. The retry budget only counts 429 responses.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub retry_budget: u32,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, retry_budget: u32) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            retry_budget,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Raw response as seen by the fetcher.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("bearer credential is not configured")]
    MissingCredential,

    #[error("rate limited by {url} after {retries} retries: {}", .last.body)]
    RateLimitExceeded {
        url: String,
        retries: u32,
        last: TransportResponse,
    },

    #[error("not found ({url}): {body}")]
    NotFound { url: String, body: String },

    #[error("HTTP {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::MissingCredential => ErrorKind::Configuration,
            FetchError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            FetchError::NotFound { .. } => ErrorKind::Resolution,
            FetchError::Status { .. } | FetchError::Transport { .. } | FetchError::Decode { .. } => {
                ErrorKind::Network
            }
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        PipelineError::new(err.kind(), err.to_string()).with_cause(err)
    }
}

/// Issues GETs against the upstream API, retrying only on 429.
pub struct RateLimitedFetcher {
    transport: Arc<dyn HttpTransport>,
    credential: Option<BearerToken>,
    fallback_retry_after: Duration,
}

impl RateLimitedFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credential: Option<BearerToken>,
        fallback_retry_after: Duration,
    ) -> Self {
        Self {
            transport,
            credential,
            fallback_retry_after,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Fetch and decode a JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: &FetchRequest) -> Result<T, FetchError> {
        let body = self.fetch(request).await?;
        serde_json::from_str(&body).map_err(|source| FetchError::Decode {
            url: request.url.clone(),
            source,
        })
    }

    /// Fetch a body. A missing credential fails before anything is sent.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let token = self.credential.as_ref().ok_or(FetchError::MissingCredential)?;

        let mut headers = request.headers.clone();
        headers.push(("Authorization".to_string(), format!("Bearer {}", token.as_str())));

        let mut remaining = request.retry_budget;
        loop {
            let resp = self
                .transport
                .get(&request.url, &headers)
                .await
                .map_err(|source| FetchError::Transport {
                    url: request.url.clone(),
                    source,
                })?;

            match resp.status {
                200..=299 => return Ok(resp.body),
                429 if remaining == 0 => {
                    tracing::warn!(url = %request.url, retries = request.retry_budget, "rate limit retry budget exhausted");
                    return Err(FetchError::RateLimitExceeded {
                        url: request.url.clone(),
                        retries: request.retry_budget,
                        last: resp,
                    });
                }
                429 => {
                    let wait = retry_delay(&resp, self.fallback_retry_after, chrono::Utc::now().timestamp());
                    remaining -= 1;
                    tracing::warn!(
                        url = %request.url,
                        retry_after_ms = wait.as_millis() as u64,
                        remaining,
                        "rate limit hit, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                404 => {
                    return Err(FetchError::NotFound {
                        url: request.url.clone(),
                        body: resp.body,
                    });
                }
                status => {
                    return Err(FetchError::Status {
                        url: request.url.clone(),
                        status,
                        body: resp.body,
                    });
                }
            }
        }
    }
}

/// How long to wait before retrying a 429.
///
/// `retry-after` (seconds, integer or fractional) wins; otherwise the
/// `x-rate-limit-reset` epoch the API sends; otherwise `fallback`.
/// A `retry-after` that is negative, NaN or too large for a `Duration` is ignored.
pub fn retry_delay(resp: &TransportResponse, fallback: Duration, now_epoch_s: i64) -> Duration {
    if let Some(delay) = resp
        .header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
    {
        return delay;
    }

    if let Some(reset) = resp
        .header("x-rate-limit-reset")
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        if reset > now_epoch_s {
            return Duration::from_secs((reset - now_epoch_s) as u64);
        }
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<TransportResponse>>,
        calls: AtomicUsize,
        seen_headers: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<TransportResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                seen_headers: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, _url: &str, headers: &[(String, String)]) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_headers.lock().unwrap().push(headers.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError("connection refused".to_string()))
        }
    }

    fn resp(status: u16, headers: &[(&str, &str)], body: &str) -> TransportResponse {
        TransportResponse {
            status,
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: body.to_string(),
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>) -> RateLimitedFetcher {
        RateLimitedFetcher::new(transport, BearerToken::new("tok"), Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_429_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            resp(429, &[("Retry-After", "3")], ""),
            resp(429, &[], ""),
            resp(200, &[], r#"{"ok":true}"#),
        ]);
        let fetcher = fetcher(transport.clone());

        let start = tokio::time::Instant::now();
        let body = fetcher.fetch(&FetchRequest::new("http://x/a", 2)).await.unwrap();

        assert_eq!(body, r#"{"ok":true}"#);
        assert_eq!(transport.calls(), 3);
        // 3s advertised + 2s fallback
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_fails_after_exact_retries() {
        let transport = ScriptedTransport::new(
            (0..4).map(|_| resp(429, &[("retry-after", "1")], "slow down")).collect(),
        );
        let fetcher = fetcher(transport.clone());

        let err = fetcher.fetch(&FetchRequest::new("http://x/a", 3)).await.unwrap_err();

        match &err {
            FetchError::RateLimitExceeded { retries, last, .. } => {
                assert_eq!(*retries, 3);
                assert_eq!(last.status, 429);
                assert_eq!(last.body, "slow down");
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        // initial attempt + 3 retries
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_never_retries() {
        let transport = ScriptedTransport::new(vec![resp(429, &[], ""), resp(200, &[], "{}")]);
        let fetcher = fetcher(transport.clone());

        let err = fetcher.fetch(&FetchRequest::new("http://x/a", 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_statuses_fail_immediately() {
        for (status, kind) in [
            (400, ErrorKind::Network),
            (401, ErrorKind::Network),
            (404, ErrorKind::Resolution),
            (500, ErrorKind::Network),
            (503, ErrorKind::Network),
        ] {
            let transport = ScriptedTransport::new(vec![resp(status, &[], "nope"), resp(200, &[], "{}")]);
            let fetcher = fetcher(transport.clone());

            let err = fetcher.fetch(&FetchRequest::new("http://x/a", 5)).await.unwrap_err();
            assert_eq!(err.kind(), kind, "status {status}");
            assert_eq!(transport.calls(), 1, "status {status} must not be retried");
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        let transport = ScriptedTransport::new(vec![]);
        let fetcher = fetcher(transport.clone());

        let err = fetcher.fetch(&FetchRequest::new("http://x/a", 5)).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert_eq!(PipelineError::from(err).kind, ErrorKind::Network);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_sends_nothing() {
        let transport = ScriptedTransport::new(vec![resp(200, &[], "{}")]);
        let fetcher = RateLimitedFetcher::new(transport.clone(), None, Duration::from_secs(1));

        let err = fetcher.fetch(&FetchRequest::new("http://x/a", 5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_bearer_header_attached() {
        let transport = ScriptedTransport::new(vec![resp(200, &[], "{}")]);
        let fetcher = fetcher(transport.clone());

        fetcher
            .fetch(&FetchRequest::new("http://x/a", 0).header("Accept", "application/json"))
            .await
            .unwrap();

        let seen = transport.seen_headers.lock().unwrap();
        assert!(seen[0].contains(&("Accept".to_string(), "application/json".to_string())));
        assert!(seen[0].contains(&("Authorization".to_string(), "Bearer tok".to_string())));
    }

    #[tokio::test]
    async fn test_fetch_json_decode_failure_is_network_error() {
        let transport = ScriptedTransport::new(vec![resp(200, &[], "<html>")]);
        let fetcher = fetcher(transport);

        let err = fetcher
            .fetch_json::<serde_json::Value>(&FetchRequest::new("http://x/a", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_retry_delay_sources() {
        let fallback = Duration::from_secs(1);
        let now = 1_700_000_000;

        assert_eq!(retry_delay(&resp(429, &[("retry-after", "7")], ""), fallback, now), Duration::from_secs(7));
        assert_eq!(
            retry_delay(&resp(429, &[("retry-after", "0.5")], ""), fallback, now),
            Duration::from_millis(500)
        );
        assert_eq!(
            retry_delay(&resp(429, &[("x-rate-limit-reset", "1700000030")], ""), fallback, now),
            Duration::from_secs(30)
        );
        // reset already passed
        assert_eq!(
            retry_delay(&resp(429, &[("x-rate-limit-reset", "1699999990")], ""), fallback, now),
            fallback
        );
        assert_eq!(retry_delay(&resp(429, &[("retry-after", "soon")], ""), fallback, now), fallback);
        assert_eq!(retry_delay(&resp(429, &[("retry-after", "-3")], ""), fallback, now), fallback);
        assert_eq!(retry_delay(&resp(429, &[("retry-after", "NaN")], ""), fallback, now), fallback);
        assert_eq!(retry_delay(&resp(429, &[("retry-after", "1e20")], ""), fallback, now), fallback);
        assert_eq!(
            retry_delay(
                &resp(429, &[("retry-after", "1e20"), ("x-rate-limit-reset", "1700000030")], ""),
                fallback,
                now
            ),
            Duration::from_secs(30)
        );
        assert_eq!(retry_delay(&resp(429, &[], ""), fallback, now), fallback);
    }
}
