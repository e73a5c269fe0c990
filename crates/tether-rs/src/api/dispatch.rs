//! Resilient request dispatch.
//!
//! [`Client::send`] and [`Client::send_stream`] share one attempt loop:
//!
//! 1. merge the client default and per-call [`RetryPolicy`] fragments;
//! 2. rebuild the request from its buffered body and execute it;
//! 3. transport failures are recorded and retried at once, with no backoff;
//! 4. a status in `[200, 400)` ends the loop successfully;
//! 5. other statuses are classified; non-retryable ones fail immediately,
//!    retryable ones wait out a jittered backoff that cancellation cuts short.
//!
//! The per-attempt failure trail is only logged; callers get the classified
//! error or [`Error::RetriesExhausted`].

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{
    ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::classify::classify_response;
use super::headers::ApiResponse;
use super::retry::{RetryPolicy, backoff};
use super::streaming::StreamReader;
use crate::Client;
use crate::error::{Error, Result};

// ── Request ────────────────────────────────────────────────────────

/// A prepared request whose body is fully buffered, so every attempt sends
/// identical bytes.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Serialize `body` as JSON.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidRequest(format!("failed to serialize request body: {e}")))?;
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Use raw bytes as the body. Set a content type with [`header`](Self::header)
    /// when the body is not JSON.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Read `reader` to the end and use its contents as the body.
    pub async fn read_body<R: AsyncRead + Unpin>(mut self, mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::InvalidRequest(format!("failed to read request body: {e}")))?;
        self.body = Some(Bytes::from(buf));
        Ok(self)
    }

    /// Set a header, replacing any previous value.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Append a header given as strings.
    pub fn append_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| Error::InvalidRequest(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::InvalidRequest(format!("invalid value for header '{name}': {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Per-attempt timeout covering the whole exchange.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort transport calls and backoff waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn buffered(mut self) -> Self {
        self.headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        // Multipart and other non-JSON uploads bring their own content type.
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        self
    }

    fn streaming(mut self) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        self.headers
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        self.headers
            .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        // Streams stay open for as long as the model generates.
        self.timeout = None;
        self
    }

    /// Build a fresh transport request from the buffered parts.
    fn rehydrate(&self, http: &reqwest::Client) -> Result<reqwest::Request> {
        let mut builder = http
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| Error::InvalidRequest(format!("failed to build request: {e}")))
    }
}

// ── Attempt trail ──────────────────────────────────────────────────

#[derive(Debug)]
enum AttemptOutcome {
    Transport(String),
    Status { code: u16, error: String },
}

/// One failed attempt, kept for the diagnostic trail of a single call.
#[derive(Debug)]
struct Attempt {
    number: u32,
    of: u32,
    outcome: AttemptOutcome,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Transport(cause) => write!(
                f,
                "#{}/{} failed to send request: {cause}",
                self.number, self.of
            ),
            AttemptOutcome::Status { code, error } => write!(
                f,
                "#{}/{} error response received ({code}): {error}",
                self.number, self.of
            ),
        }
    }
}

fn trail(failures: &[Attempt]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn is_failure_status(status: StatusCode) -> bool {
    status.as_u16() < 200 || status.as_u16() >= 400
}

// ── Dispatch ───────────────────────────────────────────────────────

impl Client {
    /// Send a buffered request and decode the JSON response body into `T`.
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        retry: &[RetryPolicy],
    ) -> Result<ApiResponse<T>> {
        let (headers, body) = self.send_buffered(request, retry).await?;
        let body = serde_json::from_slice(&body)?;
        Ok(ApiResponse { body, headers })
    }

    /// Send a buffered request and return the response body as text.
    pub async fn send_text(
        &self,
        request: ApiRequest,
        retry: &[RetryPolicy],
    ) -> Result<ApiResponse<String>> {
        let (headers, body) = self.send_buffered(request, retry).await?;
        Ok(ApiResponse {
            body: String::from_utf8_lossy(&body).into_owned(),
            headers,
        })
    }

    /// Send a streaming request and bind a [`StreamReader`] to the live body.
    pub async fn send_stream<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        retry: &[RetryPolicy],
    ) -> Result<StreamReader<T>> {
        let request = request.streaming();
        let policy = self.retry_policy(retry);
        let resp = self.execute_with_retry(&request, &policy, "send_stream").await?;
        Ok(StreamReader::from_response(
            resp,
            self.config().empty_messages_limit,
        ))
    }

    async fn send_buffered(
        &self,
        request: ApiRequest,
        retry: &[RetryPolicy],
    ) -> Result<(HeaderMap, Bytes)> {
        let mut request = request.buffered();
        if request.timeout.is_none() {
            request.timeout = self.config().timeout;
        }
        let policy = self.retry_policy(retry);
        let resp = self.execute_with_retry(&request, &policy, "send").await?;
        let headers = resp.headers().clone();

        let body = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(Error::Cancelled),
            body = resp.bytes() => body?,
        };
        Ok((headers, body))
    }

    /// Client-wide default policy with the per-call fragments merged on top.
    fn retry_policy(&self, fragments: &[RetryPolicy]) -> RetryPolicy {
        RetryPolicy::merged(std::iter::once(&self.config().retry).chain(fragments))
    }

    /// Run the attempt loop until a response with a non-failure status
    /// arrives, a fatal outcome occurs, or the budget is spent.
    async fn execute_with_retry(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
        op: &'static str,
    ) -> Result<reqwest::Response> {
        let max_attempts = policy.max_attempts();
        let mut failures: Vec<Attempt> = Vec::new();

        for i in 0..max_attempts {
            let number = i + 1;
            let http_request = request.rehydrate(&self.http)?;

            debug!(
                op,
                attempt = number,
                max_attempts,
                method = %request.method,
                url = %request.url,
                "sending request"
            );

            let result = tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    error!(
                        op,
                        tries = number,
                        max_attempts,
                        failures = %trail(&failures),
                        "request cancelled while waiting for a response"
                    );
                    return Err(Error::Cancelled);
                }
                result = self.http.execute(http_request) => result,
            };

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(op, attempt = number, max_attempts, error = %e, "failed to send request");
                    failures.push(Attempt {
                        number,
                        of: max_attempts,
                        outcome: AttemptOutcome::Transport(e.to_string()),
                    });
                    continue;
                }
            };

            let status = resp.status();
            if !is_failure_status(status) {
                debug!(op, attempt = number, status = status.as_u16(), "request succeeded");
                return Ok(resp);
            }

            let classified = tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    error!(
                        op,
                        tries = number,
                        max_attempts,
                        failures = %trail(&failures),
                        "request cancelled while reading error response"
                    );
                    return Err(Error::Cancelled);
                }
                classified = classify_response(resp) => classified,
            };
            warn!(
                op,
                attempt = number,
                max_attempts,
                status = status.as_u16(),
                error = %classified,
                "error response received"
            );
            failures.push(Attempt {
                number,
                of: max_attempts,
                outcome: AttemptOutcome::Status {
                    code: status.as_u16(),
                    error: classified.to_string(),
                },
            });

            if !policy.can_retry(status.as_u16()) {
                error!(
                    op,
                    code = status.as_u16(),
                    tries = number,
                    max_attempts,
                    failures = %trail(&failures),
                    "request failed on non-retriable status code"
                );
                return Err(classified);
            }

            if number == max_attempts {
                break;
            }

            let delay = policy.delay_for_attempt(i);
            debug!(op, attempt = number, delay_ms = delay.as_millis() as u64, "backing off");
            if let Err(e) = backoff(delay, &request.cancel).await {
                error!(
                    op,
                    tries = number,
                    max_attempts,
                    failures = %trail(&failures),
                    "request cancelled during backoff"
                );
                return Err(e);
            }
        }

        error!(
            op,
            tries = max_attempts,
            failures = %trail(&failures),
            "request failed after exceeding retry limit"
        );
        Err(Error::RetriesExhausted {
            attempts: max_attempts,
            last: failures
                .last()
                .map(ToString::to_string)
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_defaults_to_json_content_type() {
        let req = ApiRequest::new(Method::POST, "http://localhost/v1/x").buffered();
        assert_eq!(req.headers()[ACCEPT], "application/json");
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn buffered_keeps_caller_content_type() {
        let req = ApiRequest::new(Method::POST, "http://localhost/v1/files")
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("multipart/form-data; boundary=x"),
            )
            .buffered();
        assert_eq!(req.headers()[CONTENT_TYPE], "multipart/form-data; boundary=x");
    }

    #[test]
    fn streaming_sets_event_stream_headers_and_drops_timeout() {
        let req = ApiRequest::new(Method::POST, "http://localhost/v1/x")
            .timeout(Duration::from_secs(5))
            .streaming();
        assert_eq!(req.headers()[ACCEPT], "text/event-stream");
        assert_eq!(req.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(req.headers()[CONNECTION], "keep-alive");
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
        assert!(req.timeout.is_none());
    }

    #[test]
    fn rehydrated_requests_carry_identical_bodies() {
        let http = reqwest::Client::new();
        let req = ApiRequest::new(Method::POST, "http://localhost/v1/x")
            .json(&serde_json::json!({"model": "m", "n": 1}))
            .unwrap();
        let first = req.rehydrate(&http).unwrap();
        let second = req.rehydrate(&http).unwrap();
        let bytes = |r: &reqwest::Request| r.body().and_then(|b| b.as_bytes()).map(<[u8]>::to_vec);
        assert_eq!(bytes(&first), bytes(&second));
        assert_eq!(bytes(&first).unwrap(), br#"{"model":"m","n":1}"#);
    }

    #[test]
    fn invalid_url_is_rejected_before_sending() {
        let http = reqwest::Client::new();
        let req = ApiRequest::new(Method::GET, "not a url");
        assert!(matches!(req.rehydrate(&http), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn append_header_rejects_invalid_names() {
        let req = ApiRequest::new(Method::GET, "http://localhost");
        assert!(req.clone().append_header("X-Trace", "abc").is_ok());
        assert!(matches!(
            req.append_header("bad header", "v"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn read_body_buffers_reader_contents() {
        let req = ApiRequest::new(Method::POST, "http://localhost")
            .read_body(&b"raw upload"[..])
            .await
            .unwrap();
        assert_eq!(req.body_bytes().unwrap().as_ref(), b"raw upload");
    }

    #[test]
    fn attempt_trail_is_readable() {
        let failures = vec![
            Attempt {
                number: 1,
                of: 2,
                outcome: AttemptOutcome::Transport("connection refused".into()),
            },
            Attempt {
                number: 2,
                of: 2,
                outcome: AttemptOutcome::Status {
                    code: 503,
                    error: "HTTP 503: busy".into(),
                },
            },
        ];
        assert_eq!(
            trail(&failures),
            "#1/2 failed to send request: connection refused; \
             #2/2 error response received (503): HTTP 503: busy"
        );
    }

    #[test]
    fn failure_status_range() {
        assert!(!is_failure_status(StatusCode::OK));
        assert!(!is_failure_status(StatusCode::NO_CONTENT));
        assert!(!is_failure_status(StatusCode::NOT_MODIFIED));
        assert!(is_failure_status(StatusCode::BAD_REQUEST));
        assert!(is_failure_status(StatusCode::CONTINUE));
        assert!(is_failure_status(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
