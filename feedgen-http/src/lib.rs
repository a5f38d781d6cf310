//! Minimal JSON HTTP client for XRPC services, with safe logging and retries.
//!
//! - Request options: bearer auth, query params, timeout, retries
//! - Redacts sensitive query params and JSON body fields; never logs secrets
//! - Retries 5xx with exponential backoff and a capped `Retry-After`;
//!   429 is returned at once so the caller's throttle decides the wait
//! - Optional *raw* request/response logging via `FEEDGEN_HTTP_RAW=1`
//!
//! Example (no_run):
//! ```rust
//! # async fn demo() -> Result<(), feedgen_http::HttpError> {
//! let client = feedgen_http::HttpClient::new("https://bsky.social")?;
//! let got: serde_json::Value = client
//!     .get_json("xrpc/_health", feedgen_http::RequestOpts::default())
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! Observability: structured `tracing` events are emitted for request start,
//! response headers (including the XRPC `ratelimit-*` headers), body snippets
//! (truncated), retries and final errors. Raw lines use target `http.raw`.

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

pub use reqwest::StatusCode;

// ==============================
// Raw logging toggles
// ==============================

const RAW_ENV: &str = "FEEDGEN_HTTP_RAW";
const RAW_MAX_BODY: usize = 64 * 1024;
const SNIPPET_MAX: usize = 500;

/// Upper bound on a server-provided `Retry-After` sleep.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Keys whose values never reach a log line, in query strings or JSON bodies.
const SECRET_KEYS: &[&str] = &[
    "access_token",
    "accessjwt",
    "refreshjwt",
    "authorization",
    "auth",
    "key",
    "api_key",
    "token",
    "secret",
    "password",
    "client_secret",
    "bearer",
];

fn raw_enabled() -> bool {
    matches!(
        env::var(RAW_ENV).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEYS.contains(&lower.as_str())
}

// ==============================
// Errors
// ==============================

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("request build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}, body_snippet: {1}")]
    Decode(String, String),
    #[error("server returned error {status} ({error}): {message}, request_id={request_id}")]
    Api {
        status: StatusCode,
        /// XRPC error name, e.g. `AuthenticationRequired` or `RateLimitExceeded`.
        error: String,
        message: String,
        request_id: String,
    },
}

impl HttpError {
    /// HTTP status for `Api` errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server signalled throttling (429 or `RateLimitExceeded`).
    pub fn is_rate_limited(&self) -> bool {
        match self {
            HttpError::Api { status, error, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || error == "RateLimitExceeded"
            }
            _ => false,
        }
    }
}

// ==============================
// Request Options
// ==============================

/// Per-request tuning knobs for the HTTP client.
///
/// ```
/// use feedgen_http::RequestOpts;
/// use std::time::Duration;
///
/// let opts = RequestOpts {
///     timeout: Some(Duration::from_secs(30)),
///     retries: Some(1),
///     bearer: Some("jwt"),
///     ..Default::default()
/// };
///
/// assert_eq!(opts.timeout.unwrap().as_secs(), 30);
/// assert!(opts.query.is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestOpts<'a> {
    pub timeout: Option<Duration>,
    pub retries: Option<usize>,
    /// `Authorization: Bearer <token>`
    pub bearer: Option<&'a str>,
    pub query: Option<Vec<(&'a str, Cow<'a, str>)>>,
}

// ==============================
// Client
// ==============================

#[derive(Clone)]
pub struct HttpClient {
    base: Url,
    inner: Client,
    pub default_timeout: Duration,
    pub max_retries: usize,
}

impl HttpClient {
    /// Construct a client anchored to a base URL.
    ///
    /// ```no_run
    /// use feedgen_http::{HttpClient, HttpError};
    /// use std::time::Duration;
    ///
    /// let client = HttpClient::new("https://bsky.social")?;
    /// assert_eq!(client.default_timeout, Duration::from_secs(15));
    /// assert_eq!(client.max_retries, 2);
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn new(base: &str) -> Result<Self, HttpError> {
        let base = Url::parse(base).map_err(|e| HttpError::Url(e.to_string()))?;
        let inner = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Self {
            base,
            inner,
            default_timeout: Duration::from_secs(15),
            max_retries: 2,
        })
    }

    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.default_timeout = dur;
        self
    }

    pub fn with_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// GET JSON with per-request options.
    pub async fn get_json<T>(&self, path: &str, opts: RequestOpts<'_>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.request_json::<(), T>(Method::GET, path, None, opts)
            .await
    }

    /// POST a JSON body with per-request options.
    pub async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        opts: RequestOpts<'_>,
    ) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json(Method::POST, path, Some(body), opts)
            .await
    }

    async fn request_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        opts: RequestOpts<'_>,
    ) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self
            .base
            .join(path)
            .map_err(|e| HttpError::Url(e.to_string()))?;

        let body_bytes = match body {
            Some(b) => Some(serde_json::to_vec(b).map_err(|e| HttpError::Build(e.to_string()))?),
            None => None,
        };
        let bearer = match opts.bearer {
            Some(tok) => Some(sanitize_bearer(tok)?),
            None => None,
        };
        let pairs: Vec<(&str, &str)> = opts
            .query
            .as_ref()
            .map(|q| q.iter().map(|(k, v)| (*k, v.as_ref())).collect())
            .unwrap_or_default();
        let redacted_q: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| {
                let v = if is_secret_key(k) { "<redacted>" } else { *v };
                ((*k).to_string(), v.to_string())
            })
            .collect();

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let max_retries = opts.retries.unwrap_or(self.max_retries);
        let req_id = format!("r{}", uuid::Uuid::new_v4().simple());
        let mut attempt = 0usize;

        loop {
            let mut rb = self
                .inner
                .request(method.clone(), url.clone())
                .timeout(timeout)
                .header(reqwest::header::ACCEPT, "application/json");
            if !pairs.is_empty() {
                rb = rb.query(&pairs);
            }
            if let Some(bytes) = &body_bytes {
                rb = rb
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(bytes.clone());
            }
            if let Some(tok) = &bearer {
                rb = rb.bearer_auth(tok);
            }

            tracing::debug!(
                req_id=%req_id,
                attempt=attempt + 1,
                max_retries,
                method=%method,
                host_path=%format!("{}{}", url.host_str().unwrap_or("-"), url.path()),
                query=?redacted_q,
                timeout_ms=timeout.as_millis() as u64,
                authenticated=bearer.is_some(),
                has_body=body_bytes.is_some(),
                "http.request.start"
            );

            if raw_enabled() {
                let curl = make_curl(&method, &url, &redacted_q, body_bytes.as_deref());
                tracing::debug!(target: "http.raw", %req_id, %curl, "request");
            }

            let t0 = std::time::Instant::now();
            let request = rb.build().map_err(|e| HttpError::Build(e.to_string()))?;
            let sent = match self.inner.execute(request).await {
                Ok(resp) => {
                    let status = resp.status();
                    let headers = resp.headers().clone();
                    resp.bytes().await.map(|bytes| (status, headers, bytes))
                }
                Err(err) => Err(err),
            };

            let (status, headers, bytes) = match sent {
                Ok(parts) => parts,
                Err(err) => {
                    let message = err.to_string();
                    if attempt < max_retries {
                        attempt += 1;
                        let delay = exp_backoff(attempt);
                        tracing::warn!(
                            req_id=%req_id,
                            attempt,
                            max_retries,
                            backoff_ms=delay.as_millis() as u64,
                            message=%message,
                            "http.retrying.network"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    tracing::warn!(
                        req_id=%req_id,
                        attempt,
                        max_retries,
                        message=%message,
                        "http.network_error"
                    );
                    return Err(HttpError::Network(message));
                }
            };
            let dur_ms = t0.elapsed().as_millis() as u64;

            let server_req_id = headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();

            tracing::debug!(
                req_id=%req_id,
                %status,
                duration_ms=dur_ms,
                body_len=bytes.len(),
                x_request_id=%server_req_id,
                rate_limit.limit=?header_str(&headers, "ratelimit-limit"),
                rate_limit.remaining=?header_str(&headers, "ratelimit-remaining"),
                rate_limit.reset=?header_str(&headers, "ratelimit-reset"),
                "http.response.headers"
            );

            if raw_enabled() {
                let hdrs = redact_headers(&headers);
                let truncated = bytes.len() > RAW_MAX_BODY;
                let text = String::from_utf8_lossy(&bytes[..bytes.len().min(RAW_MAX_BODY)]);
                tracing::info!(
                    target: "http.raw",
                    %req_id,
                    status=%status,
                    duration_ms=dur_ms,
                    headers=?hdrs,
                    body=%text,
                    truncated
                );
            }

            let snippet = snip_body(&bytes);
            tracing::trace!(req_id=%req_id, body_snippet=%snippet, "http.response.body_snippet");

            if status.is_success() {
                return serde_json::from_slice::<T>(&bytes).map_err(|e| {
                    tracing::warn!(
                        req_id=%req_id,
                        serde_line=%e.line(),
                        serde_col=%e.column(),
                        serde_err=%e.to_string(),
                        body_snippet=%snippet,
                        "http.response.decode_error"
                    );
                    HttpError::Decode(e.to_string(), snippet)
                });
            }

            let (error, message) = extract_xrpc_error(&bytes);

            // 429 is never retried here; the caller's throttle owns that wait.
            if status.is_server_error() && attempt < max_retries {
                attempt += 1;
                let delay = retry_delay(&headers, attempt);
                tracing::warn!(
                    req_id=%req_id,
                    %status,
                    attempt,
                    max_retries,
                    backoff_ms=delay.as_millis() as u64,
                    error=%error,
                    message=%message,
                    "http.retrying"
                );
                sleep(delay).await;
                continue;
            }

            tracing::warn!(
                req_id=%req_id,
                %status,
                error=%error,
                message=%message,
                x_request_id=%server_req_id,
                body_snippet=%snippet,
                "http.error"
            );
            return Err(HttpError::Api {
                status,
                error,
                message,
                request_id: server_req_id,
            });
        }
    }
}

// ==============================
// Helpers
// ==============================

fn exp_backoff(attempt: usize) -> Duration {
    let shift = attempt.saturating_sub(1).min(10) as u32;
    Duration::from_millis(200u64.saturating_mul(1 << shift))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// XRPC errors look like `{"error":"AuthenticationRequired","message":"..."}`.
fn extract_xrpc_error(body: &[u8]) -> (String, String) {
    #[derive(Deserialize)]
    struct XrpcError {
        #[serde(default)]
        error: String,
        #[serde(default)]
        message: String,
    }

    match serde_json::from_slice::<XrpcError>(body) {
        Ok(e) if !e.error.is_empty() || !e.message.is_empty() => {
            let message = if e.message.is_empty() {
                e.error.clone()
            } else {
                e.message
            };
            (e.error, message)
        }
        _ => (String::new(), snip_body(body)),
    }
}

fn retry_delay(headers: &HeaderMap, attempt: usize) -> Duration {
    match retry_after_delay_secs(headers) {
        Some(secs) => Duration::from_secs(secs).min(MAX_RETRY_AFTER),
        None => exp_backoff(attempt),
    }
}

fn retry_after_delay_secs(h: &HeaderMap) -> Option<u64> {
    h.get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())?
        .trim()
        .parse()
        .ok()
}

fn snip_body(body: &[u8]) -> String {
    let mut snip = String::from_utf8_lossy(body).to_string();
    if snip.len() > SNIPPET_MAX {
        let mut cut = SNIPPET_MAX;
        while !snip.is_char_boundary(cut) {
            cut -= 1;
        }
        snip.truncate(cut);
        snip.push_str("...");
    }
    snip
}

fn redact_headers(h: &HeaderMap) -> Vec<(String, String)> {
    h.iter()
        .map(|(k, v)| {
            let key = k.as_str().to_string();
            let val = if is_secret_key(&key) || key.eq_ignore_ascii_case("set-cookie") {
                "<redacted>".to_string()
            } else {
                v.to_str().unwrap_or("").to_string()
            };
            (key, val)
        })
        .collect()
}

/// Replace secret-looking fields of a JSON object body before it is logged.
fn redact_json_body(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Object(mut map)) => {
            for (k, v) in map.iter_mut() {
                if is_secret_key(k) {
                    *v = serde_json::Value::String("<redacted>".into());
                }
            }
            serde_json::Value::Object(map).to_string()
        }
        Ok(other) => other.to_string(),
        Err(_) => format!("<{} bytes>", bytes.len()),
    }
}

/// Render a best-effort curl command for repro/debug, with secrets redacted.
fn make_curl(method: &Method, url: &Url, query: &[(String, String)], body: Option<&[u8]>) -> String {
    let mut target = url.clone();
    target.set_query(None);
    if !query.is_empty() {
        let mut qp = target.query_pairs_mut();
        for (k, v) in query {
            qp.append_pair(k, v);
        }
    }

    let mut parts = vec!["curl".to_string(), format!("-X{}", method)];
    if let Some(bytes) = body {
        let mut s = redact_json_body(bytes);
        if s.len() > RAW_MAX_BODY {
            let mut cut = RAW_MAX_BODY;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            s.truncate(cut);
        }
        parts.push("-H 'Content-Type: application/json'".into());
        parts.push(format!("-d '{}'", s.replace('\'', r"'\''")));
    }
    parts.push(format!("'{}'", target.as_str()));
    parts.join(" ")
}

fn sanitize_bearer(raw: &str) -> Result<String, HttpError> {
    let mut s = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    s.retain(|ch| !ch.is_ascii_whitespace());

    if s.is_empty() {
        return Err(HttpError::Build("bearer token is empty".into()));
    }
    if !s.is_ascii() {
        return Err(HttpError::Build("bearer token contains non-ASCII bytes".into()));
    }
    HeaderValue::from_str(&format!("Bearer {}", s))
        .map_err(|e| HttpError::Build(format!("invalid Authorization header: {e}")))?;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn xrpc_error_body_is_split_into_name_and_message() {
        let body = br#"{"error":"AuthenticationRequired","message":"Invalid identifier or password"}"#;
        let (error, message) = extract_xrpc_error(body);
        assert_eq!(error, "AuthenticationRequired");
        assert_eq!(message, "Invalid identifier or password");
    }

    #[test]
    fn non_json_error_body_falls_back_to_snippet() {
        let (error, message) = extract_xrpc_error(b"Bad Gateway");
        assert!(error.is_empty());
        assert_eq!(message, "Bad Gateway");
    }

    #[test]
    fn password_never_appears_in_curl_output() {
        let url = Url::parse("https://bsky.social/xrpc/com.atproto.server.createSession").unwrap();
        let body = serde_json::to_vec(&json!({"identifier": "me", "password": "hunter2"})).unwrap();
        let curl = make_curl(&Method::POST, &url, &[], Some(&body));
        assert!(!curl.contains("hunter2"));
        assert!(curl.contains("<redacted>"));
        assert!(curl.contains("\"identifier\":\"me\""));
    }

    #[test]
    fn snippets_are_truncated_on_char_boundaries() {
        let long = "é".repeat(400);
        let snip = snip_body(long.as_bytes());
        assert!(snip.ends_with("..."));
        assert!(snip.len() <= SNIPPET_MAX + 3);
    }

    #[test]
    fn oversized_non_ascii_body_is_cut_on_a_char_boundary() {
        let url = Url::parse("https://bsky.social/xrpc/app.bsky.feed.post").unwrap();
        // `{"text":"` is 9 bytes, so the cut lands inside a two-byte "é".
        let body = serde_json::to_vec(&json!({ "text": "é".repeat(RAW_MAX_BODY) })).unwrap();
        assert!(!std::str::from_utf8(&body).unwrap().is_char_boundary(RAW_MAX_BODY));
        let curl = make_curl(&Method::POST, &url, &[], Some(&body));
        assert!(curl.starts_with("curl -XPOST"));
        assert!(curl.len() < body.len());
    }

    #[test]
    fn retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "3600".parse().unwrap());
        assert_eq!(retry_delay(&headers, 1), MAX_RETRY_AFTER);

        headers.insert(RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(retry_delay(&headers, 1), Duration::from_secs(2));

        assert_eq!(retry_delay(&HeaderMap::new(), 2), exp_backoff(2));
    }

    #[test]
    fn blank_bearer_is_rejected() {
        assert!(matches!(sanitize_bearer("  "), Err(HttpError::Build(_))));
        assert_eq!(sanitize_bearer(" \"abc\" ").unwrap(), "abc");
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(exp_backoff(1), Duration::from_millis(200));
        assert_eq!(exp_backoff(2), Duration::from_millis(400));
        assert_eq!(exp_backoff(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn get_json_sends_bearer_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.feed.getTimeline"))
            .and(query_param("limit", "30"))
            .and(header("authorization", "Bearer jwt-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"feed": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let got: serde_json::Value = client
            .get_json(
                "xrpc/app.bsky.feed.getTimeline",
                RequestOpts {
                    bearer: Some("jwt-123"),
                    query: Some(vec![("limit", "30".into())]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(got, json!({"feed": []}));
    }

    #[tokio::test]
    async fn post_json_sends_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .and(body_json(json!({"identifier": "me", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let got: serde_json::Value = client
            .post_json(
                "xrpc/com.atproto.server.createSession",
                &json!({"identifier": "me", "password": "pw"}),
                RequestOpts::default(),
            )
            .await
            .unwrap();
        assert_eq!(got["ok"], json!(true));
    }

    #[tokio::test]
    async fn rate_limit_is_surfaced_without_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.feed.searchPosts"))
            .respond_with(ResponseTemplate::new(429).set_body_json(
                json!({"error": "RateLimitExceeded", "message": "Rate Limit Exceeded"}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let err = client
            .get_json::<serde_json::Value>(
                "xrpc/app.bsky.feed.searchPosts",
                RequestOpts {
                    retries: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried_even_with_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.feed.getTimeline"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3600"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap().with_retries(3);
        let err = client
            .get_json::<serde_json::Value>("xrpc/app.bsky.feed.getTimeline", RequestOpts::default())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 1})))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap().with_retries(1);
        let got: serde_json::Value = client
            .get_json("flaky", RequestOpts::default())
            .await
            .unwrap();
        assert_eq!(got["n"], json!(1));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let err = client
            .get_json::<serde_json::Value>("garbage", RequestOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Decode(_, snippet) if snippet == "not json"));
    }
}
