//! Resilient client for the DDI authority's REST API (Infoblox WAPI)
//!
//! Every outbound call passes through the same pipeline:
//! rate limiter, global and per-host concurrency permits, the HTTP exchange,
//! then retry classification. Session cookies issued by the authority are
//! reused until a 401 invalidates them.

use anyhow::{Context, Result};
use futures::future::join_all;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::header::{COOKIE, RETRY_AFTER, SET_COOKIE};
use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use super::retry::{parse_retry_after, RetryPolicy};
use crate::config::{AuthorityConfig, ClientConfig};

const SESSION_COOKIE: &str = "ibapauth";

/// Outbound token bucket shared by every request of one client
pub type OutboundRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Transport-level failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportFailure {
    Connect,
    Timeout,
    /// Gave up waiting locally for rate or concurrency capacity; nothing was sent
    Capacity,
    Other,
}

/// What the last attempt observed before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LastStatus {
    Http(u16),
    Transport(TransportFailure),
}

impl fmt::Display for LastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastStatus::Http(status) => write!(f, "HTTP {}", status),
            LastStatus::Transport(TransportFailure::Connect) => write!(f, "connection failed"),
            LastStatus::Transport(TransportFailure::Timeout) => write!(f, "timed out"),
            LastStatus::Transport(TransportFailure::Capacity) => {
                write!(f, "no request capacity")
            }
            LastStatus::Transport(TransportFailure::Other) => write!(f, "transport error"),
        }
    }
}

/// Failure of a call to the authority
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// Retries exhausted on connection errors, timeouts, 5xx or 429
    #[error("{last} after {attempts} attempt(s): {message}")]
    Transient {
        last: LastStatus,
        attempts: u32,
        message: String,
        idempotent: bool,
    },

    /// Rejected by the authority; retrying will not help
    #[error("HTTP {status}: {message}")]
    Permanent {
        status: u16,
        message: String,
        code: Option<String>,
        idempotent: bool,
    },

    #[error("authentication failed (HTTP {status})")]
    Authentication { status: u16 },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Last HTTP status observed, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transient {
                last: LastStatus::Http(status),
                ..
            } => Some(*status),
            ClientError::Permanent { status, .. } | ClientError::Authentication { status } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Authority error code such as `Client.Ibap.Data.Conflict`
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Permanent { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// A transient failure of an idempotent request, safe to resubmit
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transient {
                idempotent: true,
                ..
            }
        )
    }

    /// The authority could not be reached at all
    ///
    /// Local capacity waits never reached the network and do not count.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ClientError::Transient {
                last: LastStatus::Transport(
                    TransportFailure::Connect | TransportFailure::Timeout | TransportFailure::Other
                ),
                ..
            }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::Transient {
                last: LastStatus::Transport(TransportFailure::Timeout),
                ..
            }
        )
    }
}

/// A single call to the authority, relative to the versioned API root
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

/// Result of one HTTP exchange, read fully while permits are held
enum Exchange {
    Response {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    Transport {
        failure: TransportFailure,
        message: String,
    },
}

/// DDI authority API client
pub struct WapiClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    retry: RetryPolicy,
    request_timeout: Duration,
    limiter: OutboundRateLimiter,
    global: Arc<Semaphore>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_per_host: usize,
    session: RwLock<Option<String>>,
}

impl WapiClient {
    pub fn new(authority: &AuthorityConfig, client: &ClientConfig) -> Result<Self> {
        info!("Initializing DDI authority client for {}", authority.url);

        let request_timeout = Duration::from_secs(client.request_timeout_secs);
        let mut builder = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .pool_idle_timeout(Duration::from_secs(client.pool_idle_timeout_secs))
            .pool_max_idle_per_host(client.max_per_host);

        if !authority.ssl_verify {
            warn!("SSL certificate verification is DISABLED - this is insecure!");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(client.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(client.burst).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            http,
            base_url: authority.base_url(),
            username: authority.username.clone(),
            password: authority.password.clone(),
            retry: RetryPolicy::from_config(client),
            request_timeout,
            limiter: RateLimiter::direct(quota),
            global: Arc::new(Semaphore::new(client.max_concurrent.max(1))),
            per_host: Mutex::new(HashMap::new()),
            max_per_host: client.max_per_host.max(1),
            session: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Issue one request with retry
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let mut request = ApiRequest::new(method, path);
        request.body = body;
        self.send(&request).await
    }

    /// Issue independent requests concurrently; results keep input order
    pub async fn batch(&self, requests: &[ApiRequest]) -> Vec<Result<Value, ClientError>> {
        debug!(count = requests.len(), "Sending request batch");
        join_all(requests.iter().map(|request| self.send(request))).await
    }

    /// Issue a fully described request with retry
    pub async fn send(&self, request: &ApiRequest) -> Result<Value, ClientError> {
        let url = self.url_for(request)?;
        let host = host_key(&url);
        let idempotent = request.is_idempotent();

        let mut attempts: u32 = 0;
        let mut reauthenticated = false;

        loop {
            attempts += 1;
            let use_session = !reauthenticated;
            let exchange = self.exchange(request, &url, &host, use_session).await;

            let (last, message, retry_after) = match exchange {
                Exchange::Response { status, body, .. } if (200..300).contains(&status) => {
                    debug!(method = %request.method, url = %url, status, attempts, "Request succeeded");
                    return Ok(parse_body(&body));
                }
                Exchange::Response { status: 401, .. } => {
                    self.clear_session().await;
                    if reauthenticated {
                        error!(url = %url, "Authentication rejected after re-authentication");
                        return Err(ClientError::Authentication { status: 401 });
                    }
                    warn!(url = %url, "Session rejected, re-authenticating with credentials");
                    reauthenticated = true;
                    // The re-authentication exchange does not consume an attempt
                    attempts -= 1;
                    continue;
                }
                Exchange::Response {
                    status,
                    retry_after,
                    body,
                } if status == 429 || status >= 500 => {
                    (LastStatus::Http(status), error_text(&body), retry_after)
                }
                Exchange::Response { status, body, .. } => {
                    warn!(method = %request.method, url = %url, status, "Request rejected");
                    return Err(ClientError::Permanent {
                        status,
                        message: error_text(&body),
                        code: error_code(&body),
                        idempotent,
                    });
                }
                Exchange::Transport { failure, message } => {
                    (LastStatus::Transport(failure), message, None)
                }
            };

            if !self.retry.has_attempts_left(attempts) {
                error!(
                    method = %request.method,
                    url = %url,
                    attempts,
                    last = %last,
                    "Giving up after transient failures"
                );
                return Err(ClientError::Transient {
                    last,
                    attempts,
                    message,
                    idempotent,
                });
            }

            let delay = match last {
                LastStatus::Http(429) => self.retry.throttled_delay(retry_after, attempts - 1),
                _ => self.retry.backoff(attempts - 1),
            };
            warn!(
                method = %request.method,
                url = %url,
                attempt = attempts,
                last = %last,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn exchange(
        &self,
        request: &ApiRequest,
        url: &Url,
        host: &str,
        use_session: bool,
    ) -> Exchange {
        let host_permits = self.host_semaphore(host).await;

        // Waiting for rate and concurrency capacity shares the request deadline
        let capacity = tokio::time::timeout(self.request_timeout, async {
            self.limiter.until_ready().await;
            let global = self.global.clone().acquire_owned().await;
            let per_host = host_permits.acquire_owned().await;
            (global, per_host)
        })
        .await;

        let _permits = match capacity {
            Ok((Ok(global), Ok(per_host))) => (global, per_host),
            Ok(_) => {
                return Exchange::Transport {
                    failure: TransportFailure::Other,
                    message: "client is shutting down".to_string(),
                }
            }
            Err(_) => {
                return Exchange::Transport {
                    failure: TransportFailure::Capacity,
                    message: "timed out waiting for request capacity".to_string(),
                }
            }
        };

        let mut builder = self.http.request(request.method.clone(), url.clone());
        builder = match self.session_cookie(use_session).await {
            Some(cookie) => builder.header(COOKIE, format!("{}={}", SESSION_COOKIE, cookie)),
            None => builder.basic_auth(&self.username, Some(&self.password)),
        };
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %url, "Sending request");
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(url, &e),
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        if response.status().is_success() {
            self.capture_session(response.headers()).await;
        }

        match response.text().await {
            Ok(body) => Exchange::Response {
                status,
                retry_after,
                body,
            },
            Err(e) => transport_failure(url, &e),
        }
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, ClientError> {
        let absolute = request.path.starts_with("http://") || request.path.starts_with("https://");
        let mut url = if absolute {
            request.path.clone()
        } else {
            format!("{}{}", self.base_url, request.path.trim_start_matches('/'))
        };

        if !request.query.is_empty() {
            let query = request
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }

        Url::parse(&url).map_err(|e| ClientError::InvalidRequest(format!("{}: {}", url, e)))
    }

    async fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self.per_host.lock().await;
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_host)))
            .clone()
    }

    async fn session_cookie(&self, use_session: bool) -> Option<String> {
        if !use_session {
            return None;
        }
        self.session.read().await.clone()
    }

    async fn capture_session(&self, headers: &reqwest::header::HeaderMap) {
        let cookie = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| {
                let pair = v.split(';').next()?.trim();
                let (name, value) = pair.split_once('=')?;
                (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
            });

        if let Some(cookie) = cookie {
            let mut session = self.session.write().await;
            if session.as_deref() != Some(cookie.as_str()) {
                debug!("Stored new authority session");
                *session = Some(cookie);
            }
        }
    }

    async fn clear_session(&self) {
        *self.session.write().await = None;
    }

    /// Whether a session cookie is currently cached
    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }
}

fn host_key(url: &Url) -> String {
    match (url.host_str(), url.port_or_known_default()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

fn transport_failure(url: &Url, e: &reqwest::Error) -> Exchange {
    let failure = if e.is_timeout() {
        TransportFailure::Timeout
    } else if e.is_connect() {
        TransportFailure::Connect
    } else {
        TransportFailure::Other
    };

    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message = format!("{}: {}", message, cause);
        source = cause.source();
    }

    debug!(url = %url, failure = ?failure, error = %message, "Transport failure");
    Exchange::Transport { failure, message }
}

/// Empty bodies become `null`, non-JSON bodies a JSON string
fn parse_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Authority error bodies look like `{"Error": "...", "code": "...", "text": "..."}`
fn error_text(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let text = parsed.as_ref().and_then(|v| {
        v.get("text")
            .or_else(|| v.get("Error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match text {
        Some(text) => text,
        None if body.chars().count() > 500 => {
            format!("{}... (truncated)", body.chars().take(500).collect::<String>())
        }
        None => body.to_string(),
    }
}

fn error_code(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("code")?
        .as_str()
        .map(str::to_string)
}
