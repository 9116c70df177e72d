//! Delivery client for the remote sinks
//!
//! Every sink append is one JSON POST; the spreadsheet sink also reads back
//! its header cells with a GET. A request is attempted up to
//! `max_retries + 1` times; each attempt waits for the rate limiter and
//! re-applies authentication so an expired token is refreshed between
//! attempts. The final failure is returned as-is so the exporter can decide
//! whether the chunk is retried on the next run.

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::auth::{AuthConfig, Authenticator};
use crate::config::HttpConfig;
use crate::error::{is_retryable_status, Error, Result};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// How the pause between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffType {
    Constant,
    Linear,
    #[default]
    Exponential,
}

/// Attempt budget and pauses for one request
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub max_retries: u32,
    /// Pause after the first failed attempt
    pub initial: Duration,
    /// Upper bound on any pause
    pub max: Duration,
    pub backoff: BackoffType,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_millis(250),
            max: Duration::from_secs(30),
            backoff: BackoffType::Exponential,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn once() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Pause before retry number `attempt + 1` (zero-based failed attempt)
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            BackoffType::Constant => self.initial,
            BackoffType::Linear => self.initial.saturating_mul(attempt.saturating_add(1)),
            BackoffType::Exponential => self.initial.saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(self.max)
    }
}

/// Transport settings of one sink
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    /// `None` sends as fast as the sink answers
    pub rate_limit: Option<RateLimiterConfig>,
    /// Headers sent with every request, before auth headers
    pub default_headers: HashMap<String, String>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from_pipeline(&HttpConfig::default())
    }
}

impl HttpClientConfig {
    /// Settings from the pipeline's `http` section
    pub fn from_pipeline(http: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(http.timeout_seconds),
            connect_timeout: Duration::from_secs(http.connect_timeout_seconds),
            retry: RetryPolicy {
                max_retries: http.max_retries,
                ..RetryPolicy::default()
            },
            rate_limit: Some(RateLimiterConfig::per_second(http.requests_per_second)),
            default_headers: HashMap::new(),
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }

    #[must_use]
    pub fn without_rate_limit(mut self) -> Self {
        self.rate_limit = None;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }
}

/// One request: method, absolute URL, ordered query pairs and JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl JsonRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Result of a single attempt
enum Outcome {
    Delivered(Response),
    /// Worth another attempt; `retry_after` overrides the backoff pause
    Retryable {
        error: Error,
        retry_after: Option<u64>,
    },
    Failed(Error),
}

/// Retrying, rate-limited JSON client
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    authenticator: Option<Authenticator>,
    rate_limiter: Option<RateLimiter>,
}

impl HttpClient {
    /// Client without authentication
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        let rate_limiter = config.rate_limit.map(RateLimiter::new);

        Ok(Self {
            client,
            config,
            authenticator: None,
            rate_limiter,
        })
    }

    /// Client whose requests carry credentials from `auth`
    pub fn with_auth(config: HttpClientConfig, auth: AuthConfig) -> Result<Self> {
        let mut client = Self::new(config)?;
        if !matches!(auth, AuthConfig::None) {
            client.authenticator = Some(Authenticator::with_client(auth, client.client.clone()));
        }
        Ok(client)
    }

    /// POST `body` to `url` with no query parameters
    pub async fn post_json(&self, url: &str, body: Value) -> Result<Response> {
        self.send(&JsonRequest::post(url, body)).await
    }

    /// Send a request, retrying transient failures per the retry policy
    pub async fn send(&self, req: &JsonRequest) -> Result<Response> {
        let retry = &self.config.retry;
        let attempts = retry.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            match self.attempt(req).await? {
                Outcome::Delivered(response) => {
                    debug!(
                        method = %req.method,
                        url = %req.url,
                        attempt = attempt + 1,
                        "Request acknowledged"
                    );
                    return Ok(response);
                }
                Outcome::Failed(error) => return Err(error),
                Outcome::Retryable { error, retry_after } => {
                    if attempt + 1 >= attempts {
                        warn!(
                            method = %req.method,
                            url = %req.url,
                            attempts,
                            error = %error,
                            "Giving up on request"
                        );
                        return Err(error);
                    }
                    let pause = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| retry.delay(attempt));
                    warn!(
                        method = %req.method,
                        url = %req.url,
                        attempt = attempt + 1,
                        attempts,
                        ?pause,
                        error = %error,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, req: &JsonRequest) -> Result<Outcome> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait().await;
        }

        let mut request = self.client.request(req.method.clone(), &req.url);
        if let Some(body) = &req.body {
            request = request.json(body);
        }
        if !req.query.is_empty() {
            request = request.query(&req.query);
        }
        for (name, value) in &self.config.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        // Auth errors are not transient; they abort the send.
        if let Some(auth) = &self.authenticator {
            request = auth.apply(request).await?;
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.config.timeout.as_millis() as u64;
                return Ok(Outcome::Retryable {
                    error: Error::Timeout { timeout_ms },
                    retry_after: None,
                });
            }
            Err(e) if e.is_connect() => {
                return Ok(Outcome::Retryable {
                    error: Error::Http(e),
                    retry_after: None,
                });
            }
            Err(e) => return Ok(Outcome::Failed(Error::Http(e))),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(Outcome::Delivered(response));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_seconds(&response);
            return Ok(Outcome::Retryable {
                error: Error::RateLimited {
                    retry_after_seconds: retry_after.unwrap_or(0),
                },
                retry_after,
            });
        }

        let retryable = is_retryable_status(status.as_u16());
        let body = response.text().await.unwrap_or_default();
        let error = Error::http_status(status.as_u16(), body);
        Ok(if retryable {
            Outcome::Retryable {
                error,
                retry_after: None,
            }
        } else {
            Outcome::Failed(error)
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limiter.is_some()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry", &self.config.retry)
            .field("authenticated", &self.authenticator.is_some())
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

fn retry_after_seconds(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}
