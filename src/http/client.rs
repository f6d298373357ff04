//! HTTP transport shared by every stream of a source
//!
//! Requests are sent exactly once. Responses are mapped onto the sync error
//! taxonomy here, so collaborators and the [`RetryPolicy`](super::RetryPolicy)
//! reason about error kinds rather than status codes.

use super::rate_limit::RateLimiter;
use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection settings of one upstream
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Relative request paths are joined onto this
    pub base_url: Url,
    /// Per-request timeout
    pub timeout: Duration,
    /// Token bucket, shared by every partition
    pub rate_limit: Option<RateLimitConfig>,
    /// Headers sent with every request
    pub headers: Vec<(String, String)>,
    pub user_agent: String,
}

impl HttpClientConfig {
    /// Settings for `base_url` with a 30 second timeout and no rate limit
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            timeout: Duration::from_secs(30),
            rate_limit: None,
            headers: Vec::new(),
            user_agent: format!("solidafy-sync/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitConfig>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One upstream call
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl Request {
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

    /// Append a query parameter; order is preserved
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Rate-limited HTTP client; clones share the connection pool and bucket
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    base_url: Url,
    timeout: Duration,
    limiter: Option<RateLimiter>,
}

impl HttpClient {
    /// Build the client; invalid header names or values are configuration errors
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::invalid_value(format!("headers.{name}"), e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::invalid_value(format!("headers.{name}"), e.to_string()))?;
            headers.insert(header, value);
        }

        let inner = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner,
            base_url: config.base_url,
            timeout: config.timeout,
            limiter: config.rate_limit.as_ref().map(RateLimiter::new),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Resolve a request path; absolute URLs are used as given
    pub fn url_for(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Url::parse(path)?);
        }
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&joined)?)
    }

    /// Send one request
    ///
    /// 429 becomes [`Error::RateLimited`] carrying `Retry-After`; any other
    /// non-success status becomes [`Error::HttpStatus`] with the body.
    pub async fn send(&self, request: &Request) -> Result<Response> {
        let url = self.url_for(&request.path)?;

        if let Some(ref limiter) = self.limiter {
            limiter.acquire().await;
        }

        let mut builder = self.inner.request(request.method.clone(), url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify(status, response).await);
        }

        debug!(method = %request.method, %url, status = status.as_u16(), "request succeeded");
        Ok(response)
    }

    /// Send one request and parse the body as JSON
    pub async fn json(&self, request: &Request) -> Result<Value> {
        let text = self.send(request).await?.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            Error::malformed(format!(
                "invalid JSON from {} {}: {e}",
                request.method, request.path
            ))
        })
    }
}

async fn classify(status: StatusCode, response: Response) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_seconds = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        return Error::RateLimited {
            retry_after_seconds,
        };
    }
    let body = response.text().await.unwrap_or_default();
    Error::http_status(status.as_u16(), body)
}
