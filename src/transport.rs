//! Shared HTTP transport and HTTP-status to error-taxonomy translation.
//!
//! One [`reqwest::Client`] (and its connection pool) is shared by every
//! adapter built from the same factory. Response bodies are sanitized before
//! they land in error messages: whitespace collapsed, known secret shapes
//! redacted, and long bodies truncated.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, RequestBuilder, StatusCode};

use crate::error::{ConnectorError, ErrorKind, DEFAULT_RETRY_AFTER};
use crate::models::DEFAULT_TIMEOUT;

const MAX_ERROR_BODY_CHARS: usize = 256;

const SECRET_PATTERNS: [&str; 5] = [
    // Telegram bot tokens, also embedded in Bot API URLs.
    r"\d{6,}:[A-Za-z0-9_\-]{30,}",
    r"xox[abp]-[A-Za-z0-9\-]{20,}",
    r"ghp_[A-Za-z0-9]{20,}",
    r"sk-[A-Za-z0-9]{32,}",
    r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
];

fn secret_regexes() -> &'static [Regex] {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        SECRET_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Pooled HTTP client with a default per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::from_client(reqwest::Client::new(), DEFAULT_TIMEOUT)
    }
}

impl HttpTransport {
    /// Build a transport whose client enforces `timeout` on every request.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ConnectorError::configuration(
                    crate::error::CORE_PLATFORM,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;
        Ok(Self { client, timeout })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Underlying client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Default request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start a request with the transport's default timeout applied.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).timeout(self.timeout)
    }

    /// Start a request with an explicit timeout (e.g. long polling).
    pub fn request_with_timeout(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
    ) -> RequestBuilder {
        self.client.request(method, url).timeout(timeout)
    }
}

// ---------------------------------------------------------------------------
// Error translation
// ---------------------------------------------------------------------------

/// Translate a transport failure (no response received) into a
/// [`ConnectorError::Connection`].
pub fn transport_error(platform: &str, err: &reqwest::Error) -> ConnectorError {
    let reason = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    };
    ConnectorError::connection(platform, sanitize_error_body(&err.to_string()))
        .with_detail("reason", reason)
}

/// Read the response body, mapping non-2xx statuses onto the error taxonomy.
///
/// `fallback` is the kind used for statuses that are neither authentication
/// failures nor throttling.
///
/// # Errors
///
/// Returns the mapped [`ConnectorError`] for a non-2xx status, or a
/// connection error when the body cannot be read.
pub async fn check_response(
    platform: &str,
    response: reqwest::Response,
    fallback: ErrorKind,
) -> Result<String, ConnectorError> {
    let status = response.status();
    let header_retry = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(platform, &e))?;
    if status.is_success() {
        return Ok(body);
    }
    Err(classify_status(platform, status, &body, header_retry, fallback))
}

/// Map a non-2xx status and its body onto the error taxonomy.
///
/// 401/403 become authentication errors, 429 a rate-limit error whose delay
/// comes from `retry_after`, then the body's `parameters.retry_after`, then
/// [`DEFAULT_RETRY_AFTER`]. Everything else uses `fallback`.
pub fn classify_status(
    platform: &str,
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
    fallback: ErrorKind,
) -> ConnectorError {
    let sanitized = sanitize_error_body(body);
    let message = format!("HTTP {}: {sanitized}", status.as_u16());
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectorError::authentication(platform, message)
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let delay = retry_after
                .or_else(|| body_retry_after(body))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            ConnectorError::rate_limit(platform, message, delay)
        }
        _ => ConnectorError::from_kind(fallback, platform, message),
    };
    err.with_detail("status", status.as_u16())
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// `parameters.retry_after` from a JSON error body, as the Telegram Bot API
/// reports it.
fn body_retry_after(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("parameters")?
        .get("retry_after")?
        .as_u64()
        .map(Duration::from_secs)
}

/// Collapse whitespace, redact secret-shaped tokens, and truncate.
pub fn sanitize_error_body(raw: &str) -> String {
    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for regex in secret_regexes() {
        sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
    }

    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
