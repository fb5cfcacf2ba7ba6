//! HTTP client utilities.

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::sources::SourceError;

/// Default user agent sent to every provider
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client with a bounded per-request timeout.
///
/// Every response goes through [`HttpClient::send`], which turns transport
/// errors and non-success statuses into [`SourceError`] so adapters never
/// inspect status codes themselves.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Arc<Client>,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, SourceError> {
        Self::with_settings(DEFAULT_USER_AGENT, Duration::from_secs(15))
    }

    /// Create a new HTTP client with a custom user agent and request timeout
    pub fn with_settings(user_agent: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Start a GET request
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Send a request, mapping failures and error statuses to [`SourceError`]
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, SourceError> {
        let response = request.send().await.map_err(SourceError::from)?;
        check_status(response)
    }

    /// Send a request and return the body as text
    pub async fn fetch_text(&self, request: RequestBuilder) -> Result<String, SourceError> {
        let response = self.send(request).await?;
        response.text().await.map_err(SourceError::from)
    }

    /// Send a request and deserialize the JSON body
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, SourceError> {
        let body = self.fetch_text(request).await?;
        serde_json::from_str(&body).map_err(SourceError::from)
    }
}

/// Map a response status onto the failure taxonomy
fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));

    Err(error_for_status(status, retry_after))
}

/// Classify a non-success status
pub fn error_for_status(status: StatusCode, retry_after: Option<Duration>) -> SourceError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            retry_after,
            message: "HTTP 429 Too Many Requests".to_string(),
        },
        StatusCode::NOT_FOUND => SourceError::NotFound(status.to_string()),
        s if s.is_server_error() => SourceError::Server {
            status: s.as_u16(),
            retry_after,
        },
        s => SourceError::Http { status: s.as_u16() },
    }
}

/// Parse a `Retry-After` header value: delta-seconds or an HTTP date.
///
/// Dates in the past yield a zero duration.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
        return None;
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Collapse whitespace and decode the common HTML entities
pub fn clean_text(text: &str) -> String {
    let decoded = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip HTML/JATS markup, then clean the remaining text
pub fn strip_tags(text: &str) -> String {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    let stripped = match TAG.get_or_init(|| Regex::new(r"<[^>]+>").ok()) {
        Some(re) => re.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    };
    clean_text(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 ", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("1.5", now), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-3", now), None);
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        let later = Utc.with_ymd_and_hms(2015, 10, 21, 8, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", later),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_error_for_status() {
        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(2))),
            SourceError::RateLimited {
                retry_after: Some(_),
                ..
            }
        ));
        assert!(matches!(
            error_for_status(StatusCode::SERVICE_UNAVAILABLE, None),
            SourceError::Server { status: 503, .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_REQUEST, None),
            SourceError::Http { status: 400 }
        ));
        assert!(matches!(
            error_for_status(StatusCode::NOT_FOUND, None),
            SourceError::NotFound(_)
        ));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Deep\n  learning &amp; X "), "Deep learning & X");
        assert_eq!(
            strip_tags("<jats:p>Gene <i>editing</i> works.</jats:p>"),
            "Gene editing works."
        );
    }
}
