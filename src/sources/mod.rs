//! Provider adapters with a uniform trait-based interface.
//!
//! This module defines the [`Source`] trait that every provider adapter
//! implements. Adapters are registered into a [`SourceRegistry`] once at
//! process startup; the orchestrator only ever dispatches to what the
//! registry holds.
//!
//! # Providers
//!
//! | id | adapter | format |
//! |----|---------|--------|
//! | `pubmed` | [`PubMedSource`] | E-utilities XML |
//! | `arxiv` | [`ArxivSource`] | Atom feed |
//! | `crossref` | [`CrossrefSource`] | JSON |
//! | `scholar` | [`GoogleScholarSource`] | HTML scraping (disabled by default) |
//! | `semantic_scholar` | [`SemanticScholarSource`] | JSON |
//! | `openalex` | [`OpenAlexSource`] | JSON |
//!
//! # Errors
//!
//! Adapters report [`SourceError`]. Transient errors (timeouts, HTTP 429,
//! HTTP 5xx, connection failures) are retried by
//! [`with_retry`](crate::utils::with_retry); everything else fails the
//! provider immediately. Errors are mapped onto the four-kind
//! [`FailureKind`] taxonomy when they are recorded in a result.

mod arxiv;
mod crossref;
mod google_scholar;
pub mod mock;
mod openalex;
mod pubmed;
mod registry;
mod semantic;

pub use arxiv::ArxivSource;
pub use crossref::CrossrefSource;
pub use google_scholar::GoogleScholarSource;
pub use mock::MockSource;
pub use openalex::OpenAlexSource;
pub use pubmed::PubMedSource;
pub use registry::SourceRegistry;
pub use semantic::SemanticScholarSource;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{FailureKind, Paper, ProviderId, SearchQuery};

/// The Source trait defines the interface for all provider adapters.
///
/// # Implementing a New Source
///
/// 1. Add a variant to [`ProviderId`]
/// 2. Create a struct that implements `Source` (at minimum `id` and `search`)
/// 3. Register it in [`SourceRegistry::from_config`]
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Provider identifier
    fn id(&self) -> ProviderId;

    /// Human-readable name of this source
    fn name(&self) -> &str {
        self.id().name()
    }

    /// Search for papers.
    ///
    /// Implementations must return at most `query.max_results` papers and
    /// translate `query.year_range` into the provider's own filter. An
    /// empty list is a successful result.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError>;

    /// Whether [`Source::get_by_id`] is implemented
    fn supports_lookup(&self) -> bool {
        false
    }

    /// Fetch a single paper by the provider's native identifier
    async fn get_by_id(&self, _id: &str) -> Result<Paper, SourceError> {
        Err(SourceError::NotSupported)
    }
}

/// Errors that can occur when calling a provider
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The request did not complete within the client timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The provider throttled us (HTTP 429, or a bot-detection page)
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// No rate-limiter token became available before the query deadline
    #[error("Rate limiter: no request slot before the deadline")]
    Throttled,

    /// HTTP 5xx
    #[error("Server error: HTTP {status}")]
    Server {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// HTTP 4xx other than 404 and 429
    #[error("HTTP error: {status}")]
    Http { status: u16 },

    /// DNS, connection or body read failure
    #[error("Network error: {0}")]
    Transport(String),

    /// Malformed provider response (XML, JSON, HTML, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Paper not found
    #[error("Paper not found: {0}")]
    NotFound(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The requested operation is not implemented for this source
    #[error("Operation not supported by this source")]
    NotSupported,
}

impl SourceError {
    /// Whether the retry policy should try again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout(_)
                | SourceError::RateLimited { .. }
                | SourceError::Server { .. }
                | SourceError::Transport(_)
        )
    }

    /// Server-supplied delay before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after, .. } => *retry_after,
            SourceError::Server { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        FailureKind::from(self)
    }
}

impl From<&SourceError> for FailureKind {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::Timeout(_) => FailureKind::Timeout,
            SourceError::RateLimited { .. } | SourceError::Throttled => FailureKind::RateLimited,
            SourceError::Parse(_) => FailureKind::ParseError,
            SourceError::Server { .. }
            | SourceError::Http { .. }
            | SourceError::Transport(_)
            | SourceError::NotFound(_)
            | SourceError::InvalidRequest(_)
            | SourceError::NotSupported => FailureKind::TransportError,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Parse(format!("XML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SourceError::Timeout("t".into()).is_transient());
        assert!(SourceError::Server {
            status: 503,
            retry_after: None
        }
        .is_transient());
        assert!(SourceError::Transport("refused".into()).is_transient());
        assert!(SourceError::RateLimited {
            retry_after: None,
            message: String::new()
        }
        .is_transient());

        assert!(!SourceError::Http { status: 400 }.is_transient());
        assert!(!SourceError::Parse("bad".into()).is_transient());
        assert!(!SourceError::Throttled.is_transient());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(SourceError::Timeout("t".into()).kind(), FailureKind::Timeout);
        assert_eq!(SourceError::Throttled.kind(), FailureKind::RateLimited);
        assert_eq!(SourceError::Parse("x".into()).kind(), FailureKind::ParseError);
        assert_eq!(
            SourceError::Http { status: 403 }.kind(),
            FailureKind::TransportError
        );
        assert_eq!(
            SourceError::Server {
                status: 502,
                retry_after: None
            }
            .kind(),
            FailureKind::TransportError
        );
    }

    #[test]
    fn test_retry_after_hint() {
        let err = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
            message: "429".into(),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(4)));
        assert_eq!(SourceError::Transport("x".into()).retry_after(), None);
    }
}
