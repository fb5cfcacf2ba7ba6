//! Utility modules supporting the search pipeline.
//!
//! - [`HttpClient`]: shared HTTP client that maps statuses onto [`SourceError`](crate::sources::SourceError)
//! - [`RateLimiterSet`]: process-wide per-provider token buckets
//! - [`RetryConfig`] / [`with_retry`]: bounded retries with exponential backoff and jitter
//! - [`Deduplicator`]: merge records of the same paper across providers
//! - [`Ranker`]: relevance scoring and deterministic ordering
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use litsearch::utils::{with_retry, RetryConfig, RetryResult};
//! use litsearch::sources::SourceError;
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() {
//! let config = RetryConfig::default();
//! match with_retry(&config, |_attempt| fetch_data()).await {
//!     RetryResult::Success(body, attempts) => println!("{} after {} attempts", body, attempts),
//!     RetryResult::TransientFailure(err, _) | RetryResult::PermanentFailure(err, _) => {
//!         eprintln!("failed: {}", err)
//!     }
//! }
//! # }
//! ```

mod dedup;
mod http;
mod rank;
mod rate_limit;
mod retry;

pub use dedup::{normalize_title, Deduplicator, DEFAULT_TITLE_THRESHOLD};
pub use http::{clean_text, error_for_status, parse_retry_after, strip_tags, HttpClient, DEFAULT_USER_AGENT};
pub use rank::{Ranker, RankingWeights, RecencyTier};
pub use rate_limit::{ProviderRateLimiter, RateLimit, RateLimitError, RateLimiterSet};
pub use retry::{with_retry, RetryConfig, RetryResult};
