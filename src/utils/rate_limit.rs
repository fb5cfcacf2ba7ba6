//! Per-provider token-bucket rate limiting.
//!
//! Each provider gets one [`ProviderRateLimiter`], built once at startup and
//! shared by every query in the process through a [`RateLimiterSet`]. The
//! bucket state lives in a `governor` GCRA limiter, which updates it with a
//! single atomic compare-and-swap, so concurrent acquisition needs no lock.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::ProviderId;
use crate::sources::SourceError;

/// Sustained rate and burst capacity for one provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub requests_per_second: f64,
    pub burst: NonZeroU32,
}

impl RateLimit {
    pub fn new(requests_per_second: f64, burst: NonZeroU32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    /// Default limits, following each provider's published usage policy
    pub fn default_for(provider: ProviderId) -> Self {
        match provider {
            ProviderId::PubMed => Self::new(3.0, nonzero!(3u32)),
            ProviderId::Arxiv => Self::new(1.0, nonzero!(1u32)),
            ProviderId::Crossref => Self::new(2.0, nonzero!(2u32)),
            ProviderId::Scholar => Self::new(0.5, nonzero!(1u32)),
            ProviderId::SemanticScholar => Self::new(1.0, nonzero!(1u32)),
            ProviderId::OpenAlex => Self::new(10.0, nonzero!(5u32)),
        }
    }

    fn quota(&self) -> Result<Quota, RateLimitError> {
        let rps = self.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            return Err(RateLimitError::InvalidRate(rps));
        }
        let period = Duration::from_secs_f64(1.0 / rps);
        let quota = Quota::with_period(period).ok_or(RateLimitError::InvalidRate(rps))?;
        Ok(quota.allow_burst(self.burst))
    }
}

/// Errors from the rate limiter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    #[error("invalid rate: {0} requests/second")]
    InvalidRate(f64),

    #[error("no request slot for {0} before the deadline")]
    DeadlineExceeded(ProviderId),
}

impl From<RateLimitError> for SourceError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::DeadlineExceeded(_) => SourceError::Throttled,
            RateLimitError::InvalidRate(_) => SourceError::InvalidRequest(err.to_string()),
        }
    }
}

/// Token bucket guarding one provider
#[derive(Debug)]
pub struct ProviderRateLimiter {
    provider: ProviderId,
    limit: RateLimit,
    limiter: DefaultDirectRateLimiter,
}

impl ProviderRateLimiter {
    pub fn new(provider: ProviderId, limit: RateLimit) -> Result<Self, RateLimitError> {
        let quota = limit.quota()?;
        Ok(Self {
            provider,
            limit,
            limiter: RateLimiter::direct(quota),
        })
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Wait for a token, giving up at `deadline`
    pub async fn acquire(&self, deadline: Instant) -> Result<(), RateLimitError> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }

        tracing::debug!(provider = %self.provider, "Waiting for rate limiter");
        tokio::time::timeout_at(deadline, self.limiter.until_ready())
            .await
            .map_err(|_| RateLimitError::DeadlineExceeded(self.provider))
    }

    /// Take a token only if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Process-wide set of limiters, one per provider
#[derive(Debug, Clone, Default)]
pub struct RateLimiterSet {
    limiters: HashMap<ProviderId, Arc<ProviderRateLimiter>>,
}

impl RateLimiterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limiter for every provider at its default limit
    pub fn with_defaults() -> Result<Self, RateLimitError> {
        let mut set = Self::new();
        for provider in ProviderId::ALL {
            set.insert(provider, RateLimit::default_for(provider))?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, provider: ProviderId, limit: RateLimit) -> Result<(), RateLimitError> {
        let limiter = ProviderRateLimiter::new(provider, limit)?;
        self.limiters.insert(provider, Arc::new(limiter));
        Ok(())
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<ProviderRateLimiter>> {
        self.limiters.get(&provider).cloned()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
