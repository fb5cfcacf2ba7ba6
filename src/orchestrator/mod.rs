//! Query orchestration: fan a query out to providers and merge the results.
//!
//! Every query walks the same phases:
//!
//! 1. **Dispatched**: one call per requested, registered provider, each
//!    rate-limited and retry-wrapped, all running concurrently.
//! 2. **Collecting**: wait for every call or for the query deadline. Calls
//!    still pending at the deadline are dropped and recorded as timeouts;
//!    whatever they would have returned is never seen.
//! 3. **Merging**: successful papers, in dispatch order, go through the
//!    [`Deduplicator`] and then the [`Ranker`].
//! 4. **Complete**: the [`SearchResult`] carries per-provider statistics.
//!
//! Provider failures are data, not errors: the only error `search` returns
//! is an invalid query, rejected before any provider is contacted.

use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{Config, ConfigError};
use crate::models::{
    normalize_arxiv_id, normalize_doi, FailureKind, Paper, ProviderFailure, ProviderId,
    ProviderResult, ProviderStat, QueryError, SearchQuery, SearchResult,
};
use crate::sources::{Source, SourceError, SourceRegistry};
use crate::utils::{
    with_retry, Deduplicator, HttpClient, ProviderRateLimiter, Ranker, RankingWeights,
    RateLimiterSet, RetryConfig, RetryResult, DEFAULT_TITLE_THRESHOLD,
};

/// Default hard ceiling for one query
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Lifecycle phase of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Dispatched,
    Collecting,
    Merging,
    Complete,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryPhase::Dispatched => "dispatched",
            QueryPhase::Collecting => "collecting",
            QueryPhase::Merging => "merging",
            QueryPhase::Complete => "complete",
        })
    }
}

/// Why a lookup produced no paper
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Not shaped like a DOI, PMID or arXiv id; no provider was contacted
    #[error("unrecognized identifier: {0}")]
    UnrecognizedIdentifier(String),

    #[error("{0}")]
    Provider(ProviderFailure),
}

/// Tunables of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub deadline: Duration,
    pub retry: RetryConfig,
    pub title_threshold: f64,
    pub ranking: RankingWeights,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            retry: RetryConfig::default(),
            title_threshold: DEFAULT_TITLE_THRESHOLD,
            ranking: RankingWeights::default(),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deadline: config.search.deadline(),
            retry: config.retry.to_retry_config(),
            title_threshold: config.dedup.title_similarity_threshold,
            ranking: config.ranking.clone(),
        }
    }
}

/// Runs queries against a fixed set of providers.
///
/// The orchestrator holds no per-query state, so one instance can serve
/// concurrent queries; they share only the rate limiters.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: SourceRegistry,
    limiters: RateLimiterSet,
    deadline: Duration,
    retry: RetryConfig,
    dedup: Deduplicator,
    ranker: Ranker,
}

impl Orchestrator {
    pub fn new(
        registry: SourceRegistry,
        limiters: RateLimiterSet,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            registry,
            limiters,
            deadline: options.deadline,
            retry: options.retry,
            dedup: Deduplicator::new(options.title_threshold),
            ranker: Ranker::new(options.ranking),
        }
    }

    /// Build the enabled adapters, their limiters and the options from `config`
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client = HttpClient::with_settings(
            &config.search.user_agent,
            config.search.request_timeout(),
        )
        .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;
        let limiters = config
            .rate_limiters()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let registry = SourceRegistry::from_config(config, Arc::new(client));

        Ok(Self::new(
            registry,
            limiters,
            OrchestratorOptions::from_config(config),
        ))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one query to completion.
    ///
    /// An empty `query.providers` list means every registered provider.
    /// Requested providers that are not registered are skipped and get no
    /// statistics entry.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult, QueryError> {
        query.validate()?;

        let targets = self.targets(query);
        let span = tracing::info_span!(
            "search",
            query = %query.text,
            providers = targets.len()
        );

        Ok(self.run(query, targets).instrument(span).await)
    }

    fn targets(&self, query: &SearchQuery) -> Vec<Arc<dyn Source>> {
        let ids = if query.providers.is_empty() {
            self.registry.ids()
        } else {
            query.providers.clone()
        };

        ids.into_iter()
            .filter_map(|id| {
                let source = self.registry.get(id).cloned();
                if source.is_none() {
                    tracing::debug!(provider = %id, "Provider not registered, skipping");
                }
                source
            })
            .collect()
    }

    async fn run(&self, query: &SearchQuery, targets: Vec<Arc<dyn Source>>) -> SearchResult {
        let started = Instant::now();
        let deadline = started + self.deadline;

        tracing::debug!(phase = %QueryPhase::Dispatched, "Dispatching {} providers", targets.len());
        let calls = targets.into_iter().map(|source| {
            let limiter = self.limiters.get(source.id());
            let retry = self.retry;
            async move {
                let id = source.id();
                let result = call_provider(source, limiter, &retry, query, deadline).await;
                (id, result)
            }
        });

        tracing::debug!(phase = %QueryPhase::Collecting, "Waiting for providers");
        let outcomes: Vec<(ProviderId, ProviderResult)> = join_all(calls).await;

        tracing::debug!(phase = %QueryPhase::Merging, "Merging provider results");
        let mut statistics = BTreeMap::new();
        let mut merged = Vec::new();
        for (id, result) in outcomes {
            match &result {
                Ok(papers) => tracing::info!(provider = %id, count = papers.len(), "Provider succeeded"),
                Err(failure) => tracing::warn!(provider = %id, "Provider failed: {}", failure),
            }
            statistics.insert(id, ProviderStat::from(&result));
            if let Ok(papers) = result {
                merged.extend(papers);
            }
        }

        let total_found = merged.len();
        let papers = self.ranker.rank(query, self.dedup.dedup(merged));

        let result = SearchResult {
            papers,
            total_found,
            search_time: started.elapsed().as_secs_f64(),
            statistics,
        };
        tracing::debug!(
            phase = %QueryPhase::Complete,
            papers = result.papers.len(),
            total_found,
            "Query complete"
        );
        result
    }

    /// Fetch one paper by DOI, PMID or arXiv id.
    ///
    /// The identifier's shape picks the provider. Returns `Ok(None)` when
    /// that provider is not registered or does not know the identifier.
    pub async fn lookup(&self, identifier: &str) -> Result<Option<Paper>, LookupError> {
        let Some((provider, id)) = route_identifier(identifier) else {
            return Err(LookupError::UnrecognizedIdentifier(identifier.trim().to_string()));
        };

        let Some(source) = self.registry.get(provider).cloned() else {
            tracing::debug!(provider = %provider, "Lookup provider not registered");
            return Ok(None);
        };
        if !source.supports_lookup() {
            return Ok(None);
        }

        let span = tracing::info_span!("lookup", provider = %provider, id = %id);
        let limiter = self.limiters.get(provider);
        let deadline = Instant::now() + self.deadline;

        let attempt = |_: u32| {
            let source = Arc::clone(&source);
            let limiter = limiter.clone();
            let id = id.clone();
            async move {
                if let Some(limiter) = &limiter {
                    limiter.acquire(deadline).await?;
                }
                source.get_by_id(&id).await
            }
        };

        let outcome = tokio::time::timeout_at(deadline, with_retry(&self.retry, attempt))
            .instrument(span)
            .await;

        match outcome {
            Err(_) => Err(LookupError::Provider(deadline_failure(provider, 0))),
            Ok(RetryResult::PermanentFailure(SourceError::NotFound(_), _)) => Ok(None),
            Ok(retried) => settle(retried).map(Some).map_err(LookupError::Provider),
        }
    }
}

/// One rate-limited, retry-wrapped provider call, bounded by `deadline`
async fn call_provider(
    source: Arc<dyn Source>,
    limiter: Option<Arc<ProviderRateLimiter>>,
    retry: &RetryConfig,
    query: &SearchQuery,
    deadline: Instant,
) -> ProviderResult {
    let id = source.id();
    let attempts = AtomicU32::new(0);

    let attempt = |n: u32| {
        attempts.store(n, Ordering::Relaxed);
        let source = Arc::clone(&source);
        let limiter = limiter.clone();
        async move {
            // One token per HTTP attempt, retries included
            if let Some(limiter) = &limiter {
                limiter.acquire(deadline).await?;
            }
            source.search(query).await
        }
    };

    let outcome = tokio::time::timeout_at(deadline, with_retry(retry, attempt)).await;

    match outcome {
        Err(_) => {
            let made = attempts.load(Ordering::Relaxed);
            tracing::debug!(provider = %id, attempts = made, "Deadline reached, dropping pending call");
            Err(deadline_failure(id, made))
        }
        Ok(retried) => settle(retried),
    }
}

/// Turn a finished retry loop into a provider outcome
fn settle<T>(retried: RetryResult<T>) -> Result<T, ProviderFailure> {
    let attempts = retried.attempts();
    let exhausted = matches!(retried, RetryResult::TransientFailure(..));
    retried
        .into_result()
        .map_err(|err| ProviderFailure::new(err.kind(), err.to_string()).with_attempts(attempts, exhausted))
}

fn deadline_failure(provider: ProviderId, attempts: u32) -> ProviderFailure {
    ProviderFailure::new(
        FailureKind::Timeout,
        format!("{} did not answer before the query deadline", provider.name()),
    )
    .with_attempts(attempts, false)
}

/// Pick the provider able to resolve an identifier, with the normalized id
pub fn route_identifier(identifier: &str) -> Option<(ProviderId, String)> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_lowercase();
    if lower.starts_with("10.") || lower.starts_with("doi:") || lower.contains("doi.org/") {
        return normalize_doi(trimmed).map(|doi| (ProviderId::Crossref, doi));
    }

    let pmid = lower.strip_prefix("pmid:").unwrap_or(&lower).trim();
    if !pmid.is_empty() && pmid.chars().all(|c| c.is_ascii_digit()) {
        return Some((ProviderId::PubMed, pmid.to_string()));
    }

    if lower.starts_with("arxiv:") || lower.contains("arxiv.org/") || looks_like_arxiv(&lower) {
        return normalize_arxiv_id(trimmed).map(|id| (ProviderId::Arxiv, id));
    }

    None
}

/// `YYMM.NNNNN` (optionally versioned) or old-style `archive/YYMMNNN`
fn looks_like_arxiv(id: &str) -> bool {
    let base = id.split('v').next().unwrap_or(id);
    if let Some((prefix, number)) = base.split_once('.') {
        return prefix.len() == 4
            && prefix.chars().all(|c| c.is_ascii_digit())
            && (4..=5).contains(&number.len())
            && number.chars().all(|c| c.is_ascii_digit());
    }
    match id.split_once('/') {
        Some((archive, number)) => {
            !archive.is_empty()
                && archive.chars().all(|c| c.is_ascii_alphabetic() || c == '-')
                && number.len() == 7
                && number.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaperBuilder;
    use crate::sources::MockSource;
    use crate::utils::RateLimit;
    use nonzero_ext::nonzero;

    fn open_limiters() -> RateLimiterSet {
        let mut set = RateLimiterSet::new();
        for id in ProviderId::ALL {
            set.insert(id, RateLimit::new(1000.0, nonzero!(100u32))).unwrap();
        }
        set
    }

    fn fast_options() -> OrchestratorOptions {
        OrchestratorOptions {
            deadline: Duration::from_secs(5),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(10),
                jitter: (1.0, 1.0),
                ..RetryConfig::default()
            },
            ..OrchestratorOptions::default()
        }
    }

    fn orchestrator(sources: Vec<MockSource>) -> Orchestrator {
        let mut registry = SourceRegistry::new();
        for source in sources {
            registry.register(Arc::new(source));
        }
        Orchestrator::new(registry, open_limiters(), fast_options())
    }

    #[test]
    fn test_route_identifier() {
        assert_eq!(
            route_identifier("https://doi.org/10.1038/Nature14539"),
            Some((ProviderId::Crossref, "10.1038/nature14539".to_string()))
        );
        assert_eq!(
            route_identifier("26017442"),
            Some((ProviderId::PubMed, "26017442".to_string()))
        );
        assert_eq!(
            route_identifier("PMID:26017442"),
            Some((ProviderId::PubMed, "26017442".to_string()))
        );
        assert_eq!(
            route_identifier("arXiv:1706.03762v5"),
            Some((ProviderId::Arxiv, "1706.03762".to_string()))
        );
        assert_eq!(
            route_identifier("1706.03762"),
            Some((ProviderId::Arxiv, "1706.03762".to_string()))
        );
        assert_eq!(
            route_identifier("hep-th/9901001"),
            Some((ProviderId::Arxiv, "hep-th/9901001".to_string()))
        );
        assert_eq!(route_identifier("not an id"), None);
        assert_eq!(route_identifier("  "), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_query_contacts_no_provider() {
        let source = Arc::new(MockSource::new(ProviderId::Arxiv));
        let mut registry = SourceRegistry::new();
        registry.register(source.clone());
        let orchestrator = Orchestrator::new(registry, open_limiters(), fast_options());

        let err = orchestrator
            .search(&SearchQuery::new("x").max_results(0))
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::ZeroMaxResults);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_provider_list_uses_registry() {
        let orchestrator = orchestrator(vec![
            MockSource::returning(ProviderId::Arxiv, vec![Paper::new("Alpha", ProviderId::Arxiv)]),
            MockSource::returning(ProviderId::Crossref, vec![Paper::new("Beta", ProviderId::Crossref)]),
        ]);

        let result = orchestrator.search(&SearchQuery::new("alpha")).await.unwrap();
        assert_eq!(result.papers.len(), 2);
        assert_eq!(result.papers[0].title, "Alpha");
        assert_eq!(result.statistics.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let source = Arc::new(MockSource::failing(
            ProviderId::Crossref,
            SourceError::Parse("bad json".to_string()),
        ));
        let mut registry = SourceRegistry::new();
        registry.register(source.clone());
        let orchestrator = Orchestrator::new(registry, open_limiters(), fast_options());

        let result = orchestrator
            .search(&SearchQuery::new("x").provider(ProviderId::Crossref))
            .await
            .unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(
            result.statistics[&ProviderId::Crossref].failure_kind(),
            Some(FailureKind::ParseError)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup() {
        let paper = PaperBuilder::new("Deep learning", ProviderId::Crossref)
            .doi("10.1038/nature14539")
            .build();
        let orchestrator = orchestrator(vec![MockSource::returning(
            ProviderId::Crossref,
            vec![paper],
        )]);

        let found = orchestrator.lookup("doi:10.1038/NATURE14539").await.unwrap();
        assert_eq!(found.map(|p| p.title), Some("Deep learning".to_string()));

        assert_eq!(orchestrator.lookup("10.1/missing").await.unwrap(), None);
        // No PubMed source registered
        assert_eq!(orchestrator.lookup("12345").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_rejects_unrecognized_identifier() {
        let source = Arc::new(MockSource::new(ProviderId::Crossref));
        let mut registry = SourceRegistry::new();
        registry.register(source.clone());
        let orchestrator = Orchestrator::new(registry, open_limiters(), fast_options());

        assert_eq!(
            orchestrator.lookup(" ??? ").await,
            Err(LookupError::UnrecognizedIdentifier("???".to_string()))
        );
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_failure_reports_provider_failure() {
        let orchestrator = orchestrator(vec![MockSource::failing(
            ProviderId::Crossref,
            SourceError::Timeout("slow".to_string()),
        )]);

        match orchestrator.lookup("10.1/a").await {
            Err(LookupError::Provider(failure)) => {
                assert_eq!(failure.kind, FailureKind::Timeout);
                assert_eq!(failure.attempts, 3);
                assert!(failure.retries_exhausted);
            }
            other => panic!("unexpected lookup outcome {:?}", other),
        }
    }

    #[test]
    fn test_settle_records_attempts() {
        assert_eq!(settle(RetryResult::Success(7, 2)), Ok(7));

        let failure = settle::<()>(RetryResult::PermanentFailure(
            SourceError::Parse("bad".to_string()),
            1,
        ))
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::ParseError);
        assert_eq!((failure.attempts, failure.retries_exhausted), (1, false));
    }
}
