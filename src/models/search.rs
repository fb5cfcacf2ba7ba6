//! Search query and result models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::paper::{Author, Paper, PaperType, ProviderId};

/// Inclusive publication-year range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, year: i32) -> bool {
        self.start <= year && year <= self.end
    }
}

/// Order of the final result list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Ranker score
    #[default]
    Relevance,
    /// Newest publication year first
    Date,
    /// Most cited first
    Citations,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::Date => "date",
            SortBy::Citations => "citations",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "relevance" => Ok(SortBy::Relevance),
            "date" => Ok(SortBy::Date),
            "citations" => Ok(SortBy::Citations),
            other => Err(QueryError::UnknownSort(other.to_string())),
        }
    }
}

/// Reasons a query is rejected before any provider is contacted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query text is empty")]
    EmptyText,

    #[error("max_results must be greater than zero")]
    ZeroMaxResults,

    #[error("invalid year range: start {start} is after end {end}")]
    InvertedYearRange { start: i32, end: i32 },

    #[error("unknown sort order: {0} (expected relevance, date or citations)")]
    UnknownSort(String),
}

/// A canonical search request.
///
/// `providers` keeps the caller's order, which is also the dispatch order
/// and therefore decides which record wins a dedup tie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text query
    pub text: String,

    /// Requested providers, in dispatch order
    pub providers: Vec<ProviderId>,

    /// Optional inclusive year filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_range: Option<YearRange>,

    /// Maximum results requested from each provider
    pub max_results: usize,

    /// Author names; a paper by any of them matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    /// Journal or conference names; a paper in any of them matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub venues: Vec<String>,

    /// Publication types to restrict to (or favour, where a provider
    /// cannot filter by type)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paper_types: Vec<PaperType>,

    /// Order of the returned papers
    #[serde(default)]
    pub sort_by: SortBy,
}

impl SearchQuery {
    /// Create a new search query with default settings
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            providers: Vec::new(),
            year_range: None,
            max_results: 10,
            authors: Vec::new(),
            venues: Vec::new(),
            paper_types: Vec::new(),
            sort_by: SortBy::Relevance,
        }
    }

    /// Add a provider; repeated providers are ignored
    pub fn provider(mut self, provider: ProviderId) -> Self {
        if !self.providers.contains(&provider) {
            self.providers.push(provider);
        }
        self
    }

    pub fn providers(self, providers: impl IntoIterator<Item = ProviderId>) -> Self {
        providers.into_iter().fold(self, |q, p| q.provider(p))
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn year_range(mut self, start: i32, end: i32) -> Self {
        self.year_range = Some(YearRange::new(start, end));
        self
    }

    /// Add author filters; blank names are ignored
    pub fn authors<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        push_non_blank(&mut self.authors, names);
        self
    }

    /// Add journal/conference filters; blank names are ignored
    pub fn venues<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        push_non_blank(&mut self.venues, names);
        self
    }

    pub fn paper_types(mut self, types: impl IntoIterator<Item = PaperType>) -> Self {
        for paper_type in types {
            if !self.paper_types.contains(&paper_type) {
                self.paper_types.push(paper_type);
            }
        }
        self
    }

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    /// Whether a paper's year satisfies the year filter. Papers without a
    /// year are kept.
    pub fn accepts_year(&self, year: Option<i32>) -> bool {
        match (self.year_range, year) {
            (Some(range), Some(year)) => range.contains(year),
            _ => true,
        }
    }

    /// Whether any author name contains one of the requested names,
    /// ignoring case. Always true without an author filter.
    pub fn accepts_authors(&self, authors: &[Author]) -> bool {
        if self.authors.is_empty() {
            return true;
        }
        let wanted: Vec<String> = self.authors.iter().map(|a| a.to_lowercase()).collect();
        authors.iter().any(|author| {
            let name = author.name.to_lowercase();
            wanted.iter().any(|w| name.contains(w.as_str()))
        })
    }

    /// Check the query invariants
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.text.trim().is_empty() {
            return Err(QueryError::EmptyText);
        }
        if self.max_results == 0 {
            return Err(QueryError::ZeroMaxResults);
        }
        if let Some(range) = self.year_range {
            if range.start > range.end {
                return Err(QueryError::InvertedYearRange {
                    start: range.start,
                    end: range.end,
                });
            }
        }
        Ok(())
    }
}

fn push_non_blank<S: Into<String>>(list: &mut Vec<String>, names: impl IntoIterator<Item = S>) {
    for name in names {
        let name = name.into().trim().to_string();
        if !name.is_empty() && !list.contains(&name) {
            list.push(name);
        }
    }
}

/// The shared failure taxonomy for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    ParseError,
    TransportError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate-limited",
            FailureKind::ParseError => "parse-error",
            FailureKind::TransportError => "transport-error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one provider for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    #[serde(rename = "error")]
    pub kind: FailureKind,

    pub message: String,

    /// Attempts made before giving up (0 if none completed)
    pub attempts: u32,

    /// Whether the retry budget was used up
    pub retries_exhausted: bool,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
            retries_exhausted: false,
        }
    }

    pub fn with_attempts(mut self, attempts: u32, exhausted: bool) -> Self {
        self.attempts = attempts;
        self.retries_exhausted = exhausted;
        self
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of one adapter call
pub type ProviderResult = Result<Vec<Paper>, ProviderFailure>;

/// Per-provider entry of the statistics map: a count, or the failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderStat {
    Count(usize),
    Failed(ProviderFailure),
}

impl ProviderStat {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ProviderStat::Failed(failure) => Some(failure.kind),
            ProviderStat::Count(_) => None,
        }
    }
}

impl From<&ProviderResult> for ProviderStat {
    fn from(result: &ProviderResult) -> Self {
        match result {
            Ok(papers) => ProviderStat::Count(papers.len()),
            Err(failure) => ProviderStat::Failed(failure.clone()),
        }
    }
}

/// Aggregate result of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Deduplicated, ranked papers
    pub papers: Vec<Paper>,

    /// Papers returned by all providers before deduplication
    pub total_found: usize,

    /// Elapsed wall-clock time in seconds
    pub search_time: f64,

    /// Count or failure for every dispatched provider
    pub statistics: BTreeMap<ProviderId, ProviderStat>,
}

impl SearchResult {
    pub fn empty() -> Self {
        Self {
            papers: Vec::new(),
            total_found: 0,
            search_time: 0.0,
            statistics: BTreeMap::new(),
        }
    }

    /// Providers that failed, with their failure
    pub fn failures(&self) -> impl Iterator<Item = (ProviderId, &ProviderFailure)> {
        self.statistics.iter().filter_map(|(id, stat)| match stat {
            ProviderStat::Failed(f) => Some((*id, f)),
            ProviderStat::Count(_) => None,
        })
    }

    /// Breakdown of the returned papers
    pub fn summary(&self) -> SearchSummary {
        let mut by_source = BTreeMap::new();
        let mut by_year = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        let mut citation_total = 0u64;
        let mut cited = 0usize;

        for paper in &self.papers {
            for source in &paper.sources {
                *by_source.entry(*source).or_insert(0) += 1;
            }
            if let Some(year) = paper.year {
                *by_year.entry(year).or_insert(0) += 1;
            }
            *by_type.entry(paper.paper_type).or_insert(0) += 1;
            if let Some(c) = paper.citations {
                citation_total += u64::from(c);
                cited += 1;
            }
        }

        SearchSummary {
            total_papers: self.papers.len(),
            total_found: self.total_found,
            search_time: self.search_time,
            by_source,
            by_year,
            by_type,
            avg_citations: if cited == 0 {
                0.0
            } else {
                citation_total as f64 / cited as f64
            },
        }
    }
}

/// Breakdown of a [`SearchResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub total_papers: usize,
    pub total_found: usize,
    pub search_time: f64,
    pub by_source: BTreeMap<ProviderId, usize>,
    pub by_year: BTreeMap<i32, usize>,
    pub by_type: BTreeMap<PaperType, usize>,
    pub avg_citations: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaperBuilder;

    #[test]
    fn test_validate() {
        assert!(SearchQuery::new("crispr").validate().is_ok());
        assert_eq!(
            SearchQuery::new("crispr").max_results(0).validate(),
            Err(QueryError::ZeroMaxResults)
        );
        assert_eq!(
            SearchQuery::new("crispr").year_range(2022, 2020).validate(),
            Err(QueryError::InvertedYearRange {
                start: 2022,
                end: 2020
            })
        );
        assert_eq!(SearchQuery::new("  ").validate(), Err(QueryError::EmptyText));
        assert!(SearchQuery::new("x").year_range(2020, 2020).validate().is_ok());
    }

    #[test]
    fn test_filters_builders() {
        let q = SearchQuery::new("x")
            .authors(["Doudna", "  ", "Doudna", "Zhang"])
            .venues(vec!["Nature".to_string()])
            .paper_types([PaperType::Review, PaperType::Review])
            .sort_by("Citations".parse().unwrap());

        assert_eq!(q.authors, vec!["Doudna", "Zhang"]);
        assert_eq!(q.venues, vec!["Nature"]);
        assert_eq!(q.paper_types, vec![PaperType::Review]);
        assert_eq!(q.sort_by, SortBy::Citations);
        assert_eq!(
            "newest".parse::<SortBy>(),
            Err(QueryError::UnknownSort("newest".to_string()))
        );

        // Filters are omitted from the wire form when unset
        let json = serde_json::to_value(SearchQuery::new("x")).unwrap();
        assert!(json.get("authors").is_none());
        assert_eq!(json["sort_by"], "relevance");
    }

    #[test]
    fn test_accepts_year() {
        let q = SearchQuery::new("x").year_range(2018, 2020);
        assert!(q.accepts_year(Some(2018)));
        assert!(q.accepts_year(Some(2020)));
        assert!(!q.accepts_year(Some(2021)));
        assert!(q.accepts_year(None));
        assert!(SearchQuery::new("x").accepts_year(Some(1950)));
    }

    #[test]
    fn test_accepts_authors() {
        let authors = vec![Author::new("Ashish Vaswani"), Author::new("Noam Shazeer")];
        assert!(SearchQuery::new("x").accepts_authors(&authors));
        assert!(SearchQuery::new("x").accepts_authors(&[]));
        assert!(SearchQuery::new("x").authors(["shazeer"]).accepts_authors(&authors));
        assert!(!SearchQuery::new("x").authors(["Hinton"]).accepts_authors(&authors));
        assert!(!SearchQuery::new("x").authors(["Hinton"]).accepts_authors(&[]));
    }

    #[test]
    fn test_providers_keep_order_without_repeats() {
        let q = SearchQuery::new("x").providers([
            ProviderId::Arxiv,
            ProviderId::PubMed,
            ProviderId::Arxiv,
        ]);
        assert_eq!(q.providers, vec![ProviderId::Arxiv, ProviderId::PubMed]);
    }

    #[test]
    fn test_statistics_wire_shape() {
        let mut result = SearchResult::empty();
        result
            .statistics
            .insert(ProviderId::PubMed, ProviderStat::Count(5));
        result.statistics.insert(
            ProviderId::Scholar,
            ProviderStat::Failed(
                ProviderFailure::new(FailureKind::Timeout, "deadline").with_attempts(3, true),
            ),
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["statistics"]["pubmed"], 5);
        assert_eq!(json["statistics"]["scholar"]["error"], "timeout");
        assert_eq!(json["statistics"]["scholar"]["retries_exhausted"], true);
        assert!(json["papers"].as_array().unwrap().is_empty());

        let back: SearchResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.statistics, result.statistics);
    }

    #[test]
    fn test_summary() {
        let mut result = SearchResult::empty();
        let mut both = PaperBuilder::new("A", ProviderId::Arxiv)
            .year(2020)
            .citations(10)
            .build();
        both.sources.insert(ProviderId::PubMed);
        result.papers = vec![
            both,
            PaperBuilder::new("B", ProviderId::PubMed)
                .year(2020)
                .citations(20)
                .build(),
            PaperBuilder::new("C", ProviderId::PubMed)
                .paper_type(PaperType::Review)
                .build(),
        ];

        let summary = result.summary();
        assert_eq!(summary.total_papers, 3);
        assert_eq!(summary.by_source[&ProviderId::PubMed], 3);
        assert_eq!(summary.by_source[&ProviderId::Arxiv], 1);
        assert_eq!(summary.by_year[&2020], 2);
        assert_eq!(summary.by_type[&PaperType::Unknown], 2);
        assert_eq!(summary.by_type[&PaperType::Review], 1);
        assert!((summary.avg_citations - 15.0).abs() < f64::EPSILON);
    }
}
