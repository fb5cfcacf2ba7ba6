//! Data models for papers, queries and aggregated results.

mod paper;
mod search;

pub use paper::{
    normalize_arxiv_id, normalize_doi, Author, Paper, PaperBuilder, PaperType, ProviderId,
    UnknownPaperType, UnknownProvider,
};
pub use search::{
    FailureKind, ProviderFailure, ProviderResult, ProviderStat, QueryError, SearchQuery,
    SearchResult, SearchSummary, SortBy, YearRange,
};
