//! Relevance ranking of deduplicated papers.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::dedup::normalize_title;
use crate::models::{Paper, PaperType, SearchQuery, SortBy};

/// Points awarded to papers no older than `max_age` years
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecencyTier {
    pub max_age: i32,
    pub points: f64,
}

/// Scoring weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    /// Whole query phrase found in the title
    #[serde(default = "default_title_phrase")]
    pub title_phrase: f64,

    /// Per query term found in the title
    #[serde(default = "default_title_term")]
    pub title_term: f64,

    /// Per query term found in the abstract
    #[serde(default = "default_abstract_term")]
    pub abstract_term: f64,

    /// Multiplier on log10(citations + 1)
    #[serde(default = "default_citation")]
    pub citation: f64,

    /// Upper bound of the citation component
    #[serde(default = "default_citation_cap")]
    pub citation_cap: f64,

    /// Per provider that found the paper
    #[serde(default = "default_source")]
    pub source: f64,

    /// Paper type is one the query asked for
    #[serde(default = "default_paper_type")]
    pub paper_type: f64,

    /// Checked in order; the first tier the paper's age fits wins
    #[serde(default = "default_recency")]
    pub recency: Vec<RecencyTier>,
}

fn default_title_phrase() -> f64 {
    30.0
}

fn default_title_term() -> f64 {
    20.0
}

fn default_abstract_term() -> f64 {
    5.0
}

fn default_citation() -> f64 {
    5.0
}

fn default_citation_cap() -> f64 {
    30.0
}

fn default_source() -> f64 {
    10.0
}

fn default_paper_type() -> f64 {
    15.0
}

fn default_recency() -> Vec<RecencyTier> {
    vec![
        RecencyTier { max_age: 2, points: 20.0 },
        RecencyTier { max_age: 5, points: 15.0 },
        RecencyTier { max_age: 10, points: 10.0 },
        RecencyTier { max_age: 20, points: 5.0 },
    ]
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            title_phrase: default_title_phrase(),
            title_term: default_title_term(),
            abstract_term: default_abstract_term(),
            citation: default_citation(),
            citation_cap: default_citation_cap(),
            source: default_source(),
            paper_type: default_paper_type(),
            recency: default_recency(),
        }
    }
}

/// Scores and orders papers for a query
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    weights: RankingWeights,
    reference_year: Option<i32>,
}

impl Ranker {
    pub fn new(weights: RankingWeights) -> Self {
        Self {
            weights,
            reference_year: None,
        }
    }

    /// Fix the year recency is measured from (defaults to the current year)
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = Some(year);
        self
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Score every paper and sort them in the query's order.
    ///
    /// Relevance order is score descending, then citations descending,
    /// then title. Date and citation orders use the relevance order to
    /// break their own ties.
    pub fn rank(&self, query: &SearchQuery, mut papers: Vec<Paper>) -> Vec<Paper> {
        let terms = QueryTerms::new(query);
        let year = self.year();

        for paper in &mut papers {
            paper.relevance_score = Some(self.score_with(&terms, year, paper));
        }

        match query.sort_by {
            SortBy::Relevance => papers.sort_by(compare),
            SortBy::Date => papers.sort_by(|a, b| b.year.cmp(&a.year).then_with(|| compare(a, b))),
            SortBy::Citations => papers.sort_by(|a, b| {
                b.citations
                    .unwrap_or(0)
                    .cmp(&a.citations.unwrap_or(0))
                    .then_with(|| compare(a, b))
            }),
        }
        papers
    }

    /// Score a single paper
    pub fn score(&self, query: &SearchQuery, paper: &Paper) -> f64 {
        self.score_with(&QueryTerms::new(query), self.year(), paper)
    }

    fn year(&self) -> i32 {
        self.reference_year
            .unwrap_or_else(|| chrono::Utc::now().year())
    }

    fn score_with(&self, terms: &QueryTerms, reference_year: i32, paper: &Paper) -> f64 {
        let w = &self.weights;
        let title = normalize_title(&paper.title);
        let abstract_text = paper
            .r#abstract
            .as_deref()
            .map(normalize_title)
            .unwrap_or_default();

        let mut score = 0.0;

        if !terms.phrase.is_empty() && title.contains(&terms.phrase) {
            score += w.title_phrase;
        }
        for term in &terms.terms {
            if title.contains(term.as_str()) {
                score += w.title_term;
            }
            if abstract_text.contains(term.as_str()) {
                score += w.abstract_term;
            }
        }

        if let Some(citations) = paper.citations {
            let component = w.citation * (f64::from(citations) + 1.0).log10();
            score += component.min(w.citation_cap);
        }

        if let Some(year) = paper.year {
            let age = (reference_year - year).max(0);
            if let Some(tier) = w.recency.iter().find(|t| age <= t.max_age) {
                score += tier.points;
            }
        }

        score += w.source * paper.sources.len() as f64;

        if terms.paper_types.contains(&paper.paper_type) {
            score += w.paper_type;
        }
        score
    }
}

/// Normalized query phrase, its distinct terms and the wanted types
struct QueryTerms {
    phrase: String,
    terms: Vec<String>,
    paper_types: Vec<PaperType>,
}

impl QueryTerms {
    fn new(query: &SearchQuery) -> Self {
        let phrase = normalize_title(&query.text);
        let mut terms: Vec<String> = Vec::new();
        for term in phrase.split_whitespace() {
            if !terms.iter().any(|t| t == term) {
                terms.push(term.to_string());
            }
        }
        Self {
            phrase,
            terms,
            paper_types: query.paper_types.clone(),
        }
    }
}

/// Total order used for the final list
fn compare(a: &Paper, b: &Paper) -> Ordering {
    let sa = a.relevance_score.unwrap_or(0.0);
    let sb = b.relevance_score.unwrap_or(0.0);
    sb.total_cmp(&sa)
        .then_with(|| b.citations.unwrap_or(0).cmp(&a.citations.unwrap_or(0)))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.doi.cmp(&b.doi))
        .then_with(|| a.url.cmp(&b.url))
}
