//! arXiv provider using the export API (Atom feed).

use async_trait::async_trait;
use chrono::Datelike;
use feed_rs::parser;
use std::sync::Arc;

use crate::models::{
    normalize_arxiv_id, Author, Paper, PaperBuilder, PaperType, ProviderId, SearchQuery, SortBy,
};
use crate::sources::{Source, SourceError};
use crate::utils::{clean_text, HttpClient};

/// Base URL for arXiv API
pub const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";
/// Base URL for arXiv PDFs
const ARXIV_PDF_URL: &str = "https://arxiv.org/pdf";
/// Page size cap of the export API
const ARXIV_MAX_RESULTS: usize = 200;

/// arXiv provider
#[derive(Debug, Clone)]
pub struct ArxivSource {
    client: Arc<HttpClient>,
    base_url: String,
}

impl ArxivSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: ARXIV_API_URL.to_string(),
        }
    }

    /// Point the adapter at another endpoint (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the `search_query` parameter
    fn build_search_query(query: &SearchQuery) -> String {
        let mut parts = vec![format!("all:{}", query.text.trim())];

        if !query.authors.is_empty() {
            let authors: Vec<String> = query
                .authors
                .iter()
                .map(|a| format!("au:\"{}\"", a))
                .collect();
            parts.push(format!("({})", authors.join(" OR ")));
        }

        if let Some(range) = query.year_range {
            parts.push(format!(
                "submittedDate:[{}01010000 TO {}12312359]",
                range.start, range.end
            ));
        }

        parts.join(" AND ")
    }

    /// Parse an Atom feed into papers
    fn parse_feed(body: &[u8]) -> Result<Vec<Paper>, SourceError> {
        let feed = parser::parse(body)
            .map_err(|e| SourceError::Parse(format!("Failed to parse Atom feed: {}", e)))?;

        Ok(feed
            .entries
            .iter()
            .filter(|entry| !entry.id.contains("/api/errors"))
            .filter_map(Self::parse_entry)
            .collect())
    }

    /// Parse one Atom entry; entries without a usable title are skipped
    fn parse_entry(entry: &feed_rs::model::Entry) -> Option<Paper> {
        let title = entry
            .title
            .as_ref()
            .map(|t| clean_text(&t.content))
            .filter(|t| !t.is_empty())?;

        let arxiv_id = normalize_arxiv_id(&entry.id);

        let authors = entry
            .authors
            .iter()
            .map(|a| Author::new(clean_text(&a.name)))
            .collect();

        let abstract_text = entry
            .summary
            .as_ref()
            .map(|s| clean_text(&s.content))
            .unwrap_or_default();

        let doi = entry
            .links
            .iter()
            .find(|l| l.title.as_deref() == Some("doi"))
            .map(|l| l.href.clone())
            .unwrap_or_default();

        let pdf_url = entry
            .links
            .iter()
            .find(|l| l.title.as_deref() == Some("pdf"))
            .map(|l| l.href.clone())
            .or_else(|| {
                arxiv_id
                    .as_ref()
                    .map(|id| format!("{}/{}", ARXIV_PDF_URL, id))
            })
            .unwrap_or_default();

        let url = arxiv_id
            .as_ref()
            .map(|id| format!("https://arxiv.org/abs/{}", id))
            .unwrap_or_else(|| entry.id.clone());

        let mut builder = PaperBuilder::new(title, ProviderId::Arxiv)
            .authors(authors)
            .abstract_text(abstract_text)
            .year_opt(entry.published.or(entry.updated).map(|d| d.year()))
            .venue("arXiv")
            .paper_type(PaperType::Preprint)
            .doi(doi)
            .url(url)
            .pdf_url(pdf_url);
        if let Some(id) = &arxiv_id {
            builder = builder.arxiv_id(id);
        }
        Some(builder.build())
    }
}

#[async_trait]
impl Source for ArxivSource {
    fn id(&self) -> ProviderId {
        ProviderId::Arxiv
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError> {
        let max_results = query.max_results.min(ARXIV_MAX_RESULTS);
        // No citation counts in the feed; citation order falls back to relevance
        let sort_by = match query.sort_by {
            SortBy::Date => "submittedDate",
            SortBy::Relevance | SortBy::Citations => "relevance",
        };
        let request = self
            .client
            .get(&self.base_url)
            .header("Accept", "application/atom+xml")
            .query(&[
                ("search_query", Self::build_search_query(query)),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
                ("sortBy", sort_by.to_string()),
                ("sortOrder", "descending".to_string()),
            ]);

        let body = self.client.fetch_text(request).await?;
        let mut papers = Self::parse_feed(body.as_bytes())?;
        // Server-side date filtering is by submission date; drop papers dated outside the range
        papers.retain(|p| query.accepts_year(p.year));
        papers.truncate(query.max_results);

        tracing::debug!("arXiv returned {} papers", papers.len());
        Ok(papers)
    }

    fn supports_lookup(&self) -> bool {
        true
    }

    async fn get_by_id(&self, id: &str) -> Result<Paper, SourceError> {
        let arxiv_id = normalize_arxiv_id(id)
            .ok_or_else(|| SourceError::InvalidRequest(format!("Invalid arXiv ID: {}", id)))?;

        let request = self
            .client
            .get(&self.base_url)
            .query(&[("id_list", arxiv_id.as_str())]);
        let body = self.client.fetch_text(request).await?;

        Self::parse_feed(body.as_bytes())?
            .into_iter()
            .next()
            .ok_or(SourceError::NotFound(arxiv_id))
    }
}
