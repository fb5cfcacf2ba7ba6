//! Crossref provider using the REST API.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{
    normalize_doi, Author, Paper, PaperBuilder, PaperType, ProviderId, SearchQuery, SortBy,
};
use crate::sources::{Source, SourceError};
use crate::utils::{clean_text, strip_tags, HttpClient};

pub const CROSSREF_API_BASE: &str = "https://api.crossref.org";
/// Crossref caps `rows` at 1000; keep pages small
const CROSSREF_MAX_ROWS: usize = 100;

/// Crossref provider
///
/// Supplying a contact address routes requests to Crossref's "polite" pool.
#[derive(Debug, Clone)]
pub struct CrossrefSource {
    client: Arc<HttpClient>,
    base_url: String,
    mailto: Option<String>,
}

impl CrossrefSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: CROSSREF_API_BASE.to_string(),
            mailto: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_mailto(mut self, mailto: Option<String>) -> Self {
        self.mailto = mailto.filter(|m| !m.is_empty());
        self
    }

    fn search_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", query.text.trim().to_string()),
            ("rows", query.max_results.min(CROSSREF_MAX_ROWS).to_string()),
        ];
        match query.sort_by {
            SortBy::Relevance => params.push(("sort", "relevance".to_string())),
            SortBy::Date => {
                params.push(("sort", "published".to_string()));
                params.push(("order", "desc".to_string()));
            }
            SortBy::Citations => {
                params.push(("sort", "is-referenced-by-count".to_string()));
                params.push(("order", "desc".to_string()));
            }
        }
        if !query.authors.is_empty() {
            params.push(("query.author", query.authors.join(" ")));
        }
        if !query.venues.is_empty() {
            params.push(("query.container-title", query.venues.join(" ")));
        }

        // Repeated `type:` filters are OR-ed by the API
        let mut filters = Vec::new();
        if let Some(range) = query.year_range {
            filters.push(format!("from-pub-date:{}", range.start));
            filters.push(format!("until-pub-date:{}", range.end));
        }
        filters.extend(
            query
                .paper_types
                .iter()
                .filter_map(|t| Self::work_type(*t))
                .map(|t| format!("type:{}", t)),
        );
        if !filters.is_empty() {
            params.push(("filter", filters.join(",")));
        }

        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        params
    }

    /// Crossref work type for a paper type; reviews have no type of their own
    fn work_type(paper_type: PaperType) -> Option<&'static str> {
        match paper_type {
            PaperType::Article => Some("journal-article"),
            PaperType::Conference => Some("proceedings-article"),
            PaperType::BookChapter => Some("book-chapter"),
            PaperType::Preprint => Some("posted-content"),
            PaperType::Thesis => Some("dissertation"),
            PaperType::Review | PaperType::Unknown => None,
        }
    }

    fn parse_search_response(body: &str) -> Result<Vec<Paper>, SourceError> {
        let response: CRResponse<CRMessage> = serde_json::from_str(body)?;
        Ok(response
            .message
            .items
            .into_iter()
            .filter_map(Self::parse_item)
            .collect())
    }

    fn parse_item(item: CRItem) -> Option<Paper> {
        let title = item
            .title
            .into_iter()
            .map(|t| strip_tags(&t))
            .find(|t| !t.is_empty())?;

        let authors = item
            .author
            .into_iter()
            .filter_map(|a| {
                let name = match (a.given, a.family, a.name) {
                    (Some(given), Some(family), _) => format!("{} {}", given, family),
                    (None, Some(family), _) => family,
                    (_, None, Some(name)) => name,
                    (Some(given), None, None) => given,
                    (None, None, None) => return None,
                };
                let mut author = Author::new(clean_text(&name));
                if let Some(aff) = a.affiliation.into_iter().find_map(|af| af.name) {
                    author = author.with_affiliation(clean_text(&aff));
                }
                Some(author)
            })
            .collect();

        let year = [item.published_print, item.published_online, item.issued]
            .into_iter()
            .flatten()
            .find_map(|d| d.year());

        let doi = item.doi.as_deref().and_then(normalize_doi);
        let url = item
            .url
            .or_else(|| doi.as_ref().map(|d| format!("https://doi.org/{}", d)))
            .unwrap_or_default();

        let pdf_url = item
            .link
            .into_iter()
            .find(|l| l.content_type.as_deref() == Some("application/pdf"))
            .map(|l| l.url)
            .unwrap_or_default();

        let mut builder = PaperBuilder::new(title, ProviderId::Crossref)
            .authors(authors)
            .year_opt(year)
            .paper_type(item.kind.as_deref().map(PaperType::from_label).unwrap_or_default())
            .venue(item.container_title.into_iter().next().unwrap_or_default())
            .abstract_text(item.r#abstract.map(|a| strip_tags(&a)).unwrap_or_default())
            .url(url)
            .pdf_url(pdf_url);
        if let Some(doi) = doi {
            builder = builder.doi(doi);
        }
        if let Some(count) = item.is_referenced_by_count {
            builder = builder.citations(count);
        }
        Some(builder.build())
    }
}

#[async_trait]
impl Source for CrossrefSource {
    fn id(&self) -> ProviderId {
        ProviderId::Crossref
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError> {
        let request = self
            .client
            .get(&format!("{}/works", self.base_url))
            .query(&self.search_params(query));
        let body = self.client.fetch_text(request).await?;

        let mut papers = Self::parse_search_response(&body)?;
        papers.truncate(query.max_results);

        tracing::debug!("Crossref returned {} papers", papers.len());
        Ok(papers)
    }

    fn supports_lookup(&self) -> bool {
        true
    }

    async fn get_by_id(&self, id: &str) -> Result<Paper, SourceError> {
        let doi = normalize_doi(id)
            .ok_or_else(|| SourceError::InvalidRequest(format!("Invalid DOI: {}", id)))?;

        let mut request = self.client.get(&format!(
            "{}/works/{}",
            self.base_url,
            urlencoding::encode(&doi)
        ));
        if let Some(mailto) = &self.mailto {
            request = request.query(&[("mailto", mailto)]);
        }
        let body = self.client.fetch_text(request).await?;

        let response: CRResponse<CRItem> = serde_json::from_str(&body)?;
        Self::parse_item(response.message).ok_or(SourceError::NotFound(doi))
    }
}

#[derive(Debug, Deserialize)]
struct CRResponse<T> {
    message: T,
}

#[derive(Debug, Deserialize)]
struct CRMessage {
    #[serde(default)]
    items: Vec<CRItem>,
}

#[derive(Debug, Deserialize)]
struct CRItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CRAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(rename = "abstract")]
    r#abstract: Option<String>,
    #[serde(rename = "is-referenced-by-count")]
    is_referenced_by_count: Option<u32>,
    #[serde(rename = "published-print")]
    published_print: Option<CRDate>,
    #[serde(rename = "published-online")]
    published_online: Option<CRDate>,
    issued: Option<CRDate>,
    #[serde(default)]
    link: Vec<CRLink>,
}

#[derive(Debug, Deserialize)]
struct CRAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
    #[serde(default)]
    affiliation: Vec<CRAffiliation>,
}

#[derive(Debug, Deserialize)]
struct CRAffiliation {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CRDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl CRDate {
    fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied().flatten()
    }
}

#[derive(Debug, Deserialize)]
struct CRLink {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "content-type")]
    content_type: Option<String>,
}
