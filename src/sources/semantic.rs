//! Semantic Scholar provider using the Graph API.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{Author, Paper, PaperBuilder, PaperType, ProviderId, SearchQuery};
use crate::sources::{Source, SourceError};
use crate::utils::{clean_text, HttpClient};

pub const SEMANTIC_SCHOLAR_API_URL: &str = "https://api.semanticscholar.org/graph/v1";
/// `limit` cap of the search endpoint
const SEMANTIC_MAX_LIMIT: usize = 100;
const SEMANTIC_FIELDS: &str =
    "title,authors,year,venue,abstract,citationCount,externalIds,url,openAccessPdf,publicationTypes";

/// Semantic Scholar provider
#[derive(Debug, Clone)]
pub struct SemanticScholarSource {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: SEMANTIC_SCHOLAR_API_URL.to_string(),
            api_key: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// API key sent as `x-api-key`; unauthenticated requests share a public pool
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    fn search_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", query.text.trim().to_string()),
            ("limit", query.max_results.min(SEMANTIC_MAX_LIMIT).to_string()),
            ("fields", SEMANTIC_FIELDS.to_string()),
        ];
        if let Some(range) = query.year_range {
            params.push(("year", format!("{}-{}", range.start, range.end)));
        }
        if !query.venues.is_empty() {
            params.push(("venue", query.venues.join(",")));
        }
        let types: Vec<&str> = query
            .paper_types
            .iter()
            .filter_map(|t| match t {
                PaperType::Article => Some("JournalArticle"),
                PaperType::Review => Some("Review"),
                PaperType::Conference => Some("Conference"),
                PaperType::BookChapter => Some("BookSection"),
                _ => None,
            })
            .collect();
        if !types.is_empty() {
            params.push(("publicationTypes", types.join(",")));
        }
        params
    }

    fn parse_search_response(body: &str) -> Result<Vec<Paper>, SourceError> {
        let response: S2SearchResponse = serde_json::from_str(body)?;
        Ok(response.data.into_iter().filter_map(Self::parse_paper).collect())
    }

    fn parse_paper(paper: S2Paper) -> Option<Paper> {
        let title = paper.title.map(|t| clean_text(&t)).filter(|t| !t.is_empty())?;

        let authors = paper
            .authors
            .into_iter()
            .filter_map(|a| a.name)
            .map(|name| Author::new(clean_text(&name)))
            .collect();

        let ids = paper.external_ids.unwrap_or_default();
        let url = paper.url.unwrap_or_else(|| {
            paper
                .paper_id
                .as_ref()
                .map(|id| format!("https://www.semanticscholar.org/paper/{}", id))
                .unwrap_or_default()
        });

        let mut builder = PaperBuilder::new(title, ProviderId::SemanticScholar)
            .authors(authors)
            .year_opt(paper.year)
            .paper_type(PaperType::from_labels(
                paper.publication_types.iter().map(String::as_str),
            ))
            .venue(paper.venue.unwrap_or_default())
            .abstract_text(paper.r#abstract.map(|a| clean_text(&a)).unwrap_or_default())
            .doi(ids.doi.unwrap_or_default())
            .pmid(ids.pubmed.unwrap_or_default())
            .url(url)
            .pdf_url(paper.open_access_pdf.and_then(|p| p.url).unwrap_or_default());
        if let Some(arxiv) = ids.arxiv {
            builder = builder.arxiv_id(arxiv);
        }
        if let Some(count) = paper.citation_count {
            builder = builder.citations(count);
        }
        Some(builder.build())
    }
}

#[async_trait]
impl Source for SemanticScholarSource {
    fn id(&self) -> ProviderId {
        ProviderId::SemanticScholar
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError> {
        let mut request = self
            .client
            .get(&format!("{}/paper/search", self.base_url))
            .query(&Self::search_params(query));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let body = self.client.fetch_text(request).await?;
        let mut papers = Self::parse_search_response(&body)?;
        // The search endpoint has no author filter
        papers.retain(|p| query.accepts_authors(&p.authors));
        papers.truncate(query.max_results);

        tracing::debug!("Semantic Scholar returned {} papers", papers.len());
        Ok(papers)
    }
}

#[derive(Debug, Deserialize)]
struct S2SearchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    year: Option<i32>,
    venue: Option<String>,
    r#abstract: Option<String>,
    citation_count: Option<u32>,
    external_ids: Option<S2ExternalIds>,
    url: Option<String>,
    open_access_pdf: Option<S2Pdf>,
    #[serde(default, deserialize_with = "null_as_empty")]
    publication_types: Vec<String>,
}

/// `publicationTypes` is `null` for unclassified papers
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "PubMed")]
    pubmed: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Pdf {
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_response() {
        let body = r#"{
          "total": 2,
          "offset": 0,
          "data": [
            {
              "paperId": "abc123",
              "title": "Attention Is All You Need",
              "authors": [{"authorId": "1", "name": "Ashish Vaswani"}],
              "year": 2017,
              "venue": "NeurIPS",
              "abstract": null,
              "citationCount": 100000,
              "externalIds": {"DOI": "10.5555/3295222", "ArXiv": "1706.03762", "CorpusId": 13756489},
              "url": "https://www.semanticscholar.org/paper/abc123",
              "openAccessPdf": {"url": "https://arxiv.org/pdf/1706.03762", "status": "GREEN"},
              "publicationTypes": ["JournalArticle", "Conference"]
            },
            {"paperId": "ghi", "title": "Unclassified", "publicationTypes": null},
            {"paperId": "def", "title": null}
          ]
        }"#;

        let papers = SemanticScholarSource::parse_search_response(body).unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[1].paper_type, PaperType::Unknown);
        let p = &papers[0];
        assert_eq!(p.paper_type, PaperType::Article);
        assert_eq!(p.doi.as_deref(), Some("10.5555/3295222"));
        assert_eq!(p.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(p.citations, Some(100000));
        assert_eq!(p.r#abstract, None);
        assert_eq!(p.pdf_url.as_deref(), Some("https://arxiv.org/pdf/1706.03762"));
    }

    #[test]
    fn test_missing_data_is_empty() {
        let papers = SemanticScholarSource::parse_search_response(r#"{"total": 0}"#).unwrap();
        assert!(papers.is_empty());
    }

    #[test]
    fn test_search_params() {
        let params = SemanticScholarSource::search_params(
            &SearchQuery::new("transformers").max_results(500).year_range(2017, 2019),
        );
        assert!(params.contains(&("limit", "100".to_string())));
        assert!(params.contains(&("year", "2017-2019".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "venue" || *k == "publicationTypes"));
    }

    #[test]
    fn test_search_params_filters() {
        let query = SearchQuery::new("transformers")
            .venues(["NeurIPS", "ICML"])
            .paper_types([PaperType::Review, PaperType::Preprint, PaperType::Conference]);
        let params = SemanticScholarSource::search_params(&query);
        assert!(params.contains(&("venue", "NeurIPS,ICML".to_string())));
        assert!(params.contains(&("publicationTypes", "Review,Conference".to_string())));
    }
}
