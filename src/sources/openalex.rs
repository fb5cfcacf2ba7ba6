//! OpenAlex provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Author, Paper, PaperBuilder, PaperType, ProviderId, SearchQuery, SortBy};
use crate::sources::{Source, SourceError};
use crate::utils::{clean_text, HttpClient};

pub const OPENALEX_API_URL: &str = "https://api.openalex.org";
/// `per-page` cap
const OPENALEX_MAX_PER_PAGE: usize = 200;

/// OpenAlex provider
#[derive(Debug, Clone)]
pub struct OpenAlexSource {
    client: Arc<HttpClient>,
    base_url: String,
    mailto: Option<String>,
}

impl OpenAlexSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: OPENALEX_API_URL.to_string(),
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
            ("search", query.text.trim().to_string()),
            (
                "per-page",
                query.max_results.min(OPENALEX_MAX_PER_PAGE).to_string(),
            ),
        ];
        match query.sort_by {
            SortBy::Relevance => {}
            SortBy::Date => params.push(("sort", "publication_date:desc".to_string())),
            SortBy::Citations => params.push(("sort", "cited_by_count:desc".to_string())),
        }

        let mut filters = Vec::new();
        if let Some(range) = query.year_range {
            filters.push(format!("publication_year:{}-{}", range.start, range.end));
        }
        let types: Vec<&str> = query
            .paper_types
            .iter()
            .filter_map(|t| match t {
                PaperType::Article => Some("article"),
                PaperType::Review => Some("review"),
                PaperType::Preprint => Some("preprint"),
                PaperType::BookChapter => Some("book-chapter"),
                PaperType::Thesis => Some("dissertation"),
                PaperType::Conference | PaperType::Unknown => None,
            })
            .collect();
        if !types.is_empty() {
            filters.push(format!("type:{}", types.join("|")));
        }
        if !filters.is_empty() {
            params.push(("filter", filters.join(",")));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        params
    }

    fn parse_search_response(body: &str) -> Result<Vec<Paper>, SourceError> {
        let response: OAResponse = serde_json::from_str(body)?;
        Ok(response
            .results
            .into_iter()
            .filter_map(Self::parse_work)
            .collect())
    }

    fn parse_work(work: OAWork) -> Option<Paper> {
        let title = work
            .title
            .or(work.display_name)
            .map(|t| clean_text(&t))
            .filter(|t| !t.is_empty())?;

        let authors = work
            .authorships
            .into_iter()
            .filter_map(|a| {
                let name = a.author.and_then(|au| au.display_name)?;
                let mut author = Author::new(clean_text(&name));
                if let Some(inst) = a.institutions.into_iter().find_map(|i| i.display_name) {
                    author = author.with_affiliation(inst);
                }
                Some(author)
            })
            .collect();

        let location = work.primary_location.unwrap_or_default();
        let venue = location
            .source
            .and_then(|s| s.display_name)
            .unwrap_or_default();

        let pmid = work
            .ids
            .and_then(|ids| ids.pmid)
            .and_then(|p| p.trim_end_matches('/').rsplit('/').next().map(str::to_string))
            .unwrap_or_default();

        let url = location
            .landing_page_url
            .or(work.id)
            .unwrap_or_default();

        let mut builder = PaperBuilder::new(title, ProviderId::OpenAlex)
            .authors(authors)
            .year_opt(work.publication_year)
            .paper_type(work.kind.as_deref().map(PaperType::from_label).unwrap_or_default())
            .venue(venue)
            .abstract_text(
                work.abstract_inverted_index
                    .map(|index| rebuild_abstract(&index))
                    .unwrap_or_default(),
            )
            .doi(work.doi.unwrap_or_default())
            .pmid(pmid)
            .url(url)
            .pdf_url(location.pdf_url.unwrap_or_default());
        if let Some(count) = work.cited_by_count {
            builder = builder.citations(count);
        }
        Some(builder.build())
    }
}

/// Rebuild abstract text from OpenAlex's word -> positions index
fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |&p| (p, word.as_str())))
        .collect();
    positioned.sort_unstable_by_key(|(p, _)| *p);
    positioned
        .into_iter()
        .map(|(_, w)| w)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-insensitive venue match against the requested venues
fn matches_venue(query: &SearchQuery, paper: &Paper) -> bool {
    let Some(venue) = paper.venue.as_deref().map(str::to_lowercase) else {
        return false;
    };
    query
        .venues
        .iter()
        .any(|wanted| venue.contains(&wanted.to_lowercase()))
}

#[async_trait]
impl Source for OpenAlexSource {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAlex
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError> {
        let request = self
            .client
            .get(&format!("{}/works", self.base_url))
            .query(&self.search_params(query));
        let body = self.client.fetch_text(request).await?;

        let mut papers = Self::parse_search_response(&body)?;
        papers.retain(|p| {
            query.accepts_authors(&p.authors) && (query.venues.is_empty() || matches_venue(query, p))
        });
        papers.truncate(query.max_results);

        tracing::debug!("OpenAlex returned {} papers", papers.len());
        Ok(papers)
    }
}

#[derive(Debug, Deserialize)]
struct OAResponse {
    #[serde(default)]
    results: Vec<OAWork>,
}

#[derive(Debug, Deserialize)]
struct OAWork {
    id: Option<String>,
    doi: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    publication_year: Option<i32>,
    cited_by_count: Option<u32>,
    #[serde(default)]
    authorships: Vec<OAAuthorship>,
    primary_location: Option<OALocation>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    ids: Option<OAIds>,
}

#[derive(Debug, Deserialize)]
struct OAAuthorship {
    author: Option<OAAuthor>,
    #[serde(default)]
    institutions: Vec<OAInstitution>,
}

#[derive(Debug, Deserialize)]
struct OAAuthor {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAInstitution {
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OALocation {
    source: Option<OASource>,
    landing_page_url: Option<String>,
    pdf_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OASource {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAIds {
    pmid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_abstract() {
        let mut index = HashMap::new();
        index.insert("works".to_string(), vec![2]);
        index.insert("It".to_string(), vec![0]);
        index.insert("really".to_string(), vec![1, 3]);
        assert_eq!(rebuild_abstract(&index), "It really works really");
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{
          "meta": {"count": 1},
          "results": [{
            "id": "https://openalex.org/W1",
            "doi": "https://doi.org/10.1/A",
            "title": "Deep learning",
            "display_name": "Deep learning",
            "type": "review",
            "publication_year": 2015,
            "cited_by_count": 5000,
            "authorships": [
              {"author": {"display_name": "Yann LeCun"}, "institutions": [{"display_name": "NYU"}]}
            ],
            "primary_location": {
              "source": {"display_name": "Nature"},
              "landing_page_url": "https://www.nature.com/articles/nature14539",
              "pdf_url": null
            },
            "abstract_inverted_index": {"Deep": [0], "learning": [1]},
            "ids": {"openalex": "https://openalex.org/W1", "pmid": "https://pubmed.ncbi.nlm.nih.gov/26017442"}
          }]
        }"#;

        let papers = OpenAlexSource::parse_search_response(body).unwrap();
        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.doi.as_deref(), Some("10.1/a"));
        assert_eq!(p.pmid.as_deref(), Some("26017442"));
        assert_eq!(p.venue.as_deref(), Some("Nature"));
        assert_eq!(p.r#abstract.as_deref(), Some("Deep learning"));
        assert_eq!(p.authors[0].affiliation.as_deref(), Some("NYU"));
        assert_eq!(p.url, "https://www.nature.com/articles/nature14539");
        assert_eq!(p.pdf_url, None);
        assert_eq!(p.paper_type, PaperType::Review);
    }

    #[test]
    fn test_year_filter() {
        let source = OpenAlexSource::new(Arc::new(HttpClient::new().unwrap()));
        let params = source.search_params(&SearchQuery::new("x").year_range(2001, 2003));
        assert!(params.contains(&("filter", "publication_year:2001-2003".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "sort"));
    }

    #[test]
    fn test_type_filter_and_sort() {
        let source = OpenAlexSource::new(Arc::new(HttpClient::new().unwrap()));
        let query = SearchQuery::new("x")
            .year_range(2001, 2003)
            .paper_types([PaperType::Review, PaperType::Thesis, PaperType::Conference])
            .sort_by(SortBy::Date);
        let params = source.search_params(&query);
        assert!(params.contains(&(
            "filter",
            "publication_year:2001-2003,type:review|dissertation".to_string()
        )));
        assert!(params.contains(&("sort", "publication_date:desc".to_string())));
    }

    #[test]
    fn test_matches_venue() {
        let paper = PaperBuilder::new("T", ProviderId::OpenAlex).venue("Nature Medicine").build();
        assert!(matches_venue(&SearchQuery::new("x").venues(["nature"]), &paper));
        assert!(!matches_venue(&SearchQuery::new("x").venues(["Science"]), &paper));

        let no_venue = PaperBuilder::new("T", ProviderId::OpenAlex).build();
        assert!(!matches_venue(&SearchQuery::new("x").venues(["Nature"]), &no_venue));
    }
}
