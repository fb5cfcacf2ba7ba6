//! PubMed provider using the NCBI E-utilities API.
//!
//! A search is two requests: `esearch` resolves the query to PMIDs, then
//! `efetch` returns the full records as XML.

use async_trait::async_trait;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{Author, Paper, PaperBuilder, PaperType, ProviderId, SearchQuery, SortBy};
use crate::sources::{Source, SourceError};
use crate::utils::{clean_text, HttpClient};

/// E-utilities base URL
pub const PUBMED_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
/// Largest `retmax` we ask for
const PUBMED_MAX_RESULTS: usize = 200;
/// Formatting elements that appear inside titles and abstracts
const INLINE_MARKUP: &[&[u8]] = &[b"i", b"b", b"u", b"sup", b"sub", b"sc"];

/// PubMed provider
#[derive(Debug, Clone)]
pub struct PubMedSource {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: Option<String>,
}

impl PubMedSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: PUBMED_EUTILS_URL.to_string(),
            api_key: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// NCBI API key; raises the allowed request rate
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Build the esearch `term`: the query text AND-ed with one OR-group
    /// per filter
    fn search_term(query: &SearchQuery) -> String {
        fn any_of(terms: Vec<String>) -> Option<String> {
            match terms.len() {
                0 => None,
                1 => terms.into_iter().next(),
                _ => Some(format!("({})", terms.join(" OR "))),
            }
        }

        let publication_types = query
            .paper_types
            .iter()
            .filter_map(|t| match t {
                PaperType::Article => Some("Journal Article[pt]".to_string()),
                PaperType::Review => Some("Review[pt]".to_string()),
                PaperType::Preprint => Some("Preprint[pt]".to_string()),
                _ => None,
            })
            .collect();

        let groups = [
            any_of(query.authors.iter().map(|a| format!("{}[auth]", a)).collect()),
            any_of(query.venues.iter().map(|v| format!("\"{}\"[jour]", v)).collect()),
            any_of(publication_types),
        ];

        std::iter::once(query.text.trim().to_string())
            .chain(groups.into_iter().flatten())
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Build esearch parameters
    fn search_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        // esearch has no citation order
        let sort = match query.sort_by {
            SortBy::Date => "pub_date",
            SortBy::Relevance | SortBy::Citations => "relevance",
        };
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", Self::search_term(query)),
            ("retmax", query.max_results.min(PUBMED_MAX_RESULTS).to_string()),
            ("retmode", "xml".to_string()),
            ("sort", sort.to_string()),
        ];

        if let Some(range) = query.year_range {
            params.push(("datetype", "pdat".to_string()));
            params.push(("mindate", range.start.to_string()));
            params.push(("maxdate", range.end.to_string()));
        }

        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }

        params
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<Paper>, SourceError> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("id", ids.join(",")),
            ("retmode", "xml".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }

        let request = self
            .client
            .get(&format!("{}/efetch.fcgi", self.base_url))
            .query(&params);
        let xml = self.client.fetch_text(request).await?;
        Self::parse_fetch_response(&xml)
    }

    /// Parse E-utilities search response XML into PMIDs
    fn parse_search_response(xml: &str) -> Result<Vec<String>, SourceError> {
        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct ESearchResult {
            #[serde(default)]
            IdList: Option<IdList>,
            #[serde(rename = "ERROR")]
            error: Option<String>,
        }

        #[derive(Debug, Deserialize)]
        struct IdList {
            #[serde(rename = "Id", default)]
            ids: Vec<String>,
        }

        let result: ESearchResult = from_str(xml)
            .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed search XML: {}", e)))?;

        if let Some(error) = result.error {
            return Err(SourceError::Parse(format!("PubMed search error: {}", error)));
        }

        Ok(result.IdList.map(|l| l.ids).unwrap_or_default())
    }

    /// Parse E-utilities fetch response XML
    fn parse_fetch_response(xml: &str) -> Result<Vec<Paper>, SourceError> {
        #[derive(Debug, Deserialize)]
        struct PubmedArticleSet {
            #[serde(rename = "PubmedArticle", default)]
            articles: Vec<PubmedArticle>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedArticle {
            MedlineCitation: MedlineCitation,
            PubmedData: Option<PubmedData>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct MedlineCitation {
            PMID: Text,
            Article: Article,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Article {
            Journal: Option<Journal>,
            ArticleTitle: Option<Text>,
            Abstract: Option<Abstract>,
            AuthorList: Option<AuthorList>,
            PublicationTypeList: Option<PublicationTypeList>,
        }

        #[derive(Debug, Deserialize)]
        struct PublicationTypeList {
            #[serde(rename = "PublicationType", default)]
            types: Vec<Text>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Journal {
            Title: Option<Text>,
            JournalIssue: Option<JournalIssue>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct JournalIssue {
            PubDate: Option<PubDate>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubDate {
            Year: Option<String>,
            MedlineDate: Option<String>,
        }

        #[derive(Debug, Deserialize)]
        struct Text {
            #[serde(rename = "$text", default)]
            text: String,
        }

        #[derive(Debug, Deserialize)]
        struct Abstract {
            #[serde(rename = "AbstractText", default)]
            sections: Vec<AbstractText>,
        }

        #[derive(Debug, Deserialize)]
        struct AbstractText {
            #[serde(rename = "@Label")]
            label: Option<String>,
            #[serde(rename = "$text", default)]
            text: String,
        }

        #[derive(Debug, Deserialize)]
        struct AuthorList {
            #[serde(rename = "Author", default)]
            authors: Vec<PubmedAuthor>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedAuthor {
            LastName: Option<String>,
            ForeName: Option<String>,
            Initials: Option<String>,
            CollectiveName: Option<String>,
            #[serde(default)]
            AffiliationInfo: Vec<AffiliationInfo>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct AffiliationInfo {
            Affiliation: Option<String>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedData {
            ArticleIdList: Option<ArticleIdList>,
        }

        #[derive(Debug, Deserialize)]
        struct ArticleIdList {
            #[serde(rename = "ArticleId", default)]
            ids: Vec<ArticleId>,
        }

        #[derive(Debug, Deserialize)]
        struct ArticleId {
            #[serde(rename = "@IdType")]
            id_type: String,
            #[serde(rename = "$text", default)]
            value: String,
        }

        let xml = flatten_inline_markup(xml)?;
        let result: PubmedArticleSet = from_str(&xml)
            .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed fetch XML: {}", e)))?;

        let mut papers = Vec::new();

        for article in result.articles {
            let citation = article.MedlineCitation;
            let pmid = citation.PMID.text.trim().to_string();

            let title = citation
                .Article
                .ArticleTitle
                .map(|t| clean_text(&t.text))
                .unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let authors = citation
                .Article
                .AuthorList
                .map(|list| {
                    list.authors
                        .into_iter()
                        .filter_map(|a| {
                            let name = match a.CollectiveName {
                                Some(collective) => collective,
                                None => {
                                    let first = a.ForeName.or(a.Initials).unwrap_or_default();
                                    let last = a.LastName.unwrap_or_default();
                                    format!("{} {}", first, last).trim().to_string()
                                }
                            };
                            if name.is_empty() {
                                return None;
                            }
                            let mut author = Author::new(name);
                            if let Some(aff) = a.AffiliationInfo.into_iter().find_map(|i| i.Affiliation) {
                                author = author.with_affiliation(clean_text(&aff));
                            }
                            Some(author)
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let abstract_text = citation
                .Article
                .Abstract
                .map(|ab| {
                    ab.sections
                        .iter()
                        .map(|s| match &s.label {
                            Some(label) => format!("{}: {}", label, s.text.trim()),
                            None => s.text.trim().to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();

            let paper_type = citation
                .Article
                .PublicationTypeList
                .map(|list| PaperType::from_labels(list.types.iter().map(|t| t.text.as_str())))
                .unwrap_or_default();

            let journal = citation.Article.Journal;
            let venue = journal
                .as_ref()
                .and_then(|j| j.Title.as_ref())
                .map(|t| clean_text(&t.text))
                .unwrap_or_default();
            let year = journal
                .as_ref()
                .and_then(|j| j.JournalIssue.as_ref())
                .and_then(|ji| ji.PubDate.as_ref())
                .and_then(|pd| pd.Year.as_deref().or(pd.MedlineDate.as_deref()))
                .and_then(parse_year);

            let ids = article
                .PubmedData
                .and_then(|pd| pd.ArticleIdList)
                .map(|l| l.ids)
                .unwrap_or_default();
            let find_id = |kind: &str| {
                ids.iter()
                    .find(|id| id.id_type == kind)
                    .map(|id| id.value.trim().to_string())
            };
            let doi = find_id("doi").unwrap_or_default();
            let pdf_url = find_id("pmc")
                .map(|pmc| format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{}/pdf/", pmc))
                .unwrap_or_default();

            papers.push(
                PaperBuilder::new(title, ProviderId::PubMed)
                    .authors(authors)
                    .abstract_text(clean_text(&abstract_text))
                    .venue(venue)
                    .year_opt(year)
                    .paper_type(paper_type)
                    .doi(doi)
                    .url(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid))
                    .pdf_url(pdf_url)
                    .pmid(pmid)
                    .build(),
            );
        }

        Ok(papers)
    }
}

/// Drop inline formatting tags (`<i>`, `<sup>`, ...) but keep their text,
/// so mixed-content elements such as `ArticleTitle` read as one text node
fn flatten_inline_markup(xml: &str) -> Result<String, SourceError> {
    let malformed = |e: &dyn std::fmt::Display| {
        SourceError::Parse(format!("Failed to parse PubMed fetch XML: {}", e))
    };

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    loop {
        match reader.read_event().map_err(|e| malformed(&e))? {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e)
                if INLINE_MARKUP.contains(&e.local_name().as_ref()) => {}
            Event::End(ref e) if INLINE_MARKUP.contains(&e.local_name().as_ref()) => {}
            event => writer.write_event(event).map_err(|e| malformed(&e))?,
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|e| malformed(&e))
}

/// First four-digit run in a PubMed date string ("2019", "2019 Jan-Feb")
fn parse_year(date: &str) -> Option<i32> {
    let digits: String = date
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

#[async_trait]
impl Source for PubMedSource {
    fn id(&self) -> ProviderId {
        ProviderId::PubMed
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError> {
        let request = self
            .client
            .get(&format!("{}/esearch.fcgi", self.base_url))
            .query(&self.search_params(query));
        let xml = self.client.fetch_text(request).await?;

        let mut ids = Self::parse_search_response(&xml)?;
        ids.truncate(query.max_results);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut papers = self.fetch_records(&ids).await?;
        papers.truncate(query.max_results);

        tracing::debug!("PubMed returned {} papers", papers.len());
        Ok(papers)
    }

    fn supports_lookup(&self) -> bool {
        true
    }

    async fn get_by_id(&self, id: &str) -> Result<Paper, SourceError> {
        let pmid = id.trim().trim_start_matches("PMID:").trim().to_string();
        if pmid.is_empty() || !pmid.chars().all(|c| c.is_ascii_digit()) {
            return Err(SourceError::InvalidRequest(format!("Invalid PMID: {}", id)));
        }

        self.fetch_records(std::slice::from_ref(&pmid))
            .await?
            .into_iter()
            .next()
            .ok_or(SourceError::NotFound(pmid))
    }
}
