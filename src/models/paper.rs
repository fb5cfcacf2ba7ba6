//! Paper model representing a research paper from any provider.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The provider a paper was found through.
///
/// This is a closed set: every adapter the crate ships has exactly one
/// variant here, and the serialized form is the stable wire identifier used
/// as the key of the statistics map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    #[serde(rename = "pubmed")]
    PubMed,
    Arxiv,
    Crossref,
    Scholar,
    SemanticScholar,
    #[serde(rename = "openalex")]
    OpenAlex,
}

impl ProviderId {
    /// Every provider, in a fixed order.
    pub const ALL: [ProviderId; 6] = [
        ProviderId::PubMed,
        ProviderId::Arxiv,
        ProviderId::Crossref,
        ProviderId::Scholar,
        ProviderId::SemanticScholar,
        ProviderId::OpenAlex,
    ];

    /// Returns the provider identifier (wire and config key)
    pub fn id(&self) -> &'static str {
        match self {
            ProviderId::PubMed => "pubmed",
            ProviderId::Arxiv => "arxiv",
            ProviderId::Crossref => "crossref",
            ProviderId::Scholar => "scholar",
            ProviderId::SemanticScholar => "semantic_scholar",
            ProviderId::OpenAlex => "openalex",
        }
    }

    /// Returns the display name of the provider
    pub fn name(&self) -> &'static str {
        match self {
            ProviderId::PubMed => "PubMed",
            ProviderId::Arxiv => "arXiv",
            ProviderId::Crossref => "Crossref",
            ProviderId::Scholar => "Google Scholar",
            ProviderId::SemanticScholar => "Semantic Scholar",
            ProviderId::OpenAlex => "OpenAlex",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Error returned when parsing an unknown provider identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderId {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "pubmed" => Ok(ProviderId::PubMed),
            "arxiv" => Ok(ProviderId::Arxiv),
            "crossref" => Ok(ProviderId::Crossref),
            "scholar" | "google_scholar" => Ok(ProviderId::Scholar),
            "semantic_scholar" | "semantic" => Ok(ProviderId::SemanticScholar),
            "openalex" => Ok(ProviderId::OpenAlex),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Publication type, as far as the provider reports one
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PaperType {
    Article,
    Review,
    Preprint,
    Conference,
    BookChapter,
    Thesis,
    #[default]
    Unknown,
}

impl PaperType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperType::Article => "article",
            PaperType::Review => "review",
            PaperType::Preprint => "preprint",
            PaperType::Conference => "conference",
            PaperType::BookChapter => "book_chapter",
            PaperType::Thesis => "thesis",
            PaperType::Unknown => "unknown",
        }
    }

    /// Classify a provider's type label ("journal-article",
    /// "proceedings-article", "Review", "dissertation", ...)
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase().replace(['_', ' '], "-");
        if label.contains("review") {
            PaperType::Review
        } else if label.contains("proceedings") || label.contains("conference") {
            PaperType::Conference
        } else if label == "book-chapter" {
            PaperType::BookChapter
        } else if label == "dissertation" || label == "thesis" {
            PaperType::Thesis
        } else if label == "preprint" || label == "posted-content" {
            PaperType::Preprint
        } else if matches!(label.as_str(), "article" | "journal-article" | "journalarticle") {
            PaperType::Article
        } else {
            PaperType::Unknown
        }
    }

    /// Classify a list of labels; a review label wins over the rest
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let types: Vec<PaperType> = labels.into_iter().map(PaperType::from_label).collect();
        if types.contains(&PaperType::Review) {
            return PaperType::Review;
        }
        types
            .into_iter()
            .find(|t| *t != PaperType::Unknown)
            .unwrap_or_default()
    }
}

impl fmt::Display for PaperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown paper type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown paper type: {0}")]
pub struct UnknownPaperType(pub String);

impl FromStr for PaperType {
    type Err = UnknownPaperType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "article" => Ok(PaperType::Article),
            "review" => Ok(PaperType::Review),
            "preprint" => Ok(PaperType::Preprint),
            "conference" => Ok(PaperType::Conference),
            "book_chapter" => Ok(PaperType::BookChapter),
            "thesis" => Ok(PaperType::Thesis),
            "unknown" => Ok(PaperType::Unknown),
            other => Err(UnknownPaperType(other.to_string())),
        }
    }
}

/// A paper author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliation: None,
        }
    }

    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        let affiliation = affiliation.into();
        if !affiliation.trim().is_empty() {
            self.affiliation = Some(affiliation);
        }
        self
    }
}

/// A research paper in canonical form.
///
/// Every provider's response is translated into this shape. A paper that
/// was found by more than one provider carries all of them in `sources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Paper title
    pub title: String,

    /// Authors, in byline order
    #[serde(default)]
    pub authors: Vec<Author>,

    /// Publication year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    /// Journal, conference or repository name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,

    /// Abstract text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#abstract: Option<String>,

    /// Digital Object Identifier, lowercase and without URL prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    /// PubMed identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,

    /// arXiv identifier, without version suffix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,

    /// Citation count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<u32>,

    /// Publication type
    #[serde(default)]
    pub paper_type: PaperType,

    /// Paper page URL
    #[serde(default)]
    pub url: String,

    /// Direct PDF URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,

    /// Providers that returned this paper
    #[serde(default)]
    pub sources: BTreeSet<ProviderId>,

    /// Score assigned by the ranker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl Paper {
    /// Create a new paper with the required fields
    pub fn new(title: impl Into<String>, source: ProviderId) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(source);
        Self {
            title: title.into(),
            authors: Vec::new(),
            year: None,
            venue: None,
            r#abstract: None,
            doi: None,
            pmid: None,
            arxiv_id: None,
            citations: None,
            paper_type: PaperType::Unknown,
            url: String::new(),
            pdf_url: None,
            sources,
            relevance_score: None,
        }
    }

    /// Whether any strong identifier (DOI, PMID, arXiv ID) is present
    pub fn has_identifier(&self) -> bool {
        self.doi.is_some() || self.pmid.is_some() || self.arxiv_id.is_some()
    }

    /// Author names joined for display
    pub fn author_names(&self) -> String {
        self.authors
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Merge another record of the same paper into this one.
    ///
    /// Sources are unioned. Every other field is only taken from `other`
    /// when it is empty here, so the first-seen record keeps its values.
    pub fn absorb(&mut self, other: Paper) {
        self.sources.extend(other.sources);

        if self.authors.is_empty() {
            self.authors = other.authors;
        }
        fill(&mut self.year, other.year);
        fill(&mut self.venue, other.venue);
        fill(&mut self.r#abstract, other.r#abstract);
        fill(&mut self.doi, other.doi);
        fill(&mut self.pmid, other.pmid);
        fill(&mut self.arxiv_id, other.arxiv_id);
        fill(&mut self.citations, other.citations);
        fill(&mut self.pdf_url, other.pdf_url);
        if self.paper_type == PaperType::Unknown {
            self.paper_type = other.paper_type;
        }
        if self.url.is_empty() {
            self.url = other.url;
        }
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Normalize a DOI: trim, strip resolver/`doi:` prefixes, lowercase.
///
/// Returns `None` for input that does not look like a DOI.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
        "doi:",
    ] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
            break;
        }
    }
    if doi.starts_with("10.") && doi.contains('/') {
        Some(doi)
    } else {
        None
    }
}

/// Normalize an arXiv identifier: strip URL and `arxiv:` prefixes and the version suffix.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_lowercase();
    let id = match id.find("/abs/").or_else(|| id.find("/pdf/")) {
        Some(pos) => id[pos + 5..].trim_end_matches(".pdf").to_string(),
        None => id,
    };
    let id = id.strip_prefix("arxiv:").unwrap_or(&id);

    let trimmed = match id.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < id.len()
                && id[pos + 1..].chars().all(|c| c.is_ascii_digit()) =>
        {
            &id[..pos]
        }
        _ => id,
    };

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Builder for creating Paper instances
#[derive(Debug, Clone)]
pub struct PaperBuilder {
    paper: Paper,
}

impl PaperBuilder {
    /// Create a new builder with required fields
    pub fn new(title: impl Into<String>, source: ProviderId) -> Self {
        Self {
            paper: Paper::new(title, source),
        }
    }

    pub fn authors(mut self, authors: Vec<Author>) -> Self {
        self.paper.authors = authors;
        self
    }

    pub fn author(mut self, author: Author) -> Self {
        self.paper.authors.push(author);
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.paper.year = Some(year);
        self
    }

    pub fn year_opt(mut self, year: Option<i32>) -> Self {
        self.paper.year = year;
        self
    }

    pub fn venue(mut self, venue: impl Into<String>) -> Self {
        self.paper.venue = non_empty(venue.into());
        self
    }

    pub fn abstract_text(mut self, text: impl Into<String>) -> Self {
        self.paper.r#abstract = non_empty(text.into());
        self
    }

    /// Set the DOI; invalid values are dropped
    pub fn doi(mut self, doi: impl AsRef<str>) -> Self {
        self.paper.doi = normalize_doi(doi.as_ref());
        self
    }

    pub fn pmid(mut self, pmid: impl Into<String>) -> Self {
        self.paper.pmid = non_empty(pmid.into());
        self
    }

    pub fn arxiv_id(mut self, id: impl AsRef<str>) -> Self {
        self.paper.arxiv_id = normalize_arxiv_id(id.as_ref());
        self
    }

    pub fn citations(mut self, count: u32) -> Self {
        self.paper.citations = Some(count);
        self
    }

    pub fn paper_type(mut self, paper_type: PaperType) -> Self {
        self.paper.paper_type = paper_type;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.paper.url = url.into();
        self
    }

    pub fn pdf_url(mut self, url: impl Into<String>) -> Self {
        self.paper.pdf_url = non_empty(url.into());
        self
    }

    pub fn build(self) -> Paper {
        self.paper
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == s.len() {
        Some(s)
    } else {
        Some(trimmed.to_string())
    }
}
