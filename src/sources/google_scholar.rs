//! Google Scholar provider (HTML scraping).
//!
//! Google Scholar has no public API. This adapter parses the results page,
//! so it is disabled unless explicitly enabled in configuration. Bot
//! detection (captcha pages, HTTP 403) is reported as rate limiting.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::{Arc, OnceLock};

use crate::models::{Author, Paper, PaperBuilder, ProviderId, SearchQuery};
use crate::sources::{Source, SourceError};
use crate::utils::{clean_text, HttpClient};

pub const GOOGLE_SCHOLAR_URL: &str = "https://scholar.google.com/scholar";
/// Results per page Scholar will serve
const SCHOLAR_MAX_RESULTS: usize = 20;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Google Scholar provider
#[derive(Debug, Clone)]
pub struct GoogleScholarSource {
    client: Arc<HttpClient>,
    base_url: String,
}

impl GoogleScholarSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: GOOGLE_SCHOLAR_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Query text with `author:` / `source:` operators for the filters
    fn query_text(query: &SearchQuery) -> String {
        let mut text = query.text.trim().to_string();
        for (operator, names) in [("author", &query.authors), ("source", &query.venues)] {
            if names.is_empty() {
                continue;
            }
            let terms: Vec<String> = names
                .iter()
                .map(|n| format!("{}:\"{}\"", operator, n))
                .collect();
            text.push_str(&format!(" ({})", terms.join(" OR ")));
        }
        text
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        let mut url = format!(
            "{}?hl=en&q={}&num={}",
            self.base_url,
            urlencoding::encode(&Self::query_text(query)),
            query.max_results.min(SCHOLAR_MAX_RESULTS)
        );
        if let Some(range) = query.year_range {
            url.push_str(&format!("&as_ylo={}&as_yhi={}", range.start, range.end));
        }
        url
    }

    /// Whether the page is a bot-detection interstitial
    fn is_blocked(html: &str) -> bool {
        html.contains("gs_captcha")
            || html.contains("captcha-form")
            || html.contains("unusual traffic")
    }

    fn parse_results(html: &str) -> Result<Vec<Paper>, SourceError> {
        if Self::is_blocked(html) {
            return Err(SourceError::RateLimited {
                retry_after: None,
                message: "Google Scholar bot detection page".to_string(),
            });
        }

        let selector = |s: &str| {
            Selector::parse(s)
                .map_err(|e| SourceError::Parse(format!("invalid selector {}: {:?}", s, e)))
        };
        let body_sel = selector("div.gs_ri")?;

        let document = Html::parse_document(html);
        let mut papers = Vec::new();

        for body in document.select(&body_sel) {
            // The PDF side link lives in the enclosing gs_r container
            let container = body.parent().and_then(ElementRef::wrap).unwrap_or(body);
            if let Some(paper) = Self::parse_result(container, body) {
                papers.push(paper);
            }
        }

        Ok(papers)
    }

    fn parse_result(result: ElementRef<'_>, body: ElementRef<'_>) -> Option<Paper> {
        let title_sel = Selector::parse("h3.gs_rt").ok()?;
        let link_sel = Selector::parse("a").ok()?;
        let meta_sel = Selector::parse("div.gs_a").ok()?;
        let snippet_sel = Selector::parse("div.gs_rs").ok()?;
        let footer_sel = Selector::parse("div.gs_fl a").ok()?;
        let pdf_sel = Selector::parse("div.gs_or_ggsm a, div.gs_ggs a").ok()?;

        let heading = body.select(&title_sel).next()?;
        let link = heading.select(&link_sel).next();
        let title_source = link.unwrap_or(heading);
        let title = clean_text(&strip_markers(&title_source.text().collect::<String>()));
        if title.is_empty() {
            return None;
        }
        let url = link
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default()
            .to_string();

        let meta = body
            .select(&meta_sel)
            .next()
            .map(|m| clean_text(&m.text().collect::<String>()))
            .unwrap_or_default();
        let (authors, venue, year) = parse_meta_line(&meta);

        let snippet = body
            .select(&snippet_sel)
            .next()
            .map(|s| clean_text(&s.text().collect::<String>()))
            .unwrap_or_default();

        let citations = body
            .select(&footer_sel)
            .filter_map(|a| {
                let text = a.text().collect::<String>();
                text.trim()
                    .strip_prefix("Cited by ")
                    .and_then(|n| n.trim().parse::<u32>().ok())
            })
            .next();

        let pdf_url = result
            .select(&pdf_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default()
            .to_string();

        let mut builder = PaperBuilder::new(title, ProviderId::Scholar)
            .authors(authors)
            .year_opt(year)
            .venue(venue)
            .abstract_text(snippet)
            .url(url)
            .pdf_url(pdf_url);
        if let Some(count) = citations {
            builder = builder.citations(count);
        }
        Some(builder.build())
    }
}

/// Drop Scholar's "[PDF]" / "[HTML]" / "[CITATION]" prefixes
fn strip_markers(title: &str) -> String {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    match MARKER.get_or_init(|| Regex::new(r"^\s*(\[[A-Z]+\]\s*)+").ok()) {
        Some(re) => re.replace(title, "").into_owned(),
        None => title.to_string(),
    }
}

/// Split the "authors - venue, year - host" line
fn parse_meta_line(meta: &str) -> (Vec<Author>, String, Option<i32>) {
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();

    let mut parts = meta.split(" - ");
    let authors = parts
        .next()
        .unwrap_or_default()
        .split(',')
        .map(|a| a.trim().trim_end_matches('…').trim())
        .filter(|a| !a.is_empty())
        .map(Author::new)
        .collect();

    let publication = parts.next().unwrap_or_default();
    let year = YEAR
        .get_or_init(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").ok())
        .as_ref()
        .and_then(|re| re.find_iter(publication).last())
        .and_then(|m| m.as_str().parse().ok());

    let venue = match publication.rsplit_once(',') {
        Some((venue, tail)) if tail.trim().parse::<i32>().is_ok() => venue.trim(),
        _ if year.is_some() && publication.trim().parse::<i32>().is_ok() => "",
        _ => publication.trim(),
    }
    .trim_end_matches('…')
    .trim()
    .to_string();

    (authors, venue, year)
}

#[async_trait]
impl Source for GoogleScholarSource {
    fn id(&self) -> ProviderId {
        ProviderId::Scholar
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError> {
        let request = self
            .client
            .get(&self.search_url(query))
            .header("User-Agent", BROWSER_USER_AGENT)
            .header("Accept-Language", "en-US,en;q=0.9");

        let html = match self.client.fetch_text(request).await {
            Err(SourceError::Http { status: 403 }) => {
                return Err(SourceError::RateLimited {
                    retry_after: None,
                    message: "Google Scholar refused the request (HTTP 403)".to_string(),
                })
            }
            other => other?,
        };

        let mut papers = Self::parse_results(&html)?;
        // as_ylo/as_yhi is advisory; the year parsed from the meta line decides
        papers.retain(|p| query.accepts_year(p.year));
        papers.truncate(query.max_results);

        tracing::debug!("Google Scholar returned {} papers", papers.len());
        Ok(papers)
    }
}
