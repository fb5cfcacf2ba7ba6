//! Scriptable source for testing the orchestrator without network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{Paper, ProviderId, SearchQuery};
use crate::sources::{Source, SourceError};

type MockResponse = Result<Vec<Paper>, SourceError>;

/// A mock source that plays back queued responses.
///
/// Each call pops the next queued response; once the queue is empty the
/// fallback response is returned on every call (an empty list by default).
#[derive(Debug)]
pub struct MockSource {
    id: ProviderId,
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Mutex<MockResponse>,
    delay: Duration,
    calls: AtomicU32,
}

impl MockSource {
    /// Create a mock that returns no papers.
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            responses: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(Vec::new())),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Create a mock that always returns `papers`.
    pub fn returning(id: ProviderId, papers: Vec<Paper>) -> Self {
        let source = Self::new(id);
        source.set_fallback(Ok(papers));
        source
    }

    /// Create a mock that always fails with `error`.
    pub fn failing(id: ProviderId, error: SourceError) -> Self {
        let source = Self::new(id);
        source.set_fallback(Err(error));
        source
    }

    /// Sleep for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a one-shot response ahead of the fallback.
    pub fn push_response(&self, response: MockResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    /// Set the response returned once the queue is drained.
    pub fn set_fallback(&self, response: MockResponse) {
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = response;
    }

    /// Number of `search` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        let queued = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        queued.unwrap_or_else(|| self.fallback.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[async_trait]
impl Source for MockSource {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut papers = self.next_response()?;
        papers.truncate(query.max_results);
        Ok(papers)
    }

    fn supports_lookup(&self) -> bool {
        true
    }

    /// Finds a paper by DOI, PMID or arXiv id in the fallback response
    async fn get_by_id(&self, id: &str) -> Result<Paper, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let papers = self.next_response()?;
        papers
            .into_iter()
            .find(|p| {
                [&p.doi, &p.pmid, &p.arxiv_id]
                    .into_iter()
                    .any(|known| known.as_deref() == Some(id))
            })
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

/// Helper to create a paper found by `source`.
pub fn make_paper(title: &str, source: ProviderId) -> Paper {
    Paper::new(title, source)
}
