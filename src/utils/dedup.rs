//! Deduplication of papers across providers.
//!
//! Two passes over the merged list, which arrives in provider-dispatch
//! order:
//!
//! 1. Identifier pass: a paper whose normalized DOI matches an earlier
//!    record is merged into it; otherwise PMID, then arXiv ID are tried.
//!    A merge can link records that were kept apart so far (one had only
//!    the PMID, the other only the DOI); those are folded together too, so
//!    no two survivors share an identifier unless they disagree on another.
//! 2. Title pass: surviving records are compared pairwise by normalized
//!    title similarity. Similar titles with the same year (or a missing
//!    year on either side) are merged.
//!
//! Merging keeps the earlier record's values, backfills its empty fields
//! from the later one and unions the provider sets. Records whose
//! identifiers disagree are never merged.

use std::collections::HashMap;
use strsim::normalized_levenshtein;

use crate::models::Paper;

/// Default title similarity threshold
pub const DEFAULT_TITLE_THRESHOLD: f64 = 0.92;

/// Merges records that represent the same paper
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    title_threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            title_threshold: DEFAULT_TITLE_THRESHOLD,
        }
    }
}

impl Deduplicator {
    pub fn new(title_threshold: f64) -> Self {
        Self { title_threshold }
    }

    pub fn title_threshold(&self) -> f64 {
        self.title_threshold
    }

    /// Deduplicate, preserving first-seen order
    pub fn dedup(&self, papers: Vec<Paper>) -> Vec<Paper> {
        let merged = merge_by_identifier(papers);
        self.merge_by_title(merged)
    }

    /// Whether two records look like the same paper by title and year
    pub fn titles_match(&self, a: &Paper, b: &Paper) -> bool {
        if let (Some(ya), Some(yb)) = (a.year, b.year) {
            if ya != yb {
                return false;
            }
        }

        let ta = normalize_title(&a.title);
        let tb = normalize_title(&b.title);
        if ta.is_empty() || tb.is_empty() {
            return false;
        }
        ta == tb || normalized_levenshtein(&ta, &tb) >= self.title_threshold
    }

    fn merge_by_title(&self, papers: Vec<Paper>) -> Vec<Paper> {
        let mut slots: Vec<Option<Paper>> = papers.into_iter().map(Some).collect();

        for i in 0..slots.len() {
            for j in (i + 1)..slots.len() {
                let is_duplicate = match (&slots[i], &slots[j]) {
                    (Some(a), Some(b)) => !identifiers_conflict(a, b) && self.titles_match(a, b),
                    _ => false,
                };
                if !is_duplicate {
                    continue;
                }
                if let Some(later) = slots[j].take() {
                    if let Some(earlier) = slots[i].as_mut() {
                        tracing::trace!(title = %earlier.title, "Merging by title");
                        earlier.absorb(later);
                    }
                }
            }
        }

        slots.into_iter().flatten().collect()
    }
}

/// Identifier indexes over the records kept so far.
///
/// A key can list several slots: records that share one identifier but
/// disagree on another are both kept.
#[derive(Debug, Default)]
struct IdIndex {
    doi: HashMap<String, Vec<usize>>,
    pmid: HashMap<String, Vec<usize>>,
    arxiv: HashMap<String, Vec<usize>>,
}

impl IdIndex {
    /// Slots indexed under any of the paper's identifiers, DOI first
    fn linked(&self, paper: &Paper) -> Vec<usize> {
        fn lookup<'a>(map: &'a HashMap<String, Vec<usize>>, key: &Option<String>) -> &'a [usize] {
            key.as_ref()
                .and_then(|k| map.get(k))
                .map(Vec::as_slice)
                .unwrap_or_default()
        }
        lookup(&self.doi, &paper.doi)
            .iter()
            .chain(lookup(&self.pmid, &paper.pmid))
            .chain(lookup(&self.arxiv, &paper.arxiv_id))
            .copied()
            .collect()
    }

    fn register(&mut self, paper: &Paper, idx: usize) {
        let keys = [
            (&mut self.doi, &paper.doi),
            (&mut self.pmid, &paper.pmid),
            (&mut self.arxiv, &paper.arxiv_id),
        ];
        for (map, key) in keys {
            if let Some(key) = key {
                let slots = map.entry(key.clone()).or_default();
                if !slots.contains(&idx) {
                    slots.push(idx);
                }
            }
        }
    }
}

/// First live, non-conflicting slot other than `skip` sharing an
/// identifier with `paper`
fn find_linked(
    index: &IdIndex,
    slots: &[Option<Paper>],
    paper: &Paper,
    skip: Option<usize>,
) -> Option<usize> {
    index.linked(paper).into_iter().find(|&idx| {
        Some(idx) != skip
            && slots[idx]
                .as_ref()
                .is_some_and(|kept| !identifiers_conflict(kept, paper))
    })
}

fn merge_by_identifier(papers: Vec<Paper>) -> Vec<Paper> {
    let mut slots: Vec<Option<Paper>> = Vec::with_capacity(papers.len());
    let mut index = IdIndex::default();

    for paper in papers {
        let Some(mut survivor) = find_linked(&index, &slots, &paper, None) else {
            index.register(&paper, slots.len());
            slots.push(Some(paper));
            continue;
        };
        if let Some(kept) = slots[survivor].as_mut() {
            kept.absorb(paper);
        }

        // The merged record may now share an identifier with another
        // survivor; fold those in as well, always into the earlier slot
        while let Some(other) = slots[survivor]
            .as_ref()
            .and_then(|current| find_linked(&index, &slots, current, Some(survivor)))
        {
            let (keep, drop) = (survivor.min(other), survivor.max(other));
            if let Some(later) = slots[drop].take() {
                if let Some(earlier) = slots[keep].as_mut() {
                    tracing::trace!(title = %earlier.title, "Merging linked records");
                    earlier.absorb(later);
                }
            }
            survivor = keep;
        }

        if let Some(kept) = &slots[survivor] {
            index.register(kept, survivor);
        }
    }

    slots.into_iter().flatten().collect()
}

/// Two records carry the same kind of identifier with different values
fn identifiers_conflict(a: &Paper, b: &Paper) -> bool {
    fn differ(x: &Option<String>, y: &Option<String>) -> bool {
        matches!((x, y), (Some(x), Some(y)) if x != y)
    }
    differ(&a.doi, &b.doi) || differ(&a.pmid, &b.pmid) || differ(&a.arxiv_id, &b.arxiv_id)
}

/// Normalize a title for comparison: case-folded, punctuation removed,
/// whitespace collapsed
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaperBuilder, ProviderId};
    use std::collections::BTreeSet;

    fn paper(title: &str, source: ProviderId) -> PaperBuilder {
        PaperBuilder::new(title, source)
    }

    fn sources(p: &Paper) -> BTreeSet<ProviderId> {
        p.sources.clone()
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Deep Learning: for X!  "), "deep learning for x");
        assert_eq!(normalize_title("COVID-19   vaccines"), "covid 19 vaccines");
        assert_eq!(normalize_title("..."), "");
    }

    #[test]
    fn test_same_doi_merges_with_union_of_sources() {
        let papers = vec![
            paper("Gene editing with CRISPR", ProviderId::Arxiv)
                .doi("10.1/A")
                .build(),
            paper("Gene Editing With CRISPR-Cas9", ProviderId::PubMed)
                .doi("https://doi.org/10.1/a")
                .pmid("111")
                .build(),
        ];

        let out = Deduplicator::default().dedup(papers);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Gene editing with CRISPR");
        assert_eq!(out[0].pmid.as_deref(), Some("111"));
        assert_eq!(
            sources(&out[0]),
            BTreeSet::from([ProviderId::Arxiv, ProviderId::PubMed])
        );
    }

    #[test]
    fn test_pmid_then_arxiv_fallback() {
        let papers = vec![
            paper("One", ProviderId::PubMed).pmid("42").build(),
            paper("One (preprint)", ProviderId::SemanticScholar)
                .pmid("42")
                .arxiv_id("2101.00001")
                .build(),
            paper("Uno", ProviderId::Arxiv).arxiv_id("2101.00001v2").build(),
        ];

        let out = Deduplicator::default().dedup(papers);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sources.len(), 3);
        assert_eq!(out[0].arxiv_id.as_deref(), Some("2101.00001"));
    }

    #[test]
    fn test_case_and_punctuation_only_titles_merge() {
        let papers = vec![
            paper("Deep Learning for X", ProviderId::Crossref)
                .year(2020)
                .build(),
            paper("deep learning for x.", ProviderId::Scholar)
                .year(2020)
                .build(),
        ];

        let out = Deduplicator::default().dedup(papers);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Deep Learning for X");
    }

    #[test]
    fn test_title_match_requires_compatible_year() {
        let dedup = Deduplicator::default();
        let a = paper("Deep Learning for X", ProviderId::Crossref)
            .year(2020)
            .build();
        let b = paper("Deep Learning for X", ProviderId::Scholar)
            .year(2021)
            .build();
        let c = paper("Deep Learning for X", ProviderId::Scholar).build();

        assert!(!dedup.titles_match(&a, &b));
        assert!(dedup.titles_match(&a, &c));
    }

    #[test]
    fn test_different_dois_never_merge() {
        let papers = vec![
            paper("Attention Is All You Need", ProviderId::Crossref)
                .doi("10.1/x")
                .build(),
            paper("Attention Is All You Need", ProviderId::OpenAlex)
                .doi("10.1/y")
                .build(),
        ];
        assert_eq!(Deduplicator::default().dedup(papers).len(), 2);
    }

    #[test]
    fn test_dissimilar_titles_stand() {
        let papers = vec![
            paper("CRISPR Techniques", ProviderId::PubMed).build(),
            paper("CRISPR screening in cancer", ProviderId::Arxiv).build(),
        ];
        assert_eq!(Deduplicator::default().dedup(papers).len(), 2);
    }

    #[test]
    fn test_threshold_is_tunable() {
        let a = paper("Graph neural networks for molecules", ProviderId::Arxiv).build();
        let b = paper("Graph neural network for molecule", ProviderId::OpenAlex).build();
        assert!(Deduplicator::new(0.9).titles_match(&a, &b));
        assert!(!Deduplicator::new(0.99).titles_match(&a, &b));
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let papers = vec![
            paper("Deep Learning for X", ProviderId::Arxiv).year(2020).build(),
            paper("Deep learning for X!", ProviderId::PubMed).build(),
            paper("Protein folding with transformers", ProviderId::PubMed)
                .year(2020)
                .build(),
            paper("Something else", ProviderId::Crossref).doi("10.2/z").build(),
            paper("Something else entirely", ProviderId::OpenAlex)
                .doi("10.2/z")
                .build(),
            paper("protein folding with Transformers.", ProviderId::Scholar)
                .year(2020)
                .build(),
        ];

        let dedup = Deduplicator::default();
        let once = dedup.dedup(papers);
        let twice = dedup.dedup(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_record_linking_two_survivors_merges_them() {
        let papers = vec![
            paper("Prime editing", ProviderId::PubMed).pmid("77").build(),
            paper("Prime editing in mice", ProviderId::Crossref)
                .doi("10.1/x")
                .build(),
            paper("Prime editing (OpenAlex)", ProviderId::OpenAlex)
                .doi("10.1/x")
                .pmid("77")
                .build(),
        ];

        let dedup = Deduplicator::default();
        let once = dedup.dedup(papers);
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].title, "Prime editing");
        assert_eq!(once[0].doi.as_deref(), Some("10.1/x"));
        assert_eq!(once[0].pmid.as_deref(), Some("77"));
        assert_eq!(
            sources(&once[0]),
            BTreeSet::from([ProviderId::PubMed, ProviderId::Crossref, ProviderId::OpenAlex])
        );
        assert_eq!(dedup.dedup(once.clone()), once);
    }

    #[test]
    fn test_identifier_chain_collapses_to_earliest_record() {
        // a(arxiv) b(pmid) c(doi), then one record carrying all three
        let papers = vec![
            paper("First title", ProviderId::Arxiv).arxiv_id("2101.00001").build(),
            paper("Second title", ProviderId::PubMed).pmid("5").build(),
            paper("Third title", ProviderId::Crossref).doi("10.5/c").build(),
            paper("Fourth title", ProviderId::SemanticScholar)
                .doi("10.5/c")
                .pmid("5")
                .arxiv_id("2101.00001")
                .build(),
            paper("Fifth title", ProviderId::OpenAlex).pmid("5").build(),
        ];

        let out = Deduplicator::default().dedup(papers);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "First title");
        assert_eq!(out[0].sources.len(), 5);
    }

    #[test]
    fn test_conflicting_identifiers_stay_apart_in_chains() {
        let papers = vec![
            paper("Alpha study", ProviderId::PubMed).pmid("1").build(),
            paper("Beta study", ProviderId::PubMed).pmid("2").doi("10.9/b").build(),
            // shares the DOI with beta but carries alpha's PMID
            paper("Gamma study", ProviderId::Crossref).doi("10.9/b").pmid("1").build(),
        ];

        let dedup = Deduplicator::default();
        let once = dedup.dedup(papers);
        // gamma joins alpha by PMID; beta disagrees on PMID with both
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].title, "Alpha study");
        assert_eq!(once[0].doi.as_deref(), Some("10.9/b"));
        assert_eq!(once[1].title, "Beta study");
        assert_eq!(dedup.dedup(once.clone()), once);
    }

    #[test]
    fn test_dedup_is_idempotent_in_any_input_order() {
        let base = vec![
            paper("Deep Learning for X", ProviderId::Arxiv).year(2020).build(),
            paper("Deep learning for X!", ProviderId::PubMed).pmid("9").build(),
            paper("Unrelated survey", ProviderId::Crossref).doi("10.3/u").build(),
            paper("Deep learning for x", ProviderId::OpenAlex)
                .doi("10.3/d")
                .pmid("9")
                .build(),
            paper("Another thing", ProviderId::Scholar).doi("10.3/d").build(),
            paper("Unrelated survey.", ProviderId::SemanticScholar).build(),
        ];

        let dedup = Deduplicator::default();
        for shift in 0..base.len() {
            for reverse in [false, true] {
                let mut papers = base.clone();
                papers.rotate_left(shift);
                if reverse {
                    papers.reverse();
                }

                let once = dedup.dedup(papers);
                let twice = dedup.dedup(once.clone());
                assert_eq!(once, twice, "shift {} reverse {}", shift, reverse);
            }
        }
    }
}
