//! # litsearch
//!
//! Multi-source literature search. A single query is fanned out to several
//! bibliographic providers concurrently; their results are normalized into one
//! [`Paper`] shape, deduplicated across sources and ranked.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Core data structures (Paper, SearchQuery, SearchResult, ...)
//! - [`sources`]: Provider adapters behind the [`Source`] trait, plus the [`SourceRegistry`]
//! - [`utils`]: HTTP client, rate limiting, retry/backoff, deduplication and ranking
//! - [`orchestrator`]: Per-query fan-out, deadline handling and merging
//! - [`config`]: Configuration management

pub mod config;
pub mod models;
pub mod orchestrator;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use models::{Paper, SearchQuery, SearchResult};
pub use orchestrator::Orchestrator;
pub use sources::{Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
