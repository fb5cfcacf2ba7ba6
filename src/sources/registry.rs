//! Registry of the provider adapters available to the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    ArxivSource, CrossrefSource, GoogleScholarSource, OpenAlexSource, PubMedSource,
    SemanticScholarSource, Source,
};
use crate::config::Config;
use crate::models::ProviderId;
use crate::utils::HttpClient;

/// Explicit provider id -> adapter mapping, built once at startup
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<ProviderId, Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the adapters enabled in `config`, sharing one HTTP client
    pub fn from_config(config: &Config, client: Arc<HttpClient>) -> Self {
        let mut registry = Self::new();

        for id in config.enabled_providers() {
            let settings = config.provider(id);
            let client = Arc::clone(&client);

            let source: Arc<dyn Source> = match id {
                ProviderId::PubMed => {
                    let mut source = PubMedSource::new(client).with_api_key(settings.api_key);
                    if let Some(url) = settings.base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                ProviderId::Arxiv => {
                    let mut source = ArxivSource::new(client);
                    if let Some(url) = settings.base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                ProviderId::Crossref => {
                    let mut source = CrossrefSource::new(client).with_mailto(settings.mailto);
                    if let Some(url) = settings.base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                ProviderId::Scholar => {
                    let mut source = GoogleScholarSource::new(client);
                    if let Some(url) = settings.base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                ProviderId::SemanticScholar => {
                    let mut source =
                        SemanticScholarSource::new(client).with_api_key(settings.api_key);
                    if let Some(url) = settings.base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                ProviderId::OpenAlex => {
                    let mut source = OpenAlexSource::new(client).with_mailto(settings.mailto);
                    if let Some(url) = settings.base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
            };

            registry.register(source);
        }

        tracing::debug!("Registered {} providers", registry.len());
        registry
    }

    /// Register a source, replacing any previous one with the same id
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.id(), source);
    }

    /// Get a source by id
    pub fn get(&self, id: ProviderId) -> Option<&Arc<dyn Source>> {
        self.sources.get(&id)
    }

    /// Get all registered sources
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.values()
    }

    /// Registered provider ids, in [`ProviderId`] order
    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.sources.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn has(&self, id: ProviderId) -> bool {
        self.sources.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::sources::MockSource;

    fn client() -> Arc<HttpClient> {
        Arc::new(HttpClient::new().unwrap())
    }

    #[test]
    fn test_from_default_config() {
        let registry = SourceRegistry::from_config(&Config::default(), client());

        assert_eq!(registry.len(), 5);
        assert!(!registry.has(ProviderId::Scholar));
        assert_eq!(
            registry.ids(),
            vec![
                ProviderId::PubMed,
                ProviderId::Arxiv,
                ProviderId::Crossref,
                ProviderId::SemanticScholar,
                ProviderId::OpenAlex,
            ]
        );
        assert_eq!(registry.get(ProviderId::Arxiv).unwrap().id(), ProviderId::Arxiv);
    }

    #[test]
    fn test_from_config_respects_enabled() {
        let mut config = Config::default();
        config.providers.insert(
            ProviderId::Scholar,
            ProviderSettings {
                enabled: Some(true),
                ..Default::default()
            },
        );
        config.providers.insert(
            ProviderId::OpenAlex,
            ProviderSettings {
                enabled: Some(false),
                ..Default::default()
            },
        );

        let registry = SourceRegistry::from_config(&config, client());
        assert!(registry.has(ProviderId::Scholar));
        assert!(!registry.has(ProviderId::OpenAlex));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = SourceRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(MockSource::new(ProviderId::Arxiv)));
        registry.register(Arc::new(MockSource::new(ProviderId::Arxiv)));
        registry.register(Arc::new(MockSource::new(ProviderId::PubMed)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.all().count(), 2);
        assert!(registry.get(ProviderId::Crossref).is_none());
    }
}
