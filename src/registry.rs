use std::collections::BTreeMap;

use crate::types::ProviderSource;

/// Read-only snapshot of the configured providers, keyed by source key.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    sources: BTreeMap<String, ProviderSource>,
}

impl ProviderRegistry {
    pub fn new(sources: BTreeMap<String, ProviderSource>) -> Self {
        let sources = sources
            .into_iter()
            .map(|(key, mut source)| {
                source.key = key.clone();
                (key, source)
            })
            .collect();
        Self { sources }
    }

    pub fn get(&self, key: &str) -> Option<&ProviderSource> {
        self.sources.get(key)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &ProviderSource> {
        self.sources.values()
    }

    /// Sources a keyword search may query, in key order.
    pub fn eligible(&self, include_adult: bool) -> impl Iterator<Item = &ProviderSource> {
        self.all().filter(move |s| include_adult || !s.adult)
    }

    /// The first registered HTML-only source, if any.
    pub fn scraped(&self) -> Option<&ProviderSource> {
        self.all().find(|s| s.is_scraped())
    }
}

impl FromIterator<ProviderSource> for ProviderRegistry {
    fn from_iter<I: IntoIterator<Item = ProviderSource>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|s| (s.key.clone(), s)).collect())
    }
}
