use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::{Result, VodError};
use crate::omo_scraper::OmoScraper;
use crate::registry::ProviderRegistry;
use crate::structured::{ProviderQuery, StructuredClient};
use crate::types::{DetailExtra, ProviderSource, SearchStats, VideoItem};

/// Fans queries out to the configured providers and merges what comes back.
#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: Arc<ProviderRegistry>,
    structured: StructuredClient,
    scraper: Option<OmoScraper>,
}

struct ProviderOutcome {
    source_key: String,
    scraped: bool,
    result: Result<Vec<VideoItem>>,
}

impl Aggregator {
    pub fn new(registry: Arc<ProviderRegistry>, structured: StructuredClient, scraper: Option<OmoScraper>) -> Self {
        Self {
            registry,
            structured,
            scraper,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The scraper serving `source`, if `source` is the registered HTML-only one.
    fn scraper_for(&self, source: &ProviderSource) -> Option<&OmoScraper> {
        self.scraper
            .as_ref()
            .filter(|s| source.is_scraped() && s.source_key() == source.key)
    }

    fn eligible(&self, page: Option<u32>, include_adult: bool) -> Vec<&ProviderSource> {
        let first_page = matches!(page, None | Some(1));
        self.registry
            .eligible(include_adult)
            .filter(|s| !s.is_scraped() || (first_page && self.scraper_for(s).is_some()))
            .collect()
    }

    /// Queries every eligible provider concurrently and waits for all of them.
    /// Individual failures only count; the call itself never fails.
    pub async fn search_by_keyword(
        &self,
        keyword: &str,
        page: Option<u32>,
        include_adult: bool,
    ) -> (Vec<VideoItem>, SearchStats) {
        let start = std::time::Instant::now();
        let sources = self.eligible(page, include_adult);
        let total_sources = sources.len();
        info!(keyword, ?page, include_adult, sources = total_sources, "keyword search started");

        let mut keys = Vec::with_capacity(total_sources);
        let mut handles = Vec::with_capacity(total_sources);
        for source in sources {
            let keyword = keyword.to_string();
            let scraped = self.scraper_for(source).cloned();
            keys.push((source.key.clone(), scraped.is_some()));
            if let Some(scraper) = scraped {
                handles.push(tokio::spawn(async move { scraper.search(&keyword).await }));
            } else {
                let client = self.structured.clone();
                let source = source.clone();
                let query = ProviderQuery::Keyword {
                    keyword,
                    page: page.unwrap_or(1),
                };
                handles.push(tokio::spawn(async move { client.fetch(&source, &query).await }));
            }
        }

        let outcomes: Vec<ProviderOutcome> = keys
            .into_iter()
            .zip(join_all(handles).await)
            .map(|((source_key, scraped), joined)| {
                let result = joined.unwrap_or_else(|e| {
                    error!(source = %source_key, error = %e, "provider task failed to join");
                    Err(VodError::unreachable(&source_key, e))
                });
                ProviderOutcome {
                    source_key,
                    scraped,
                    result,
                }
            })
            .collect();

        let (items, mut stats) = merge(outcomes);
        stats.total_sources = total_sources;

        info!(
            keyword,
            ?page,
            success = stats.success_count,
            failed = stats.failed_count,
            total_items = items.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "keyword search finished"
        );
        (items, stats)
    }

    /// Looks one title up on exactly one provider.
    pub async fn search_by_id(
        &self,
        source_key: &str,
        vod_id: u64,
        episode_index: usize,
    ) -> Result<(VideoItem, DetailExtra)> {
        let start = std::time::Instant::now();
        info!(source_key, vod_id, episode_index, "id lookup started");

        let Some(source) = self.registry.get(source_key) else {
            warn!(source_key, vod_id, "unknown source key");
            return Err(VodError::ProviderNotFound(source_key.to_string()));
        };

        let result = if source.is_scraped() {
            match self.scraper_for(source) {
                Some(scraper) => scraper.resolve_playback(vod_id, episode_index).await.map(Some),
                None => Err(VodError::ProviderNotFound(source_key.to_string())),
            }
        } else {
            self.structured
                .fetch(source, &ProviderQuery::Ids(vod_id))
                .await
                .map(|items| items.into_iter().next())
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let item = match result {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(source_key, vod_id, duration_ms, "id lookup found nothing");
                return Err(VodError::NoResultsFound {
                    source_key: source_key.to_string(),
                    vod_id,
                });
            }
            Err(e) => {
                error!(source_key, vod_id, error = %e, duration_ms, "id lookup failed");
                return Err(e);
            }
        };

        info!(
            source_key,
            source_name = %source.name,
            vod_id,
            episodes = item.episodes.len(),
            duration_ms,
            "id lookup finished"
        );
        let extra = DetailExtra {
            source_key: source_key.to_string(),
            vod_id,
            episode_index,
        };
        Ok((item, extra))
    }
}

/// Counts outcomes, drops titles without episodes and puts scraped titles
/// first. Within each group the outcome order is kept.
fn merge(outcomes: Vec<ProviderOutcome>) -> (Vec<VideoItem>, SearchStats) {
    let mut stats = SearchStats::default();
    let mut scraped_items = Vec::new();
    let mut other_items = Vec::new();

    for outcome in outcomes {
        match outcome.result {
            Ok(items) => {
                stats.success_count += 1;
                let bucket = if outcome.scraped {
                    &mut scraped_items
                } else {
                    &mut other_items
                };
                bucket.extend(items.into_iter().filter(|item| !item.episodes.is_empty()));
            }
            Err(e) => {
                stats.failed_count += 1;
                warn!(source = %outcome.source_key, error = %e, "provider failed during fan-out");
            }
        }
    }

    scraped_items.extend(other_items);
    (scraped_items, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        omo_fixture, omo_scraper, omo_scraper_with, slow_omo_fixture, structured_fixture, structured_source,
        unreachable_url,
    };
    use std::time::Duration;
    use crate::types::Episode;
    use reqwest::Client;
    use tokio_test::{assert_err, assert_ok};

    fn item(source: &str, id: u64, episodes: usize) -> VideoItem {
        VideoItem {
            source_key: source.into(),
            vod_id: id,
            episodes: (0..episodes)
                .map(|index| Episode {
                    index,
                    title: format!("{}", index + 1),
                    url: String::new(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn outcome(key: &str, scraped: bool, result: Result<Vec<VideoItem>>) -> ProviderOutcome {
        ProviderOutcome {
            source_key: key.into(),
            scraped,
            result,
        }
    }

    #[test]
    fn test_merge_orders_filters_and_counts() {
        let outcomes = vec![
            outcome("a", false, Ok(vec![item("a", 1, 2), item("a", 2, 0)])),
            outcome("down", false, Err(VodError::unreachable("down", "refused"))),
            outcome("omo", true, Ok(vec![item("omo", 9, 1), item("omo", 10, 0)])),
            outcome("b", false, Ok(vec![item("b", 3, 1)])),
        ];
        let (items, stats) = merge(outcomes);

        let ids: Vec<(&str, u64)> = items.iter().map(|i| (i.source_key.as_str(), i.vod_id)).collect();
        assert_eq!(ids, vec![("omo", 9), ("a", 1), ("b", 3)]);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.failed_count, 1);
    }

    async fn aggregator_with_everything() -> (Aggregator, crate::test_support::OmoFixture) {
        let json = structured_fixture().await;
        let omo = omo_fixture(vec![(101, "Alpha", 2), (202, "Beta", 0)]).await;

        let registry: ProviderRegistry = vec![
            structured_source("a", &format!("{}/a", json)),
            structured_source("b", &format!("{}/b", json)),
            structured_source("bad", &format!("{}/bad", json)),
            structured_source("down", &unreachable_url().await),
            ProviderSource {
                adult: true,
                ..structured_source("x", &format!("{}/x", json))
            },
            ProviderSource {
                key: "omo".into(),
                name: "Omo".into(),
                ..Default::default()
            },
        ]
        .into_iter()
        .collect();

        let aggregator = Aggregator::new(
            Arc::new(registry),
            StructuredClient::new(Client::new()),
            Some(omo_scraper(&omo.base_url)),
        );
        (aggregator, omo)
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let (aggregator, _omo) = aggregator_with_everything().await;
        let (items, stats) = aggregator.search_by_keyword("alpha", None, false).await;

        // a, b, bad, down, omo are eligible; x is adult.
        assert_eq!(stats.total_sources, 5);
        assert_eq!(stats.failed_count, 2);
        assert_eq!(stats.success_count, 3);
        assert!(items.iter().all(|i| i.source_key != "bad" && i.source_key != "down"));
        assert!(items.iter().all(|i| !i.episodes.is_empty()));

        // Scraped titles first, then JSON providers in key order.
        let order: Vec<(&str, u64)> = items.iter().map(|i| (i.source_key.as_str(), i.vod_id)).collect();
        assert_eq!(order, vec![("omo", 101), ("a", 1), ("b", 3)]);
    }

    #[tokio::test]
    async fn test_adult_sources_need_opt_in() {
        let (aggregator, _omo) = aggregator_with_everything().await;
        let (items, stats) = aggregator.search_by_keyword("alpha", Some(1), true).await;
        assert_eq!(stats.total_sources, 6);
        assert!(items.iter().any(|i| i.source_key == "x"));
    }

    #[tokio::test]
    async fn test_deeper_pages_skip_scraped_provider() {
        let (aggregator, omo) = aggregator_with_everything().await;
        let (items, stats) = aggregator.search_by_keyword("alpha", Some(2), false).await;
        assert_eq!(stats.total_sources, 4);
        assert!(items.iter().all(|i| i.source_key != "omo"));
        assert_eq!(omo.hits(), 0);
    }

    #[tokio::test]
    async fn test_search_by_id_dispatch() {
        let (aggregator, _omo) = aggregator_with_everything().await;

        let (found, extra) = assert_ok!(aggregator.search_by_id("a", 1, 0).await);
        assert_eq!(found.vod_id, 1);
        assert_eq!(found.source_key, "a");
        assert_eq!(extra.source_key, "a");

        let (played, _) = assert_ok!(aggregator.search_by_id("omo", 101, 1).await);
        assert_eq!(played.episodes[1].url, "https://cdn.example/101/2.m3u8");
    }

    #[tokio::test]
    async fn test_search_by_id_errors() {
        let (aggregator, _omo) = aggregator_with_everything().await;

        let err = assert_err!(aggregator.search_by_id("bogus", 123, 0).await);
        assert!(matches!(err, VodError::ProviderNotFound(ref key) if key == "bogus"));

        let err = assert_err!(aggregator.search_by_id("a", 999, 0).await);
        assert!(matches!(err, VodError::NoResultsFound { vod_id: 999, .. }));
        assert!(err.is_not_found());

        let err = assert_err!(aggregator.search_by_id("down", 1, 0).await);
        assert!(matches!(err, VodError::ProviderUnreachable { .. }));

        let err = assert_err!(aggregator.search_by_id("omo", 101, 7).await);
        assert!(matches!(err, VodError::EpisodeIndexOutOfRange { index: 7, len: 2 }));
    }

    #[tokio::test]
    async fn test_crawl_timeout_counts_as_one_failure() {
        let json = structured_fixture().await;
        let slow = slow_omo_fixture(Duration::from_secs(3)).await;

        let registry: ProviderRegistry = vec![
            structured_source("a", &format!("{}/a", json)),
            ProviderSource {
                key: "omo".into(),
                name: "Omo".into(),
                ..Default::default()
            },
        ]
        .into_iter()
        .collect();
        let scraper = omo_scraper_with(&slow, |c| c.crawl_timeout_secs = 1);
        let aggregator = Aggregator::new(Arc::new(registry), StructuredClient::new(Client::new()), Some(scraper));

        let (items, stats) = aggregator.search_by_keyword("alpha", None, false).await;
        assert_eq!(stats.total_sources, 2);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.success_count, 1);
        let order: Vec<(&str, u64)> = items.iter().map(|i| (i.source_key.as_str(), i.vod_id)).collect();
        assert_eq!(order, vec![("a", 1)]);
    }
}
