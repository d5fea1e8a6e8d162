use std::sync::Arc;

use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::cache::ExpiringCache;
use crate::error::Result;
use crate::hot::HotListClient;
use crate::keys::{hot_key, id_key, search_key};
use crate::types::{
    CachedPayload, DetailExtra, HotData, HotParams, SearchData, SearchExtra, VideoItem,
};

/// Cache-aside front of the three query kinds.
#[derive(Debug, Clone)]
pub struct VodService {
    cache: Arc<ExpiringCache<CachedPayload>>,
    aggregator: Aggregator,
    hot: HotListClient,
}

impl VodService {
    pub fn new(cache: Arc<ExpiringCache<CachedPayload>>, aggregator: Aggregator, hot: HotListClient) -> Self {
        Self { cache, aggregator, hot }
    }

    pub fn cache(&self) -> &Arc<ExpiringCache<CachedPayload>> {
        &self.cache
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Keyword search across providers. Always answers; a result where every
    /// provider failed is returned but not cached.
    pub async fn search(&self, keyword: &str, page: Option<u32>, include_adult: bool) -> (SearchData, SearchExtra) {
        let page_no = page.unwrap_or(1);
        let key = search_key(keyword, page_no, include_adult);
        if let Some(CachedPayload::Search(data, extra)) = self.cache.get(&key).await {
            info!(keyword, page = page_no, "keyword search served from cache");
            return (data, extra);
        }

        let (list, stats) = self.aggregator.search_by_keyword(keyword, page, include_adult).await;
        let data = SearchData {
            total: list.len(),
            list,
        };
        let extra = SearchExtra {
            keyword: keyword.to_string(),
            page: page_no,
            stats,
        };

        if extra.stats.total_sources > 0 && extra.stats.success_count == 0 {
            debug!(keyword, page = page_no, "every provider failed; result not cached");
        } else {
            self.cache
                .set_for_class(key, CachedPayload::Search(data.clone(), extra.clone()))
                .await;
        }
        (data, extra)
    }

    /// Single-provider lookup. Failures are returned and never cached.
    pub async fn vod_detail(&self, source_key: &str, vod_id: u64, episode_index: usize) -> Result<(VideoItem, DetailExtra)> {
        let key = id_key(source_key, vod_id, episode_index);
        if let Some(CachedPayload::Detail(item, extra)) = self.cache.get(&key).await {
            info!(source_key, vod_id, "id lookup served from cache");
            return Ok((*item, extra));
        }

        let (item, extra) = self
            .aggregator
            .search_by_id(source_key, vod_id, episode_index)
            .await?;
        self.cache
            .set_for_class(key, CachedPayload::Detail(Box::new(item.clone()), extra.clone()))
            .await;
        Ok((item, extra))
    }

    pub async fn hot(&self, params: HotParams) -> Result<(HotData, HotParams)> {
        let key = hot_key(&params);
        if let Some(CachedPayload::Hot(data, extra)) = self.cache.get(&key).await {
            debug!(?params, "hot list served from cache");
            return Ok((data, extra));
        }

        let data = self.hot.fetch(&params).await?;
        self.cache
            .set_for_class(key, CachedPayload::Hot(data.clone(), params.clone()))
            .await;
        Ok((data, params))
    }
}
