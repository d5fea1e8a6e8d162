use reqwest::Client;
use tracing::{debug, error};

use crate::error::{Result, VodError};
use crate::types::{Episode, ProviderEnvelope, ProviderSource, VideoItem};

/// What a JSON provider is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderQuery {
    Keyword { keyword: String, page: u32 },
    Ids(u64),
}

impl ProviderQuery {
    /// Maps the query onto the provider's parameter names.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            ProviderQuery::Keyword { keyword, page } => vec![
                ("ac", "videolist".to_string()),
                ("wd", keyword.clone()),
                ("pg", page.to_string()),
            ],
            ProviderQuery::Ids(id) => vec![("ac", "videolist".to_string()), ("ids", id.to_string())],
        }
    }
}

/// Client for providers that expose the common JSON list API.
#[derive(Debug, Clone)]
pub struct StructuredClient {
    client: Client,
}

impl StructuredClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, source: &ProviderSource, query: &ProviderQuery) -> Result<Vec<VideoItem>> {
        let start = std::time::Instant::now();
        let api = source
            .api
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| VodError::invalid(&source.key, "source has no api endpoint"))?;

        debug!(source = %source.key, api, ?query, "requesting provider");

        let resp = self
            .client
            .get(api)
            .query(&query.params())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                error!(source = %source.key, error = %e, "provider request failed");
                VodError::unreachable(&source.key, e)
            })?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| VodError::unreachable(&source.key, e))?;

        if !status.is_success() {
            error!(source = %source.key, %status, "provider returned error status");
            return Err(VodError::invalid(&source.key, format!("status {}", status)));
        }

        let envelope: ProviderEnvelope = serde_json::from_slice(&body).map_err(|e| {
            error!(source = %source.key, error = %e, "failed to decode provider response");
            VodError::invalid(&source.key, e)
        })?;

        let items: Vec<VideoItem> = envelope
            .list
            .unwrap_or_default()
            .into_iter()
            .map(|item| normalize(item, source))
            .collect();

        debug!(
            source = %source.key,
            items = items.len(),
            total = envelope.total,
            duration_ms = start.elapsed().as_millis() as u64,
            "provider request finished"
        );
        Ok(items)
    }
}

fn normalize(mut item: VideoItem, source: &ProviderSource) -> VideoItem {
    item.source_key = source.key.clone();
    item.source_name = source.name.clone();
    item.episodes = parse_play_url(&item.vod_play_url);
    item
}

/// Expands a packed `title$url#title$url` field. Only the first play group
/// (groups are separated by `$$$`) is used; indices count non-empty segments.
pub fn parse_play_url(raw: &str) -> Vec<Episode> {
    let group = raw
        .split("$$$")
        .find(|g| !g.trim().is_empty())
        .unwrap_or_default();

    group
        .split('#')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .enumerate()
        .map(|(index, segment)| match segment.split_once('$') {
            Some((title, url)) => Episode {
                index,
                title: title.trim().to_string(),
                url: url.trim().to_string(),
            },
            None => Episode {
                index,
                title: String::new(),
                url: segment.to_string(),
            },
        })
        .collect()
}
