use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use reqwest::Client;
use tracing::{debug, info};

use crate::error::{Result, VodError};
use crate::types::{HotData, HotParams, HotUpstreamResponse};

const HOT_SOURCE: &str = "hot";

/// Client for the trending-titles endpoint.
#[derive(Debug, Clone)]
pub struct HotListClient {
    client: Client,
    base_url: String,
}

impl HotListClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch(&self, params: &HotParams) -> Result<HotData> {
        let url = format!("{}/j/search_subjects", self.base_url);
        let query = [
            ("type", params.kind.as_str()),
            ("tag", params.tag.as_str()),
            ("sort", params.sort.as_str()),
            ("page_limit", params.page_limit.as_str()),
            ("page_start", params.page_start.as_str()),
        ];
        debug!(url = %url, ?params, "requesting hot list");

        let client = self.client.clone();
        let response: HotUpstreamResponse = retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(200))
                .with_max_interval(Duration::from_secs(1))
                .with_max_elapsed_time(Some(Duration::from_secs(3)))
                .build(),
            || async {
                let resp = client
                    .get(&url)
                    .query(&query)
                    .header("User-Agent", "Mozilla/5.0")
                    .header("Accept", "application/json")
                    .send()
                    .await
                    .map_err(|e| backoff::Error::transient(VodError::unreachable(HOT_SOURCE, e)))?;
                let status = resp.status();
                if !status.is_success() {
                    let err = VodError::invalid(HOT_SOURCE, format!("status {}", status));
                    // 5xx transient, others permanent
                    return Err(if status.is_server_error() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    });
                }
                resp.json::<HotUpstreamResponse>()
                    .await
                    .map_err(|e| backoff::Error::permanent(VodError::invalid(HOT_SOURCE, e)))
            },
        )
        .await?;

        let subjects = response.subjects.unwrap_or_default();
        info!(subjects = subjects.len(), "hot list fetched");
        Ok(HotData {
            total: subjects.len(),
            list: subjects,
        })
    }
}
