use serde::{Deserialize, Deserializer, Serialize};

/// One playable unit of a title. `url` stays empty until resolved.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Episode {
    #[serde(rename = "episode_index")]
    pub index: usize,
    #[serde(rename = "episode_title")]
    pub title: String,
    pub url: String,
}

/// One title from one provider, in the shape the JSON providers speak.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct VideoItem {
    #[serde(default)]
    pub source_key: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub episodes: Vec<Episode>,

    #[serde(default, deserialize_with = "lenient_u64")]
    pub vod_id: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub type_id: u64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub type_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_sub: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_year: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_area: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_lang: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_remarks: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_serial: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_class: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_actor: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_director: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_blurb: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_score: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_douban_score: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_pic: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_time: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub vod_status: u64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_play_from: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vod_play_url: String,
}

/// Raw list envelope returned by a JSON provider.
#[derive(Debug, Deserialize)]
pub struct ProviderEnvelope {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub code: u64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub page: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub pagecount: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub limit: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
    /// Some providers send `null` instead of an empty list.
    #[serde(default)]
    pub list: Option<Vec<VideoItem>>,
}

/// A configured upstream. Sources without an `api` endpoint are scraped.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProviderSource {
    #[serde(default)]
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub adult: bool,
}

impl ProviderSource {
    pub fn is_scraped(&self) -> bool {
        self.api.as_deref().map_or(true, |api| api.trim().is_empty())
    }
}

// Keyword search

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchData {
    pub list: Vec<VideoItem>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub success_count: usize,
    pub failed_count: usize,
    pub total_sources: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SearchExtra {
    pub keyword: String,
    pub page: u32,
    #[serde(flatten)]
    pub stats: SearchStats,
}

// Id lookup

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DetailExtra {
    pub source_key: String,
    pub vod_id: u64,
    pub episode_index: usize,
}

// Hot list

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct HotParams {
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    pub sort: String,
    pub page_limit: String,
    pub page_start: String,
}

impl Default for HotParams {
    fn default() -> Self {
        Self {
            kind: "movie".to_string(),
            tag: "热门".to_string(),
            sort: "recommend".to_string(),
            page_limit: "16".to_string(),
            page_start: "0".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HotSubject {
    #[serde(default)]
    pub episodes_info: String,
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub cover_x: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub playable: bool,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub cover_y: i64,
    #[serde(default)]
    pub is_new: bool,
}

#[derive(Debug, Deserialize)]
pub struct HotUpstreamResponse {
    #[serde(default)]
    pub subjects: Option<Vec<HotSubject>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HotData {
    pub list: Vec<HotSubject>,
    pub total: usize,
}

/// Metadata returned next to the data of each query kind.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ResponseExtra {
    Search(SearchExtra),
    Detail(DetailExtra),
    Hot(HotParams),
}

/// A finalized answer as it is stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPayload {
    Search(SearchData, SearchExtra),
    Detail(Box<VideoItem>, DetailExtra),
    Hot(HotData, HotParams),
}

/// Response envelope shared by every API route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<ResponseExtra>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, extra: ResponseExtra) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
            extra: Some(extra),
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            extra: None,
        }
    }
}

// Providers disagree on whether numbers are quoted; accept both.

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    Text(String),
    Bool(bool),
    Null,
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or_default(),
        NumberOrString::Text(s) => s.trim().parse().unwrap_or_default(),
        NumberOrString::Bool(b) => u64::from(b),
        NumberOrString::Null => 0,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n.to_string(),
        NumberOrString::Text(s) => s,
        NumberOrString::Bool(b) => b.to_string(),
        NumberOrString::Null => String::new(),
    })
}
