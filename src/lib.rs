pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod hot;
pub mod http;
pub mod keys;
pub mod omo_scraper;
pub mod registry;
pub mod service;
pub mod structured;
pub mod types;

use anyhow::Context;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use error::{Result, VodError};
pub use types::*;

use crate::aggregator::Aggregator;
use crate::cache::ExpiringCache;
use crate::config::AppConfig;
use crate::hot::HotListClient;
use crate::omo_scraper::OmoScraper;
use crate::registry::ProviderRegistry;
use crate::service::VodService;
use crate::structured::StructuredClient;

const CERT_DIR: &str = "/app/certificates";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: VodService,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("api_version", &self.config.server.api_version)
            .field("sources", &self.config.sources.len())
            .finish()
    }
}

impl AppState {
    /// Builds the single cache, the provider clients and the service.
    pub fn new(config: AppConfig, http_client: reqwest::Client) -> anyhow::Result<Self> {
        let registry = Arc::new(ProviderRegistry::new(config.sources.clone()));

        let scraper = match registry.scraped() {
            Some(source) => {
                info!(source = %source.key, base_url = %config.scraper.base_url, "scraped provider enabled");
                Some(OmoScraper::new(&config.scraper, source)?)
            }
            None => {
                warn!("No scraped provider registered");
                None
            }
        };

        let aggregator = Aggregator::new(registry, StructuredClient::new(http_client.clone()), scraper);
        let hot = HotListClient::new(http_client, config.hot.base_url.clone());
        let cache = Arc::new(ExpiringCache::new(config.cache.ttl()));
        let service = VodService::new(cache, aggregator, hot);

        Ok(Self {
            config: Arc::new(config),
            service,
        })
    }
}

pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (compatible; VodAggregator/1.0)");

    if let Ok(ca_cert_name) = env::var("TLS_CA_CERT") {
        let cert_path = Path::new(CERT_DIR).join(&ca_cert_name);
        let pem = std::fs::read(&cert_path)
            .with_context(|| format!("Failed to read TLS CA certificate at {}", cert_path.display()))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .with_context(|| format!("Failed to parse TLS CA certificate at {}", cert_path.display()))?;
        info!("Loaded TLS CA certificate from {}", cert_path.display());
        builder = builder.add_root_certificate(cert);
    }

    builder.build().context("Failed to build HTTP client")
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-process upstreams for tests.

    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::{Html, IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use crate::config::ScraperConfig;
    use crate::omo_scraper::OmoScraper;
    use crate::types::ProviderSource;

    pub async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// A URL nothing listens on.
    pub async fn unreachable_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/api", addr)
    }

    pub fn structured_source(key: &str, api: &str) -> ProviderSource {
        ProviderSource {
            key: key.to_string(),
            name: key.to_uppercase(),
            api: Some(api.to_string()),
            detail: None,
            adult: false,
        }
    }

    pub fn provider_json(items: &[(u64, &str, &str)]) -> Json<Value> {
        let list: Vec<Value> = items
            .iter()
            .map(|(id, name, play)| {
                json!({"vod_id": id, "vod_name": name, "type_name": "动漫", "vod_play_url": play})
            })
            .collect();
        Json(json!({
            "code": 1, "msg": "数据列表", "page": 1, "pagecount": 1,
            "limit": "20", "total": list.len(), "list": list
        }))
    }

    /// JSON providers under `/a`, `/b`, `/x` and a broken one under `/bad`.
    /// `/a` answers `ids=1` with one title and any other id with nothing.
    pub async fn structured_fixture() -> String {
        async fn provider_a(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            match q.get("ids").map(String::as_str) {
                Some("1") => provider_json(&[(1, "Alpha A", "EP1$https://cdn/a/1.m3u8")]),
                Some(_) => provider_json(&[]),
                None => provider_json(&[
                    (1, "Alpha A", "EP1$https://cdn/a/1.m3u8#EP2$https://cdn/a/2.m3u8"),
                    (2, "Alpha Empty", ""),
                ]),
            }
        }

        let app = Router::new()
            .route("/a", get(provider_a))
            .route("/b", get(|| async { provider_json(&[(3, "Alpha B", "HD$https://cdn/b/3.m3u8")]) }))
            .route("/x", get(|| async { provider_json(&[(5, "Alpha X", "HD$https://cdn/x/5.m3u8")]) }))
            .route("/bad", get(|| async { "<html>502 Bad Gateway</html>" }));
        format!("http://{}", serve(app).await)
    }

    pub fn search_html(titles: &[(u64, &str)]) -> String {
        let cards: String = titles
            .iter()
            .map(|(id, name)| {
                format!(
                    r#"<div class="module-card-item">
  <div class="module-card-item-class">动漫</div>
  <a class="module-card-item-poster" href="/vod/detail/id/{id}.html">
    <div class="module-item-pic"><img data-original="/img/{id}.jpg" src="/lazy.gif"></div>
  </a>
  <div class="module-item-note">更新至3集</div>
  <div class="module-card-item-info">
    <div class="module-card-item-title"><a href="/vod/detail/id/{id}.html"><strong>{name}</strong></a></div>
  </div>
</div>"#
                )
            })
            .collect();
        format!("<html><body>{}</body></html>", cards)
    }

    /// Detail page with a trailer list first and the canonical list second.
    /// With zero episodes the page has no list at all.
    pub fn detail_html(id: u64, name: &str, episodes: usize) -> String {
        let lists = if episodes == 0 {
            String::new()
        } else {
            let links: String = (1..=episodes)
                .map(|nid| {
                    format!(
                        r#"<a class="module-play-list-link" href="/vod/play/id/{id}/sid/8/nid/{nid}.html"><span>第{nid:02}集</span></a>"#
                    )
                })
                .collect();
            format!(
                r#"<div class="module-list"><div class="module-play-list"><a class="module-play-list-link" href="/vod/play/id/{id}/sid/1/nid/1.html"><span>预告</span></a></div></div>
<div class="module-list"><div class="module-play-list">{links}</div></div>"#
            )
        };
        format!(
            r#"<html><body><div class="module-info-heading"><h1>{name}</h1></div>{lists}</body></html>"#
        )
    }

    pub fn play_html(url: &str, name: &str) -> String {
        let escaped = url.replace('/', r"\/");
        format!(
            r#"<html><body><script type="text/javascript">var vod_name='{name}';</script><script type="text/javascript">var player_aaaa={{"flag":"play","encrypt":0,"url":"{escaped}","link_next":""}}</script></body></html>"#
        )
    }

    #[derive(Clone)]
    struct OmoSite {
        titles: Arc<Vec<(u64, String, usize)>>,
        hits: Arc<AtomicUsize>,
    }

    impl OmoSite {
        fn title(&self, file: &str) -> Option<&(u64, String, usize)> {
            let id: u64 = file.strip_suffix(".html")?.parse().ok()?;
            self.titles.iter().find(|(t, _, _)| *t == id)
        }
    }

    pub struct OmoFixture {
        pub base_url: String,
        hits: Arc<AtomicUsize>,
    }

    impl OmoFixture {
        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    /// Serves search, detail and play pages for `(id, name, episodes)`.
    /// Play pages of a title named "NoMarker" lack the player script.
    pub async fn omo_fixture(titles: Vec<(u64, &str, usize)>) -> OmoFixture {
        async fn search(State(site): State<OmoSite>) -> Html<String> {
            site.hits.fetch_add(1, Ordering::SeqCst);
            let titles: Vec<(u64, &str)> = site.titles.iter().map(|(id, n, _)| (*id, n.as_str())).collect();
            Html(search_html(&titles))
        }

        async fn detail(State(site): State<OmoSite>, Path(file): Path<String>) -> Response {
            site.hits.fetch_add(1, Ordering::SeqCst);
            match site.title(&file) {
                Some((id, name, episodes)) => Html(detail_html(*id, name, *episodes)).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }

        async fn play(
            State(site): State<OmoSite>,
            Path((id, _sid, file)): Path<(String, String, String)>,
        ) -> Response {
            site.hits.fetch_add(1, Ordering::SeqCst);
            let nid = file.trim_end_matches(".html").to_string();
            match site.title(&format!("{}.html", id)) {
                Some((_, name, _)) if name == "NoMarker" => {
                    Html("<html><body><script>var x=1;</script></body></html>".to_string()).into_response()
                }
                Some((id, name, _)) => {
                    Html(play_html(&format!("https://cdn.example/{}/{}.m3u8", id, nid), name)).into_response()
                }
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let site = OmoSite {
            titles: Arc::new(titles.into_iter().map(|(id, n, e)| (id, n.to_string(), e)).collect()),
            hits: Arc::clone(&hits),
        };
        let app = Router::new()
            .route("/vod/search/page/1/wd/*keyword", get(search))
            .route("/vod/detail/id/:file", get(detail))
            .route("/vod/play/id/:id/sid/:sid/nid/:file", get(play))
            .with_state(site);
        OmoFixture {
            base_url: format!("http://{}", serve(app).await),
            hits,
        }
    }

    /// Scraper pointed at a fixture, without the politeness delay.
    pub fn omo_scraper(base_url: &str) -> OmoScraper {
        omo_scraper_with(base_url, |_| {})
    }

    /// Like [`omo_scraper`], with `tune` applied to the crawl settings.
    pub fn omo_scraper_with(base_url: &str, tune: impl FnOnce(&mut ScraperConfig)) -> OmoScraper {
        let mut config = ScraperConfig {
            base_url: base_url.to_string(),
            allowed_domains: Vec::new(),
            delay_ms: 0,
            ..Default::default()
        };
        tune(&mut config);
        let source = ProviderSource {
            key: "omo".into(),
            name: "Omo".into(),
            ..Default::default()
        };
        OmoScraper::new(&config, &source).unwrap()
    }

    #[derive(Clone)]
    struct BusySite {
        cards: usize,
        hold: Duration,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    pub struct BusyFixture {
        pub base_url: String,
        peak: Arc<AtomicUsize>,
    }

    impl BusyFixture {
        /// Most detail requests the site ever served at the same time.
        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    /// Search page with `cards` titles whose detail pages take `hold` to answer.
    pub async fn busy_omo_fixture(cards: usize, hold: Duration) -> BusyFixture {
        async fn search(State(site): State<BusySite>) -> Html<String> {
            let titles: Vec<(u64, &str)> = (1..=site.cards as u64).map(|id| (id, "Busy")).collect();
            Html(search_html(&titles))
        }

        async fn detail(State(site): State<BusySite>, Path(file): Path<String>) -> Html<String> {
            let now = site.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            site.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(site.hold).await;
            site.in_flight.fetch_sub(1, Ordering::SeqCst);
            let id = file.trim_end_matches(".html").parse().unwrap_or_default();
            Html(detail_html(id, "Busy", 1))
        }

        let peak = Arc::new(AtomicUsize::new(0));
        let site = BusySite {
            cards,
            hold,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        };
        let app = Router::new()
            .route("/vod/search/page/1/wd/*keyword", get(search))
            .route("/vod/detail/id/:file", get(detail))
            .with_state(site);
        BusyFixture {
            base_url: format!("http://{}", serve(app).await),
            peak,
        }
    }

    /// A site whose search page takes `hold` to answer.
    pub async fn slow_omo_fixture(hold: Duration) -> String {
        let app = Router::new().route(
            "/vod/search/page/1/wd/*keyword",
            get(move || async move {
                tokio::time::sleep(hold).await;
                Html(search_html(&[(1, "Slow")]))
            }),
        );
        format!("http://{}", serve(app).await)
    }

    pub struct HotFixture {
        pub base_url: String,
        hits: Arc<AtomicUsize>,
    }

    impl HotFixture {
        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    /// Trending endpoint answering two subjects titled `<type>-<tag>-<n>`.
    pub async fn hot_fixture() -> HotFixture {
        async fn subjects(
            State(hits): State<Arc<AtomicUsize>>,
            Query(q): Query<HashMap<String, String>>,
        ) -> Json<Value> {
            hits.fetch_add(1, Ordering::SeqCst);
            let kind = q.get("type").cloned().unwrap_or_default();
            let tag = q.get("tag").cloned().unwrap_or_default();
            let subjects: Vec<Value> = (0..2)
                .map(|n| json!({"title": format!("{}-{}-{}", kind, tag, n), "rate": "8.1", "id": n.to_string()}))
                .collect();
            Json(json!({ "subjects": subjects }))
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/j/search_subjects", get(subjects))
            .with_state(Arc::clone(&hits));
        HotFixture {
            base_url: format!("http://{}", serve(app).await),
            hits,
        }
    }
}
