use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::{Result, VodError};
use crate::types::{Episode, ProviderSource, VideoItem};

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Literal that marks the inline player script on a play page.
const PLAYER_MARKER: &str = "player_aaaa";
const DETAIL_PATH: &str = "/vod/detail/id/";
const MAX_REDIRECTS: usize = 5;

/// One result card of the search page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCard {
    pub vod_id: u64,
    pub name: String,
    pub type_name: String,
    pub note: String,
    pub pic: String,
}

/// One entry of a detail page's episode list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeAnchor {
    pub index: usize,
    pub title: String,
    pub href: String,
}

/// Crawler for the provider that only publishes HTML.
///
/// Search lists cards, then fetches every card's detail page under a
/// bounded fan-out to read its episode titles. Playback URLs are only
/// resolved on demand, one episode at a time.
#[derive(Debug, Clone)]
pub struct OmoScraper {
    client: Client,
    base: Url,
    allowed_domains: Arc<Vec<String>>,
    limiter: Arc<Semaphore>,
    delay: Duration,
    crawl_timeout: Duration,
    source_key: String,
    source_name: String,
}

impl OmoScraper {
    pub fn new(config: &ScraperConfig, source: &ProviderSource) -> anyhow::Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid scraper base_url '{}'", config.base_url))?;

        let mut allowed_domains: Vec<String> = config
            .allowed_domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if allowed_domains.is_empty() {
            allowed_domains.extend(base.host_str().map(str::to_ascii_lowercase));
        }
        let allowed_domains = Arc::new(allowed_domains);

        // Every redirect hop goes through the same domain check as the first request.
        let redirect_domains = Arc::clone(&allowed_domains);
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            let host = host_of(attempt.url());
            if domain_allowed(&redirect_domains, &host) {
                attempt.follow()
            } else {
                attempt.error(VodError::DomainNotAllowed(host))
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .redirect(redirect_policy)
            .build()
            .context("Failed to build scraper HTTP client")?;

        Ok(Self {
            client,
            base,
            allowed_domains,
            limiter: Arc::new(Semaphore::new(config.parallelism.max(1))),
            delay: Duration::from_millis(config.delay_ms),
            crawl_timeout: Duration::from_secs(config.crawl_timeout_secs.max(1)),
            source_key: source.key.clone(),
            source_name: source.name.clone(),
        })
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Lists titles for `keyword` with their episode titles filled in.
    /// Titles whose episode list could not be read come back with none.
    pub async fn search(&self, keyword: &str) -> Result<Vec<VideoItem>> {
        let start = std::time::Instant::now();
        debug!(source = %self.source_key, keyword, "scraped search started");

        let items = tokio::time::timeout(self.crawl_timeout, self.crawl(keyword))
            .await
            .map_err(|_| {
                VodError::unreachable(
                    &self.source_key,
                    format!("crawl exceeded {}s", self.crawl_timeout.as_secs()),
                )
            })??;

        info!(
            source = %self.source_key,
            keyword,
            items = items.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "scraped search finished"
        );
        Ok(items)
    }

    async fn crawl(&self, keyword: &str) -> Result<Vec<VideoItem>> {
        let search_url = self.search_url(keyword)?;
        let html = self.fetch_html(&search_url).await?;
        let cards = parse_search_cards(&html);
        debug!(source = %self.source_key, cards = cards.len(), "search page parsed");

        let lists = join_all(cards.iter().map(|card| self.episode_list(card.vod_id))).await;

        Ok(cards
            .into_iter()
            .zip(lists)
            .map(|(card, list)| {
                let episodes = match list {
                    Ok(episodes) => episodes,
                    Err(e) => {
                        warn!(source = %self.source_key, vod_id = card.vod_id, error = %e, "episode list unavailable");
                        Vec::new()
                    }
                };
                self.item_from_card(card, episodes)
            })
            .collect())
    }

    /// Episode titles of one title, without playback URLs.
    pub async fn episode_list(&self, vod_id: u64) -> Result<Vec<Episode>> {
        let (_, anchors) = self.detail_page(vod_id).await?;
        Ok(anchors
            .into_iter()
            .map(|a| Episode {
                index: a.index,
                title: a.title,
                url: String::new(),
            })
            .collect())
    }

    /// Resolves the playable URL of one episode. The returned item lists
    /// every episode; only the requested one carries a URL.
    pub async fn resolve_playback(&self, vod_id: u64, index: usize) -> Result<VideoItem> {
        let start = std::time::Instant::now();
        debug!(source = %self.source_key, vod_id, index, "playback resolution started");

        let (detail_name, anchors) = self.detail_page(vod_id).await?;
        let Some(anchor) = anchors.get(index) else {
            return Err(VodError::EpisodeIndexOutOfRange {
                index,
                len: anchors.len(),
            });
        };

        let play_url = self
            .base
            .join(&anchor.href)
            .map_err(|e| VodError::invalid(&self.source_key, format!("bad episode link '{}': {}", anchor.href, e)))?;
        let play_html = self.fetch_html(&play_url).await?;
        let stream_url = extract_play_url(&play_html)
            .ok_or_else(|| VodError::ScrapeMarkerNotFound(format!("\"url\" in {} script", PLAYER_MARKER)))?;

        let name = detail_name
            .or_else(|| extract_script_vod_name(&play_html))
            .ok_or_else(|| VodError::ScrapeMarkerNotFound("title".to_string()))?;

        let episodes = anchors
            .into_iter()
            .enumerate()
            .map(|(pos, a)| Episode {
                index: a.index,
                title: a.title,
                url: if pos == index { stream_url.clone() } else { String::new() },
            })
            .collect();

        debug!(
            source = %self.source_key,
            vod_id,
            index,
            play_url = %stream_url,
            duration_ms = start.elapsed().as_millis() as u64,
            "playback resolved"
        );

        Ok(VideoItem {
            source_key: self.source_key.clone(),
            source_name: self.source_name.clone(),
            vod_id,
            vod_name: name,
            episodes,
            ..Default::default()
        })
    }

    /// Fetch failures and empty lists are reported the same way.
    async fn detail_page(&self, vod_id: u64) -> Result<(Option<String>, Vec<EpisodeAnchor>)> {
        let unavailable = |reason: String| VodError::EpisodeListUnavailable { vod_id, reason };

        let url = self
            .base
            .join(&format!("{}{}.html", DETAIL_PATH, vod_id))
            .map_err(|e| unavailable(e.to_string()))?;
        let html = self.fetch_html(&url).await.map_err(|e| unavailable(e.to_string()))?;

        let anchors = parse_episode_anchors(&html);
        if anchors.is_empty() {
            return Err(unavailable("no episode list on detail page".to_string()));
        }
        Ok((parse_detail_name(&html), anchors))
    }

    fn search_url(&self, keyword: &str) -> Result<Url> {
        let encoded = utf8_percent_encode(keyword.trim(), NON_ALPHANUMERIC).to_string();
        self.base
            .join(&format!("/vod/search/page/1/wd/{}.html", encoded))
            .map_err(|e| VodError::invalid(&self.source_key, e))
    }

    fn item_from_card(&self, card: SearchCard, episodes: Vec<Episode>) -> VideoItem {
        VideoItem {
            source_key: self.source_key.clone(),
            source_name: self.source_name.clone(),
            vod_id: card.vod_id,
            vod_name: card.name,
            type_name: card.type_name,
            vod_serial: card.note,
            vod_pic: card.pic,
            episodes,
            ..Default::default()
        }
    }

    fn check_domain(&self, url: &Url) -> Result<()> {
        let host = host_of(url);
        if domain_allowed(&self.allowed_domains, &host) {
            Ok(())
        } else {
            Err(VodError::DomainNotAllowed(host))
        }
    }

    /// One polite GET: domain check, shared parallelism ceiling, fixed delay.
    async fn fetch_html(&self, url: &Url) -> Result<String> {
        self.check_domain(url)?;

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| VodError::unreachable(&self.source_key, e))?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        debug!(source = %self.source_key, url = %url, "fetching page");
        let response = self
            .client
            .get(url.clone())
            .header("User-Agent", random_user_agent())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| match refused_redirect(&e) {
                Some(host) => {
                    warn!(source = %self.source_key, url = %url, host = %host, "redirect to disallowed domain refused");
                    VodError::DomainNotAllowed(host)
                }
                None => VodError::unreachable(&self.source_key, e),
            })?;
        self.check_domain(response.url())?;

        let status = response.status();
        if !status.is_success() {
            return Err(VodError::invalid(&self.source_key, format!("status {} for {}", status, url)));
        }
        response
            .text()
            .await
            .map_err(|e| VodError::unreachable(&self.source_key, e))
    }
}

fn host_of(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

/// Exact host or any subdomain of an allowed entry.
fn domain_allowed(allowed: &[String], host: &str) -> bool {
    allowed
        .iter()
        .any(|d| host == d.as_str() || host.ends_with(&format!(".{}", d)))
}

/// The host a redirect was refused for, if that is why the request failed.
fn refused_redirect(err: &reqwest::Error) -> Option<String> {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(VodError::DomainNotAllowed(host)) = inner.downcast_ref::<VodError>() {
            return Some(host.clone());
        }
        source = inner.source();
    }
    None
}

fn random_user_agent() -> &'static str {
    let index = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[index]
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn child_text(el: &ElementRef, selector: &str) -> String {
    Selector::parse(selector)
        .ok()
        .and_then(|sel| el.select(&sel).next().map(|child| element_text(&child)))
        .unwrap_or_default()
}

fn child_attr(el: &ElementRef, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    el.select(&sel)
        .next()
        .and_then(|child| child.value().attr(attr))
        .map(|v| v.trim().to_string())
}

/// Reads the numeric id out of a `/vod/detail/id/<id>.html` link.
fn parse_detail_id(href: &str) -> Option<u64> {
    let start = href.find(DETAIL_PATH)? + DETAIL_PATH.len();
    href[start..].strip_suffix(".html")?.parse().ok()
}

/// Parses result cards; cards whose id cannot be read are skipped.
pub fn parse_search_cards(html: &str) -> Vec<SearchCard> {
    let document = Html::parse_document(html);
    let mut cards = Vec::new();

    let Ok(card_selector) = Selector::parse("div.module-card-item") else {
        return cards;
    };
    for card in document.select(&card_selector) {
        let href = child_attr(&card, "a.module-card-item-poster", "href").unwrap_or_default();
        let Some(vod_id) = parse_detail_id(&href) else {
            warn!(href = %href, "skipping search card with unreadable id");
            continue;
        };
        let pic = child_attr(&card, "div.module-item-pic img", "data-original")
            .or_else(|| child_attr(&card, "div.module-item-pic img", "src"))
            .unwrap_or_default();

        cards.push(SearchCard {
            vod_id,
            name: child_text(&card, "div.module-card-item-title a strong"),
            type_name: child_text(&card, "div.module-card-item-class"),
            note: child_text(&card, "div.module-item-note"),
            pic,
        });
    }
    cards
}

/// Parses the canonical (second) episode list of a detail page. A page
/// with a single list uses that one. Indices come from the one-based
/// `nid` token of each link.
pub fn parse_episode_anchors(html: &str) -> Vec<EpisodeAnchor> {
    let document = Html::parse_document(html);
    let (Ok(list_selector), Ok(link_selector), Ok(span_selector)) = (
        Selector::parse(".module-list"),
        Selector::parse("a.module-play-list-link"),
        Selector::parse("span"),
    ) else {
        return Vec::new();
    };

    let blocks: Vec<ElementRef> = document
        .select(&list_selector)
        .filter(|block| block.select(&link_selector).next().is_some())
        .collect();
    let Some(block) = blocks.get(1).or(blocks.first()) else {
        return Vec::new();
    };

    block
        .select(&link_selector)
        .enumerate()
        .filter_map(|(pos, link)| {
            let href = link.value().attr("href")?.trim().to_string();
            let title = link
                .select(&span_selector)
                .next()
                .map(|span| element_text(&span))
                .unwrap_or_else(|| element_text(&link));
            let index = parse_nid(&href).unwrap_or(pos);
            Some(EpisodeAnchor { index, title, href })
        })
        .collect()
}

/// `/nid/<n>.html` is one-based on the site; returns the zero-based index.
fn parse_nid(href: &str) -> Option<usize> {
    let (_, tail) = href.split_once("/nid/")?;
    let nid: usize = tail.strip_suffix(".html").unwrap_or(tail).parse().ok()?;
    nid.checked_sub(1)
}

fn parse_detail_name(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    ["div.module-info-heading h1", "h1"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| element_text(&el))
                .filter(|t| !t.is_empty())
        })
}

fn script_texts(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("script") else {
        return Vec::new();
    };
    document.select(&sel).map(|s| s.text().collect()).collect()
}

/// Pulls the stream URL out of the `player_aaaa` script, unescaping `\/`.
pub fn extract_play_url(html: &str) -> Option<String> {
    let re = Regex::new(r#""url"\s*:\s*"([^"]+)""#).ok()?;
    script_texts(html)
        .iter()
        .filter(|script| script.contains(PLAYER_MARKER))
        .find_map(|script| re.captures(script).map(|caps| caps[1].replace(r"\/", "/")))
        .filter(|url| !url.is_empty())
}

fn extract_script_vod_name(html: &str) -> Option<String> {
    let re = Regex::new(r"var vod_name\s*=\s*'([^']+)'").ok()?;
    script_texts(html)
        .iter()
        .find_map(|script| re.captures(script).map(|caps| caps[1].trim().to_string()))
}
