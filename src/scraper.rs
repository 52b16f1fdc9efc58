use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{CarDocument, Preview};
use crate::font::GlyphMap;
use crate::parser::{detail, list};

pub const SOURCE: &str = "che168";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

static FONT_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"url\('//(k2\.autoimg\.cn/.*?\.ttf)'\)").unwrap());

/// Extraction failure kinds; callers decide between skip-and-continue,
/// abort-this-unit, and escalate based on the variant.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// Bot challenge on a list page; the page is abandoned for this pass.
    #[error("bot challenge detected")]
    Blocked,
    /// Fetch failed before any parsing happened.
    #[error("fetch failed: {0}")]
    Transport(String),
    /// A field the record cannot exist without.
    #[error("required field missing: {0}")]
    MissingField(&'static str),
}

pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub body: String,
}

/// Detail pass outcome: a full record, or the untouched preview when the
/// page could not be fetched at all.
pub enum DetailOutcome {
    Full(CarDocument),
    Preview(Preview),
}

/// One site behind the crawl loop. Additional sites are additional
/// implementations, not subclasses.
pub trait SiteScraper {
    async fn extract_list(&self, page: u32) -> Result<Vec<Preview>, ScrapeError>;

    async fn extract_detail(
        &self,
        url: &str,
        fallback: Option<&Preview>,
    ) -> Result<DetailOutcome, ScrapeError>;
}

pub struct Che168Scraper {
    http: reqwest::Client,
    glyphs: GlyphMap,
}

impl Che168Scraper {
    pub fn new(cfg: &Config, glyphs: GlyphMap) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(FETCH_TIMEOUT);
        if let Some(proxy) = &cfg.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            http: builder.build()?,
            glyphs,
        })
    }

    async fn fetch(&self, url: &str) -> Result<FetchResponse, ScrapeError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;
        Ok(FetchResponse {
            status,
            url: final_url,
            body,
        })
    }

    /// Download the obfuscation font referenced by the page markup, if
    /// any. Failure means the page text stays obfuscated, nothing more.
    async fn fetch_font(&self, html: &str) -> Option<Vec<u8>> {
        let url = FONT_URL_RE
            .captures(html)
            .map(|c| format!("https://{}", &c[1]))?;
        match self.http.get(&url).send().await {
            Ok(resp) => match resp.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(e) => {
                    warn!("font download failed: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("font download failed: {e}");
                None
            }
        }
    }
}

impl SiteScraper for Che168Scraper {
    async fn extract_list(&self, page: u32) -> Result<Vec<Preview>, ScrapeError> {
        let url = list::page_url(page);
        info!("fetching list page {page}: {url}");
        let resp = self.fetch(&url).await?;
        if resp.status != 200 {
            warn!("list page {page} returned status {}", resp.status);
        }
        list::parse_list_page(&resp.body, &resp.url)
    }

    async fn extract_detail(
        &self,
        url: &str,
        fallback: Option<&Preview>,
    ) -> Result<DetailOutcome, ScrapeError> {
        let resp = match self.fetch(url).await {
            Ok(resp) => resp,
            Err(ScrapeError::Transport(e)) => {
                return match fallback {
                    Some(preview) => {
                        warn!("detail fetch failed ({e}), keeping preview data");
                        Ok(DetailOutcome::Preview(preview.clone()))
                    }
                    None => Err(ScrapeError::Transport(e)),
                };
            }
            Err(e) => return Err(e),
        };
        let font_bytes = self.fetch_font(&resp.body).await;
        detail::parse_detail_page(&resp.body, url, font_bytes.as_deref(), &self.glyphs, fallback)
            .map(DetailOutcome::Full)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn font_url_is_discovered_in_markup() {
        let html = "@font-face { src: url('//k2.autoimg.cn/g3/M04/obfuscate.ttf') format('truetype'); }";
        let caps = FONT_URL_RE.captures(html).unwrap();
        assert_eq!(&caps[1], "k2.autoimg.cn/g3/M04/obfuscate.ttf");
    }

    #[test]
    fn markup_without_font_yields_none() {
        assert!(FONT_URL_RE.captures("<html><body>no fonts</body></html>").is_none());
    }
}
