use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::db::Preview;
use crate::parser::text_of;
use crate::scraper::{ScrapeError, SOURCE};

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static ITEM_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[infoid]").unwrap());
static CARINFO_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.carinfo").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static CARD_NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".card-name").unwrap());
static CAR_NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".car-name").unwrap());

static SITE_ROOT: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://www.che168.com/").unwrap());

/// Deterministic list-page URL for a page index.
pub fn page_url(page: u32) -> String {
    format!("https://www.che168.com/china/a0_0msdgscncgpi1lto8csp{page}exx0/")
}

/// Parse a list page into preview records. A bot challenge (verification
/// title or redirect) aborts the whole page; items missing a link are
/// skipped individually.
pub fn parse_list_page(html: &str, final_url: &str) -> Result<Vec<Preview>, ScrapeError> {
    let doc = Html::parse_document(html);

    let page_title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|t| text_of(&t))
        .unwrap_or_default();
    if page_title.contains("验证") || final_url.contains("verify") {
        return Err(ScrapeError::Blocked);
    }

    let base = Url::parse(final_url).unwrap_or_else(|_| SITE_ROOT.clone());
    let mut results = Vec::new();
    for item in doc.select(&ITEM_SEL) {
        let Some(external_id) = item.value().attr("infoid") else {
            continue;
        };
        let link_el = item
            .select(&CARINFO_SEL)
            .next()
            .or_else(|| item.select(&ANCHOR_SEL).next());
        let Some(href) = link_el.and_then(|a| a.value().attr("href")) else {
            debug!(external_id, "list item without link, skipping");
            continue;
        };

        let title = item
            .select(&CARD_NAME_SEL)
            .next()
            .or_else(|| item.select(&CAR_NAME_SEL).next())
            .map(|t| text_of(&t))
            .unwrap_or_else(|| "No Title".into());

        results.push(Preview {
            external_id: external_id.to_string(),
            source: SOURCE.into(),
            link: resolve_link(&base, href),
            title,
        });
    }
    Ok(results)
}

/// Protocol-relative and site-relative hrefs resolved against the page URL.
fn resolve_link(base: &Url, href: &str) -> String {
    base.join(href)
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{name}.html")).unwrap()
    }

    #[test]
    fn extracts_previews_and_skips_linkless_items() {
        let html = fixture("list_page");
        let previews = parse_list_page(&html, &page_url(1)).unwrap();
        assert_eq!(previews.len(), 2);

        assert_eq!(previews[0].external_id, "100001");
        assert_eq!(previews[0].link, "https://www.che168.com/dealer/100001.html");
        assert_eq!(previews[0].title, "奥迪A4L 2021款 40 TFSI");
        assert_eq!(previews[0].source, "che168");

        assert_eq!(previews[1].external_id, "100002");
        assert_eq!(previews[1].link, "https://www.che168.com/dealer/100002.html");
        assert_eq!(previews[1].title, "宝马3系");
    }

    #[test]
    fn verification_title_is_blocked() {
        let html = fixture("blocked_page");
        assert!(matches!(
            parse_list_page(&html, &page_url(1)),
            Err(ScrapeError::Blocked)
        ));
    }

    #[test]
    fn verification_redirect_is_blocked() {
        let html = fixture("list_page");
        assert!(matches!(
            parse_list_page(&html, "https://www.che168.com/verify?from=china"),
            Err(ScrapeError::Blocked)
        ));
    }

    #[test]
    fn link_resolution() {
        let base = Url::parse(&page_url(1)).unwrap();
        assert_eq!(
            resolve_link(&base, "//www.che168.com/a.html"),
            "https://www.che168.com/a.html"
        );
        assert_eq!(
            resolve_link(&base, "/dealer/1.html"),
            "https://www.che168.com/dealer/1.html"
        );
        assert_eq!(
            resolve_link(&base, "https://other.example/x"),
            "https://other.example/x"
        );
    }
}
