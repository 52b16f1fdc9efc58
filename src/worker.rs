use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::font::GlyphMap;
use crate::queue::{Task, TaskQueue};
use crate::scraper::{Che168Scraper, DetailOutcome, ScrapeError, SiteScraper, SOURCE};

const POP_TIMEOUT_SECS: u64 = 5;
const LIST_DELAY: Duration = Duration::from_secs(2);
const DETAIL_DELAY: Duration = Duration::from_millis(1500);

/// Crawl loop: drain the detail lane first, fan list pages out into
/// detail tasks, upsert every result. Runs until the process is killed;
/// an escaped error here is fatal and ends the run.
pub async fn run(cfg: &Config) -> Result<()> {
    let conn = db::connect(&cfg.database_path)?;
    db::init_schema(&conn)?;
    let queue = TaskQueue::connect(&cfg.redis_url).await?;
    let glyphs = GlyphMap::load(cfg.glyph_map_path.as_deref())?;
    info!("glyph map version {}", glyphs.version());
    let scraper = Che168Scraper::new(cfg, glyphs)?;

    info!("worker started, listening on both lanes");
    crawl_loop(&conn, queue, &scraper).await
}

async fn crawl_loop<S: SiteScraper>(
    conn: &Connection,
    mut queue: TaskQueue,
    scraper: &S,
) -> Result<()> {
    loop {
        let Some(task) = queue.dequeue_any(POP_TIMEOUT_SECS).await? else {
            continue;
        };
        match task {
            Task::List(page) => {
                match scraper.extract_list(page).await {
                    Ok(previews) => {
                        info!("page {page}: {} cars, enqueueing details", previews.len());
                        for preview in previews {
                            db::upsert_car(
                                conn,
                                &preview.source,
                                &preview.external_id,
                                &serde_json::to_value(&preview)?,
                            )?;
                            queue.enqueue_detail(&preview).await?;
                        }
                    }
                    Err(ScrapeError::Blocked) => {
                        error!("page {page}: bot challenge, dropping task");
                    }
                    Err(e) => warn!("page {page}: {e}"),
                }
                tokio::time::sleep(LIST_DELAY).await;
            }
            Task::Detail(preview) => {
                info!("detail {}: {}", preview.external_id, preview.link);
                match scraper.extract_detail(&preview.link, Some(&preview)).await {
                    Ok(DetailOutcome::Full(car)) => {
                        db::upsert_car(conn, SOURCE, &car.external_id, &serde_json::to_value(&car)?)?;
                    }
                    Ok(DetailOutcome::Preview(p)) => {
                        db::upsert_car(conn, &p.source, &p.external_id, &serde_json::to_value(&p)?)?;
                    }
                    Err(e) => warn!("detail {}: {e}", preview.external_id),
                }
                tokio::time::sleep(DETAIL_DELAY).await;
            }
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich;
    use crate::font::GlyphMap;
    use crate::parser::{detail, list};
    use serde_json::json;
    use std::collections::HashMap;

    /// The worker's data path from a list page to enriched records,
    /// with fixtures standing in for the network.
    #[test]
    fn list_to_detail_to_enrichment_data_path() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();

        let list_html = std::fs::read_to_string("tests/fixtures/list_page.html").unwrap();
        let previews = list::parse_list_page(&list_html, &list::page_url(1)).unwrap();
        assert_eq!(previews.len(), 2);
        for p in &previews {
            db::upsert_car(&conn, &p.source, &p.external_id, &serde_json::to_value(p).unwrap())
                .unwrap();
        }

        let detail_html = std::fs::read_to_string("tests/fixtures/detail_page.html").unwrap();
        let glyphs = GlyphMap::from_table(HashMap::new());
        let car = detail::parse_detail_page(
            &detail_html,
            &previews[0].link,
            None,
            &glyphs,
            Some(&previews[0]),
        )
        .unwrap();
        assert!(car.price > 0.0);
        assert_eq!(car.color_en, "Black");
        db::upsert_car(&conn, SOURCE, &car.external_id, &serde_json::to_value(&car).unwrap())
            .unwrap();

        // The detail upsert replaced the preview row instead of adding one.
        let batch = db::fetch_unenriched(&conn, 10).unwrap();
        assert_eq!(batch.len(), 2);

        for mut row in batch {
            enrich::merge_enrichment(&mut row.document, &json!({"title_ru": "Audi A4L"}));
            db::save_document(&conn, &row.external_id, &row.document).unwrap();
        }
        assert!(db::fetch_unenriched(&conn, 10).unwrap().is_empty());

        let stats = db::get_stats(&conn).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.done, 2);
        assert_eq!(stats.failed, 0);
    }
}
