use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS raw_cars (
            id              INTEGER PRIMARY KEY,
            source          TEXT NOT NULL,
            external_id     TEXT UNIQUE NOT NULL,
            document        TEXT NOT NULL,
            first_seen_at   TEXT NOT NULL DEFAULT (datetime('now')),
            last_updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_raw_cars_source ON raw_cars(source);
        ",
    )?;
    Ok(())
}

// ── Record types ──

/// Minimal listing data captured from a list page; travels through the
/// detail lane and is folded into the stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preview {
    pub external_id: String,
    pub source: String,
    pub link: String,
    pub title: String,
}

/// Fully normalized detail-page record. Raw attributes and the feature
/// checklist are kept verbatim (post-deobfuscation) so enrichment can
/// recover anything the heuristics missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarDocument {
    pub external_id: String,
    pub stock_id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub images: Vec<String>,
    pub status: String,
    pub location: String,
    pub source_link: String,
    pub views: i64,

    pub color_en: String,
    pub color_ru: String,
    pub fuel_type: String,
    pub drive_type: String,
    pub body_type: String,
    pub transmission_type: String,
    pub year: i32,
    pub mileage: i64,

    pub is_electric: bool,
    pub engine_power: Option<f64>,
    pub displacement: f64,
    pub battery_capacity: Option<f64>,
    pub electric_range: Option<i64>,
    pub fast_charge_time: Option<f64>,
    pub slow_charge_time: Option<f64>,
    pub accelerate: Option<f64>,

    pub raw_attributes: BTreeMap<String, String>,
    pub features: Vec<String>,
    pub parsed_success: bool,
}

// ── Upsert ──

/// Insert or replace the document for `external_id`. The original
/// `first_seen_at` is never touched; `last_updated_at` is refreshed.
pub fn upsert_car(
    conn: &Connection,
    source: &str,
    external_id: &str,
    document: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT INTO raw_cars (source, external_id, document)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(external_id) DO UPDATE SET
             document = excluded.document,
             last_updated_at = datetime('now')",
        rusqlite::params![source, external_id, document.to_string()],
    )?;
    Ok(())
}

// ── Enrichment ──

pub struct CarRow {
    pub external_id: String,
    pub document: Value,
}

/// Records whose `ai_processed` marker is unset, newest first. Records
/// marked done (`true`) or `"failed"` are never selected again.
pub fn fetch_unenriched(conn: &Connection, limit: usize) -> Result<Vec<CarRow>> {
    let mut stmt = conn.prepare(
        "SELECT external_id, document FROM raw_cars
         WHERE json_extract(document, '$.ai_processed') IS NULL
         ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(external_id, doc)| {
            Ok(CarRow {
                external_id,
                document: serde_json::from_str(&doc)?,
            })
        })
        .collect()
}

pub fn save_document(conn: &Connection, external_id: &str, document: &Value) -> Result<()> {
    conn.execute(
        "UPDATE raw_cars SET document = ?2, last_updated_at = datetime('now')
         WHERE external_id = ?1",
        rusqlite::params![external_id, document.to_string()],
    )?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM raw_cars", [], |r| r.get(0))?;
    let pending: usize = conn.query_row(
        "SELECT COUNT(*) FROM raw_cars
         WHERE json_extract(document, '$.ai_processed') IS NULL",
        [],
        |r| r.get(0),
    )?;
    let failed: usize = conn.query_row(
        "SELECT COUNT(*) FROM raw_cars
         WHERE json_extract(document, '$.ai_processed') = 'failed'",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        total,
        pending,
        done: total - pending - failed,
        failed,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn upsert_is_idempotent_on_external_id() {
        let conn = test_conn();
        upsert_car(&conn, "che168", "42", &json!({"title": "first"})).unwrap();
        // Age the row so the timestamp refresh is observable.
        conn.execute(
            "UPDATE raw_cars SET first_seen_at = '2000-01-01 00:00:00',
                                 last_updated_at = '2000-01-01 00:00:00'",
            [],
        )
        .unwrap();
        upsert_car(&conn, "che168", "42", &json!({"title": "second"})).unwrap();

        let (count, doc, first_seen, updated): (i64, String, String, String) = conn
            .query_row(
                "SELECT COUNT(*), document, first_seen_at, last_updated_at FROM raw_cars",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!(doc.contains("second"));
        assert_eq!(first_seen, "2000-01-01 00:00:00");
        assert_ne!(updated, "2000-01-01 00:00:00");
    }

    #[test]
    fn unenriched_batch_is_newest_first() {
        let conn = test_conn();
        upsert_car(&conn, "che168", "1", &json!({"title": "a"})).unwrap();
        upsert_car(&conn, "che168", "2", &json!({"title": "b"})).unwrap();
        upsert_car(&conn, "che168", "3", &json!({"title": "c"})).unwrap();

        let batch = fetch_unenriched(&conn, 2).unwrap();
        let ids: Vec<&str> = batch.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[test]
    fn done_and_failed_markers_are_terminal() {
        let conn = test_conn();
        upsert_car(&conn, "che168", "1", &json!({"ai_processed": true})).unwrap();
        upsert_car(&conn, "che168", "2", &json!({"ai_processed": "failed"})).unwrap();
        upsert_car(&conn, "che168", "3", &json!({"title": "pending"})).unwrap();

        let batch = fetch_unenriched(&conn, 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].external_id, "3");

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.done, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn save_document_replaces_payload() {
        let conn = test_conn();
        upsert_car(&conn, "che168", "7", &json!({"title": "raw"})).unwrap();
        save_document(&conn, "7", &json!({"title": "raw", "ai_processed": true})).unwrap();

        let batch = fetch_unenriched(&conn, 10).unwrap();
        assert!(batch.is_empty());
    }
}
