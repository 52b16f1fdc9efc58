use std::time::Duration;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;

const BATCH_SIZE: usize = 10;
const IDLE_DELAY: Duration = Duration::from_secs(5);
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = r#"
You are an expert Automotive Data Translator & Normalizer for a Russian car marketplace.
Your goal is to translate Chinese car data into structured JSON.

INPUT: Raw Chinese car data.
OUTPUT: Valid JSON object matching the requested schema. No markdown.

RULES FOR FIELDS:
1. "title_ru": Clean model name in English/Russian (e.g., "Audi A4L 40 TFSI"). Remove Chinese chars.
2. "description_ru": Write a short, attractive SALES PITCH in Russian (3-5 sentences) based on the specs and features. Highlight key benefits.
3. "color_en": Map strictly to: [Black, White, Silver, Grey, Red, Blue, Brown, Green, Yellow, Orange, Purple, Beige, Gold, Pink, Other].
4. "color_ru": Russian translation of color_en.
5. "transmission_type": Map to: [automatic, robot, cvt, manual].
   - "双离合" -> robot
   - "手自一体" / "自动" -> automatic
   - "无级变速" -> cvt
6. "drive_type": Map to: [FWD, RWD, AWD].
   - "前置前驱" -> FWD
   - "后置后驱" -> RWD
   - "四驱" -> AWD
7. "body_type": Map to: [Sedan, SUV, Hatchback, MPV, Coupe, Pickup, Wagon, Cabriolet, Van].
8. "fuel_type": Map to: [petrol, diesel, electric, hybrid, phev].
9. "features_ru": Translate the list of features to Russian (array of strings).

If a field is unknown or cannot be determined, use null.
"#;

/// Chat-completions client in strict-JSON mode against any
/// OpenAI-compatible endpoint.
pub struct EnrichClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EnrichClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let Some(api_key) = cfg.openai_api_key.clone() else {
            bail!("OPENAI_API_KEY is not set");
        };
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(COMPLETION_TIMEOUT)
                .build()?,
            base_url: cfg.openai_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.openai_model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One completion call; the reply must be a JSON object.
    pub async fn complete(&self, system: &str, user: &Value) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user.to_string() },
            ],
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
        });
        let reply: Value = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_completion(&reply)
    }
}

fn parse_completion(reply: &Value) -> Result<Value> {
    let content = reply["choices"][0]["message"]["content"]
        .as_str()
        .context("no content in completion reply")?;
    let parsed: Value =
        serde_json::from_str(content).context("completion content is not valid JSON")?;
    if !parsed.is_object() {
        bail!("completion content is not a JSON object");
    }
    Ok(parsed)
}

/// Compact context for the model: raw title/description plus the curated
/// spec subset, preferring the original Chinese attributes over the
/// heuristic fields.
pub fn build_context(document: &Value) -> Value {
    let attrs = &document["raw_attributes"];
    json!({
        "title_raw": document["title"],
        "description_raw": document["description"],
        "specs": {
            "transmission": attrs["变速箱"].as_str()
                .or_else(|| document["transmission_type"].as_str()),
            "fuel": attrs["燃油标号"].as_str()
                .or_else(|| attrs["能源类型"].as_str())
                .or_else(|| document["fuel_type"].as_str()),
            "drive": attrs["驱动方式"],
            "body": attrs["车辆级别"],
            "color": attrs["车身颜色"],
            "engine": attrs["发动机"],
        },
        "features_list": document["features"],
    })
}

/// Fold the model's fields into the document and mark it done.
pub fn merge_enrichment(document: &mut Value, fields: &Value) {
    if let (Some(doc), Some(add)) = (document.as_object_mut(), fields.as_object()) {
        for (key, value) in add {
            doc.insert(key.clone(), value.clone());
        }
        doc.insert("ai_processed".into(), Value::Bool(true));
    }
}

/// Terminal failure marker; the record is never selected again.
pub fn mark_failed(document: &mut Value) {
    if let Some(doc) = document.as_object_mut() {
        doc.insert("ai_processed".into(), Value::String("failed".into()));
    }
}

/// Enrichment loop: select a batch of unenriched records, call the model
/// for each, persist the outcome. Cycle-level errors are transient: log,
/// pause, keep going.
pub async fn run(cfg: &Config) -> Result<()> {
    let client = EnrichClient::new(cfg)?;
    let conn = db::connect(&cfg.database_path)?;
    db::init_schema(&conn)?;
    info!("enrichment loop started (model {})", client.model());

    loop {
        if let Err(e) = run_cycle(&client, &conn).await {
            error!("enrichment cycle failed: {e:#}");
            tokio::time::sleep(IDLE_DELAY).await;
        }
    }
}

async fn run_cycle(client: &EnrichClient, conn: &Connection) -> Result<()> {
    let batch = db::fetch_unenriched(conn, BATCH_SIZE)?;
    if batch.is_empty() {
        tokio::time::sleep(IDLE_DELAY).await;
        return Ok(());
    }

    info!("enriching batch of {}", batch.len());
    for mut car in batch {
        let context = build_context(&car.document);
        match client.complete(SYSTEM_PROMPT, &context).await {
            Ok(fields) => {
                merge_enrichment(&mut car.document, &fields);
                info!(
                    "enriched {} -> {}",
                    car.external_id,
                    fields["title_ru"].as_str().unwrap_or("?")
                );
            }
            Err(e) => {
                warn!("enrichment failed for {}: {e:#}", car.external_id);
                mark_failed(&mut car.document);
            }
        }
        db::save_document(conn, &car.external_id, &car.document)?;
    }
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_prefers_raw_chinese_attributes() {
        let document = json!({
            "title": "奥迪A4L 2021款",
            "description": "精品好车",
            "transmission_type": "automatic",
            "fuel_type": "petrol",
            "raw_attributes": {
                "变速箱": "双离合",
                "能源类型": "汽油",
                "车身颜色": "黑色",
            },
            "features": ["全景天窗"],
        });
        let ctx = build_context(&document);
        assert_eq!(ctx["title_raw"], "奥迪A4L 2021款");
        assert_eq!(ctx["specs"]["transmission"], "双离合");
        assert_eq!(ctx["specs"]["fuel"], "汽油");
        assert_eq!(ctx["specs"]["color"], "黑色");
        assert_eq!(ctx["features_list"][0], "全景天窗");
    }

    #[test]
    fn context_falls_back_to_normalized_fields() {
        let document = json!({
            "title": "t",
            "transmission_type": "automatic",
            "fuel_type": "petrol",
            "raw_attributes": {},
        });
        let ctx = build_context(&document);
        assert_eq!(ctx["specs"]["transmission"], "automatic");
        assert_eq!(ctx["specs"]["fuel"], "petrol");
    }

    #[test]
    fn merge_sets_fields_and_done_marker() {
        let mut document = json!({"title": "奥迪A4L", "price": 125000.0});
        let fields = json!({"title_ru": "Audi A4L", "color_en": "Black"});
        merge_enrichment(&mut document, &fields);
        assert_eq!(document["title_ru"], "Audi A4L");
        assert_eq!(document["color_en"], "Black");
        assert_eq!(document["ai_processed"], true);
        assert_eq!(document["price"], 125000.0);
    }

    #[test]
    fn failure_marker_is_distinct_from_done() {
        let mut document = json!({"title": "t"});
        mark_failed(&mut document);
        assert_eq!(document["ai_processed"], "failed");
    }

    #[test]
    fn completion_reply_parsing() {
        let reply = json!({
            "choices": [{ "message": { "content": "{\"title_ru\": \"Audi A4L\"}" } }]
        });
        let parsed = parse_completion(&reply).unwrap();
        assert_eq!(parsed["title_ru"], "Audi A4L");

        let empty = json!({ "choices": [] });
        assert!(parse_completion(&empty).is_err());

        let not_json = json!({
            "choices": [{ "message": { "content": "sorry, no" } }]
        });
        assert!(parse_completion(&not_json).is_err());

        let not_object = json!({
            "choices": [{ "message": { "content": "[1, 2]" } }]
        });
        assert!(parse_completion(&not_object).is_err());
    }
}
