use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::db::{CarDocument, Preview};
use crate::font::GlyphMap;
use crate::parser::{normalize, text_lines, text_of};
use crate::scraper::ScrapeError;

static ATTR_UL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".all-basic-content .basic-item-ul").unwrap());
static ITEM_NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".item-name").unwrap());
static OPTION_LI_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#caroptionulid li").unwrap());
static ITEM_STATUS_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".item-status").unwrap());
static P_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static MESSAGE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#messageBox").unwrap());
static IMAGE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".swiper-slide a img").unwrap());
static BRAND_NAME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".car-brand-name").unwrap());
static PRICE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".price").unwrap());
static OVERLAY_PRICE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#overlayPrice").unwrap());

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static STOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"车辆编码[：:]\s*(\d+)").unwrap());
static IMAGE_DIM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/\d+x\d+_").unwrap());

/// Parse a detail page into a normalized record. A page without a price
/// element, or with a non-positive price, fails hard for this pass.
pub fn parse_detail_page(
    html: &str,
    url: &str,
    font_bytes: Option<&[u8]>,
    glyphs: &GlyphMap,
    preview: Option<&Preview>,
) -> Result<CarDocument, ScrapeError> {
    let doc = Html::parse_document(html);

    let raw_attrs = collect_attributes(&doc, font_bytes, glyphs);
    let features = collect_features(&doc);
    let images = collect_images(&doc);

    let external_id = preview.map(|p| p.external_id.clone()).unwrap_or_else(|| {
        url.rsplit('/')
            .next()
            .unwrap_or_default()
            .trim_end_matches(".html")
            .to_string()
    });

    let description = doc
        .select(&MESSAGE_SEL)
        .next()
        .map(|el| glyphs.decode(font_bytes, &text_lines(&el)))
        .unwrap_or_default();
    let stock_id = STOCK_RE
        .captures(&description)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| external_id.clone());

    let title = doc
        .select(&BRAND_NAME_SEL)
        .next()
        .map(|el| text_of(&el))
        .or_else(|| preview.map(|p| p.title.clone()))
        .unwrap_or_else(|| "Unknown".into());

    let price_el = doc
        .select(&PRICE_SEL)
        .next()
        .or_else(|| doc.select(&OVERLAY_PRICE_SEL).next())
        .ok_or(ScrapeError::MissingField("price"))?;
    let price_raw = glyphs.decode(font_bytes, &text_of(&price_el));
    let price_value = normalize::clean_number(&price_raw).unwrap_or(0.0);
    if price_value <= 0.0 {
        return Err(ScrapeError::MissingField("price"));
    }
    // Listed in 万 (ten-thousands of yuan).
    let price = price_value * 10_000.0;

    let fuel_raw = first_attr(&raw_attrs, &["燃料类型", "能源类型", "Fueltype"]).unwrap_or("汽油");
    let engine_raw = first_attr(&raw_attrs, &["发动机", "engine"]).unwrap_or("");
    let (fuel_type, is_electric) = normalize::derive_fuel(fuel_raw, engine_raw);

    let battery_capacity = first_attr(&raw_attrs, &["电池容量", "Standardcapacity"])
        .and_then(normalize::clean_number);
    let electric_range = first_attr(
        &raw_attrs,
        &["CLTC纯电续航里程", "NEDC纯电续航里程", "CLTCpureelectricrange"],
    )
    .and_then(normalize::clean_number)
    .map(|v| v as i64)
    .filter(|v| *v > 0);
    let fast_charge_time = first_attr(&raw_attrs, &["标准快充", "Standardfastcharging"])
        .and_then(normalize::clean_number);

    let engine_power = normalize::engine_power(engine_raw);
    let displacement = normalize::displacement(
        first_attr(&raw_attrs, &["排量", "displacement"]).unwrap_or(engine_raw),
    );

    let year = normalize::registration_year(
        first_attr(&raw_attrs, &["上牌时间", "Registrationtime"]).unwrap_or(""),
        chrono::Utc::now().year(),
    );
    let mileage =
        normalize::mileage(first_attr(&raw_attrs, &["表显里程", "Mileagedisplayed"]).unwrap_or("0"));

    let (color_en, color_ru) = normalize::color_pair(raw_attrs.get("车身颜色").map(String::as_str));
    let drive_type = normalize::drive_label(first_attr(&raw_attrs, &["驱动方式", "drivingmethod"]));
    let transmission_type = normalize::transmission_label(raw_attrs.get("变速箱").map(String::as_str));
    let body_type = first_attr(&raw_attrs, &["车辆级别", "VehicleClass"])
        .unwrap_or("SUV")
        .to_string();
    let location = first_attr(&raw_attrs, &["所在地", "Location"])
        .unwrap_or("China")
        .to_string();

    Ok(CarDocument {
        external_id,
        stock_id,
        title,
        description,
        price,
        images,
        status: "active".into(),
        location,
        source_link: url.to_string(),
        views: 0,
        color_en: color_en.into(),
        color_ru: color_ru.into(),
        fuel_type,
        drive_type,
        body_type,
        transmission_type,
        year,
        mileage,
        is_electric,
        engine_power,
        displacement,
        battery_capacity,
        electric_range,
        fast_charge_time,
        slow_charge_time: None,
        accelerate: None,
        raw_attributes: raw_attrs,
        features,
        parsed_success: true,
    })
}

/// Flat key → deobfuscated-value map from the basic-attribute lists. The
/// "highlights" sub-list shares the same markup and is skipped outright.
fn collect_attributes(
    doc: &Html,
    font_bytes: Option<&[u8]>,
    glyphs: &GlyphMap,
) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    for ul in doc.select(&ATTR_UL_SEL) {
        for li in ul.children().filter_map(ElementRef::wrap) {
            if li.value().name() != "li" {
                continue;
            }
            let full_text = text_of(&li);
            if full_text.to_lowercase().contains("highlights") || full_text.contains("配置亮点") {
                continue;
            }
            let Some(name_el) = li.select(&ITEM_NAME_SEL).next() else {
                continue;
            };
            let key_raw = text_of(&name_el);
            let key = WS_RE.replace_all(&key_raw, "").to_string();
            let value = full_text.replacen(&key_raw, "", 1).trim().to_string();
            attrs.insert(key, glyphs.decode(font_bytes, &value));
        }
    }
    attrs
}

fn collect_features(doc: &Html) -> Vec<String> {
    let mut features = Vec::new();
    for li in doc.select(&OPTION_LI_SEL) {
        let name_el = li
            .select(&ITEM_STATUS_SEL)
            .next()
            .or_else(|| li.select(&P_SEL).next());
        if let Some(el) = name_el {
            features.push(text_of(&el));
        }
    }
    features
}

/// Deduplicated image URLs rewritten to the full-resolution variant.
fn collect_images(doc: &Html) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for img in doc.select(&IMAGE_SEL) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        if src.contains("default") {
            continue;
        }
        let src = if src.starts_with("//") {
            format!("https:{src}")
        } else {
            src.to_string()
        };
        let hq = IMAGE_DIM_RE.replace_all(&src, "/0x0_").to_string();
        if seen.insert(hq.clone()) {
            images.push(hq);
        }
    }
    images
}

fn first_attr<'a>(attrs: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| attrs.get(*k).map(String::as_str))
}

// ── Tests ──
