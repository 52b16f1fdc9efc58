use std::sync::LazyLock;

use regex::Regex;

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(\.\d+)?)").unwrap());
static POWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(马力|horsepower|hp)").unwrap());
static DISPLACEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(\.\d+)?)[LT]").unwrap());

/// Bare mileage values below this are taken to be quoted in 万 (ten
/// thousands). A genuinely low odometer reading under the cutoff is
/// indistinguishable from a 万-quoted one and will be scaled.
const MILEAGE_TEN_THOUSAND_CUTOFF: f64 = 500.0;

const COLORS: &[(&str, &str, &str)] = &[
    ("黑色", "Black", "Черный"),
    ("白色", "White", "Белый"),
    ("灰色", "Grey", "Серый"),
    ("银色", "Silver", "Серебристый"),
    ("红色", "Red", "Красный"),
    ("蓝色", "Blue", "Синий"),
    ("棕色", "Brown", "Коричневый"),
    ("绿色", "Green", "Зеленый"),
    ("黄色", "Yellow", "Желтый"),
    ("紫色", "Purple", "Фиолетовый"),
    ("香槟色", "Champagne", "Шампань"),
    ("橙色", "Orange", "Оранжевый"),
];

const FUELS: &[(&str, &str)] = &[
    ("汽油", "petrol"),
    ("柴油", "diesel"),
    ("纯电动", "electric"),
    ("油电混合", "hybrid"),
    ("插电式混合动力", "phev"),
    ("增程式", "range_extender"),
];

const TRANSMISSIONS: &[(&str, &str)] = &[
    ("自动", "automatic"),
    ("手动", "manual"),
    ("手自一体", "automatic"),
    ("双离合", "robot"),
    ("无级变速", "cvt"),
    ("固定齿比", "fixed"),
];

const DRIVES: &[(&str, &str)] = &[
    ("前置前驱", "FWD"),
    ("前驱", "FWD"),
    ("后置后驱", "RWD"),
    ("后驱", "RWD"),
    ("四驱", "AWD"),
];

/// First decimal number in the text ("96kwh" → 96.0).
pub fn clean_number(text: &str) -> Option<f64> {
    NUMBER_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// (fuel_type, is_electric). Pure-electric tokens win over everything,
/// then hybrid tokens, then the taxonomy table, then petrol.
pub fn derive_fuel(fuel_raw: &str, engine_raw: &str) -> (String, bool) {
    if fuel_raw.contains("纯电动")
        || fuel_raw.contains("pure electric")
        || engine_raw.contains("electric")
    {
        return ("electric".into(), true);
    }
    if fuel_raw.contains('混') || fuel_raw.contains("hybrid") {
        return ("hybrid".into(), false);
    }
    let label = FUELS
        .iter()
        .find(|(k, _)| *k == fuel_raw)
        .map(|(_, v)| *v)
        .unwrap_or("petrol");
    (label.into(), false)
}

/// Bilingual color lookup; anything unmapped is the generic pair.
pub fn color_pair(raw: Option<&str>) -> (&'static str, &'static str) {
    raw.and_then(|r| COLORS.iter().find(|(k, _, _)| *k == r))
        .map(|(_, en, ru)| (*en, *ru))
        .unwrap_or(("Other", "Другой"))
}

pub fn transmission_label(raw: Option<&str>) -> String {
    raw.and_then(|r| TRANSMISSIONS.iter().find(|(k, _)| *k == r))
        .map(|(_, v)| (*v).to_string())
        .unwrap_or_else(|| "automatic".into())
}

/// Drive taxonomy lookup; unmapped raw values pass through, missing
/// values fall back to FWD.
pub fn drive_label(raw: Option<&str>) -> String {
    match raw {
        Some(r) => DRIVES
            .iter()
            .find(|(k, _)| *k == r)
            .map(|(_, v)| (*v).to_string())
            .unwrap_or_else(|| r.to_string()),
        None => "FWD".into(),
    }
}

/// First `<number> 马力/hp` pattern in the engine text.
pub fn engine_power(engine_raw: &str) -> Option<f64> {
    POWER_RE
        .captures(engine_raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// First `<number>L` or `<number>T` pattern, else 0.0.
pub fn displacement(text: &str) -> f64 {
    DISPLACEMENT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

/// First four characters of the registration date as a year.
pub fn registration_year(reg_raw: &str, fallback: i32) -> i32 {
    if reg_raw.is_empty() {
        return fallback;
    }
    let head: String = reg_raw.chars().take(4).collect();
    clean_number(&head).map(|y| y as i32).unwrap_or(fallback)
}

/// Absolute mileage in km. Scaled by 10 000 when the raw text carries a
/// ten-thousand marker or the bare value sits under the cutoff.
pub fn mileage(raw: &str) -> i64 {
    let value = clean_number(raw).unwrap_or(0.0);
    if raw.contains('万') || raw.contains("million") || value < MILEAGE_TEN_THOUSAND_CUTOFF {
        (value * 10_000.0) as i64
    } else {
        value as i64
    }
}

// ── Tests ──
