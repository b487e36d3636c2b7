/// Maps raw AirNow response items onto `ObservationRecord`.
///
/// The three AirNow products share most keys but differ in the date key and
/// the forecast-only extras. Items are handled as loose `serde_json::Value`s
/// rather than typed structs so that a missing or oddly typed key degrades
/// to its default instead of failing the whole response.

use crate::model::{DataKind, ObservationRecord, ZipCode, AQI_NOT_REPORTED};
use serde_json::{Map, Value};

/// Converts one raw item into a record for `(zip, kind)`.
///
/// Never fails: anything that isn't a JSON object yields a record with every
/// optional field at its default.
pub fn normalize(raw: &Value, zip: &ZipCode, kind: DataKind) -> ObservationRecord {
    let mut record = ObservationRecord::empty(zip.clone(), kind);

    let Some(item) = raw.as_object() else {
        return record;
    };

    record.date = text(item, kind.date_key())
        .or_else(|| text(item, "DateObserved"))
        .or_else(|| text(item, "DateForecast"));
    record.reporting_area = text(item, "ReportingArea");
    record.state_code = text(item, "StateCode");
    record.latitude = number(item.get("Latitude"));
    record.longitude = number(item.get("Longitude"));
    record.parameter_name = text(item, "ParameterName");
    record.aqi = integer(item.get("AQI")).unwrap_or(AQI_NOT_REPORTED);

    if let Some(category) = item.get("Category").and_then(Value::as_object) {
        record.category_number = integer(category.get("Number"));
        record.category_name = text(category, "Name");
    }

    record.action_day = item
        .get("ActionDay")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    record.discussion = text(item, "Discussion");

    record
}

/// Normalizes every item of a response.
pub fn normalize_all(items: &[Value], zip: &ZipCode, kind: DataKind) -> Vec<ObservationRecord> {
    items.iter().map(|item| normalize(item, zip, kind)).collect()
}

// ---------------------------------------------------------------------------
// Field coercion
// ---------------------------------------------------------------------------

/// String value with surrounding whitespace removed. Numbers and booleans
/// are stringified; blank strings count as absent.
fn text(item: &Map<String, Value>, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    let parsed: Option<f64> = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Integer value; integral floats (`57.0`) and numeric strings are accepted.
fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
