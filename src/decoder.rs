//! Point decoding
//!
//! Maps one schemaless JSON element to a `(value, timestamp, device)` triple.
//! Exports differ per metric, exporter version and device vendor, so each
//! part is resolved through an ordered table of probes where the first hit
//! wins. Probes are plain lookups on [`serde_json::Value`]; none of them
//! assumes a shape, and a JSON `null` counts as absent.

use crate::types::UNKNOWN_DEVICE;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;

/// Typed sub-fields of a compound value, in precedence order
const TYPED_VALUE_FIELDS: &[&str] = &["intVal", "fpVal", "stringVal"];

/// Domain-specific scalar fields probed when there is no generic `value`
const DOMAIN_VALUE_FIELDS: &[&str] = &[
    "activity",
    "steps",
    "distance",
    "calories",
    "heart_rate",
    "bpm",
    "speed",
    "power",
    "weight",
    "height",
    "sleepSegmentType",
];

/// Wrapper field holding a nested value object
const NESTED_VALUE_FIELD: &str = "fitValue";

/// Sub-fields of a compound `device` object, in precedence order
const DEVICE_FIELDS: &[&str] = &["name", "manufacturer", "model", "type"];

/// Fields that wrap the point array of a whole document
const POINT_ARRAY_FIELDS: &[&str] = &["Data Points", "dataPoints", "points"];

/// `raw:<namespace>.<vendor>:...`, where the first segment is exactly two tokens
static RAW_SOURCE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^raw:[^.:]+\.([^.:]+):").expect("invalid regex"));

/// How a timestamp field encodes its instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeEncoding {
    /// Date/time text; bare numbers are epoch milliseconds
    Text,
    /// Epoch milliseconds, as a number or digit string
    Millis,
    /// Epoch nanoseconds, as a number or digit string
    Nanos,
}

/// One timestamp probe
#[derive(Debug, Clone, Copy)]
pub struct TimestampRule {
    pub field: &'static str,
    pub encoding: TimeEncoding,
}

/// Timestamp fields in priority order
pub static TIMESTAMP_RULES: &[TimestampRule] = &[
    TimestampRule {
        field: "startTime",
        encoding: TimeEncoding::Text,
    },
    TimestampRule {
        field: "startTimeNanos",
        encoding: TimeEncoding::Nanos,
    },
    TimestampRule {
        field: "endTime",
        encoding: TimeEncoding::Text,
    },
    TimestampRule {
        field: "endTimeNanos",
        encoding: TimeEncoding::Nanos,
    },
    TimestampRule {
        field: "timestamp",
        encoding: TimeEncoding::Text,
    },
    TimestampRule {
        field: "modifiedTime",
        encoding: TimeEncoding::Text,
    },
    TimestampRule {
        field: "modifiedTimeMillis",
        encoding: TimeEncoding::Millis,
    },
    TimestampRule {
        field: "createTime",
        encoding: TimeEncoding::Text,
    },
    TimestampRule {
        field: "lastModifiedTime",
        encoding: TimeEncoding::Text,
    },
    TimestampRule {
        field: "originDataSourceId",
        encoding: TimeEncoding::Text,
    },
    TimestampRule {
        field: "date",
        encoding: TimeEncoding::Text,
    },
];

/// One value probe
pub struct ValueRule {
    pub name: &'static str,
    extract: fn(&Value) -> Option<String>,
}

impl ValueRule {
    pub fn apply(&self, point: &Value) -> Option<String> {
        (self.extract)(point)
    }
}

/// Value probes in priority order
pub static VALUE_RULES: &[ValueRule] = &[
    ValueRule {
        name: "value_sequence",
        extract: value_sequence,
    },
    ValueRule {
        name: "value_scalar",
        extract: value_scalar,
    },
    ValueRule {
        name: "domain_field",
        extract: domain_field,
    },
    ValueRule {
        name: "nested_wrapper",
        extract: nested_wrapper,
    },
];

/// Part of a point that could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPart {
    Value,
    Timestamp,
}

impl MissingPart {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingPart::Value => "value",
            MissingPart::Timestamp => "timestamp",
        }
    }
}

/// A fully resolved point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPoint {
    pub value: String,
    pub timestamp: DateTime<Utc>,
    pub device: String,
}

/// Rule-driven decoder for schemaless export points
pub struct PointDecoder;

impl PointDecoder {
    /// Resolve value, timestamp and device; fails if value or timestamp is missing
    pub fn decode(point: &Value) -> Result<DecodedPoint, MissingPart> {
        let value = Self::decode_value(point).ok_or(MissingPart::Value)?;
        let timestamp = Self::decode_timestamp(point).ok_or(MissingPart::Timestamp)?;
        Ok(DecodedPoint {
            value,
            timestamp,
            device: Self::decode_device(point),
        })
    }

    /// String-encoded value of the point
    pub fn decode_value(point: &Value) -> Option<String> {
        VALUE_RULES.iter().find_map(|rule| rule.apply(point))
    }

    /// First timestamp field that is present and parses
    ///
    /// Fields that exist but do not parse are skipped.
    pub fn decode_timestamp(point: &Value) -> Option<DateTime<Utc>> {
        TIMESTAMP_RULES.iter().find_map(|rule| {
            field(point, rule.field).and_then(|v| parse_instant(v, rule.encoding))
        })
    }

    /// Device label; never fails
    pub fn decode_device(point: &Value) -> String {
        device_field(point)
            .or_else(|| origin_device(point))
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
    }

    /// Split a parsed document into its points
    ///
    /// Arrays are the point sequence. An object wrapping a point array is
    /// unwrapped one level; any other value is a single point.
    pub fn points(document: Value) -> Vec<Value> {
        match document {
            Value::Array(items) => items,
            Value::Object(mut map) => {
                let wrapped = POINT_ARRAY_FIELDS
                    .iter()
                    .find(|key| map.get(**key).is_some_and(Value::is_array))
                    .copied();
                match wrapped.and_then(|key| map.remove(key)) {
                    Some(Value::Array(items)) => items,
                    _ => vec![Value::Object(map)],
                }
            }
            other => vec![other],
        }
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value.get(name).filter(|v| !v.is_null())
}

fn typed_value(compound: &Value) -> Option<&Value> {
    TYPED_VALUE_FIELDS.iter().find_map(|name| field(compound, name))
}

fn number_text(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())
    }
}

/// String form of any resolved value
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_text(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(_) => match typed_value(value) {
            Some(inner) => scalar_text(inner),
            None => Some(value.to_string()),
        },
        Value::Array(_) => Some(value.to_string()),
    }
}

// (a) `value` is a sequence: use its first element
fn value_sequence(point: &Value) -> Option<String> {
    let first = field(point, "value")?.as_array()?.first()?;
    match first {
        Value::Object(_) => typed_value(first).and_then(scalar_text),
        other => scalar_text(other),
    }
}

// (b) `value` is present but not a sequence
fn value_scalar(point: &Value) -> Option<String> {
    let value = field(point, "value")?;
    if value.is_array() {
        return None;
    }
    scalar_text(value)
}

// (c) well-known domain fields
fn domain_field(point: &Value) -> Option<String> {
    DOMAIN_VALUE_FIELDS
        .iter()
        .find_map(|name| field(point, name).and_then(scalar_text))
}

// (d) nested wrapper, preferring its inner `value`
fn nested_wrapper(point: &Value) -> Option<String> {
    let mut wrapper = field(point, NESTED_VALUE_FIELD)?;
    if let Value::Array(items) = wrapper {
        wrapper = items.first().filter(|v| !v.is_null())?;
    }
    match field(wrapper, "value") {
        Some(inner) => scalar_text(inner),
        None => scalar_text(wrapper),
    }
}

fn parse_instant(value: &Value, encoding: TimeEncoding) -> Option<DateTime<Utc>> {
    match (encoding, value) {
        (TimeEncoding::Text, Value::String(s)) => parse_text_instant(s),
        (TimeEncoding::Text, Value::Number(n)) | (TimeEncoding::Millis, Value::Number(n)) => {
            epoch_millis(number_as_i64(n)?)
        }
        (TimeEncoding::Millis, Value::String(s)) => match digits(s) {
            Some(ms) => epoch_millis(ms),
            None => parse_text_instant(s),
        },
        (TimeEncoding::Nanos, Value::Number(n)) => Some(Utc.timestamp_nanos(number_as_i64(n)?)),
        (TimeEncoding::Nanos, Value::String(s)) => digits(s).map(|ns| Utc.timestamp_nanos(ns)),
        _ => None,
    }
}

fn number_as_i64(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn digits(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Parse date/time text in the encodings exports are known to use
fn parse_text_instant(text: &str) -> Option<DateTime<Utc>> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn device_field(point: &Value) -> Option<String> {
    let device = field(point, "device")?;
    match device {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => Some(
            DEVICE_FIELDS
                .iter()
                .find_map(|name| {
                    field(device, name)
                        .and_then(scalar_text)
                        .filter(|s| !s.trim().is_empty())
                })
                .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
        ),
        other => scalar_text(other),
    }
}

fn origin_device(point: &Value) -> Option<String> {
    let id = field(point, "originDataSourceId")?.as_str()?;
    if id.trim().is_empty() {
        return None;
    }
    match RAW_SOURCE_ID.captures(id).and_then(|c| c.get(1)) {
        Some(vendor) => Some(vendor.as_str().to_lowercase().replace('_', " ")),
        None => Some(id.to_string()),
    }
}
