//! JSON path extraction
//!
//! Simple dotted paths (`data.id`, `items[0].name`, optional `$.` prefix).
//! An empty path addresses the document itself.

use crate::types::Timestamp;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Extract a value from JSON using a simple path
pub fn extract<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let path = path.strip_prefix('$').unwrap_or(path);
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        match part.find('[') {
            Some(bracket) => {
                let key = &part[..bracket];
                if !key.is_empty() {
                    current = current.get(key)?;
                }
                let idx = part[bracket + 1..].strip_suffix(']')?.parse::<usize>().ok()?;
                current = current.get(idx)?;
            }
            None => current = current.get(part)?,
        }
    }

    Some(current)
}

/// Extract a scalar as a string; numbers and booleans are stringified
///
/// `null` and absent fields both yield `None`.
pub fn extract_string(value: &Value, path: &str) -> Option<String> {
    match extract(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract a timestamp
///
/// Accepts RFC 3339 strings and epoch numbers (seconds, or milliseconds
/// when larger than 10^12).
pub fn extract_timestamp(value: &Value, path: &str) -> Option<Timestamp> {
    match extract(value, path)? {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

/// Parse an RFC 3339 or epoch timestamp string
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    s.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch(n: i64) -> Option<Timestamp> {
    if n.abs() > 1_000_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

/// Extract an array
pub fn extract_array<'a>(value: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
    extract(value, path)?.as_array()
}
