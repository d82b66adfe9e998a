//! Recursive ISO-8601 timestamp normalization.
//!
//! Kernel headers carry `date` fields as ISO-8601 strings, but kernels
//! differ in precision and offset notation. The binary client decode path
//! normalizes every ISO-8601-looking string anywhere inside the decoded
//! header and parent header to one canonical RFC 3339 UTC form. This is a
//! format-wide normalization, not an opt-in per field.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Walk a JSON value, rewriting every parseable ISO-8601 string to
/// canonical RFC 3339 UTC with millisecond precision.
///
/// Mappings and sequences are walked recursively; all other values pass
/// through unchanged, as do strings that do not parse as timestamps.
pub fn normalize_dates(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                normalize_dates(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                normalize_dates(v);
            }
        }
        Value::String(s) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                *s = parsed
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true);
            }
        }
        _ => {}
    }
}
