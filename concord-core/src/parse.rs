//! Tiered parsing of semantic-collaborator replies.
//!
//! The collaborator returns prose that is *expected* to contain one JSON
//! object matching the requested schema, but may be fenced in markdown,
//! wrapped in commentary, malformed, or garbage. Every call site goes
//! through `parse_reply` and handles the three variants explicitly instead
//! of running its own regex chain:
//! - `Parsed(T)` — strict schema match
//! - `Partial(Value)` — valid JSON that does not fit the schema
//! - `Unparsed(String)` — no JSON object recoverable

use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug)]
pub enum SemanticReply<T> {
    Parsed(T),
    Partial(Value),
    Unparsed(String),
}

pub fn parse_reply<T: DeserializeOwned>(raw: &str) -> SemanticReply<T> {
    let stripped = strip_fences(raw);

    if let Ok(parsed) = serde_json::from_str::<T>(stripped) {
        return SemanticReply::Parsed(parsed);
    }

    // JSON embedded in prose: widest brace window.
    if let Some(window) = brace_window(stripped) {
        if let Ok(parsed) = serde_json::from_str::<T>(window) {
            return SemanticReply::Parsed(parsed);
        }
        if let Ok(value) = serde_json::from_str::<Value>(window) {
            return SemanticReply::Partial(value);
        }
    }

    SemanticReply::Unparsed(raw.to_string())
}

fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn brace_window(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&s[start..=end])
}

/// String field accessor for `Partial` values.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn bool_field(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(|v| v.as_bool())
}

/// Numeric field accessor tolerating numbers sent as strings.
pub fn f64_field(value: &Value, key: &str) -> Option<f64> {
    let v = value.get(key)?;
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Convert a collaborator confidence to the 0–100 conversation-analysis
/// scale. Values at or below 1.0 are treated as 0–1 fractions (the
/// collaborator does not always respect the requested scale); everything is
/// clamped to [0, 100].
pub fn confidence_0_100(raw: f64) -> u8 {
    let scaled = if raw <= 1.0 { raw * 100.0 } else { raw };
    scaled.clamp(0.0, 100.0).round() as u8
}

/// Convert a collaborator confidence to the 0–1 entity/correction scale.
/// Values above 1.0 are treated as 0–100 and divided down; everything is
/// clamped to [0, 1].
pub fn confidence_0_1(raw: f64) -> f32 {
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0) as f32
}
