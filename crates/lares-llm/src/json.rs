//! JSON recovery for model output
//!
//! Chat models wrap JSON in markdown fences, prepend prose, or truncate
//! the tail. The gateway runs responses through a short repair ladder
//! before handing them to callers: strip fences, then extract the
//! largest balanced object/array. Anything beyond that is the caller's
//! retry budget, not ours.

use crate::error::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// Parse `raw` as JSON, repairing the common model-output failures.
///
/// Returns the canonical string form of the parsed value so downstream
/// deserialization never sees the surrounding prose.
pub fn coerce_json(raw: &str) -> Result<String> {
    let value = parse_with_repair(raw)?;
    serde_json::to_string(&value).map_err(|e| Error::Parse(e.to_string()))
}

/// Parse `raw` into a [`Value`], repairing fences and embedded JSON.
pub fn parse_with_repair(raw: &str) -> Result<Value> {
    let trimmed = raw.trim().trim_start_matches('\u{feff}');

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let unfenced = strip_code_fences(trimmed);
    if let Ok(value) = serde_json::from_str::<Value>(unfenced.trim()) {
        debug!("json recovered after fence stripping");
        return Ok(value);
    }

    if let Some(extracted) = extract_balanced(&unfenced) {
        if let Ok(value) = serde_json::from_str::<Value>(extracted) {
            debug!("json recovered from embedded object");
            return Ok(value);
        }
    }

    Err(Error::Parse(format!(
        "no parseable json in response (preview: {})",
        preview(trimmed)
    )))
}

/// Strip a leading/trailing markdown code fence, with or without a
/// language tag.
fn strip_code_fences(s: &str) -> String {
    let mut out = s.trim();
    if out.starts_with("```") {
        out = match out.find('\n') {
            Some(pos) => &out[pos + 1..],
            None => out.trim_start_matches('`'),
        };
    }
    let mut out = out.trim_end();
    if out.ends_with("```") {
        out = out[..out.len() - 3].trim_end();
    }
    out.to_string()
}

/// Find the largest balanced `{...}` or `[...]` substring.
///
/// Scans from the first opening delimiter and tracks nesting depth,
/// ignoring delimiters inside string literals. Returns the longest
/// complete span so a leading prose fragment or trailing explanation
/// does not defeat the parse.
fn extract_balanced(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut start = None;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' | b'[' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' | b']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s0) = start {
                        let len = i + 1 - s0;
                        if best.map_or(true, |(b0, b1)| len > b1 - b0) {
                            best = Some((s0, i + 1));
                        }
                    }
                }
                if depth < 0 {
                    depth = 0;
                    start = None;
                }
            }
            _ => {}
        }
    }

    best.map(|(a, b)| &s[a..b])
}

fn preview(s: &str) -> String {
    s.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_json_passes_through() {
        let value = parse_with_repair(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n{\"location\": \"Faro\"}\n```";
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["location"], "Faro");
    }

    #[test]
    fn test_fence_without_language_tag() {
        let raw = "```\n[1, 2, 3]\n```";
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let raw = "Sure! Here is the result:\n{\"ok\": true}\nLet me know if you need more.";
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let raw = r#"note: {"msg": "use {braces} carefully"} end"#;
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["msg"], "use {braces} carefully");
    }

    #[test]
    fn test_largest_span_wins() {
        let raw = r#"{"tiny": 1} and the real answer {"a": 1, "b": {"c": 2}}"#;
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["b"]["c"], 2);
    }

    #[test]
    fn test_unparseable_is_error() {
        let err = parse_with_repair("there is no json here").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_coerce_returns_canonical_string() {
        let out = coerce_json("```json\n{ \"a\" : 1 }\n```").unwrap();
        assert_eq!(out, r#"{"a":1}"#);
    }
}
