// src/generate/parse.rs
//! Tolerant extraction of JSON candidates from model output.
//!
//! Models wrap arrays in prose or code fences and sometimes cut off mid-array.
//! Extraction tries, in order: the slice between the first `[` and the last `]`,
//! the whole text as one value, then every balanced top-level `{...}` on its own.

use serde_json::Value;

/// Content of the first fenced code block, or the input unchanged.
fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // Skip a language tag such as ```json
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

fn from_value(v: Value) -> Option<Vec<Value>> {
    match v {
        Value::Array(items) => Some(items),
        Value::Object(mut m) => match m.remove("questions") {
            Some(Value::Array(items)) => Some(items),
            Some(other) => {
                m.insert("questions".to_string(), other);
                Some(vec![Value::Object(m)])
            }
            None => Some(vec![Value::Object(m)]),
        },
        _ => None,
    }
}

fn bracket_slice(text: &str) -> Option<Vec<Value>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Balanced top-level objects, skipping braces inside string literals.
fn scan_objects(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&text[s..=i]) {
                            out.push(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Candidate question objects in response order. Empty when nothing parses.
pub fn extract_candidates(text: &str) -> Vec<Value> {
    let body = strip_fences(text).trim();
    if body.is_empty() {
        return Vec::new();
    }
    if let Some(items) = bracket_slice(body) {
        return items;
    }
    if let Some(items) = serde_json::from_str::<Value>(body).ok().and_then(from_value) {
        return items;
    }
    let scanned = scan_objects(body);
    if !scanned.is_empty() {
        tracing::debug!(objects = scanned.len(), "recovered objects from malformed response");
    }
    scanned
}
