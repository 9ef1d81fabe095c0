//! Structured JSON recovery from free-form worker text

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fenced_block() -> &'static Regex {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    FENCED.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("Invalid regex"))
}

fn loose_object() -> &'static Regex {
    static LOOSE: OnceLock<Regex> = OnceLock::new();
    LOOSE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("Invalid regex"))
}

/// Recover a JSON value from worker output.
///
/// Tries, in order:
/// - every fenced code block (optionally tagged `json`), first one that parses
/// - the whole text
/// - the widest `{ ... }` span
///
/// Returns `None` when nothing parses. A missing value is a data gap, not an
/// error.
pub fn extract_json(text: &str) -> Option<Value> {
    for cap in fenced_block().captures_iter(text) {
        if let Some(body) = cap.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(value);
            }
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }

    loose_object()
        .find(text)
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
}

/// Like [`extract_json`] but only accepts JSON objects
pub fn extract_object(text: &str) -> Option<Value> {
    extract_json(text).filter(Value::is_object)
}

/// Shorten `text` to at most `max_chars` characters for log lines
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
