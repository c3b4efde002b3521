//! Host transcript sampling
//!
//! The transcript is JSONL, one message per line. Only assistant text is
//! interesting; tool calls, tool results and user turns are skipped. Two line
//! shapes are understood:
//!
//! ```json
//! {"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"..."}]}}
//! {"role":"assistant","content":"..."}
//! ```

use crate::error::{Error, Result};
use serde_json::Value;
use std::path::Path;

/// Assistant paragraphs from the last `sample_size` lines, newest first
pub fn sample_paragraphs(path: &Path, sample_size: usize) -> Result<Vec<String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(sample_size);

    let mut paragraphs = Vec::new();
    for line in lines[start..].iter().rev() {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed transcript line");
                continue;
            }
        };
        for text in assistant_texts(&value) {
            paragraphs.extend(split_paragraphs(&text));
        }
    }
    Ok(paragraphs)
}

fn assistant_texts(value: &Value) -> Vec<String> {
    let message = value.get("message").unwrap_or(value);
    let role = message
        .get("role")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str);
    if role != Some("assistant") {
        return Vec::new();
    }

    match message.get("content") {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Split on blank lines, dropping code fences and empty paragraphs
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            flush(&mut current, &mut out);
            continue;
        }
        if in_fence {
            continue;
        }
        if line.trim().is_empty() {
            flush(&mut current, &mut out);
        } else {
            current.push(line.trim());
        }
    }
    flush(&mut current, &mut out);
    out
}

fn flush(current: &mut Vec<&str>, out: &mut Vec<String>) {
    if !current.is_empty() {
        out.push(current.join(" "));
        current.clear();
    }
}
