//! Adapter for untagged host payloads
//!
//! Older hosts send a `hook_event_name` instead of an `event` tag, and some
//! send neither. The host name is mapped when present; otherwise the kind is
//! inferred from which fields the payload carries. A named host event with no
//! counterpart is rejected rather than guessed from its shape.

use super::envelope::EventKind;
use crate::error::{Error, Result};
use serde_json::Value;

/// Map a host hook name to an event kind
pub fn kind_for_host_name(name: &str) -> Option<EventKind> {
    match name {
        "SessionStart" => Some(EventKind::SessionStart),
        "UserPromptSubmit" => Some(EventKind::UserPrompt),
        "PreToolUse" => Some(EventKind::PreAction),
        "PostToolUse" => Some(EventKind::PostAction),
        "PermissionRequest" => Some(EventKind::Permission),
        "SubagentStop" => Some(EventKind::SubagentDone),
        "PreCompact" => Some(EventKind::PreCompact),
        "SessionEnd" => Some(EventKind::SessionEnd),
        _ => None,
    }
}

/// Infer the event kind of an untagged payload
pub fn infer_kind(value: &Value) -> Result<EventKind> {
    if let Some(name) = value.get("hook_event_name").and_then(Value::as_str) {
        return kind_for_host_name(name)
            .ok_or_else(|| Error::InvalidInput(format!("unhandled host event: {}", name)));
    }

    let has = |field: &str| value.get(field).is_some_and(|v| !v.is_null());
    Ok(if has("risk_tier") {
        EventKind::Permission
    } else if has("tool_response") || has("tool_result") {
        EventKind::PostAction
    } else if has("tool_name") {
        EventKind::PreAction
    } else if has("subagent") || has("subagent_type") {
        EventKind::SubagentDone
    } else if has("prompt") {
        EventKind::UserPrompt
    } else if has("trigger") {
        EventKind::PreCompact
    } else if has("reason") {
        EventKind::SessionEnd
    } else {
        EventKind::SessionStart
    })
}
