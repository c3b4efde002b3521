//! Outbound response envelope
//!
//! Serialized with `camelCase` keys for the host:
//! `{"continue": true, "permissionDecision": "allow", "additionalContext": "..."}`.

use serde::{Deserialize, Serialize};

/// Permission verdict for a permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Ask,
    Deny,
}

/// Response written to the host for every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    /// Always `true`; the host flow is never interrupted
    #[serde(rename = "continue")]
    pub continue_: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl HookResponse {
    /// Neutral response with nothing to add
    #[must_use]
    pub fn continue_() -> Self {
        Self {
            continue_: true,
            permission_decision: None,
            additional_context: None,
        }
    }

    /// Continue with context text; blank text is dropped
    #[must_use]
    pub fn with_context(context: impl Into<String>) -> Self {
        let context = context.into();
        Self {
            additional_context: (!context.trim().is_empty()).then_some(context),
            ..Self::continue_()
        }
    }

    /// Continue with context assembled from optional parts
    #[must_use]
    pub fn from_parts(parts: Vec<String>) -> Self {
        let parts: Vec<String> = parts.into_iter().filter(|p| !p.trim().is_empty()).collect();
        Self::with_context(parts.join("\n\n"))
    }

    #[must_use]
    pub fn with_permission(mut self, decision: PermissionDecision) -> Self {
        self.permission_decision = Some(decision);
        self
    }

    /// Compact JSON for stdout
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"continue":true}"#.to_string())
    }
}

impl Default for HookResponse {
    fn default() -> Self {
        Self::continue_()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_response_wire_format() {
        assert_eq!(HookResponse::continue_().to_json(), r#"{"continue":true}"#);
    }

    #[test]
    fn test_full_response_wire_format() {
        let response = HookResponse::with_context("Related: auth.md").with_permission(PermissionDecision::Ask);
        let value: serde_json::Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(value["continue"], true);
        assert_eq!(value["permissionDecision"], "ask");
        assert_eq!(value["additionalContext"], "Related: auth.md");
    }

    #[test]
    fn test_blank_context_is_dropped() {
        assert_eq!(HookResponse::with_context("  \n"), HookResponse::continue_());
        let response = HookResponse::from_parts(vec![String::new(), "a".to_string(), "b".to_string()]);
        assert_eq!(response.additional_context.as_deref(), Some("a\n\nb"));
    }
}
