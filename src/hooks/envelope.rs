//! Inbound event envelope
//!
//! The envelope is a JSON object carrying the session identity plus one event:
//!
//! ```json
//! {"session_id": "s1", "cwd": "/work/app", "event": "pre_action",
//!  "tool_name": "Edit", "tool_input": {"file_path": "src/lib.rs"}}
//! ```
//!
//! An explicit `event` tag is preferred. Payloads without one go through the
//! legacy adapter in [`super::legacy`].

use super::legacy;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Event kinds understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    UserPrompt,
    PreAction,
    PostAction,
    Permission,
    SubagentDone,
    PreCompact,
    SessionEnd,
}

impl EventKind {
    pub fn all() -> &'static [EventKind] {
        &[
            Self::SessionStart,
            Self::UserPrompt,
            Self::PreAction,
            Self::PostAction,
            Self::Permission,
            Self::SubagentDone,
            Self::PreCompact,
            Self::SessionEnd,
        ]
    }

    /// Wire tag
    pub fn tag(self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::UserPrompt => "user_prompt",
            Self::PreAction => "pre_action",
            Self::PostAction => "post_action",
            Self::Permission => "permission",
            Self::SubagentDone => "subagent_done",
            Self::PreCompact => "pre_compact",
            Self::SessionEnd => "session_end",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.tag() == tag)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Risk tier attached to a permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Standard,
    High,
    Critical,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SessionStartEvent {
    /// Why the session started (`startup`, `resume`, `compact`, ...)
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserPromptEvent {
    pub prompt: String,
}

/// A tool action about to run
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionEvent {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
}

/// A tool action that finished
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionResultEvent {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default, alias = "tool_result")]
    pub tool_response: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PermissionEvent {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub risk_tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SubagentEvent {
    /// Subagent name or type
    #[serde(default, alias = "subagent_type")]
    pub subagent: Option<String>,
    #[serde(default, alias = "output")]
    pub result: Value,
}

impl SubagentEvent {
    /// Result as text; structured results are rendered as JSON
    pub fn result_text(&self) -> Option<String> {
        match &self.result {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CompactEvent {
    /// `manual` or `auto`
    #[serde(default)]
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SessionEndEvent {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Decoded event payload
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    SessionStart(SessionStartEvent),
    UserPrompt(UserPromptEvent),
    PreAction(ActionEvent),
    PostAction(ActionResultEvent),
    Permission(PermissionEvent),
    SubagentDone(SubagentEvent),
    PreCompact(CompactEvent),
    SessionEnd(SessionEndEvent),
}

impl HookEvent {
    /// Decode `payload` into the shape of `kind`
    pub fn decode(kind: EventKind, payload: Value) -> Result<Self> {
        Ok(match kind {
            EventKind::SessionStart => Self::SessionStart(shape(kind, payload)?),
            EventKind::UserPrompt => Self::UserPrompt(shape(kind, payload)?),
            EventKind::PreAction => Self::PreAction(shape(kind, payload)?),
            EventKind::PostAction => Self::PostAction(shape(kind, payload)?),
            EventKind::Permission => Self::Permission(shape(kind, payload)?),
            EventKind::SubagentDone => Self::SubagentDone(shape(kind, payload)?),
            EventKind::PreCompact => Self::PreCompact(shape(kind, payload)?),
            EventKind::SessionEnd => Self::SessionEnd(shape(kind, payload)?),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::SessionStart(_) => EventKind::SessionStart,
            Self::UserPrompt(_) => EventKind::UserPrompt,
            Self::PreAction(_) => EventKind::PreAction,
            Self::PostAction(_) => EventKind::PostAction,
            Self::Permission(_) => EventKind::Permission,
            Self::SubagentDone(_) => EventKind::SubagentDone,
            Self::PreCompact(_) => EventKind::PreCompact,
            Self::SessionEnd(_) => EventKind::SessionEnd,
        }
    }
}

fn shape<T: DeserializeOwned>(kind: EventKind, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| Error::InvalidInput(format!("malformed {} event: {}", kind, e)))
}

#[derive(Deserialize)]
struct Header {
    session_id: String,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    transcript_path: Option<PathBuf>,
    #[serde(default)]
    event: Option<String>,
}

/// Session identity plus one decoded event
#[derive(Debug, Clone, PartialEq)]
pub struct HookEnvelope {
    pub session_id: String,
    pub cwd: PathBuf,
    pub project: Option<String>,
    pub transcript_path: Option<PathBuf>,
    pub event: HookEvent,
}

impl HookEnvelope {
    /// Parse an envelope, inferring the event kind when it is not tagged
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_value(parse_object(raw)?, None)
    }

    /// Parse an envelope, forcing its payload into the shape of `kind`
    pub fn parse_as(raw: &str, kind: EventKind) -> Result<Self> {
        Self::from_value(parse_object(raw)?, Some(kind))
    }

    pub fn from_value(value: Value, forced: Option<EventKind>) -> Result<Self> {
        let header: Header = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidInput(format!("malformed envelope: {}", e)))?;
        if header.session_id.trim().is_empty() {
            return Err(Error::InvalidInput("envelope has an empty session_id".to_string()));
        }

        let kind = match (forced, header.event.as_deref()) {
            (Some(kind), _) => kind,
            (None, Some(tag)) => EventKind::from_tag(tag)
                .ok_or_else(|| Error::InvalidInput(format!("unknown event tag: {}", tag)))?,
            (None, None) => legacy::infer_kind(&value)?,
        };

        Ok(Self {
            session_id: header.session_id,
            cwd: header.cwd.unwrap_or_else(|| PathBuf::from(".")),
            project: header.project.filter(|p| !p.trim().is_empty()),
            transcript_path: header.transcript_path,
            event: HookEvent::decode(kind, value)?,
        })
    }

    /// Explicit project, else the cwd's final component, else `default`
    pub fn project_name(&self) -> String {
        self.project
            .clone()
            .or_else(|| dir_name(&self.cwd))
            .unwrap_or_else(|| "default".to_string())
    }
}

fn dir_name(cwd: &Path) -> Option<String> {
    let resolved;
    let path = if cwd.is_relative() {
        resolved = std::env::current_dir().ok()?.join(cwd);
        resolved.as_path()
    } else {
        cwd
    };
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .last()
}

fn parse_object(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| Error::InvalidInput(format!("envelope is not JSON: {}", e)))?;
    if !value.is_object() {
        return Err(Error::InvalidInput("envelope must be a JSON object".to_string()));
    }
    Ok(value)
}
