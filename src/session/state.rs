//! Session document types
//!
//! A `SessionState` is the whole persisted working memory of one session.
//! It is always handled by value: load, transform, save.

use super::load::{load_level, CognitiveLoad, LoadLevel};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Current document schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Maximum number of attention focus entries
pub const MAX_FOCUS_ITEMS: usize = 7;

/// Maximum number of modified files remembered for the primer
pub const MAX_FILES_MODIFIED: usize = 20;

/// Persisted working memory of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub schema_version: u32,
    pub metadata: SessionMetadata,
    pub working_memory: WorkingMemory,
    pub cognitive_load: CognitiveLoad,
    /// Append-only decision log
    pub decisions: Vec<Decision>,
    pub commitments: Commitments,
    #[serde(default)]
    pub activity: Activity,
}

/// Session identity and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub project: String,
    pub cwd: PathBuf,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Intent, focus, context and narrative
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    pub current_intent: Option<String>,
    /// Most recent last; at most [`MAX_FOCUS_ITEMS`]
    pub attention_focus: Vec<String>,
    /// Most recent last; bounded by the store's configured maximum
    pub active_context: Vec<ContextItem>,
    /// Append-only, chronological
    pub narrative: Vec<NarrativeEvent>,
}

/// A piece of shared context (subagent summary, recovered primer, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub kind: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl ContextItem {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            source: None,
            added_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// One entry of the session narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub description: String,
}

/// A recorded decision; never modified once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub description: String,
    pub rationale: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(description: impl Into<String>, rationale: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: short_id(),
            description: description.into(),
            rationale: rationale.into(),
            confidence: confidence.clamp(0.0, 1.0),
            risk: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_risk(mut self, risk: impl Into<String>) -> Self {
        self.risk = Some(risk.into());
        self
    }
}

/// Commitment priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::InvalidInput(format!("unknown priority: {}", other))),
        }
    }
}

/// Something the session promised to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: String,
    pub description: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// Pending and completed commitments; an id appears in exactly one list
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Commitments {
    pub pending: Vec<Commitment>,
    pub completed: Vec<Commitment>,
}

/// Operation counters maintained by post-action events
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Activity {
    pub operation_counts: BTreeMap<String, u64>,
    /// Most recent last, deduplicated
    pub files_modified: Vec<String>,
}

impl Activity {
    pub fn total_operations(&self) -> u64 {
        self.operation_counts.values().sum()
    }
}

impl SessionState {
    /// Fresh document for a new session
    pub fn new(session_id: impl Into<String>, cwd: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            metadata: SessionMetadata {
                session_id: session_id.into(),
                project: project.into(),
                cwd: cwd.into(),
                start_time: now,
                last_updated: now,
            },
            working_memory: WorkingMemory::default(),
            cognitive_load: CognitiveLoad::default(),
            decisions: Vec::new(),
            commitments: Commitments::default(),
            activity: Activity::default(),
        }
    }

    /// Structural validation run before every save
    pub fn validate(&self, max_context_items: usize) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::Validation(format!(
                "unsupported schema version {}",
                self.schema_version
            )));
        }
        validate_session_id(&self.metadata.session_id)
            .map_err(|e| Error::Validation(e.to_string()))?;
        if self.metadata.project.trim().is_empty() {
            return Err(Error::Validation("project must not be empty".to_string()));
        }

        let wm = &self.working_memory;
        if wm.attention_focus.len() > MAX_FOCUS_ITEMS {
            return Err(Error::Validation(format!(
                "attention_focus holds {} items (max {})",
                wm.attention_focus.len(),
                MAX_FOCUS_ITEMS
            )));
        }
        if wm.active_context.len() > max_context_items {
            return Err(Error::Validation(format!(
                "active_context holds {} items (max {})",
                wm.active_context.len(),
                max_context_items
            )));
        }
        if wm.narrative.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
            return Err(Error::Validation("narrative is not chronological".to_string()));
        }

        let score = self.cognitive_load.score;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(Error::Validation(format!("cognitive load {} out of range", score)));
        }

        let mut ids = HashSet::new();
        for c in self.commitments.pending.iter().chain(&self.commitments.completed) {
            if c.id.is_empty() {
                return Err(Error::Validation("commitment without id".to_string()));
            }
            if !ids.insert(c.id.as_str()) {
                return Err(Error::Validation(format!("commitment {} appears twice", c.id)));
            }
        }
        if self.commitments.completed.iter().any(|c| c.completed_at.is_none()) {
            return Err(Error::Validation(
                "completed commitment without completion time".to_string(),
            ));
        }
        Ok(())
    }

    /// Derived read-only summary
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.metadata.session_id.clone(),
            project: self.metadata.project.clone(),
            intent: self.working_memory.current_intent.clone(),
            focus: self.working_memory.attention_focus.clone(),
            context_items: self.working_memory.active_context.len(),
            narrative_events: self.working_memory.narrative.len(),
            decisions: self.decisions.len(),
            pending: self.commitments.pending.len(),
            completed: self.commitments.completed.len(),
            operations: self.activity.total_operations(),
            load_score: self.cognitive_load.score,
            load_level: load_level(self.cognitive_load.score),
            duration_minutes: (self.metadata.last_updated - self.metadata.start_time).num_minutes(),
        }
    }
}

/// Compact view of a session for status lines and end-of-session notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub project: String,
    pub intent: Option<String>,
    pub focus: Vec<String>,
    pub context_items: usize,
    pub narrative_events: usize,
    pub decisions: usize,
    pub pending: usize,
    pub completed: usize,
    pub operations: u64,
    pub load_score: f64,
    pub load_level: LoadLevel,
    pub duration_minutes: i64,
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Session {} ({})", self.session_id, self.project)?;
        if let Some(intent) = &self.intent {
            writeln!(f, "Intent: {}", intent)?;
        }
        if !self.focus.is_empty() {
            writeln!(f, "Focus: {}", self.focus.join(", "))?;
        }
        writeln!(
            f,
            "Activity: {} operations, {} events, {} decisions over {} min",
            self.operations, self.narrative_events, self.decisions, self.duration_minutes
        )?;
        write!(
            f,
            "Commitments: {} pending, {} completed; load {:.2} ({})",
            self.pending, self.completed, self.load_score, self.load_level
        )
    }
}

/// Session ids become file names: ASCII alphanumerics, `-`, `_`, `.`
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid session id: {:?}", session_id)))
    }
}

pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}
