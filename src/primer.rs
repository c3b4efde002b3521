//! Primer recovery snapshots
//!
//! A primer is written by HOLD right before the host compacts its history and
//! consumed by the next PERCEIVE for the same project. Primers are keyed by
//! project, not session, because the host may start a new session id after
//! compaction.
//!
//! Consumption is exactly-once: the file is claimed by renaming it away before
//! it is read, so two concurrent consumers cannot both observe it.

use crate::config::PrimerConfig;
use crate::error::{Error, Result};
use crate::session::SessionState;
use crate::storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Condensed single-use recovery snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primer {
    pub project: String,
    pub session_id: String,
    pub task_context: String,
    pub files_modified: Vec<String>,
    pub operation_counts: BTreeMap<String, u64>,
    pub narrative_tail: Vec<String>,
    pub pending_items: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Primer {
    /// Build a primer from the current session document
    pub fn from_state(state: &SessionState, narrative_tail: usize) -> Self {
        let wm = &state.working_memory;
        let mut task_context = wm
            .current_intent
            .clone()
            .unwrap_or_else(|| "(no recorded intent)".to_string());
        if !wm.attention_focus.is_empty() {
            task_context.push_str(&format!(" | focus: {}", wm.attention_focus.join(", ")));
        }

        let skip = wm.narrative.len().saturating_sub(narrative_tail);
        Self {
            project: state.metadata.project.clone(),
            session_id: state.metadata.session_id.clone(),
            task_context,
            files_modified: state.activity.files_modified.clone(),
            operation_counts: state.activity.operation_counts.clone(),
            narrative_tail: wm
                .narrative
                .iter()
                .skip(skip)
                .map(|e| format!("[{}] {}", e.kind, e.description))
                .collect(),
            pending_items: state
                .commitments
                .pending
                .iter()
                .map(|c| c.description.clone())
                .collect(),
            created_at: Utc::now(),
        }
    }

    /// Whether the primer is older than `ttl` at `now`
    pub fn is_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > ttl
    }

    /// Render as context text for the host
    pub fn render(&self) -> String {
        let mut out = format!(
            "Recovered context from before compaction (session {}, {}):\nTask: {}",
            self.session_id,
            self.created_at.format("%Y-%m-%d %H:%M UTC"),
            self.task_context
        );
        if !self.files_modified.is_empty() {
            out.push_str(&format!("\nFiles modified: {}", self.files_modified.join(", ")));
        }
        if !self.operation_counts.is_empty() {
            let ops: Vec<String> = self
                .operation_counts
                .iter()
                .map(|(tool, n)| format!("{} x{}", tool, n))
                .collect();
            out.push_str(&format!("\nOperations: {}", ops.join(", ")));
        }
        if !self.narrative_tail.is_empty() {
            out.push_str("\nRecent activity:");
            for line in &self.narrative_tail {
                out.push_str(&format!("\n- {}", line));
            }
        }
        if !self.pending_items.is_empty() {
            out.push_str("\nPending:");
            for item in &self.pending_items {
                out.push_str(&format!("\n- {}", item));
            }
        }
        out
    }
}

/// Project-keyed primer storage under `<root>/primers`
#[derive(Debug, Clone)]
pub struct PrimerStore {
    dir: PathBuf,
    ttl: chrono::Duration,
}

impl PrimerStore {
    pub fn new(root: &Path, config: &PrimerConfig) -> Self {
        Self {
            dir: root.join("primers"),
            ttl: chrono::Duration::minutes(config.ttl_minutes as i64),
        }
    }

    fn path(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.json", storage::sanitize_key(project)))
    }

    /// Persist a primer, replacing any previous one for the project
    pub fn save(&self, primer: &Primer) -> Result<PathBuf> {
        let path = self.path(&primer.project);
        storage::write_json(&path, primer)?;
        tracing::debug!(project = %primer.project, path = %path.display(), "Primer saved");
        Ok(path)
    }

    /// Read without consuming; stale primers read as absent
    pub fn peek(&self, project: &str) -> Result<Option<Primer>> {
        match storage::read_json::<Primer>(&self.path(project)) {
            Ok(primer) if primer.is_stale(self.ttl, Utc::now()) => Ok(None),
            Ok(primer) => Ok(Some(primer)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Consume the project's primer. Stale primers are discarded unread.
    pub fn take(&self, project: &str) -> Result<Option<Primer>> {
        let path = self.path(project);
        let claimed = self.dir.join(format!(
            ".{}.{}.claimed",
            storage::sanitize_key(project),
            uuid::Uuid::new_v4().simple()
        ));
        match std::fs::rename(&path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        }

        let primer = storage::read_json::<Primer>(&claimed);
        storage::remove_if_exists(&claimed)?;
        let primer = primer?;

        if primer.is_stale(self.ttl, Utc::now()) {
            tracing::debug!(project, created_at = %primer.created_at, "Discarded stale primer");
            return Ok(None);
        }
        Ok(Some(primer))
    }

    /// Remove stale or unreadable primers
    pub fn cleanup(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let now = Utc::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let discard = if name.starts_with('.') {
                // Leftover claim or temp file from an interrupted invocation
                storage::file_age(&path).is_some_and(|age| age.as_secs() > 60)
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                match storage::read_json::<Primer>(&path) {
                    Ok(primer) => primer.is_stale(self.ttl, now),
                    Err(_) => true,
                }
            } else {
                false
            };
            if discard && storage::remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
