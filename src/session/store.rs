//! File-backed session store
//!
//! Directory layout:
//! ```text
//! <root>/sessions/
//! ├── <session_id>.json
//! └── <session_id>.lock      (present only while a save is in flight)
//! ```
//!
//! Every mutator is `load → transform → save`. Only `save` takes the lock,
//! so two mutators racing on the same session may lose one update
//! (last save wins). Sessions are effectively single-writer.

use super::load::{CognitiveLoad, LoadLevel};
use super::state::{
    short_id, validate_session_id, Commitment, ContextItem, Decision, NarrativeEvent, Priority,
    SessionState, SessionSummary, MAX_FILES_MODIFIED, MAX_FOCUS_ITEMS,
};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::storage::{self, FileLock};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durable per-session state store
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    lock_timeout: Duration,
    stale_lock: Duration,
    max_context_items: usize,
}

impl SessionStore {
    /// Create a store under `<root>/sessions`
    pub fn new(root: &Path, config: &StoreConfig) -> Self {
        Self {
            dir: root.join("sessions"),
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            stale_lock: Duration::from_secs(config.stale_lock_secs),
            max_context_items: config.max_context_items.max(1),
        }
    }

    /// Directory holding the session documents
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configured maximum of active context items
    pub fn max_context_items(&self) -> usize {
        self.max_context_items
    }

    fn state_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    fn lock_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{}.lock", session_id)))
    }

    // =========================================================================
    // Document lifecycle
    // =========================================================================

    /// Create and persist a new document, replacing any existing one
    pub fn init(&self, session_id: &str, cwd: &Path, project: &str) -> Result<SessionState> {
        let state = SessionState::new(session_id, cwd, project);
        self.save(session_id, &state)?;
        tracing::debug!(session_id, project, "Session initialized");
        Ok(state)
    }

    /// Whether a document exists for the session
    pub fn exists(&self, session_id: &str) -> bool {
        self.state_path(session_id).map(|p| p.exists()).unwrap_or(false)
    }

    /// Load the document for a session
    pub fn load(&self, session_id: &str) -> Result<SessionState> {
        let path = self.state_path(session_id)?;
        storage::read_json(&path).map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!("session {}", session_id)),
            Error::Serialization(e) => {
                Error::InvalidInput(format!("session {} is corrupt: {}", session_id, e))
            }
            other => other,
        })
    }

    /// Validate, lock, write to a temp file, rename, unlock
    pub fn save(&self, session_id: &str, state: &SessionState) -> Result<()> {
        let path = self.state_path(session_id)?;
        if state.metadata.session_id != session_id {
            return Err(Error::Validation(format!(
                "document belongs to session {}, not {}",
                state.metadata.session_id, session_id
            )));
        }
        state.validate(self.max_context_items)?;
        let bytes = serde_json::to_vec_pretty(state)?;

        std::fs::create_dir_all(&self.dir)?;
        let _lock = FileLock::acquire(&self.lock_path(session_id)?, self.lock_timeout, self.stale_lock)?;
        storage::write_atomic(&path, &bytes)
    }

    /// Remove a session's document and lock file
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let removed = storage::remove_if_exists(&self.state_path(session_id)?)?;
        storage::remove_if_exists(&self.lock_path(session_id)?)?;
        Ok(removed)
    }

    /// Ids of all stored sessions
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            })
            .filter(|id| !id.starts_with('.'))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Delete state and lock files not modified within `max_age`
    pub fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("json") | Some("lock") | Some("tmp")) {
                continue;
            }
            if storage::file_age(&path).is_some_and(|age| age > max_age)
                && storage::remove_if_exists(&path)?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed stale session files");
        }
        Ok(removed)
    }

    // =========================================================================
    // Derived reads
    // =========================================================================

    pub fn get_summary(&self, session_id: &str) -> Result<SessionSummary> {
        Ok(self.load(session_id)?.summary())
    }

    /// Level of the last persisted load calculation
    pub fn get_load_level(&self, session_id: &str) -> Result<LoadLevel> {
        Ok(self.load(session_id)?.cognitive_load.level)
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    fn mutate<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.load(session_id)?;
        let out = f(&mut state)?;
        state.metadata.last_updated = Utc::now();
        self.save(session_id, &state)?;
        Ok(out)
    }

    /// Replace the current intent
    pub fn update_intent(&self, session_id: &str, intent: &str) -> Result<()> {
        let intent = intent.trim();
        if intent.is_empty() {
            return Err(Error::InvalidInput("intent must not be empty".to_string()));
        }
        self.mutate(session_id, |s| {
            s.working_memory.current_intent = Some(intent.to_string());
            Ok(())
        })
    }

    /// Move `item` to the front of attention, evicting the oldest beyond 7
    pub fn update_focus(&self, session_id: &str, item: &str) -> Result<()> {
        let item = item.trim();
        if item.is_empty() {
            return Err(Error::InvalidInput("focus item must not be empty".to_string()));
        }
        self.mutate(session_id, |s| {
            let focus = &mut s.working_memory.attention_focus;
            focus.retain(|f| f != item);
            focus.push(item.to_string());
            evict_oldest(focus, MAX_FOCUS_ITEMS);
            Ok(())
        })
    }

    /// Append a context item, evicting the oldest beyond the configured max
    pub fn add_context(&self, session_id: &str, item: ContextItem) -> Result<()> {
        if item.content.trim().is_empty() {
            return Err(Error::InvalidInput("context content must not be empty".to_string()));
        }
        let max = self.max_context_items;
        self.mutate(session_id, |s| {
            let context = &mut s.working_memory.active_context;
            context.push(item);
            evict_oldest(context, max);
            Ok(())
        })
    }

    /// Append a narrative event
    pub fn add_narrative(&self, session_id: &str, kind: &str, description: &str) -> Result<()> {
        self.mutate(session_id, |s| {
            let narrative = &mut s.working_memory.narrative;
            // Clock steps backwards must not break chronological order.
            let now = Utc::now();
            let timestamp = narrative.last().map_or(now, |last| last.timestamp.max(now));
            narrative.push(NarrativeEvent {
                timestamp,
                kind: kind.to_string(),
                description: description.to_string(),
            });
            Ok(())
        })
    }

    /// Append a decision, returning its id
    pub fn add_decision(&self, session_id: &str, decision: Decision) -> Result<String> {
        if decision.description.trim().is_empty() {
            return Err(Error::InvalidInput("decision description must not be empty".to_string()));
        }
        self.mutate(session_id, |s| {
            let id = decision.id.clone();
            s.decisions.push(decision);
            Ok(id)
        })
    }

    /// Add a pending commitment, returning its id
    pub fn add_commitment(&self, session_id: &str, description: &str, priority: Priority) -> Result<String> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::InvalidInput("commitment description must not be empty".to_string()));
        }
        self.mutate(session_id, |s| {
            let id = short_id();
            s.commitments.pending.push(Commitment {
                id: id.clone(),
                description: description.to_string(),
                priority,
                created_at: Utc::now(),
                completed_at: None,
                outcome: None,
            });
            Ok(id)
        })
    }

    /// Move a pending commitment (matched by id, then description) to completed
    pub fn complete_commitment(&self, session_id: &str, key: &str, outcome: Option<&str>) -> Result<Commitment> {
        self.mutate(session_id, |s| {
            let pending = &mut s.commitments.pending;
            let index = pending
                .iter()
                .position(|c| c.id == key)
                .or_else(|| pending.iter().position(|c| c.description == key))
                .ok_or_else(|| Error::NotFound(format!("commitment {}", key)))?;

            let mut commitment = pending.remove(index);
            commitment.completed_at = Some(Utc::now());
            commitment.outcome = outcome.map(str::to_string);
            s.commitments.completed.push(commitment.clone());
            Ok(commitment)
        })
    }

    /// Recompute and persist cognitive load
    pub fn calculate_load(&self, session_id: &str) -> Result<CognitiveLoad> {
        self.mutate(session_id, |s| {
            let load = CognitiveLoad::compute(
                s.working_memory.active_context.len(),
                s.working_memory.attention_focus.len(),
                s.commitments.pending.len(),
                s.working_memory.narrative.len(),
            );
            s.cognitive_load = load.clone();
            Ok(load)
        })
    }

    /// Count one tool operation and remember the touched file
    pub fn record_operation(&self, session_id: &str, tool: &str, path: Option<&str>) -> Result<u64> {
        self.mutate(session_id, |s| {
            let count = s.activity.operation_counts.entry(tool.to_string()).or_insert(0);
            *count += 1;
            let count = *count;
            if let Some(path) = path {
                let files = &mut s.activity.files_modified;
                files.retain(|f| f != path);
                files.push(path.to_string());
                evict_oldest(files, MAX_FILES_MODIFIED);
            }
            Ok(count)
        })
    }
}

fn evict_oldest<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::load::LoadLevel;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            lock_timeout_ms: 100,
            max_context_items: 3,
            ..StoreConfig::default()
        };
        let store = SessionStore::new(dir.path(), &config);
        (dir, store)
    }

    fn init(store: &SessionStore, id: &str) -> SessionState {
        store.init(id, Path::new("/work/p"), "p").unwrap()
    }

    #[test]
    fn test_init_and_load() {
        let (_dir, store) = store();
        let created = init(&store, "s1");
        let loaded = store.load("s1").unwrap();
        assert_eq!(created, loaded);
        assert_eq!(loaded.metadata.project, "p");
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.load("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_invalid_session_id_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.init("../escape", Path::new("/"), "p"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_save_of_unchanged_load_is_byte_identical() {
        let (_dir, store) = store();
        init(&store, "s1");
        store.add_narrative("s1", "note", "A").unwrap();
        store.calculate_load("s1").unwrap();

        let path = store.dir().join("s1.json");
        let before = std::fs::read(&path).unwrap();
        let loaded = store.load("s1").unwrap();
        store.save("s1", &loaded).unwrap();
        assert_eq!(before, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_save_rejects_invalid_and_leaves_file_untouched() {
        let (_dir, store) = store();
        init(&store, "s1");
        let path = store.dir().join("s1.json");
        let before = std::fs::read(&path).unwrap();

        let mut bad = store.load("s1").unwrap();
        bad.working_memory.attention_focus = (0..9).map(|i| i.to_string()).collect();
        assert!(matches!(store.save("s1", &bad), Err(Error::Validation(_))));

        let mut foreign = store.load("s1").unwrap();
        foreign.metadata.session_id = "s2".to_string();
        assert!(matches!(store.save("s1", &foreign), Err(Error::Validation(_))));

        assert_eq!(before, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_save_under_contention_times_out_without_writing() {
        let (_dir, store) = store();
        init(&store, "s1");
        let path = store.dir().join("s1.json");
        let before = std::fs::read(&path).unwrap();

        let _held = FileLock::acquire(
            &store.dir().join("s1.lock"),
            Duration::from_millis(100),
            Duration::from_secs(30),
        )
        .unwrap();

        let err = store.update_intent("s1", "new intent").unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
        assert_eq!(before, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_narrative_appends_in_order() {
        let (_dir, store) = store();
        init(&store, "s1");
        for i in 0..12 {
            store.add_narrative("s1", "event", &format!("e{}", i)).unwrap();
        }
        let narrative = store.load("s1").unwrap().working_memory.narrative;
        assert_eq!(narrative.len(), 12);
        assert!(narrative.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(narrative[0].description, "e0");
        assert_eq!(narrative[11].description, "e11");
    }

    #[test]
    fn test_focus_evicts_oldest_first() {
        let (_dir, store) = store();
        init(&store, "s1");
        for i in 0..10 {
            store.update_focus("s1", &format!("f{}", i)).unwrap();
        }
        let focus = store.load("s1").unwrap().working_memory.attention_focus;
        assert_eq!(focus.len(), MAX_FOCUS_ITEMS);
        assert_eq!(focus.first().unwrap(), "f3");
        assert_eq!(focus.last().unwrap(), "f9");
    }

    #[test]
    fn test_focus_refresh_moves_item_to_end() {
        let (_dir, store) = store();
        init(&store, "s1");
        store.update_focus("s1", "a").unwrap();
        store.update_focus("s1", "b").unwrap();
        store.update_focus("s1", "a").unwrap();
        let focus = store.load("s1").unwrap().working_memory.attention_focus;
        assert_eq!(focus, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_context_is_fifo_bounded() {
        let (_dir, store) = store();
        init(&store, "s1");
        for i in 0..5 {
            store.add_context("s1", ContextItem::new("note", format!("c{}", i))).unwrap();
        }
        let context = store.load("s1").unwrap().working_memory.active_context;
        let contents: Vec<_> = context.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["c2", "c3", "c4"]);
    }

    #[test]
    fn test_empty_intent_is_invalid_input() {
        let (_dir, store) = store();
        init(&store, "s1");
        assert!(matches!(store.update_intent("s1", "  "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_decisions_append() {
        let (_dir, store) = store();
        init(&store, "s1");
        let id = store
            .add_decision("s1", Decision::new("use sqlite", "single host", 0.8).with_risk("standard"))
            .unwrap();
        let decisions = store.load("s1").unwrap().decisions;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].id, id);
        assert_eq!(decisions[0].risk.as_deref(), Some("standard"));
    }

    #[test]
    fn test_complete_commitment_moves_entry() {
        let (_dir, store) = store();
        init(&store, "s1");
        let id = store.add_commitment("s1", "write docs", Priority::Low).unwrap();
        store.add_commitment("s1", "ship auth", Priority::High).unwrap();

        let done = store.complete_commitment("s1", &id, Some("done")).unwrap();
        assert_eq!(done.description, "write docs");

        let state = store.load("s1").unwrap();
        assert_eq!(state.commitments.pending.len(), 1);
        assert_eq!(state.commitments.completed.len(), 1);
        assert!(state.commitments.completed[0].completed_at.is_some());
    }

    #[test]
    fn test_complete_unknown_commitment_mutates_nothing() {
        let (_dir, store) = store();
        init(&store, "s1");
        store.add_commitment("s1", "ship auth", Priority::High).unwrap();
        let path = store.dir().join("s1.json");
        let before = std::fs::read(&path).unwrap();

        let err = store.complete_commitment("s1", "missing", None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(before, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_example_scenario() {
        let (_dir, store) = store();
        store.init("S1", Path::new("/work/P"), "P").unwrap();
        for event in ["A", "B", "C"] {
            store.add_narrative("S1", "note", event).unwrap();
        }
        store.add_commitment("S1", "ship auth", Priority::High).unwrap();

        let load = store.calculate_load("S1").unwrap();
        assert!(load.score > 0.0 && load.score < 1.0);
        assert_eq!(load.level, LoadLevel::Low);
        assert_eq!(store.get_load_level("S1").unwrap(), LoadLevel::Low);

        let summary = store.get_summary("S1").unwrap();
        assert_eq!(summary.narrative_events, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.project, "P");

        store.complete_commitment("S1", "ship auth", Some("shipped")).unwrap();
        let state = store.load("S1").unwrap();
        assert!(state.commitments.pending.is_empty());
        assert_eq!(state.commitments.completed.len(), 1);
        assert_eq!(state.commitments.completed[0].outcome.as_deref(), Some("shipped"));
    }

    #[test]
    fn test_record_operation_counts_and_files() {
        let (_dir, store) = store();
        init(&store, "s1");
        store.record_operation("s1", "Edit", Some("src/a.rs")).unwrap();
        store.record_operation("s1", "Edit", Some("src/b.rs")).unwrap();
        let count = store.record_operation("s1", "Edit", Some("src/a.rs")).unwrap();
        store.record_operation("s1", "Bash", None).unwrap();

        assert_eq!(count, 3);
        let activity = store.load("s1").unwrap().activity;
        assert_eq!(activity.operation_counts["Edit"], 3);
        assert_eq!(activity.operation_counts["Bash"], 1);
        assert_eq!(activity.files_modified, vec!["src/b.rs", "src/a.rs"]);
        assert_eq!(activity.total_operations(), 4);
    }

    #[test]
    fn test_delete_and_list() {
        let (_dir, store) = store();
        init(&store, "s1");
        init(&store, "s2");
        assert_eq!(store.list().unwrap(), vec!["s1", "s2"]);
        assert!(store.delete("s1").unwrap());
        assert!(!store.delete("s1").unwrap());
        assert_eq!(store.list().unwrap(), vec!["s2"]);
    }

    #[test]
    fn test_cleanup_respects_age() {
        let (_dir, store) = store();
        init(&store, "s1");
        assert_eq!(store.cleanup(Duration::from_secs(3600)).unwrap(), 0);
        assert!(store.exists("s1"));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.cleanup(Duration::from_millis(1)).unwrap(), 1);
        assert!(!store.exists("s1"));
    }
}
