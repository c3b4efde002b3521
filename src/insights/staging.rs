//! On-disk staging area for extracted insights
//!
//! Layout under `<root>/insights/<project>/`:
//!
//! ```text
//! index.json          append-only list of every staged insight
//! index.lock          guards read-modify-write of the index
//! decision/<id>.json  pending records, one directory per category
//! pattern/<id>.json
//! gotcha/<id>.json
//! archive/<id>.json   records that reached a terminal outcome
//! ```
//!
//! Index entries are never removed; review outcomes flip `promoted` and set
//! `outcome`, and the record file moves from its category directory into
//! `archive/`.

use super::insight::{IndexEntry, Insight, InsightCategory, InsightIndex, PromotionOutcome};
use crate::error::{Error, Result};
use crate::storage::{self, FileLock};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;

const INDEX_FILE: &str = "index.json";
const INDEX_LOCK: &str = "index.lock";
const ARCHIVE_DIR: &str = "archive";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(30);

/// Per-project insight staging area
#[derive(Debug, Clone)]
pub struct InsightStaging {
    dir: PathBuf,
    project: String,
    lock_timeout: Duration,
    stale_lock: Duration,
}

impl InsightStaging {
    pub fn new(root: &Path, project: &str) -> Self {
        let project = storage::sanitize_key(project);
        Self {
            dir: root.join("insights").join(&project),
            project,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock: DEFAULT_STALE_LOCK,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration, stale_after: Duration) -> Self {
        self.lock_timeout = timeout;
        self.stale_lock = stale_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Create the directory layout and an empty index. Idempotent.
    pub fn init(&self) -> Result<()> {
        for category in InsightCategory::all() {
            std::fs::create_dir_all(self.dir.join(category.dir_name()))?;
        }
        std::fs::create_dir_all(self.dir.join(ARCHIVE_DIR))?;
        let index_path = self.dir.join(INDEX_FILE);
        if !index_path.exists() {
            storage::write_json(&index_path, &InsightIndex::default())?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.dir.join(INDEX_FILE).exists()
    }

    /// Current index; empty when the staging area does not exist yet
    pub fn index(&self) -> Result<InsightIndex> {
        match storage::read_json(&self.dir.join(INDEX_FILE)) {
            Ok(index) => Ok(index),
            Err(Error::NotFound(_)) => Ok(InsightIndex::default()),
            Err(e) => Err(e),
        }
    }

    /// Stage a new insight: write its record and append an index entry
    pub fn stage(&self, insight: &Insight) -> Result<PathBuf> {
        self.init()?;
        let _lock = self.lock()?;
        let mut index = self.index()?;
        if index.get(&insight.id).is_some() {
            return Err(Error::InvalidInput(format!("insight {} already staged", insight.id)));
        }
        let path = self.record_path(insight.category, &insight.id);
        storage::write_json(&path, insight)?;
        index.entries.push(IndexEntry::from_insight(insight));
        storage::write_json(&self.dir.join(INDEX_FILE), &index)?;
        tracing::debug!(
            project = %self.project,
            id = %insight.id,
            category = %insight.category,
            "Staged insight"
        );
        Ok(path)
    }

    /// Load a staged or archived record by id
    pub fn load(&self, id: &str) -> Result<Insight> {
        let index = self.index()?;
        let entry = index
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("insight {}", id)))?;
        let path = if entry.promoted {
            self.archive_path(id)
        } else {
            self.record_path(entry.category, id)
        };
        storage::read_json(&path)
    }

    /// Pending (not yet reviewed) records, oldest first
    pub fn pending(&self) -> Result<Vec<Insight>> {
        let index = self.index()?;
        let mut out = Vec::new();
        for entry in index.pending() {
            match storage::read_json::<Insight>(&self.record_path(entry.category, &entry.id)) {
                Ok(insight) => out.push(insight),
                Err(e) => tracing::warn!(id = %entry.id, error = %e, "Skipping unreadable insight record"),
            }
        }
        Ok(out)
    }

    /// Number of index entries (any state) attributed to a session
    pub fn count_for_session(&self, session_id: &str) -> Result<usize> {
        Ok(self.index()?.count_for_session(session_id))
    }

    /// Move a pending insight to its terminal state.
    ///
    /// `content` replaces the stored text (edited promotions); `target` is
    /// the document the insight was appended to.
    pub fn finalize(
        &self,
        id: &str,
        outcome: PromotionOutcome,
        content: Option<&str>,
        target: Option<&Path>,
    ) -> Result<Insight> {
        let _lock = self.lock()?;
        let mut index = self.index()?;
        let entry = index
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("insight {}", id)))?;
        if entry.promoted {
            return Err(Error::InvalidInput(format!("insight {} was already reviewed", id)));
        }

        let record_path = self.record_path(entry.category, id);
        let mut insight: Insight = storage::read_json(&record_path)?;
        insight.promoted = true;
        if let Some(content) = content {
            insight.content = content.to_string();
        }
        storage::write_json(&self.archive_path(id), &insight)?;
        storage::remove_if_exists(&record_path)?;

        entry.promoted = true;
        entry.outcome = Some(outcome);
        entry.promoted_at = Some(Utc::now());
        entry.target = target.map(|t| t.display().to_string());
        if content.is_some() {
            entry.preview = crate::text::preview(&insight.content, 80);
        }
        storage::write_json(&self.dir.join(INDEX_FILE), &index)?;

        tracing::info!(project = %self.project, id = %id, outcome = ?outcome, "Insight reviewed");
        Ok(insight)
    }

    /// Delete archived records older than `max_age`; index entries stay
    pub fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let archive = self.dir.join(ARCHIVE_DIR);
        let entries = match std::fs::read_dir(&archive) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if storage::file_age(&path).is_some_and(|age| age > max_age) && storage::remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn lock(&self) -> Result<FileLock> {
        std::fs::create_dir_all(&self.dir)?;
        FileLock::acquire(&self.dir.join(INDEX_LOCK), self.lock_timeout, self.stale_lock)
    }

    fn record_path(&self, category: InsightCategory, id: &str) -> PathBuf {
        self.dir.join(category.dir_name()).join(format!("{}.json", id))
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.dir.join(ARCHIVE_DIR).join(format!("{}.json", id))
    }
}
