//! Attention cache
//!
//! Knowledge lookups made by pre-action checks are cached in
//! `<root>/cache/attention.json`, keyed by the SHA-256 of action and query.
//! Entries expire after a fixed TTL; expired entries are pruned on write.
//! Concurrent writers race with last-write-wins, which only costs a lookup.

use crate::error::{Error, Result};
use crate::knowledge::QueryHit;
use crate::storage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    created_at: DateTime<Utc>,
    hits: Vec<QueryHit>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
}

/// File-backed TTL cache for attention lookups
#[derive(Debug, Clone)]
pub struct AttentionCache {
    path: PathBuf,
    ttl: Duration,
}

impl AttentionCache {
    pub fn new(root: &Path, ttl_minutes: u64) -> Self {
        Self {
            path: root.join("cache").join("attention.json"),
            ttl: Duration::minutes(ttl_minutes as i64),
        }
    }

    pub fn key(action: &str, query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(action.as_bytes());
        hasher.update([0u8]);
        hasher.update(query.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Fresh cached hits for `action` + `query`
    pub fn get(&self, action: &str, query: &str) -> Option<Vec<QueryHit>> {
        self.get_at(action, query, Utc::now())
    }

    fn get_at(&self, action: &str, query: &str, now: DateTime<Utc>) -> Option<Vec<QueryHit>> {
        let file = self.read();
        let entry = file.entries.get(&Self::key(action, query))?;
        (now - entry.created_at <= self.ttl).then(|| entry.hits.clone())
    }

    /// Store hits, pruning expired entries
    pub fn put(&self, action: &str, query: &str, hits: &[QueryHit]) -> Result<()> {
        self.put_at(action, query, hits, Utc::now())
    }

    fn put_at(&self, action: &str, query: &str, hits: &[QueryHit], now: DateTime<Utc>) -> Result<()> {
        let mut file = self.read();
        let ttl = self.ttl;
        file.entries.retain(|_, e| now - e.created_at <= ttl);
        file.entries.insert(
            Self::key(action, query),
            CacheEntry {
                created_at: now,
                hits: hits.to_vec(),
            },
        );
        storage::write_json(&self.path, &file)
    }

    /// Number of entries on disk, expired or not
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unreadable or corrupt caches read as empty
    fn read(&self) -> CacheFile {
        match storage::read_json(&self.path) {
            Ok(file) => file,
            Err(Error::NotFound(_)) => CacheFile::default(),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Discarding unreadable attention cache");
                CacheFile::default()
            }
        }
    }
}
