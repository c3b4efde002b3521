//! Pluggable external knowledge store
//!
//! Defines the `KnowledgeStore` trait (semantic search, notes, document
//! ingestion and a relationship graph) and `Knowledge`, the handle the rest of
//! the crate uses. `Knowledge` wraps every call in a timeout and maps any
//! backend failure to `Error::ExternalUnavailable`, so callers only ever deal
//! with one failure kind and pick their own fallback value.
//!
//! ## Backends
//!
//! - `none`: every call is unavailable (the default)
//! - `http`: JSON over HTTP ([`HttpKnowledge`])
//! - `memory`: in-process token-overlap store ([`MemoryKnowledge`])

mod http;
mod memory;

pub use http::HttpKnowledge;
pub use memory::MemoryKnowledge;

use crate::config::{KnowledgeBackend, KnowledgeConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    /// Similarity in [0, 1]
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Store-wide counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub notes: u64,
    pub documents: u64,
    pub edges: u64,
}

impl KnowledgeStats {
    pub fn entries(&self) -> u64 {
        self.notes + self.documents
    }
}

/// Result of a relationship graph rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphReport {
    pub edges_created: u64,
    pub edges_total: u64,
}

/// Kind of a relationship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Modifies,
    References,
    DerivedFrom,
    RelatesTo,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Modifies => write!(f, "modifies"),
            Self::References => write!(f, "references"),
            Self::DerivedFrom => write!(f, "derived_from"),
            Self::RelatesTo => write!(f, "relates_to"),
        }
    }
}

/// Knowledge store backend interface.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Ranked similarity search
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>>;

    /// Store a free-form note, returning its id
    async fn note(&self, title: &str, content: &str, tags: &[String]) -> Result<String>;

    /// Ingest a file, returning its document id
    async fn ingest(&self, path: &Path) -> Result<String>;

    /// Create a relationship edge between two entries
    async fn relate(&self, from: &str, to: &str, kind: RelationKind, strength: f32) -> Result<()>;

    /// Store-wide counts
    async fn stats(&self) -> Result<KnowledgeStats>;

    /// Document id for an ingested path, if any
    async fn find_doc(&self, path: &Path) -> Result<Option<String>>;

    /// Rebuild the relationship graph
    async fn build_graph(&self) -> Result<GraphReport>;

    /// Human-readable backend name (used in logs)
    fn name(&self) -> &str;
}

/// Backend used when no knowledge store is configured
pub struct UnavailableKnowledge;

impl UnavailableKnowledge {
    fn unavailable<T>() -> Result<T> {
        Err(Error::ExternalUnavailable("no knowledge store configured".to_string()))
    }
}

#[async_trait]
impl KnowledgeStore for UnavailableKnowledge {
    async fn query(&self, _text: &str, _limit: usize) -> Result<Vec<QueryHit>> {
        Self::unavailable()
    }

    async fn note(&self, _title: &str, _content: &str, _tags: &[String]) -> Result<String> {
        Self::unavailable()
    }

    async fn ingest(&self, _path: &Path) -> Result<String> {
        Self::unavailable()
    }

    async fn relate(&self, _from: &str, _to: &str, _kind: RelationKind, _strength: f32) -> Result<()> {
        Self::unavailable()
    }

    async fn stats(&self) -> Result<KnowledgeStats> {
        Self::unavailable()
    }

    async fn find_doc(&self, _path: &Path) -> Result<Option<String>> {
        Self::unavailable()
    }

    async fn build_graph(&self) -> Result<GraphReport> {
        Self::unavailable()
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Timeout-guarded handle to a knowledge store backend
#[derive(Clone)]
pub struct Knowledge {
    inner: Arc<dyn KnowledgeStore>,
    timeout: Duration,
}

impl Knowledge {
    pub fn new(inner: Arc<dyn KnowledgeStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Build the backend selected by configuration
    pub fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let inner: Arc<dyn KnowledgeStore> = match config.backend {
            KnowledgeBackend::None => Arc::new(UnavailableKnowledge),
            KnowledgeBackend::Memory => Arc::new(MemoryKnowledge::new()),
            KnowledgeBackend::Http => {
                let url = config.url.as_deref().ok_or_else(|| {
                    Error::Config("knowledge.url is required for the http backend".to_string())
                })?;
                Arc::new(HttpKnowledge::new(url, timeout)?)
            }
        };
        Ok(Self::new(inner, timeout))
    }

    /// Handle that reports every call as unavailable
    pub fn unavailable() -> Self {
        Self::new(Arc::new(UnavailableKnowledge), Duration::from_millis(1))
    }

    pub fn backend_name(&self) -> &str {
        self.inner.name()
    }

    async fn guard<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::ExternalUnavailable(msg))) => Err(Error::ExternalUnavailable(msg)),
            Ok(Err(e)) => {
                tracing::debug!(op, backend = self.inner.name(), error = %e, "Knowledge call failed");
                Err(Error::ExternalUnavailable(format!("{}: {}", op, e)))
            }
            Err(_) => {
                tracing::debug!(op, backend = self.inner.name(), "Knowledge call timed out");
                Err(Error::ExternalUnavailable(format!(
                    "{} timed out after {}ms",
                    op,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        self.guard("query", self.inner.query(text, limit)).await
    }

    pub async fn note(&self, title: &str, content: &str, tags: &[String]) -> Result<String> {
        self.guard("note", self.inner.note(title, content, tags)).await
    }

    pub async fn ingest(&self, path: &Path) -> Result<String> {
        self.guard("ingest", self.inner.ingest(path)).await
    }

    pub async fn relate(&self, from: &str, to: &str, kind: RelationKind, strength: f32) -> Result<()> {
        self.guard("relate", self.inner.relate(from, to, kind, strength)).await
    }

    pub async fn stats(&self) -> Result<KnowledgeStats> {
        self.guard("stats", self.inner.stats()).await
    }

    pub async fn find_doc(&self, path: &Path) -> Result<Option<String>> {
        self.guard("find_doc", self.inner.find_doc(path)).await
    }

    pub async fn build_graph(&self) -> Result<GraphReport> {
        self.guard("build_graph", self.inner.build_graph()).await
    }

    /// Query with an empty fallback
    pub async fn query_or_empty(&self, text: &str, limit: usize) -> Vec<QueryHit> {
        self.query(text, limit).await.unwrap_or_default()
    }

    /// Highest similarity against existing content; 0.0 when unavailable
    pub async fn best_score(&self, text: &str) -> f32 {
        self.query_or_empty(text, 1)
            .await
            .iter()
            .map(|h| h.score)
            .fold(0.0, f32::max)
    }
}

/// Render hits as a compact context block
pub fn render_hits(heading: &str, hits: &[QueryHit]) -> Option<String> {
    if hits.is_empty() {
        return None;
    }
    let mut out = format!("{}:", heading);
    for hit in hits {
        out.push_str(&format!("\n- {} ({:.2})", hit.title, hit.score));
        if !hit.snippet.is_empty() {
            out.push_str(&format!(": {}", crate::text::truncate_chars(&hit.snippet, 200)));
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowKnowledge;

    #[async_trait]
    impl KnowledgeStore for SlowKnowledge {
        async fn query(&self, _text: &str, _limit: usize) -> Result<Vec<QueryHit>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
        async fn note(&self, _t: &str, _c: &str, _tags: &[String]) -> Result<String> {
            Err(Error::Internal("boom".to_string()))
        }
        async fn ingest(&self, _path: &Path) -> Result<String> {
            Ok("doc".to_string())
        }
        async fn relate(&self, _f: &str, _t: &str, _k: RelationKind, _s: f32) -> Result<()> {
            Ok(())
        }
        async fn stats(&self) -> Result<KnowledgeStats> {
            Ok(KnowledgeStats::default())
        }
        async fn find_doc(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        async fn build_graph(&self) -> Result<GraphReport> {
            Ok(GraphReport::default())
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_unavailable() {
        let knowledge = Knowledge::new(Arc::new(SlowKnowledge), Duration::from_millis(20));
        let err = knowledge.query("anything", 3).await.unwrap_err();
        assert!(matches!(err, Error::ExternalUnavailable(_)));
        assert!(knowledge.query_or_empty("anything", 3).await.is_empty());
        assert_eq!(knowledge.best_score("anything").await, 0.0);
    }

    #[tokio::test]
    async fn test_backend_error_maps_to_unavailable() {
        let knowledge = Knowledge::new(Arc::new(SlowKnowledge), Duration::from_millis(20));
        let err = knowledge.note("t", "c", &[]).await.unwrap_err();
        assert!(matches!(err, Error::ExternalUnavailable(_)));
        assert_eq!(knowledge.ingest(Path::new("a.md")).await.unwrap(), "doc");
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let knowledge = Knowledge::unavailable();
        assert!(knowledge.stats().await.is_err());
        assert_eq!(knowledge.backend_name(), "none");
    }

    #[test]
    fn test_from_config_requires_url_for_http() {
        let config = KnowledgeConfig {
            backend: KnowledgeBackend::Http,
            ..KnowledgeConfig::default()
        };
        assert!(matches!(Knowledge::from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_render_hits() {
        assert!(render_hits("Related", &[]).is_none());
        let text = render_hits(
            "Related",
            &[QueryHit {
                id: "n1".to_string(),
                title: "Auth flow".to_string(),
                snippet: "tokens rotate hourly".to_string(),
                score: 0.91,
                path: None,
            }],
        )
        .unwrap();
        assert_eq!(text, "Related:\n- Auth flow (0.91): tokens rotate hourly");
    }
}
