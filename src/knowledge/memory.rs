//! In-process knowledge store
//!
//! Similarity is the Jaccard overlap of lowercase word tokens, which is enough
//! for offline runs and deterministic tests. Uses `tokio::sync::RwLock` for
//! concurrent access.

use super::{GraphReport, KnowledgeStats, KnowledgeStore, QueryHit, RelationKind};
use crate::error::Result;
use crate::text::{preview, tokens};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Graph rebuild links entries at least this similar
const GRAPH_LINK_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    title: String,
    content: String,
    tags: Vec<String>,
    path: Option<String>,
    tokens: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Edge {
    from: String,
    to: String,
    kind: RelationKind,
    strength: f32,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    edges: Vec<Edge>,
}

/// In-memory knowledge store
#[derive(Default, Clone)]
pub struct MemoryKnowledge {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of relationship edges of a given kind
    pub async fn edge_count(&self, kind: RelationKind) -> usize {
        self.inner.read().await.edges.iter().filter(|e| e.kind == kind).count()
    }

    /// Titles of all notes carrying `tag`
    pub async fn titles_tagged(&self, tag: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .map(|e| e.title.clone())
            .collect()
    }

    async fn insert(&self, title: &str, content: &str, tags: &[String], path: Option<String>) -> String {
        let mut inner = self.inner.write().await;
        let prefix = if path.is_some() { "doc" } else { "note" };
        let id = format!("{}-{}", prefix, inner.entries.len() + 1);
        let token_set = tokens(&format!("{} {}", title, content)).collect();
        inner.entries.push(Entry {
            id: id.clone(),
            title: title.to_string(),
            content: content.to_string(),
            tags: tags.to_vec(),
            path,
            tokens: token_set,
        });
        id
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    shared / union
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledge {
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let query: HashSet<String> = tokens(text).collect();
        let inner = self.inner.read().await;
        let mut hits: Vec<QueryHit> = inner
            .entries
            .iter()
            .map(|e| QueryHit {
                id: e.id.clone(),
                title: e.title.clone(),
                snippet: preview(&e.content, 160),
                score: jaccard(&query, &e.tokens),
                path: e.path.clone(),
            })
            .filter(|h| h.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn note(&self, title: &str, content: &str, tags: &[String]) -> Result<String> {
        Ok(self.insert(title, content, tags, None).await)
    }

    async fn ingest(&self, path: &Path) -> Result<String> {
        let content = tokio::fs::read_to_string(path).await?;
        let key = path.display().to_string();
        if let Some(id) = self.find_doc(path).await? {
            return Ok(id);
        }
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| key.clone());
        Ok(self.insert(&title, &content, &[], Some(key)).await)
    }

    async fn relate(&self, from: &str, to: &str, kind: RelationKind, strength: f32) -> Result<()> {
        let edge = Edge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            strength: strength.clamp(0.0, 1.0),
        };
        let mut inner = self.inner.write().await;
        if !inner.edges.iter().any(|e| e.from == edge.from && e.to == edge.to && e.kind == edge.kind) {
            inner.edges.push(edge);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<KnowledgeStats> {
        let inner = self.inner.read().await;
        let documents = inner.entries.iter().filter(|e| e.path.is_some()).count() as u64;
        Ok(KnowledgeStats {
            notes: inner.entries.len() as u64 - documents,
            documents,
            edges: inner.edges.len() as u64,
        })
    }

    async fn find_doc(&self, path: &Path) -> Result<Option<String>> {
        let key = path.display().to_string();
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .find(|e| e.path.as_deref().is_some_and(|p| p == key || p.ends_with(&key) || key.ends_with(p)))
            .map(|e| e.id.clone()))
    }

    async fn build_graph(&self) -> Result<GraphReport> {
        let mut inner = self.inner.write().await;
        let mut created = 0;
        let mut new_edges = Vec::new();
        for (i, a) in inner.entries.iter().enumerate() {
            for b in inner.entries.iter().skip(i + 1) {
                let score = jaccard(&a.tokens, &b.tokens);
                let exists = inner.edges.iter().any(|e| {
                    e.kind == RelationKind::RelatesTo
                        && ((e.from == a.id && e.to == b.id) || (e.from == b.id && e.to == a.id))
                });
                if score >= GRAPH_LINK_THRESHOLD && !exists {
                    new_edges.push(Edge {
                        from: a.id.clone(),
                        to: b.id.clone(),
                        kind: RelationKind::RelatesTo,
                        strength: score,
                    });
                    created += 1;
                }
            }
        }
        inner.edges.extend(new_edges);
        Ok(GraphReport {
            edges_created: created,
            edges_total: inner.edges.len() as u64,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_note_and_query_ranks_by_overlap() {
        let store = MemoryKnowledge::new();
        store.note("auth", "jwt tokens rotate hourly", &[]).await.unwrap();
        store.note("db", "postgres connection pool size", &[]).await.unwrap();

        let hits = store.query("how do jwt tokens rotate", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "auth");

        let exact = store.query("auth jwt tokens rotate hourly", 1).await.unwrap();
        assert!((exact[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_ingest_and_find_doc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.md");
        std::fs::write(&path, "deployment guide for staging").unwrap();

        let store = MemoryKnowledge::new();
        let id = store.ingest(&path).await.unwrap();
        assert_eq!(store.ingest(&path).await.unwrap(), id);
        assert_eq!(store.find_doc(&path).await.unwrap(), Some(id));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.notes, 0);
    }

    #[tokio::test]
    async fn test_relate_is_idempotent() {
        let store = MemoryKnowledge::new();
        store.relate("a", "b", RelationKind::Modifies, 0.8).await.unwrap();
        store.relate("a", "b", RelationKind::Modifies, 0.8).await.unwrap();
        assert_eq!(store.edge_count(RelationKind::Modifies).await, 1);
    }

    #[tokio::test]
    async fn test_build_graph_links_similar_entries() {
        let store = MemoryKnowledge::new();
        store.note("cache", "redis cache eviction policy", &[]).await.unwrap();
        store.note("cache eviction", "redis cache eviction ttl", &[]).await.unwrap();
        store.note("unrelated", "font rendering", &[]).await.unwrap();

        let report = store.build_graph().await.unwrap();
        assert_eq!(report.edges_created, 1);
        let again = store.build_graph().await.unwrap();
        assert_eq!(again.edges_created, 0);
        assert_eq!(again.edges_total, 1);
    }
}
