//! JSON-over-HTTP knowledge store client
//!
//! Endpoints, relative to the configured base URL:
//!
//! | call          | request                                  | response              |
//! |---------------|------------------------------------------|-----------------------|
//! | `query`       | `POST /query {text, limit}`              | `{results: [hit]}`    |
//! | `note`        | `POST /notes {title, content, tags}`     | `{id}`                |
//! | `ingest`      | `POST /documents {path}`                 | `{id}`                |
//! | `relate`      | `POST /relations {from, to, kind, strength}` | any 2xx           |
//! | `stats`       | `GET /stats`                             | `{notes, documents, edges}` |
//! | `find_doc`    | `GET /documents?path=...`                | `{id: string \| null}` |
//! | `build_graph` | `POST /graph/build`                      | `{edges_created, edges_total}` |

use super::{GraphReport, KnowledgeStats, KnowledgeStore, QueryHit, RelationKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// HTTP knowledge store backend
pub struct HttpKnowledge {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryHit>,
}

#[derive(Serialize)]
struct NoteRequest<'a> {
    title: &'a str,
    content: &'a str,
    tags: &'a [String],
}

#[derive(Serialize)]
struct IngestRequest {
    path: String,
}

#[derive(Serialize)]
struct RelateRequest<'a> {
    from: &'a str,
    to: &'a str,
    kind: RelationKind,
    strength: f32,
}

#[derive(Deserialize)]
struct IdResponse {
    id: Option<String>,
}

impl HttpKnowledge {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Ok(response.error_for_status()?)
    }

    async fn created_id<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String> {
        let response: IdResponse = self.post(path, body).await?.json().await?;
        response
            .id
            .ok_or_else(|| Error::ExternalUnavailable(format!("{} returned no id", path)))
    }
}

#[async_trait]
impl KnowledgeStore for HttpKnowledge {
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let response: QueryResponse = self
            .post("/query", &QueryRequest { text, limit })
            .await?
            .json()
            .await?;
        Ok(response.results)
    }

    async fn note(&self, title: &str, content: &str, tags: &[String]) -> Result<String> {
        self.created_id("/notes", &NoteRequest { title, content, tags }).await
    }

    async fn ingest(&self, path: &Path) -> Result<String> {
        let body = IngestRequest {
            path: path.display().to_string(),
        };
        self.created_id("/documents", &body).await
    }

    async fn relate(&self, from: &str, to: &str, kind: RelationKind, strength: f32) -> Result<()> {
        self.post("/relations", &RelateRequest { from, to, kind, strength }).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<KnowledgeStats> {
        let response = self.client.get(self.url("/stats")).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn find_doc(&self, path: &Path) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url("/documents"))
            .query(&[("path", path.display().to_string())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: IdResponse = response.error_for_status()?.json().await?;
        Ok(body.id)
    }

    async fn build_graph(&self) -> Result<GraphReport> {
        let response = self.post("/graph/build", &serde_json::json!({})).await?;
        Ok(response.json().await?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let store = HttpKnowledge::new("http://127.0.0.1:7411/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.url("/query"), "http://127.0.0.1:7411/query");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        // Port 9 (discard) is essentially never serving HTTP locally.
        let store = HttpKnowledge::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(store.query("anything", 1).await.is_err());
        assert!(store.stats().await.is_err());
    }

    #[test]
    fn test_relate_request_wire_format() {
        let body = serde_json::to_value(RelateRequest {
            from: "a",
            to: "b",
            kind: RelationKind::Modifies,
            strength: 0.5,
        })
        .unwrap();
        assert_eq!(body["kind"], "modifies");
        assert_eq!(body["from"], "a");
    }
}
