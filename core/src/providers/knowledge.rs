//! Knowledge retrieval over a vector search backend.
//!
//! Falls back to a labelled mock result set whenever the backend is missing,
//! fails, times out, or returns documents that do not validate.

use super::KnowledgeRetrieval;
use crate::context::{ContextBus, ContextUpdate, DocumentInput};
use crate::schema::{AssetCategory, SourceDocument};
use crate::{AgroError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source label carried by fallback documents
pub const MOCK_SOURCE: &str = "MOCK_SOURCE";

const MOCK_CONTENT: &str = "Mock document content for query.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Search endpoint; unset means mock-only
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("SEARCH_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty()),
            api_key: std::env::var("SEARCH_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            timeout_ms: std::env::var("SEARCH_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10_000),
        }
    }
}

/// Raw vector search. Returned mappings are validated by the bus.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn query(
        &self,
        query: &str,
        asset_category: AssetCategory,
        top_k: usize,
    ) -> Result<Vec<Value>>;
}

/// JSON-over-HTTP search service.
///
/// Request: `{"query", "top_k", "filter": {"asset_category"}}`.
/// Response: `{"matches": [...]}` or a bare array. A match may carry its
/// fields inline or under `metadata` (with `text` as the content key).
pub struct HttpSearchBackend {
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpSearchBackend {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            http,
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &KnowledgeConfig) -> Result<Option<Self>> {
        match &config.endpoint {
            Some(endpoint) => Ok(Some(Self::new(
                endpoint.clone(),
                config.api_key.clone(),
                Duration::from_millis(config.timeout_ms),
            )?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn query(
        &self,
        query: &str,
        asset_category: AssetCategory,
        top_k: usize,
    ) -> Result<Vec<Value>> {
        let mut req = self.http.post(&self.endpoint).json(&json!({
            "query": query,
            "top_k": top_k,
            "filter": { "asset_category": asset_category.as_str() },
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AgroError::CapabilityUnavailable(format!(
                "search backend returned status {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await?;
        let matches = match body {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("matches") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(AgroError::CapabilityUnavailable(
                        "search response missing matches".into(),
                    ))
                }
            },
            _ => {
                return Err(AgroError::CapabilityUnavailable(
                    "search response is not JSON object or array".into(),
                ))
            }
        };

        Ok(matches.into_iter().map(flatten_match).collect())
    }
}

/// Lift `metadata` fields to the top level and map `text` to `content`
fn flatten_match(item: Value) -> Value {
    let Value::Object(mut obj) = item else {
        return item;
    };
    let mut flat = Map::new();
    if let Some(Value::Object(meta)) = obj.remove("metadata") {
        flat.extend(meta);
    }
    flat.extend(obj);
    if !flat.contains_key("content") {
        if let Some(text) = flat.remove("text") {
            flat.insert("content".into(), text);
        }
    }
    Value::Object(flat)
}

pub struct RagRetrieval {
    bus: Arc<ContextBus>,
    backend: Option<Arc<dyn SearchBackend>>,
    timeout: Duration,
}

impl RagRetrieval {
    pub fn new(
        bus: Arc<ContextBus>,
        backend: Option<Arc<dyn SearchBackend>>,
        timeout: Duration,
    ) -> Self {
        if backend.is_none() {
            warn!(target: "knowledge", "No search backend configured; knowledge retrieval runs in mock mode");
        }
        Self {
            bus,
            backend,
            timeout,
        }
    }

    pub fn mock_documents() -> Vec<SourceDocument> {
        vec![SourceDocument {
            content: MOCK_CONTENT.to_string(),
            source: MOCK_SOURCE.to_string(),
            page: 1,
            asset_category: AssetCategory::General,
            score: 1.0,
        }]
    }

    async fn write_mock(&self, session_id: &str) -> Result<usize> {
        let docs = Self::mock_documents();
        let count = docs.len();
        self.bus
            .update(session_id, ContextUpdate::new().documents(docs))
            .await?;
        info!(target: "knowledge", session = %session_id, count, "Mock documents retrieved");
        Ok(count)
    }
}

#[async_trait]
impl KnowledgeRetrieval for RagRetrieval {
    async fn search(
        &self,
        session_id: &str,
        query: &str,
        asset_category: AssetCategory,
        top_k: usize,
    ) -> Result<usize> {
        let Some(backend) = &self.backend else {
            return self.write_mock(session_id).await;
        };

        debug!(target: "knowledge", session = %session_id, category = %asset_category, top_k, "Querying search backend");
        let raw = match tokio::time::timeout(self.timeout, backend.query(query, asset_category, top_k)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(target: "knowledge", session = %session_id, error = %e, "Search backend failed; using mock documents");
                return self.write_mock(session_id).await;
            }
            Err(_) => {
                warn!(target: "knowledge", session = %session_id, timeout_ms = self.timeout.as_millis() as u64, "Search backend timed out; using mock documents");
                return self.write_mock(session_id).await;
            }
        };

        let count = raw.len();
        let update = ContextUpdate::new().documents(raw.into_iter().map(DocumentInput::Raw));
        match self.bus.update(session_id, update).await {
            Ok(_) => {
                info!(target: "knowledge", session = %session_id, count, "Retrieved documents from search backend");
                Ok(count)
            }
            Err(AgroError::Validation(reason)) => {
                warn!(target: "knowledge", session = %session_id, reason = %reason, "Search backend returned invalid documents; using mock documents");
                self.write_mock(session_id).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_pinecone_style_match() {
        let flat = flatten_match(json!({
            "id": "doc-1",
            "score": 0.81,
            "metadata": {"text": "Spray early", "source": "Manual.pdf", "page": 4, "asset_type": "CROP"}
        }));
        let doc = SourceDocument::from_value(&flat).unwrap();
        assert_eq!(doc.content, "Spray early");
        assert_eq!(doc.asset_category, AssetCategory::Crop);
        assert_eq!(doc.page, 4);
    }

    #[test]
    fn test_mock_documents_are_labelled() {
        let docs = RagRetrieval::mock_documents();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].is_mock());
        assert_eq!(docs[0].content, "Mock document content for query.");
    }
}
