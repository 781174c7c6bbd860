use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;

use carbonex_core::config::VectorStoreConfig;
use carbonex_core::errors::CollaboratorError;

use crate::llm::LlmClient;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub section: String,
    pub score: f32,
    pub source_document: String,
}

/// Payload stored alongside every vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub section: String,
    pub source: String,
    pub category: String,
    pub chunk_index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<(), CollaboratorError>;

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), CollaboratorError>;

    /// Ranked best-first. No matches is an empty list, not an error.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError>;

    /// Cheap reachability check for readiness reporting.
    async fn ping(&self) -> Result<(), CollaboratorError>;
}

/// One document collection paired with the embedding model that indexed it.
#[derive(Clone)]
pub struct KnowledgeBase {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl KnowledgeBase {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self { llm, store, collection: collection.into() }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        let vector = self.llm.embed(query).await?;
        self.store.search(&self.collection, &vector, limit).await
    }
}

/// Qdrant over its REST API.
pub struct QdrantStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl QdrantStore {
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| CollaboratorError::Retrieval(error.to_string()))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.header("api-key", key.expose_secret()),
            None => builder,
        }
    }
}

fn retrieval_error(error: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Retrieval(error.to_string())
}

async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CollaboratorError::Retrieval(format!("qdrant returned {status}: {body}")))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ping(&self) -> Result<(), CollaboratorError> {
        let response = self
            .request(reqwest::Method::GET, "/collections")
            .send()
            .await
            .map_err(retrieval_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CollaboratorError::Retrieval(format!("qdrant returned {}", response.status())))
        }
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<(), CollaboratorError> {
        let path = format!("/collections/{collection}");
        let existing = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(retrieval_error)?;
        if existing.status().is_success() {
            return Ok(());
        }
        if existing.status() != reqwest::StatusCode::NOT_FOUND {
            ensure_success(existing).await?;
            return Ok(());
        }

        let body = json!({"vectors": {"size": vector_size, "distance": "Cosine"}});
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(&body)
            .send()
            .await
            .map_err(retrieval_error)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), CollaboratorError> {
        if points.is_empty() {
            return Ok(());
        }
        let points: Vec<_> = points
            .into_iter()
            .map(|point| json!({"id": point.id, "vector": point.vector, "payload": point.payload}))
            .collect();
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{collection}/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(retrieval_error)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        let body = json!({"vector": vector, "limit": limit, "with_payload": true});
        let response = self
            .request(reqwest::Method::POST, &format!("/collections/{collection}/points/search"))
            .json(&body)
            .send()
            .await
            .map_err(retrieval_error)?;
        let parsed: SearchResponse =
            ensure_success(response).await?.json().await.map_err(retrieval_error)?;
        Ok(parsed.result.into_iter().map(SearchHit::into_chunk).collect())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: HitPayload,
}

#[derive(Default, Deserialize)]
struct HitPayload {
    #[serde(default)]
    text: String,
    section: Option<String>,
    source: Option<String>,
}

impl SearchHit {
    fn into_chunk(self) -> RetrievedChunk {
        RetrievedChunk {
            text: self.payload.text,
            section: self.payload.section.unwrap_or_else(|| "General".to_string()),
            score: self.score,
            source_document: self.payload.source.unwrap_or_default(),
        }
    }
}
