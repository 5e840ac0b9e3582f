//! Server-side query embedding.

use crate::error::KnowledgeError;
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

#[async_trait]
/// Produces a dense vector for a piece of text.
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError>;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, KnowledgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| KnowledgeError::Embedding(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| KnowledgeError::Embedding(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(KnowledgeError::Embedding(format!(
                "endpoint returned {status}"
            )));
        }
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| KnowledgeError::Embedding(err.to_string()))?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| KnowledgeError::Embedding("empty embedding response".to_string()))?;
        debug!(
            "embedded text (chars={}, dimension={})",
            text.chars().count(),
            vector.len()
        );
        Ok(vector)
    }
}

type EmbedderFactory = Box<dyn Fn() -> Result<Arc<dyn Embedder>, KnowledgeError> + Send + Sync>;

/// Embedder constructed on first use and shared afterwards.
pub struct LazyEmbedder {
    cell: OnceCell<Arc<dyn Embedder>>,
    factory: EmbedderFactory,
}

impl LazyEmbedder {
    pub fn new(
        factory: impl Fn() -> Result<Arc<dyn Embedder>, KnowledgeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    /// Whether the inner embedder has been constructed.
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    async fn inner(&self) -> Result<&Arc<dyn Embedder>, KnowledgeError> {
        self.cell
            .get_or_try_init(|| async {
                info!("initializing query embedder");
                (self.factory)()
            })
            .await
    }
}

#[async_trait]
impl Embedder for LazyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        self.inner().await?.embed(text).await
    }
}
