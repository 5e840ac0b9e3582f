//! Configuration schema for the consultation service.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root config for the CDSS service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CdssConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CdssConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> CdssConfigBuilder {
        CdssConfigBuilder::new()
    }
}

/// Builder for assembling a `CdssConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct CdssConfigBuilder {
    config: CdssConfig,
}

impl CdssConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: CdssConfig::default(),
        }
    }

    /// Replace the HTTP server configuration.
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Replace the retrieval configuration.
    pub fn retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.config.retrieval = retrieval;
        self
    }

    /// Replace the grounding policy configuration.
    pub fn grounding(mut self, grounding: GroundingConfig) -> Self {
        self.config.grounding = grounding;
        self
    }

    /// Replace the completion endpoint configuration.
    pub fn completion(mut self, completion: CompletionConfig) -> Self {
        self.config.completion = completion;
        self
    }

    /// Replace the query embedding configuration.
    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    /// Replace the caller identity configuration.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    /// Replace the storage configuration.
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Finalize and return the built `CdssConfig`.
    pub fn build(self) -> CdssConfig {
        self.config
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Tiered retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum hybrid score for the first tier.
    #[serde(default = "default_tier1_threshold")]
    pub tier1_threshold: f32,
    /// Minimum hybrid score for the relaxed second tier.
    #[serde(default)]
    pub tier2_threshold: f32,
    /// Result cap for the ranked tiers.
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    /// Number of ranked keywords composing the lexical search text.
    #[serde(default = "default_search_keywords")]
    pub search_keywords: usize,
    /// Number of keywords tried by the substring fallback.
    #[serde(default = "default_keyword_count")]
    pub keyword_count: usize,
    /// Result cap per fallback keyword.
    #[serde(default = "default_keyword_match_count")]
    pub keyword_match_count: usize,
    /// Weight of the cosine similarity in the hybrid score.
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    /// Weight of the lexical rank in the hybrid score.
    #[serde(default = "default_text_weight")]
    pub text_weight: f32,
    /// Length of the zero vector used when no embedding is available.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tier1_threshold: default_tier1_threshold(),
            tier2_threshold: 0.0,
            match_count: default_match_count(),
            search_keywords: default_search_keywords(),
            keyword_count: default_keyword_count(),
            keyword_match_count: default_keyword_match_count(),
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

fn default_tier1_threshold() -> f32 {
    0.05
}

fn default_match_count() -> usize {
    5
}

fn default_search_keywords() -> usize {
    5
}

fn default_keyword_count() -> usize {
    3
}

fn default_keyword_match_count() -> usize {
    2
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_text_weight() -> f32 {
    0.3
}

/// all-MiniLM-L6-v2 output size.
fn default_embedding_dimension() -> usize {
    384
}

/// What to do when retrieval finds no evidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefusalPolicy {
    /// Skip the model and return the fixed refusal text.
    #[default]
    HardRefuse,
    /// Let the model answer from general knowledge, labeled as ungrounded.
    LabeledGeneralKnowledge,
}

/// Grounding gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroundingConfig {
    #[serde(default)]
    pub policy: RefusalPolicy,
}

/// Chat completion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of trailing history turns forwarded to the model.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Environment variable holding the API key.
    #[serde(default = "default_completion_api_key_env")]
    pub api_key_env: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            model: default_completion_model(),
            temperature: default_temperature(),
            timeout_secs: default_completion_timeout_secs(),
            history_window: default_history_window(),
            api_key_env: default_completion_api_key_env(),
        }
    }
}

impl CompletionConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        read_credential(&self.api_key_env)
    }
}

fn default_completion_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_completion_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_completion_timeout_secs() -> u64 {
    15
}

fn default_history_window() -> usize {
    6
}

fn default_completion_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

/// Server-side query embedding, used when a request carries no vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key_env: None,
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Read the optional API key for the embedding endpoint.
    pub fn api_key(&self) -> Result<Option<String>, ConfigError> {
        match &self.api_key_env {
            Some(name) => read_credential(name).map(Some),
            None => Ok(None),
        }
    }
}

fn default_embedding_base_url() -> String {
    "http://127.0.0.1:8081/v1".to_string()
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    5
}

/// How missing or invalid caller credentials are handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Reject the request with 401.
    #[default]
    Strict,
    /// Continue under the anonymous owner.
    AnonymousFallback,
}

/// Caller identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Static bearer token to owner id table.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// User-info endpoint that resolves a bearer token to `{ "id": ... }`.
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Environment variable with an API key sent alongside the bearer token.
    #[serde(default)]
    pub remote_api_key_env: Option<String>,
    /// Request timeout for the user-info endpoint.
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default = "default_anonymous_owner")]
    pub anonymous_owner: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            tokens: HashMap::new(),
            remote_url: None,
            remote_api_key_env: None,
            remote_timeout_secs: default_remote_timeout_secs(),
            anonymous_owner: default_anonymous_owner(),
        }
    }
}

fn default_remote_timeout_secs() -> u64 {
    5
}

fn default_anonymous_owner() -> String {
    "anonymous".to_string()
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding clinical records and embeddings.
    #[serde(default = "default_knowledge_path")]
    pub knowledge_path: String,
    /// SQLite file holding conversations; in-memory when unset.
    #[serde(default = "default_conversations_path")]
    pub conversations_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            knowledge_path: default_knowledge_path(),
            conversations_path: default_conversations_path(),
        }
    }
}

fn default_knowledge_path() -> String {
    ".cdss/knowledge.db".to_string()
}

fn default_conversations_path() -> Option<String> {
    Some(".cdss/conversations.db".to_string())
}

fn read_credential(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingCredential(name.to_string())),
    }
}
