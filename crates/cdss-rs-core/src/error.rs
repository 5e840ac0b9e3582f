//! Error types for the core pipeline crate.

use crate::completion::CompletionError;
use crate::identity::IdentityError;
use crate::state::StateError;
use cdss_rs_config::ConfigError;
use cdss_rs_knowledge::KnowledgeError;
use thiserror::Error;

/// Errors returned while assembling or running the pipeline.
#[derive(Debug, Error)]
pub enum CdssCoreError {
    /// Configuration is missing or invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Knowledge base error.
    #[error("knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),
    /// Conversation repository error.
    #[error("state error: {0}")]
    State(#[from] StateError),
    /// Completion endpoint error.
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),
    /// Identity resolution error.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}
