//! Chat completion client with a bounded wait and a fixed apology fallback.

use crate::language::Language;
use async_trait::async_trait;
use cdss_rs_config::CompletionConfig;
use cdss_rs_protocol::{HistoryTurn, Role};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by completion providers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompletionError {
    #[error("completion credential missing: environment variable {0} is not set")]
    MissingCredential(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("endpoint returned no choices")]
    EmptyChoice,
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
}

/// One chat message sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

impl CompletionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
/// Transport seam for chat completions.
pub trait CompletionProvider: Send + Sync {
    /// Send one non-streaming request and return the first choice text.
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, CompletionError>;

    /// Check that required credentials are available.
    fn ensure_ready(&self) -> Result<(), CompletionError> {
        Ok(())
    }
}

/// Provider for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionProvider {
    client: reqwest::Client,
    endpoint: String,
    config: CompletionConfig,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompletionProvider {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            config,
        }
    }

    fn api_key(&self) -> Result<String, CompletionError> {
        self.config
            .api_key()
            .map_err(|_| CompletionError::MissingCredential(self.config.api_key_env.clone()))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletionProvider {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        let api_key = self.api_key()?;
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": messages,
        });
        debug!(
            "sending completion request (model={}, messages={})",
            self.config.model,
            messages.len()
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyChoice)
    }

    fn ensure_ready(&self) -> Result<(), CompletionError> {
        self.api_key().map(|_| ())
    }
}

/// Result of one completion attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Model answer.
    Answer(String),
    /// Fixed apology returned in place of an answer.
    Fallback { message: String, reason: String },
}

impl CompletionOutcome {
    pub fn content(&self) -> &str {
        match self {
            CompletionOutcome::Answer(content) => content,
            CompletionOutcome::Fallback { message, .. } => message,
        }
    }
}

/// Wraps a provider with the history window and the timeout.
#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
    history_window: usize,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, timeout: Duration, history_window: usize) -> Self {
        Self {
            provider,
            timeout,
            history_window,
        }
    }

    pub fn from_config(provider: Arc<dyn CompletionProvider>, config: &CompletionConfig) -> Self {
        Self::new(
            provider,
            Duration::from_secs(config.timeout_secs),
            config.history_window,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn ensure_ready(&self) -> Result<(), CompletionError> {
        self.provider.ensure_ready()
    }

    /// `[system, last history turns, question]`; system turns in history are dropped.
    pub fn build_messages(
        &self,
        system_prompt: &str,
        history: &[HistoryTurn],
        question: &str,
    ) -> Vec<CompletionMessage> {
        let turns: Vec<&HistoryTurn> = history
            .iter()
            .filter(|turn| turn.role != Role::System)
            .collect();
        let start = turns.len().saturating_sub(self.history_window);
        let mut messages = Vec::with_capacity(turns.len() - start + 2);
        messages.push(CompletionMessage::new(Role::System, system_prompt));
        messages.extend(
            turns[start..]
                .iter()
                .map(|turn| CompletionMessage::new(turn.role, turn.content.clone())),
        );
        messages.push(CompletionMessage::new(Role::User, question));
        messages
    }

    /// Run one completion; failures and timeouts resolve to the apology.
    pub async fn complete(
        &self,
        system_prompt: &str,
        history: &[HistoryTurn],
        question: &str,
        language: Language,
    ) -> CompletionOutcome {
        let messages = self.build_messages(system_prompt, history, question);
        let result = match tokio::time::timeout(self.timeout, self.provider.complete(&messages)).await
        {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.timeout)),
        };
        match result {
            Ok(answer) => {
                info!("completion succeeded (answer_len={})", answer.len());
                CompletionOutcome::Answer(answer)
            }
            Err(err) => {
                warn!("completion failed; returning apology (error={})", err);
                CompletionOutcome::Fallback {
                    message: language.apology().to_string(),
                    reason: err.to_string(),
                }
            }
        }
    }
}
