use async_trait::async_trait;
use cdss_rs_core::{CompletionError, CompletionMessage, CompletionProvider};
use cdss_rs_protocol::Role;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct FixedCompletion {
    response: String,
    calls: AtomicUsize,
}

impl FixedCompletion {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FixedCompletion {
    async fn complete(&self, _messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Never resolves; exercises the client timeout.
#[derive(Debug, Default)]
pub struct HangingCompletion {
    calls: AtomicUsize,
}

impl HangingCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for HangingCompletion {
    async fn complete(&self, _messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Err(CompletionError::EmptyChoice)
    }
}

#[derive(Debug, Clone)]
pub struct FailingCompletion {
    error: CompletionError,
}

impl FailingCompletion {
    pub fn new() -> Self {
        Self {
            error: CompletionError::Transport("connection refused".to_string()),
        }
    }

    pub fn with_error(error: CompletionError) -> Self {
        Self { error }
    }

    /// Provider whose credential is never available.
    pub fn unconfigured(env_name: impl Into<String>) -> Self {
        Self {
            error: CompletionError::MissingCredential(env_name.into()),
        }
    }
}

impl Default for FailingCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for FailingCompletion {
    async fn complete(&self, _messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        Err(self.error.clone())
    }

    fn ensure_ready(&self) -> Result<(), CompletionError> {
        match &self.error {
            CompletionError::MissingCredential(_) => Err(self.error.clone()),
            _ => Ok(()),
        }
    }
}

/// Answers by quoting the official data section of the system prompt.
///
/// Stands in for a model that follows the evidence-only instructions.
#[derive(Debug, Default)]
pub struct ContextEchoCompletion;

#[async_trait]
impl CompletionProvider for ContextEchoCompletion {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        let system = messages
            .iter()
            .find(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        let data = system
            .split_once("## Official Data\n\n")
            .map(|(_, data)| data)
            .unwrap_or_default();
        let mut quoted = Vec::new();
        let mut references = Vec::new();
        for line in data.lines() {
            if let Some(tag) = line.strip_prefix('[').and_then(|line| line.strip_suffix(']')) {
                if let Some(reference) = tag.split_whitespace().find_map(|part| part.strip_prefix("ref=")) {
                    references.push(reference.to_string());
                }
            } else if !line.trim().is_empty() {
                quoted.push(line.to_string());
            }
        }
        Ok(format!(
            "{}\n\nJustification: {}",
            quoted.join("\n"),
            references.join(", ")
        ))
    }
}

/// Records every request and answers with a fixed text.
#[derive(Debug, Clone, Default)]
pub struct RecordingCompletion {
    response: String,
    requests: Arc<Mutex<Vec<Vec<CompletionMessage>>>>,
}

impl RecordingCompletion {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<Vec<CompletionMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for RecordingCompletion {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        self.requests.lock().push(messages.to_vec());
        Ok(self.response.clone())
    }
}
