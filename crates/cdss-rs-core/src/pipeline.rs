//! Consultation orchestration.
//!
//! One request walks `ParseRequest -> ResolveIdentity -> NormalizeQuery ->
//! Retrieve -> GateCheck -> {Refuse | BuildPrompt -> Complete} -> Persist ->
//! Respond`. Sub-steps report a [`StepOutcome`]; a failed step downgrades to the
//! next safe state instead of aborting, so every call ends in a reply.

use crate::completion::{
    CompletionClient, CompletionError, CompletionOutcome, OpenAiCompletionProvider,
};
use crate::conversations::{ConversationStore, ResolvedConversation};
use crate::error::CdssCoreError;
use crate::gate::{GateDecision, GroundingGate};
use crate::identity::Identity;
use crate::language::Language;
use crate::prompt::PromptAssembler;
use crate::state::{
    ConversationRepository, InMemoryConversationRepository, SqliteConversationRepository,
};
use cdss_rs_config::{CdssConfig, EmbeddingConfig};
use cdss_rs_knowledge::{
    Embedder, HttpEmbedder, HybridRetriever, KnowledgeError, LazyEmbedder, RetrievalReport,
    RetrieverSettings, ScoreWeights, SqliteKnowledgeStore, normalize_query_with,
};
use cdss_rs_protocol::{
    ConsultationRequest, ConsultationResponse, ConversationId, HistoryTurn, Role,
};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Result of one pipeline sub-step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Success(T),
    /// Nothing to report; not an error.
    Empty,
    Failed(String),
}

impl<T> StepOutcome<T> {
    pub fn success(self) -> Option<T> {
        match self {
            StepOutcome::Success(value) => Some(value),
            StepOutcome::Empty | StepOutcome::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }
}

/// Terminal classification of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Model answer.
    Success,
    /// Canned refusal from the gate.
    Refusal,
    /// Degraded reply, such as the completion apology.
    Error,
}

/// States visited while handling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    ParseRequest,
    ResolveIdentity,
    NormalizeQuery,
    Retrieve,
    GateCheck,
    Refuse,
    BuildPrompt,
    Complete,
    Persist,
    Respond,
    Responded(Outcome),
}

/// Reply produced for every handled request.
#[derive(Debug, Clone)]
pub struct ConsultationReply {
    pub content: String,
    pub conversation_id: Option<ConversationId>,
    pub outcome: Outcome,
    pub trace: Vec<PipelineState>,
    pub retrieval: RetrievalReport,
}

impl ConsultationReply {
    pub fn into_response(self) -> ConsultationResponse {
        ConsultationResponse::answer(self.content, self.conversation_id)
    }
}

/// Wires normalization, retrieval, gating, completion and persistence.
#[derive(Clone)]
pub struct ConsultationPipeline {
    retriever: HybridRetriever,
    gate: GroundingGate,
    prompt: PromptAssembler,
    completion: CompletionClient,
    conversations: ConversationStore,
    embedder: Option<Arc<dyn Embedder>>,
    embedding_dimension: usize,
    search_keywords: usize,
}

/// Builder for assembling a pipeline from explicit collaborators.
pub struct PipelineBuilder {
    retriever: HybridRetriever,
    completion: CompletionClient,
    conversations: ConversationStore,
    gate: GroundingGate,
    embedder: Option<Arc<dyn Embedder>>,
    embedding_dimension: usize,
    search_keywords: usize,
}

impl PipelineBuilder {
    pub fn new(
        retriever: HybridRetriever,
        completion: CompletionClient,
        conversations: ConversationStore,
    ) -> Self {
        Self {
            retriever,
            completion,
            conversations,
            gate: GroundingGate::default(),
            embedder: None,
            embedding_dimension: 384,
            search_keywords: 5,
        }
    }

    pub fn gate(mut self, gate: GroundingGate) -> Self {
        self.gate = gate;
        self
    }

    /// Embedder used when a request carries no usable vector.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Length of the zero vector substituted when no embedding is available.
    pub fn embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    pub fn search_keywords(mut self, count: usize) -> Self {
        self.search_keywords = count;
        self
    }

    pub fn build(self) -> ConsultationPipeline {
        ConsultationPipeline {
            retriever: self.retriever,
            gate: self.gate,
            prompt: PromptAssembler::new(),
            completion: self.completion,
            conversations: self.conversations,
            embedder: self.embedder,
            embedding_dimension: self.embedding_dimension,
            search_keywords: self.search_keywords,
        }
    }
}

impl ConsultationPipeline {
    pub fn builder(
        retriever: HybridRetriever,
        completion: CompletionClient,
        conversations: ConversationStore,
    ) -> PipelineBuilder {
        PipelineBuilder::new(retriever, completion, conversations)
    }

    /// Build the production pipeline described by a config.
    pub fn from_config(config: &CdssConfig) -> Result<Self, CdssCoreError> {
        let retrieval = &config.retrieval;
        let store = SqliteKnowledgeStore::open(&config.storage.knowledge_path)?.with_weights(
            ScoreWeights {
                vector: retrieval.vector_weight,
                text: retrieval.text_weight,
            },
        );
        let retriever = HybridRetriever::new(
            Arc::new(store),
            RetrieverSettings {
                primary_threshold: retrieval.tier1_threshold,
                relaxed_threshold: retrieval.tier2_threshold,
                match_count: retrieval.match_count,
                keyword_count: retrieval.keyword_count,
                keyword_match_count: retrieval.keyword_match_count,
            },
        );

        let repository: Arc<dyn ConversationRepository> = match &config.storage.conversations_path
        {
            Some(path) => Arc::new(SqliteConversationRepository::open(path)?),
            None => Arc::new(InMemoryConversationRepository::new()),
        };
        let provider = Arc::new(OpenAiCompletionProvider::new(config.completion.clone()));
        let completion = CompletionClient::from_config(provider, &config.completion);

        let mut builder = Self::builder(retriever, completion, ConversationStore::new(repository))
            .gate(GroundingGate::new(config.grounding.policy))
            .embedding_dimension(retrieval.embedding_dimension)
            .search_keywords(retrieval.search_keywords);
        if config.embedding.enabled {
            builder = builder.embedder(Arc::new(lazy_http_embedder(config.embedding.clone())));
        }
        info!(
            "consultation pipeline ready (policy={:?}, embedder={})",
            config.grounding.policy, config.embedding.enabled
        );
        Ok(builder.build())
    }

    /// Check configuration that must be present before any request runs.
    pub fn ensure_configured(&self) -> Result<(), CompletionError> {
        self.completion.ensure_ready()
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Handle one consultation for an already resolved caller.
    pub async fn handle(&self, request: ConsultationRequest, identity: Identity) -> ConsultationReply {
        let mut trace = vec![PipelineState::ParseRequest, PipelineState::ResolveIdentity];
        let question = request.question.trim();
        let language = Language::detect(question);
        info!(
            "handling consultation (owner_id={}, anonymous={}, question_len={}, language={})",
            identity.owner_id,
            identity.anonymous,
            question.len(),
            language
        );

        let conversation =
            match self
                .conversations
                .resolve(request.conversation_id.as_deref(), &identity.owner_id, question)
            {
                Some(resolved) => StepOutcome::Success(resolved),
                None => StepOutcome::Failed("conversation unavailable".to_string()),
            };
        let history = self.history_for(&request.history, &conversation);
        let conversation_id = conversation.success().map(|resolved| resolved.id);
        if let Some(id) = conversation_id {
            if let Err(err) = self.conversations.append(id, Role::User, question) {
                warn!(
                    "failed to persist user turn (conversation_id={}, error={})",
                    id, err
                );
            }
        }

        trace.push(PipelineState::NormalizeQuery);
        let query = normalize_query_with(question, self.search_keywords);
        debug!("normalized query (keywords={})", query.keywords.len());

        trace.push(PipelineState::Retrieve);
        let embedding = match self
            .query_embedding(request.query_vector.as_deref(), question)
            .await
        {
            StepOutcome::Success(vector) => vector,
            StepOutcome::Empty => vec![0.0; self.embedding_dimension],
            StepOutcome::Failed(reason) => {
                warn!("query embedding failed; using zero vector (error={})", reason);
                vec![0.0; self.embedding_dimension]
            }
        };
        let retrieval = self.retriever.retrieve(&embedding, &query).await;

        trace.push(PipelineState::GateCheck);
        let (content, outcome) = match self.gate.evaluate(&retrieval.results, language) {
            GateDecision::Refuse { message } => {
                trace.push(PipelineState::Refuse);
                (message, Outcome::Refusal)
            }
            GateDecision::Answer(grounding) => {
                trace.push(PipelineState::BuildPrompt);
                let principles = self.retriever.principles().await;
                let system_prompt = self
                    .prompt
                    .system_prompt_with_principles(&grounding, &principles, language);
                trace.push(PipelineState::Complete);
                match self
                    .completion
                    .complete(&system_prompt, &history, question, language)
                    .await
                {
                    CompletionOutcome::Answer(answer) => (answer, Outcome::Success),
                    CompletionOutcome::Fallback { message, reason } => {
                        warn!("answer degraded to apology (reason={})", reason);
                        (message, Outcome::Error)
                    }
                }
            }
        };

        if let Some(id) = conversation_id {
            trace.push(PipelineState::Persist);
            // Detached: the reply may be returned before the row is stored.
            let _ = self
                .conversations
                .persist_detached(id, Role::Assistant, content.clone());
        }
        trace.push(PipelineState::Respond);
        trace.push(PipelineState::Responded(outcome));
        info!(
            "consultation answered (outcome={:?}, tier={:?}, results={})",
            outcome,
            retrieval.resolved,
            retrieval.results.len()
        );
        ConsultationReply {
            content,
            conversation_id,
            outcome,
            trace,
            retrieval,
        }
    }

    /// Client history wins; otherwise a continued conversation's stored turns.
    fn history_for(
        &self,
        supplied: &[HistoryTurn],
        conversation: &StepOutcome<ResolvedConversation>,
    ) -> Vec<HistoryTurn> {
        if !supplied.is_empty() {
            return supplied.to_vec();
        }
        let StepOutcome::Success(ResolvedConversation { id, created: false }) = conversation else {
            return Vec::new();
        };
        match self.conversations.list_messages(*id) {
            Ok(messages) => messages
                .into_iter()
                .map(|message| HistoryTurn {
                    role: message.role,
                    content: message.content,
                })
                .collect(),
            Err(err) => {
                warn!(
                    "failed to load stored history (conversation_id={}, error={})",
                    id, err
                );
                Vec::new()
            }
        }
    }

    async fn query_embedding(&self, supplied: Option<&[f32]>, question: &str) -> StepOutcome<Vec<f32>> {
        if let Some(vector) = supplied {
            if !vector.is_empty() && vector.iter().all(|value| value.is_finite()) {
                return StepOutcome::Success(vector.to_vec());
            }
            debug!("ignoring unusable query vector (len={})", vector.len());
        }
        let Some(embedder) = &self.embedder else {
            return StepOutcome::Empty;
        };
        match embedder.embed(question).await {
            Ok(vector) if !vector.is_empty() => StepOutcome::Success(vector),
            Ok(_) => StepOutcome::Empty,
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }
}

fn lazy_http_embedder(config: EmbeddingConfig) -> LazyEmbedder {
    LazyEmbedder::new(move || {
        let api_key = config
            .api_key()
            .map_err(|err| KnowledgeError::Embedding(err.to_string()))?;
        let embedder = HttpEmbedder::new(
            &config.base_url,
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Arc::new(embedder) as Arc<dyn Embedder>)
    })
}

#[cfg(test)]
mod tests {
    use super::StepOutcome;
    use pretty_assertions::assert_eq;

    #[test]
    fn step_outcome_exposes_success_only() {
        assert_eq!(StepOutcome::Success(3).success(), Some(3));
        assert_eq!(StepOutcome::<u8>::Empty.success(), None);
        assert!(!StepOutcome::<u8>::Failed("x".to_string()).is_success());
    }
}
