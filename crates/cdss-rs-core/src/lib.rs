//! Consultation pipeline producing grounded clinical answers.
//!
//! This crate owns the grounding gate, prompt assembly, the completion client,
//! conversation persistence, caller identity and the orchestrating pipeline
//! used by the HTTP server and the CLI.

pub mod completion;
pub mod conversations;
pub mod error;
pub mod gate;
pub mod identity;
pub mod language;
pub mod pipeline;
pub mod prompt;
pub mod state;
pub mod types;

/// Completion client and provider seam.
pub use completion::{
    CompletionClient, CompletionError, CompletionMessage, CompletionOutcome, CompletionProvider,
    OpenAiCompletionProvider,
};
/// Conversation persistence facade.
pub use conversations::{ConversationStore, ResolvedConversation};
pub use error::CdssCoreError;
/// Grounding gate.
pub use gate::{ContextBlock, GateDecision, Grounding, GroundingContext, GroundingGate};
/// Caller identity.
pub use identity::{
    AnonymousFallbackResolver, ChainedResolver, Identity, IdentityError, IdentityResolver,
    RemoteIdentityResolver, StaticTokenResolver, resolver_from_config,
};
pub use language::Language;
/// Pipeline orchestration.
pub use pipeline::{
    ConsultationPipeline, ConsultationReply, Outcome, PipelineBuilder, PipelineState, StepOutcome,
};
pub use prompt::PromptAssembler;
/// Conversation repositories.
pub use state::{
    ConversationRepository, InMemoryConversationRepository, SqliteConversationRepository,
    StateError,
};
pub use types::{ChatMessage, Conversation};
