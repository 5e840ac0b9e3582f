use cdss_rs_core::{
    CompletionClient, CompletionProvider, ConsultationPipeline, ConversationStore,
    InMemoryConversationRepository,
};
use cdss_rs_knowledge::{HybridRetriever, KnowledgeStore, RetrieverSettings};
use std::sync::Arc;
use std::time::Duration;

/// Pipeline plus handles on its in-memory conversation repository.
pub struct TestPipeline {
    pub pipeline: ConsultationPipeline,
    pub repository: Arc<InMemoryConversationRepository>,
}

/// Pipeline over the given store and provider with default settings and a
/// short completion timeout.
pub fn test_pipeline(
    store: Arc<dyn KnowledgeStore>,
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
) -> TestPipeline {
    let repository = Arc::new(InMemoryConversationRepository::new());
    let pipeline = ConsultationPipeline::builder(
        HybridRetriever::new(store, RetrieverSettings::default()),
        CompletionClient::new(provider, timeout, 6),
        ConversationStore::new(repository.clone()),
    )
    .embedding_dimension(4)
    .build();
    TestPipeline {
        pipeline,
        repository,
    }
}
