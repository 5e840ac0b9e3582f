//! End-to-end consultation pipeline tests.

use cdss_rs_core::{
    ConversationRepository, Identity, Language, Outcome, PipelineState, StateError,
};
use cdss_rs_knowledge::{
    ClinicalRecord, KnowledgeStore, RecordMetadata, RetrievalTier, SqliteKnowledgeStore,
};
use cdss_rs_protocol::{ConsultationRequest, ConversationId, HistoryTurn, RecordSource, Role};
use cdss_rs_test_utils::{
    ContextEchoCompletion, FailingCompletion, FailingKnowledgeStore, FixedCompletion,
    HangingCompletion, RecordingCompletion, StubKnowledgeStore, product_result, test_pipeline,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REFUSAL: &str = "No official data found in current clinical guidelines";
const TIMEOUT: Duration = Duration::from_secs(2);

fn owner() -> Identity {
    Identity::user("dentist-1")
}

fn xeros_store() -> Arc<dyn KnowledgeStore> {
    let store = SqliteKnowledgeStore::open_in_memory().expect("store");
    store
        .upsert_records(&[
            ClinicalRecord {
                id: "product-3456789".to_string(),
                source: RecordSource::Product,
                content: "Product: Dentaid Xeros Spray\nUses: dry mouth, xerostomia\nDescription: Sodium fluoride 226 ppm. Spray three times a day.".to_string(),
                metadata: RecordMetadata::Product {
                    name: "Dentaid Xeros Spray".to_string(),
                    code: Some("3456789".to_string()),
                    ingredients: Some("Sodium fluoride 226 ppm".to_string()),
                    indications: vec!["dry mouth".to_string(), "xerostomia".to_string()],
                    limits: Vec::new(),
                    patient_profile: Vec::new(),
                    mechanism: None,
                    usage_notes: None,
                },
                embedding: vec![0.5, 0.5, 0.5, 0.5],
            },
            ClinicalRecord {
                id: "product-1111111".to_string(),
                source: RecordSource::Product,
                content: "Product: Elmex Toothpaste\nUses: caries prevention\nDescription: Amine fluoride 1400 ppm.".to_string(),
                metadata: RecordMetadata::Product {
                    name: "Elmex Toothpaste".to_string(),
                    code: Some("1111111".to_string()),
                    ingredients: None,
                    indications: vec!["caries prevention".to_string()],
                    limits: Vec::new(),
                    patient_profile: Vec::new(),
                    mechanism: None,
                    usage_notes: None,
                },
                embedding: vec![0.0, 0.0, 1.0, 0.0],
            },
        ])
        .expect("upsert");
    Arc::new(store)
}

async fn eventually_messages(
    repository: &dyn ConversationRepository,
    id: ConversationId,
    expected: usize,
) -> Vec<cdss_rs_core::ChatMessage> {
    for _ in 0..100 {
        let messages = repository.list_messages(id).expect("messages");
        if messages.len() >= expected {
            return messages;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("messages never persisted");
}

#[tokio::test]
async fn empty_retrieval_refuses_without_calling_completion() {
    let store = Arc::new(StubKnowledgeStore::empty());
    let provider = Arc::new(FixedCompletion::new("should not be used"));
    let harness = test_pipeline(store.clone(), provider.clone(), TIMEOUT);

    let reply = harness
        .pipeline
        .handle(ConsultationRequest::new("Orthodontic retainer cleaning?"), owner())
        .await;

    assert_eq!(reply.content, REFUSAL);
    assert_eq!(reply.outcome, Outcome::Refusal);
    assert_eq!(provider.calls(), 0);
    assert_eq!(store.similarity_calls(), 2);
    assert!(store.keyword_calls() > 0);
    assert!(reply.trace.contains(&PipelineState::Refuse));
    assert!(!reply.trace.contains(&PipelineState::Complete));
    assert_eq!(
        reply.trace.last(),
        Some(&PipelineState::Responded(Outcome::Refusal))
    );
}

#[tokio::test]
async fn zero_vector_without_keyword_overlap_returns_exact_refusal() {
    let provider = Arc::new(FixedCompletion::new("unused"));
    let harness = test_pipeline(xeros_store(), provider.clone(), TIMEOUT);
    let mut request = ConsultationRequest::new("Orthodontic bracket bonding protocol");
    request.query_vector = Some(vec![0.0; 4]);

    let reply = harness.pipeline.handle(request, owner()).await;
    assert_eq!(reply.content, REFUSAL);
    assert_eq!(provider.calls(), 0);
    assert_eq!(reply.retrieval.resolved, None);
}

#[tokio::test]
async fn french_question_gets_french_refusal() {
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::empty()),
        Arc::new(FixedCompletion::new("unused")),
        TIMEOUT,
    );
    let reply = harness
        .pipeline
        .handle(
            ConsultationRequest::new("Quelle est la posologie pour une gouttière ?"),
            owner(),
        )
        .await;
    assert_eq!(reply.content, Language::French.refusal());
}

#[tokio::test]
async fn answer_reports_only_the_recorded_concentration() {
    let harness = test_pipeline(xeros_store(), Arc::new(ContextEchoCompletion), TIMEOUT);
    let reply = harness
        .pipeline
        .handle(
            ConsultationRequest::new("What ppm concentration does Dentaid Xeros Spray contain?"),
            owner(),
        )
        .await;

    assert_eq!(reply.outcome, Outcome::Success);
    assert_eq!(reply.retrieval.resolved, Some(RetrievalTier::Primary));
    assert!(reply.content.contains("226 ppm"), "{}", reply.content);
    assert!(!reply.content.contains("1400 ppm"), "{}", reply.content);
    assert!(!reply.content.contains("1500 ppm"), "{}", reply.content);
    assert!(reply.content.contains("Justification: 3456789"));
}

#[tokio::test]
async fn hanging_completion_returns_apology_within_timeout() {
    let provider = Arc::new(HangingCompletion::new());
    let timeout = Duration::from_millis(200);
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::new(vec![product_result(
            "3456789",
            "Dentaid Xeros Spray 226 ppm",
        )])),
        provider.clone(),
        timeout,
    );

    let started = Instant::now();
    let reply = harness
        .pipeline
        .handle(ConsultationRequest::new("Dentaid Xeros Spray usage"), owner())
        .await;
    let elapsed = started.elapsed();

    assert_eq!(reply.content, Language::English.apology());
    assert_eq!(reply.outcome, Outcome::Error);
    assert_eq!(provider.calls(), 1);
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1), "{elapsed:?}");
}

#[tokio::test]
async fn completion_failure_returns_apology() {
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::new(vec![product_result("1", "content")])),
        Arc::new(FailingCompletion::new()),
        TIMEOUT,
    );
    let reply = harness
        .pipeline
        .handle(ConsultationRequest::new("Dentaid content"), owner())
        .await;
    assert_eq!(reply.content, Language::English.apology());
    assert_eq!(reply.outcome, Outcome::Error);
}

#[tokio::test]
async fn store_failure_degrades_to_refusal() {
    let provider = Arc::new(FixedCompletion::new("unused"));
    let harness = test_pipeline(Arc::new(FailingKnowledgeStore), provider.clone(), TIMEOUT);
    let reply = harness
        .pipeline
        .handle(ConsultationRequest::new("Amoxicillin dosage adults"), owner())
        .await;
    assert_eq!(reply.content, REFUSAL);
    assert_eq!(provider.calls(), 0);
    assert!(!reply.retrieval.errors.is_empty());
}

#[tokio::test]
async fn missing_conversation_id_creates_exactly_one_conversation() {
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::new(vec![product_result("1", "content")])),
        Arc::new(FixedCompletion::new("answer")),
        TIMEOUT,
    );
    let reply = harness
        .pipeline
        .handle(ConsultationRequest::new("Dentaid content question"), owner())
        .await;

    let id = reply.conversation_id.expect("conversation id");
    assert_eq!(harness.repository.conversation_count(), 1);
    let conversations = harness
        .repository
        .list_conversations("dentist-1")
        .expect("list");
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, id);

    let messages = eventually_messages(harness.repository.as_ref(), id, 2).await;
    let turns: Vec<(Role, &str)> = messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        turns,
        vec![
            (Role::User, "Dentaid content question"),
            (Role::Assistant, "answer"),
        ]
    );
}

#[tokio::test]
async fn refusal_is_persisted_as_assistant_turn() {
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::empty()),
        Arc::new(FixedCompletion::new("unused")),
        TIMEOUT,
    );
    let reply = harness
        .pipeline
        .handle(ConsultationRequest::new("Unrelated question"), owner())
        .await;
    let id = reply.conversation_id.expect("conversation id");
    let messages = eventually_messages(harness.repository.as_ref(), id, 2).await;
    assert_eq!(messages[1].content, REFUSAL);
}

#[tokio::test]
async fn continued_conversation_reuses_id_and_loads_stored_history() {
    let provider = Arc::new(RecordingCompletion::new("second answer"));
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::new(vec![product_result("1", "content")])),
        provider.clone(),
        TIMEOUT,
    );
    let first = harness
        .pipeline
        .handle(ConsultationRequest::new("First question"), owner())
        .await;
    let id = first.conversation_id.expect("id");
    eventually_messages(harness.repository.as_ref(), id, 2).await;

    let mut request = ConsultationRequest::new("Follow up question");
    request.conversation_id = Some(id.to_string());
    let second = harness.pipeline.handle(request, owner()).await;

    assert_eq!(second.conversation_id, Some(id));
    assert_eq!(harness.repository.conversation_count(), 1);
    let requests = provider.requests();
    let last = requests.last().expect("request");
    let roles: Vec<Role> = last.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(last[1].content, "First question");
    assert_eq!(last[3].content, "Follow up question");
}

#[tokio::test]
async fn foreign_conversation_id_is_replaced() {
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::new(vec![product_result("1", "content")])),
        Arc::new(FixedCompletion::new("answer")),
        TIMEOUT,
    );
    let theirs = harness
        .pipeline
        .handle(ConsultationRequest::new("Their question"), Identity::user("other"))
        .await
        .conversation_id
        .expect("id");

    let mut request = ConsultationRequest::new("My question");
    request.conversation_id = Some(theirs.to_string());
    let mine = harness.pipeline.handle(request, owner()).await;
    assert_ne!(mine.conversation_id, Some(theirs));
    assert_eq!(harness.repository.conversation_count(), 2);
}

#[tokio::test]
async fn supplied_history_is_windowed() {
    let provider = Arc::new(RecordingCompletion::new("ok"));
    let harness = test_pipeline(
        Arc::new(StubKnowledgeStore::new(vec![product_result("1", "content")])),
        provider.clone(),
        TIMEOUT,
    );
    let mut request = ConsultationRequest::new("Question");
    request.history = (0..10)
        .map(|index| HistoryTurn {
            role: if index % 2 == 0 { Role::User } else { Role::Assistant },
            content: format!("turn {index}"),
        })
        .collect();
    harness.pipeline.handle(request, owner()).await;

    let requests = provider.requests();
    let messages = &requests[0];
    assert_eq!(messages.len(), 8);
    assert_eq!(messages[1].content, "turn 4");
    assert_eq!(messages[7].content, "Question");
}

#[tokio::test]
async fn persistence_errors_do_not_fail_the_reply() {
    struct BrokenRepository;

    impl ConversationRepository for BrokenRepository {
        fn create_conversation(
            &self,
            _conversation: &cdss_rs_core::Conversation,
        ) -> Result<(), StateError> {
            Err(StateError::InvalidRow("disk full".to_string()))
        }
        fn load_conversation(
            &self,
            _id: ConversationId,
        ) -> Result<Option<cdss_rs_core::Conversation>, StateError> {
            Ok(None)
        }
        fn append_message(&self, _message: &cdss_rs_core::ChatMessage) -> Result<(), StateError> {
            Err(StateError::InvalidRow("disk full".to_string()))
        }
        fn list_messages(
            &self,
            _id: ConversationId,
        ) -> Result<Vec<cdss_rs_core::ChatMessage>, StateError> {
            Ok(Vec::new())
        }
        fn list_conversations(
            &self,
            _owner_id: &str,
        ) -> Result<Vec<cdss_rs_core::Conversation>, StateError> {
            Ok(Vec::new())
        }
    }

    let pipeline = cdss_rs_core::ConsultationPipeline::builder(
        cdss_rs_knowledge::HybridRetriever::new(
            Arc::new(StubKnowledgeStore::new(vec![product_result("1", "content")])),
            cdss_rs_knowledge::RetrieverSettings::default(),
        ),
        cdss_rs_core::CompletionClient::new(Arc::new(FixedCompletion::new("answer")), TIMEOUT, 6),
        cdss_rs_core::ConversationStore::new(Arc::new(BrokenRepository)),
    )
    .build();

    let reply = pipeline
        .handle(ConsultationRequest::new("Dentaid question"), owner())
        .await;
    assert_eq!(reply.content, "answer");
    assert_eq!(reply.conversation_id, None);
    assert!(!reply.trace.contains(&PipelineState::Persist));
}
