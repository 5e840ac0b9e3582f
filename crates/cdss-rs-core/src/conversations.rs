//! Conversation lookup, creation and message persistence for the pipeline.

use crate::state::{ConversationRepository, StateError};
use crate::types::{ChatMessage, Conversation};
use cdss_rs_protocol::{ConversationId, Role};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Characters of the question kept in a new conversation title.
const TITLE_CHARS: usize = 40;

/// Conversation a request is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedConversation {
    pub id: ConversationId,
    /// True when the conversation was created for this request.
    pub created: bool,
}

/// Facade over a conversation repository.
#[derive(Clone)]
pub struct ConversationStore {
    repository: Arc<dyn ConversationRepository>,
}

impl ConversationStore {
    pub fn new(repository: Arc<dyn ConversationRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn ConversationRepository> {
        &self.repository
    }

    /// Reuse the requested conversation when it exists and belongs to `owner`,
    /// otherwise create a new one. None when creation fails.
    pub fn resolve(
        &self,
        requested: Option<&str>,
        owner: &str,
        question: &str,
    ) -> Option<ResolvedConversation> {
        if let Some(raw) = requested.map(str::trim).filter(|raw| !raw.is_empty()) {
            match self.verify(raw, owner) {
                Some(id) => {
                    debug!("continuing conversation (conversation_id={})", id);
                    return Some(ResolvedConversation { id, created: false });
                }
                None => warn!("discarding unverified conversation id (owner_id={})", owner),
            }
        }

        let conversation = Conversation::new(owner, title_for(question));
        match self.repository.create_conversation(&conversation) {
            Ok(()) => Some(ResolvedConversation {
                id: conversation.id,
                created: true,
            }),
            Err(err) => {
                error!(
                    "failed to create conversation (owner_id={}, error={})",
                    owner, err
                );
                None
            }
        }
    }

    fn verify(&self, raw: &str, owner: &str) -> Option<ConversationId> {
        let id = Uuid::parse_str(raw).ok()?;
        match self.repository.load_conversation(id) {
            Ok(Some(conversation)) if conversation.owner_id == owner => Some(id),
            Ok(_) => None,
            Err(err) => {
                warn!(
                    "conversation lookup failed (conversation_id={}, error={})",
                    id, err
                );
                None
            }
        }
    }

    /// Persist one message and wait for the write.
    pub fn append(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StateError> {
        let message = ChatMessage::new(conversation_id, role, content);
        self.repository.append_message(&message)?;
        Ok(message)
    }

    /// Persist one message on a blocking worker without waiting.
    ///
    /// Best effort: failures are logged, and writes from separate calls are
    /// not ordered relative to each other.
    pub fn persist_detached(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: String,
    ) -> JoinHandle<()> {
        let repository = self.repository.clone();
        tokio::task::spawn_blocking(move || {
            let message = ChatMessage::new(conversation_id, role, content);
            match repository.append_message(&message) {
                Ok(()) => info!(
                    "persisted detached message (conversation_id={}, role={})",
                    conversation_id, role
                ),
                Err(err) => error!(
                    "detached persistence failed (conversation_id={}, role={}, error={})",
                    conversation_id, role, err
                ),
            }
        })
    }

    pub fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ChatMessage>, StateError> {
        self.repository.list_messages(conversation_id)
    }
}

/// First characters of the trimmed question, with `...` when truncated.
pub fn title_for(question: &str) -> String {
    let trimmed = question.trim();
    if trimmed.chars().count() <= TITLE_CHARS {
        return trimmed.to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_CHARS).collect();
    title.push_str("...");
    title
}

#[cfg(test)]
mod tests {
    use super::{ConversationStore, title_for};
    use crate::state::{ConversationRepository, InMemoryConversationRepository};
    use cdss_rs_protocol::Role;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use uuid::Uuid;

    fn store() -> (ConversationStore, Arc<InMemoryConversationRepository>) {
        let repo = Arc::new(InMemoryConversationRepository::new());
        (ConversationStore::new(repo.clone()), repo)
    }

    #[test]
    fn title_truncates_long_questions() {
        assert_eq!(title_for("  short question  "), "short question");
        let long = "a".repeat(41);
        assert_eq!(title_for(&long), format!("{}...", "a".repeat(40)));
        assert_eq!(title_for(&"é".repeat(40)), "é".repeat(40));
    }

    #[test]
    fn missing_id_creates_conversation() {
        let (store, repo) = store();
        let resolved = store.resolve(None, "owner", "Dose?").expect("resolved");
        assert!(resolved.created);
        assert_eq!(repo.conversation_count(), 1);
        let conversation = repo
            .load_conversation(resolved.id)
            .expect("load")
            .expect("conversation");
        assert_eq!(conversation.title, "Dose?");
    }

    #[test]
    fn owned_id_is_reused() {
        let (store, repo) = store();
        let first = store.resolve(None, "owner", "q").expect("first");
        let id = first.id.to_string();
        let second = store.resolve(Some(&id), "owner", "q2").expect("second");
        assert_eq!(second.id, first.id);
        assert!(!second.created);
        assert_eq!(repo.conversation_count(), 1);
    }

    #[test]
    fn foreign_unknown_or_malformed_ids_are_replaced() {
        let (store, repo) = store();
        let theirs = store.resolve(None, "other", "q").expect("theirs");
        let theirs_id = theirs.id.to_string();
        let unknown = Uuid::new_v4().to_string();
        for requested in [theirs_id.as_str(), unknown.as_str(), "not-a-uuid"] {
            let resolved = store.resolve(Some(requested), "owner", "q").expect("resolved");
            assert!(resolved.created);
            assert_ne!(resolved.id, theirs.id);
        }
        assert_eq!(repo.conversation_count(), 4);
    }

    #[tokio::test]
    async fn detached_persistence_eventually_lands() {
        let (store, _repo) = store();
        let resolved = store.resolve(None, "owner", "q").expect("resolved");
        store
            .persist_detached(resolved.id, Role::Assistant, "answer".to_string())
            .await
            .expect("join");
        let messages = store.list_messages(resolved.id).expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn detached_failure_is_swallowed() {
        let (store, _repo) = store();
        store
            .persist_detached(Uuid::new_v4(), Role::Assistant, "lost".to_string())
            .await
            .expect("join");
    }
}
