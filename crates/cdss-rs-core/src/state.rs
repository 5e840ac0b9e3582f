//! Conversation persistence backed by SQLite or memory.

use crate::types::{ChatMessage, Conversation};
use cdss_rs_protocol::{ConversationId, Role};
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chat_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation ON chat_messages(conversation_id);
";

/// Persistent store abstraction for conversations and messages.
pub trait ConversationRepository: Send + Sync {
    /// Insert a new conversation header.
    fn create_conversation(&self, conversation: &Conversation) -> Result<(), StateError>;
    /// Load a conversation header by id.
    fn load_conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StateError>;
    /// Append one message to an existing conversation.
    fn append_message(&self, message: &ChatMessage) -> Result<(), StateError>;
    /// Messages of a conversation in insertion order.
    fn list_messages(&self, id: ConversationId) -> Result<Vec<ChatMessage>, StateError>;
    /// Conversations owned by a caller, newest first.
    fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StateError>;
}

/// Errors returned by conversation repositories.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("conversation already exists: {0}")]
    ConversationExists(ConversationId),
    #[error("unknown conversation: {0}")]
    UnknownConversation(ConversationId),
    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}

/// SQLite repository guarded by a mutex around one connection.
pub struct SqliteConversationRepository {
    conn: Mutex<Connection>,
}

impl SqliteConversationRepository {
    /// Open or create the repository at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("opened conversation store (path={})", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StateError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StateError> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ConversationRepository for SqliteConversationRepository {
    fn create_conversation(&self, conversation: &Conversation) -> Result<(), StateError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO conversations (id, owner_id, title, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.id.to_string(),
                conversation.owner_id,
                conversation.title,
                conversation.created_at,
            ],
        )?;
        if inserted == 0 {
            return Err(StateError::ConversationExists(conversation.id));
        }
        info!(
            "created conversation (conversation_id={}, owner_id={})",
            conversation.id, conversation.owner_id
        );
        Ok(())
    }

    fn load_conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StateError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT owner_id, title, created_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(owner_id, title, created_at)| Conversation {
            id,
            owner_id,
            title,
            created_at,
        }))
    }

    fn append_message(&self, message: &ChatMessage) -> Result<(), StateError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO chat_messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.role.as_str(),
                message.content,
                message.created_at,
            ],
        );
        match result {
            Ok(_) => {
                debug!(
                    "appended message (conversation_id={}, role={}, content_len={})",
                    message.conversation_id,
                    message.role,
                    message.content.len()
                );
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Err(StateError::UnknownConversation(message.conversation_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn list_messages(&self, id: ConversationId) -> Result<Vec<ChatMessage>, StateError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, role, content, created_at FROM chat_messages
             WHERE conversation_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, DateTime<Utc>>(3)?,
            ))
        })?;
        let mut messages = Vec::new();
        for row in rows {
            let (message_id, role, content, created_at) = row?;
            messages.push(ChatMessage {
                id: parse_uuid(&message_id)?,
                conversation_id: id,
                role: Role::parse(&role),
                content,
                created_at,
            });
        }
        Ok(messages)
    }

    fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StateError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at FROM conversations
             WHERE owner_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![owner_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, DateTime<Utc>>(2)?,
            ))
        })?;
        let mut conversations = Vec::new();
        for row in rows {
            let (id, title, created_at) = row?;
            conversations.push(Conversation {
                id: parse_uuid(&id)?,
                owner_id: owner_id.to_string(),
                title,
                created_at,
            });
        }
        Ok(conversations)
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StateError> {
    Uuid::parse_str(value).map_err(|err| StateError::InvalidRow(format!("{value}: {err}")))
}

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<ChatMessage>,
}

/// Volatile repository used when no conversation database is configured.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations created so far.
    pub fn conversation_count(&self) -> usize {
        self.state.lock().conversations.len()
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn create_conversation(&self, conversation: &Conversation) -> Result<(), StateError> {
        let mut state = self.state.lock();
        if state.conversations.contains_key(&conversation.id) {
            return Err(StateError::ConversationExists(conversation.id));
        }
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    fn load_conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StateError> {
        Ok(self.state.lock().conversations.get(&id).cloned())
    }

    fn append_message(&self, message: &ChatMessage) -> Result<(), StateError> {
        let mut state = self.state.lock();
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(StateError::UnknownConversation(message.conversation_id));
        }
        state.messages.push(message.clone());
        Ok(())
    }

    fn list_messages(&self, id: ConversationId) -> Result<Vec<ChatMessage>, StateError> {
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .filter(|message| message.conversation_id == id)
            .cloned()
            .collect())
    }

    fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StateError> {
        let mut conversations: Vec<Conversation> = self
            .state
            .lock()
            .conversations
            .values()
            .filter(|conversation| conversation.owner_id == owner_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConversationRepository, InMemoryConversationRepository, SqliteConversationRepository,
        StateError,
    };
    use crate::types::{ChatMessage, Conversation};
    use cdss_rs_protocol::Role;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn exercise(repo: &dyn ConversationRepository) {
        let conversation = Conversation::new("dentist-1", "Amoxicillin dose");
        repo.create_conversation(&conversation).expect("create");
        assert!(matches!(
            repo.create_conversation(&conversation),
            Err(StateError::ConversationExists(_))
        ));

        let first = ChatMessage::new(conversation.id, Role::User, "question");
        let second = ChatMessage::new(conversation.id, Role::Assistant, "answer");
        repo.append_message(&first).expect("append");
        repo.append_message(&second).expect("append");

        let loaded = repo
            .load_conversation(conversation.id)
            .expect("load")
            .expect("conversation");
        assert_eq!(loaded.owner_id, "dentist-1");
        assert_eq!(loaded.title, "Amoxicillin dose");

        let messages = repo.list_messages(conversation.id).expect("messages");
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "answer"]);
        assert_eq!(messages[1].role, Role::Assistant);

        let orphan = ChatMessage::new(Uuid::new_v4(), Role::User, "lost");
        assert!(matches!(
            repo.append_message(&orphan),
            Err(StateError::UnknownConversation(_))
        ));
        assert_eq!(repo.load_conversation(Uuid::new_v4()).expect("load"), None);
        assert_eq!(repo.list_conversations("dentist-1").expect("list").len(), 1);
        assert!(repo.list_conversations("someone-else").expect("list").is_empty());
    }

    #[test]
    fn in_memory_repository_round_trip() {
        exercise(&InMemoryConversationRepository::new());
    }

    #[test]
    fn sqlite_repository_round_trip() {
        exercise(&SqliteConversationRepository::open_in_memory().expect("repo"));
    }

    #[test]
    fn sqlite_repository_persists_across_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state").join("conversations.db");
        let conversation = Conversation::new("dentist-2", "Fluoride");
        {
            let repo = SqliteConversationRepository::open(&path).expect("repo");
            repo.create_conversation(&conversation).expect("create");
            repo.append_message(&ChatMessage::new(conversation.id, Role::User, "hello"))
                .expect("append");
        }
        let repo = SqliteConversationRepository::open(&path).expect("reopen");
        let messages = repo.list_messages(conversation.id).expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
    }
}
