//! Wire protocol types for the consultation endpoint and shared identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a conversation.
pub type ConversationId = Uuid;
/// Unique identifier for a persisted chat message.
pub type MessageId = Uuid;
/// Identifier of the caller owning a conversation.
pub type OwnerId = String;

/// Inbound consultation request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationRequest {
    /// Free-text question from the health professional.
    pub question: String,
    /// Client-side embedding of the question, if one was computed.
    #[serde(default)]
    pub query_vector: Option<Vec<f32>>,
    /// Prior conversation turns, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    /// Existing conversation to continue.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl ConsultationRequest {
    /// Build a request carrying only a question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            query_vector: None,
            history: Vec::new(),
            conversation_id: None,
        }
    }
}

/// Single prior turn supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryTurn {
    /// Speaker for the turn.
    pub role: Role,
    /// Turn content.
    pub content: String,
}

/// Outbound consultation response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationResponse {
    /// Answer, refusal or apology text.
    pub content: String,
    /// Conversation the turn was recorded under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Error description for hard failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConsultationResponse {
    /// Successful (or gracefully degraded) answer.
    pub fn answer(content: impl Into<String>, conversation_id: Option<ConversationId>) -> Self {
        Self {
            content: content.into(),
            conversation_id: conversation_id.map(|id| id.to_string()),
            error: None,
        }
    }

    /// Hard failure with an error message and empty content.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            conversation_id: None,
            error: Some(message.into()),
        }
    }
}

/// Speaker role for a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-generated message.
    System,
    /// User-authored message.
    User,
    /// Assistant-authored message.
    Assistant,
}

impl Role {
    /// Return the role as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a role from a lowercase string, defaulting to user.
    pub fn parse(value: &str) -> Self {
        if value == "system" {
            Role::System
        } else if value == "assistant" {
            Role::Assistant
        } else {
            Role::User
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Role::parse(value))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knowledge base collection a clinical record belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Dental product record.
    Product,
    /// Antibiotic prescription rule.
    Rule,
}

impl RecordSource {
    /// Return the source as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Product => "product",
            RecordSource::Rule => "rule",
        }
    }

    /// Parse a stored source label.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(RecordSource::Product),
            "rule" => Some(RecordSource::Rule),
            _ => None,
        }
    }
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConsultationRequest, ConsultationResponse, HistoryTurn, RecordSource, Role};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn request_accepts_camel_case_body() {
        let body = json!({
            "question": "Dose of amoxicillin?",
            "queryVector": [0.5, 0.25],
            "history": [{ "role": "assistant", "content": "hello" }],
            "conversationId": "abc"
        });
        let request: ConsultationRequest = serde_json::from_value(body).expect("request");
        assert_eq!(
            request,
            ConsultationRequest {
                question: "Dose of amoxicillin?".to_string(),
                query_vector: Some(vec![0.5, 0.25]),
                history: vec![HistoryTurn {
                    role: Role::Assistant,
                    content: "hello".to_string(),
                }],
                conversation_id: Some("abc".to_string()),
            }
        );
    }

    #[test]
    fn request_defaults_optional_fields() {
        let request: ConsultationRequest =
            serde_json::from_value(json!({ "question": "q" })).expect("request");
        assert_eq!(request, ConsultationRequest::new("q"));
    }

    #[test]
    fn request_rejects_missing_question() {
        let result = serde_json::from_value::<ConsultationRequest>(json!({ "history": [] }));
        assert!(result.is_err());
    }

    #[test]
    fn response_omits_empty_optionals() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(ConsultationResponse::answer("ok", Some(id))).expect("json");
        assert_eq!(value, json!({ "content": "ok", "conversationId": id.to_string() }));

        let value = serde_json::to_value(ConsultationResponse::error("bad")).expect("json");
        assert_eq!(value, json!({ "content": "", "error": "bad" }));
    }

    #[test]
    fn role_and_source_labels_round_trip() {
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse("anything"), Role::User);
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(RecordSource::parse("rule"), Some(RecordSource::Rule));
        assert_eq!(RecordSource::parse("dental"), None);
        assert_eq!(RecordSource::Product.to_string(), "product");
    }
}
