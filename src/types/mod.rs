use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message, Role};

/// One part of a UI message. Clients may send part kinds we don't know
/// about; anything that isn't a text part is ignored.
#[derive(Debug, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Concatenate the text parts of a message, skipping everything else.
pub fn extract_text(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter(|part| part.kind == "text")
        .filter_map(|part| part.text.as_deref())
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateModelRequest {
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationData {
    pub id: String,
    pub system_prompt: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
}

impl ConversationData {
    pub fn from_row(row: Conversation) -> Self {
        Self {
            id: row.id,
            system_prompt: row.system_prompt,
            model: row.model,
            created_at: row.created_at,
            updated_at: row.updated_at,
            first_message: None,
        }
    }

    pub fn with_preview(row: Conversation, first_message: Option<String>) -> Self {
        Self {
            first_message,
            ..Self::from_row(row)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageData {
    fn from(row: Message) -> Self {
        Self {
            id: row.id,
            role: row.role,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationWithMessages {
    pub conversation: ConversationData,
    pub messages: Vec<MessageData>,
}

#[derive(Debug, Serialize)]
pub struct CreatedConversation {
    pub id: String,
}
