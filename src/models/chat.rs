use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

use crate::llm::ModelId;

/// Identifier reserved for the synthetic greeting that opens every session.
pub const GREETING_ID: &str = "welcome";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name understood by the remote service.
    pub fn remote_name(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A file submitted alongside a user message. `data` holds either base64
/// encoded bytes or extracted text, as flagged by `is_text`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_text: bool,
}

impl Attachment {
    pub fn encoded(kind: AttachmentKind, mime_type: String, base64: String, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            mime_type,
            data: base64,
            name,
            is_text: false,
        }
    }

    pub fn text(mime_type: String, text: String, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: AttachmentKind::File,
            mime_type,
            data: text,
            name,
            is_text: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_error: bool,
    /// Wall-clock duration of the turn in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grounding_sources: Vec<GroundingSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<ModelId>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            attachments: Vec::new(),
            is_streaming: false,
            is_error: false,
            latency: None,
            grounding_sources: Vec::new(),
            model_used: None,
        }
    }

    pub fn greeting(text: &str) -> Self {
        Self {
            id: GREETING_ID.to_string(),
            ..Self::new(Role::Assistant, text.to_string())
        }
    }

    pub fn user(content: String, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::new(Role::User, content)
        }
    }

    /// Empty assistant message that streamed fragments are written into.
    pub fn placeholder(model: ModelId) -> Self {
        Self {
            is_streaming: true,
            model_used: Some(model),
            ..Self::new(Role::Assistant, String::new())
        }
    }

    pub fn error(content: &str) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Assistant, content.to_string())
        }
    }

    pub fn is_greeting(&self) -> bool {
        self.id == GREETING_ID
    }

    /// Ends streaming and records latency. Latency is only ever set once and
    /// only after the streaming flag is cleared.
    pub fn finish_streaming(&mut self, latency_ms: u64) {
        self.is_streaming = false;
        if self.latency.is_none() {
            self.latency = Some(latency_ms);
        }
    }

    /// Ends streaming without a latency, used when the turn failed.
    pub fn abort_streaming(&mut self) {
        self.is_streaming = false;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model_id: Option<ModelId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model_id: Option<ModelId>,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            created_at: session.created_at,
            message_count: session.messages.len(),
            last_model_id: session.last_model_id,
        }
    }
}
