use thiserror::Error;

pub const GENERIC_FAILURE_TEXT: &str = "I encountered an issue. Please try again later.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Unsupported attachment type '{mime_type}' for file '{file_name}'")]
    UnsupportedAttachmentType {
        mime_type: String,
        file_name: String,
    },

    #[error("Failed to extract attachment text: {0}")]
    AttachmentExtraction(String),

    #[error("Remote service failure: {0}")]
    RemoteService(String),

    #[error("Stored session record is unreadable: {0}")]
    PersistenceCorruption(String),

    #[error("Storage backend error: {0}")]
    Storage(String),

    #[error("A response is already being generated")]
    TurnInFlight,

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ChatError {
    /// Text that is safe to show to the person on the other end of the connection.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::UnsupportedAttachmentType { .. } => {
                "Unsupported file type. Please upload Images, PDF, DOCX, or TXT.".to_string()
            }
            ChatError::AttachmentExtraction(_) => "Failed to process file".to_string(),
            ChatError::RemoteService(_) => GENERIC_FAILURE_TEXT.to_string(),
            ChatError::PersistenceCorruption(_) | ChatError::Storage(_) => {
                "Conversation history is unavailable right now.".to_string()
            }
            ChatError::TurnInFlight => self.to_string(),
            ChatError::SessionNotFound(_) => "That conversation no longer exists.".to_string(),
            ChatError::Configuration(_) => GENERIC_FAILURE_TEXT.to_string(),
        }
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::RemoteService(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_never_leak_detail() {
        let err = ChatError::RemoteService("401 Unauthorized: API key not valid".to_string());
        assert_eq!(err.user_message(), GENERIC_FAILURE_TEXT);
        assert!(err.to_string().contains("401"));
    }
}
