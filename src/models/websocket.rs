use serde::{ Serialize, Deserialize };

use crate::llm::ModelId;
use crate::models::chat::{ Attachment, GroundingSource, Message, SessionSummary };

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    /// `data` is the raw file content, base64 encoded for transport.
    #[serde(rename = "attach")] Attach {
        file_name: String,
        mime_type: String,
        data: String,
    },
    #[serde(rename = "remove_attachment")] RemoveAttachment {
        id: String,
    },
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "new_session")]
    NewSession,
    #[serde(rename = "load_session")] LoadSession {
        session_id: String,
    },
    #[serde(rename = "select_model")] SelectModel {
        model: ModelId,
    },
    #[serde(rename = "list_sessions")]
    ListSessions,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session")] Session {
        session_id: String,
        title: String,
        messages: Vec<Message>,
        model: ModelId,
    },
    #[serde(rename = "message")] Message {
        message: Message,
    },
    #[serde(rename = "update")] Update {
        message_id: String,
        content: String,
        grounding_sources: Vec<GroundingSource>,
    },
    #[serde(rename = "finalized")] Finalized {
        message_id: String,
        latency_ms: Option<u64>,
        cancelled: bool,
    },
    #[serde(rename = "attachment_added")] AttachmentAdded {
        attachment: Attachment,
    },
    #[serde(rename = "attachment_removed")] AttachmentRemoved {
        id: String,
    },
    #[serde(rename = "sessions")] Sessions {
        sessions: Vec<SessionSummary>,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_client_frames() {
        let frame = r#"{"type":"select_model","model":"reasoning"}"#;
        match serde_json::from_str::<ClientMessage>(frame).unwrap() {
            ClientMessage::SelectModel { model } => assert_eq!(model, ModelId::Reasoning),
            other => panic!("unexpected frame: {:?}", other),
        }

        let stop = serde_json::from_str::<ClientMessage>(r#"{"type":"stop"}"#).unwrap();
        assert!(matches!(stop, ClientMessage::Stop));
    }

    #[test]
    fn finalized_frame_is_tagged() {
        let json = serde_json::to_value(ServerMessage::Finalized {
            message_id: "m1".to_string(),
            latency_ms: Some(42),
            cancelled: true,
        }).unwrap();
        assert_eq!(json["type"], "finalized");
        assert_eq!(json["cancelled"], true);
    }

    #[test]
    fn sessions_frame_reads_back() {
        let frame = r#"{"type":"sessions","sessions":[{"id":"s1","title":"Trip","createdAt":"2024-05-01T10:00:00.123Z","messageCount":3}]}"#;
        match serde_json::from_str::<ServerMessage>(frame).unwrap() {
            ServerMessage::Sessions { sessions } => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].title, "Trip");
                assert_eq!(sessions[0].message_count, 3);
                assert!(sessions[0].last_model_id.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
