pub mod gemini;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use log::debug;

use crate::cli::Args;
use crate::error::{ ChatError, ChatResult };
use crate::llm::ModelConfig;
use crate::models::chat::{ Attachment, GroundingSource, Message, Role };
use self::gemini::GeminiChatService;

/// One part of a content item: plain text or an inline binary payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    InlineData {
        mime_type: String,
        data: String,
    },
}

/// A role-tagged content item in the remote conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteContent {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

/// One incremental unit of a streamed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseFragment {
    pub text: Option<String>,
    pub citations: Vec<GroundingSource>,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = ChatResult<ResponseFragment>> + Send>>;

/// Handle to an established remote conversation. It keeps the history it was
/// started with plus every turn sent through it.
#[async_trait]
pub trait RemoteConversation: Send + Sync {
    async fn send_message_stream(&mut self, parts: Vec<ContentPart>) -> ChatResult<FragmentStream>;

    /// Records the assistant reply of the last turn so later turns see it.
    fn commit_reply(&mut self, text: &str);
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn start_chat(
        &self,
        history: Vec<RemoteContent>,
        config: &'static ModelConfig
    ) -> ChatResult<Box<dyn RemoteConversation>>;
}

pub fn attachment_part(attachment: &Attachment) -> ContentPart {
    if attachment.is_text {
        ContentPart::Text(
            format!(
                "\n[Attachment: {}]\n{}\n",
                attachment.name.as_deref().unwrap_or(""),
                attachment.data
            )
        )
    } else {
        ContentPart::InlineData {
            mime_type: attachment.mime_type.clone(),
            data: attachment.data.clone(),
        }
    }
}

pub fn compose_parts(text: &str, attachments: &[Attachment]) -> Vec<ContentPart> {
    let mut parts = Vec::with_capacity(attachments.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::Text(text.to_string()));
    }
    parts.extend(attachments.iter().map(attachment_part));
    parts
}

/// Converts a transcript into replayable history, dropping the greeting,
/// failed turns and anything that would produce an empty content item.
pub fn format_history(messages: &[Message]) -> Vec<RemoteContent> {
    messages
        .iter()
        .filter(|m| !m.is_greeting() && !m.is_error)
        .filter_map(|m| {
            let attachments: &[Attachment] = if m.role == Role::User { &m.attachments } else { &[] };
            let parts = compose_parts(&m.content, attachments);
            if parts.is_empty() {
                debug!("Skipping message {} with no replayable content", m.id);
                None
            } else {
                Some(RemoteContent { role: m.role, parts })
            }
        })
        .collect()
}

pub fn new_service(args: &Args, system_instruction: &str) -> ChatResult<Arc<dyn ChatService>> {
    let service = GeminiChatService::new(
        args.chat_api_key.clone(),
        args.chat_base_url.clone(),
        system_instruction.to_string()
    )?;
    Ok(Arc::new(service))
}

/// Posts `payload` and turns the streamed response body into parsed items,
/// one per line accepted by `line_parser`. Lines split across network chunks
/// are reassembled before parsing.
pub async fn http_stream_generate<T>(
    client: reqwest::Client,
    url: String,
    payload: impl Serialize + Send + 'static,
    line_parser: fn(&str) -> Option<T>,
    headers: Option<Vec<(String, String)>>
) -> ChatResult<Pin<Box<dyn Stream<Item = ChatResult<T>> + Send>>>
    where T: Send + 'static
{
    let mut req = client.post(&url).json(&payload);
    if let Some(header_list) = headers {
        for (name, value) in header_list {
            req = req.header(name, value);
        }
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChatError::RemoteService(format!("HTTP {}: {}", status, body)));
    }

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(buf) => {
                    pending.extend_from_slice(&buf);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        if let Some(item) = line_parser(&line) {
                            if tx.send(Ok(item)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(ChatError::RemoteService(e.to_string()))).await;
                    return;
                }
            }
        }
        if !pending.is_empty() {
            if let Some(item) = line_parser(&String::from_utf8_lossy(&pending)) {
                let _ = tx.send(Ok(item)).await;
            }
        }
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}
