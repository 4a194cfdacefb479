use log::{ debug, error, info, warn };
use std::sync::Arc;
use std::time::Instant;

use super::{
    AccumulatedResponse,
    CancelFlag,
    ConversationContext,
    RemoteConversationHandle,
    SharedContext,
    StreamAccumulator,
    TurnEvent,
    TurnEventSender,
    TurnState,
};
use crate::config::prompt::PromptConfig;
use crate::error::{ ChatError, ChatResult, GENERIC_FAILURE_TEXT };
use crate::history::SessionLibrary;
use crate::llm::chat::{ compose_parts, format_history, ChatService, ContentPart };
use crate::llm::ModelId;
use crate::models::chat::{ Attachment, Message };

#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl Submission {
    pub fn new(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            text: text.into(),
            attachments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing happened: the submission was empty or a turn was already running.
    Rejected,
    Finalized {
        message_id: String,
        cancelled: bool,
    },
    Failed {
        error_message_id: String,
    },
}

/// Drives turns against the remote service and moves sessions in and out of
/// the session library.
pub struct TurnOrchestrator {
    service: Arc<dyn ChatService>,
    library: Arc<SessionLibrary>,
    prompts: Arc<PromptConfig>,
}

impl TurnOrchestrator {
    pub fn new(
        service: Arc<dyn ChatService>,
        library: Arc<SessionLibrary>,
        prompts: Arc<PromptConfig>
    ) -> Self {
        Self {
            service,
            library,
            prompts,
        }
    }

    pub fn library(&self) -> &Arc<SessionLibrary> {
        &self.library
    }

    pub fn new_context(&self, model: ModelId) -> ConversationContext {
        ConversationContext::new(&self.prompts.greeting, model)
    }

    /// Runs one turn to completion. Every exit path leaves the turn idle and
    /// no message streaming.
    pub async fn submit(
        &self,
        ctx: &SharedContext,
        submission: Submission,
        events: &TurnEventSender
    ) -> TurnOutcome {
        if submission.is_empty() {
            debug!("Ignoring empty submission");
            return TurnOutcome::Rejected;
        }

        let started = Instant::now();
        let text = submission.text.trim().to_string();
        let (cancel, prior, model, remote) = {
            let mut guard = ctx.lock().await;
            if guard.is_turn_in_flight() {
                warn!("Submission rejected: a turn is already in flight for {}", guard.session_id());
                return TurnOutcome::Rejected;
            }
            let cancel = guard.begin_turn();
            let prior = guard.messages().to_vec();
            let model = guard.model();
            let remote = guard.take_remote_for(model);

            let user_message = Message::user(text.clone(), submission.attachments.clone());
            guard.push_message(user_message.clone());
            let _ = events.send(TurnEvent::MessageAppended(user_message));
            (cancel, prior, model, remote)
        };

        let outbound_text = if text.is_empty() {
            self.prompts.attachment_instruction.clone()
        } else {
            text
        };
        let parts = compose_parts(&outbound_text, &submission.attachments);

        let mut placeholder_id = None;
        let result = self.stream_reply(
            ctx,
            cancel,
            &prior,
            model,
            remote,
            parts,
            events,
            &mut placeholder_id
        ).await;

        match result {
            Ok((handle, response)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let message_id = placeholder_id.unwrap_or_default();
                self.finalize(ctx, &message_id, handle, &response, latency_ms, events).await;
                TurnOutcome::Finalized {
                    message_id,
                    cancelled: response.cancelled,
                }
            }
            Err(e) => self.fail(ctx, placeholder_id.as_deref(), e, events).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_reply(
        &self,
        ctx: &SharedContext,
        cancel: CancelFlag,
        prior: &[Message],
        model: ModelId,
        remote: Option<RemoteConversationHandle>,
        parts: Vec<ContentPart>,
        events: &TurnEventSender,
        placeholder_id: &mut Option<String>
    ) -> ChatResult<(Option<RemoteConversationHandle>, AccumulatedResponse)> {
        let placeholder = Message::placeholder(model);
        *placeholder_id = Some(placeholder.id.clone());
        {
            let mut guard = ctx.lock().await;
            guard.transition(TurnState::AwaitingFirstFragment);
            guard.push_message(placeholder.clone());
        }
        let _ = events.send(TurnEvent::MessageAppended(placeholder.clone()));

        let mut handle = match remote {
            Some(handle) => {
                debug!("Reusing remote conversation established for {}", handle.model);
                handle
            }
            None => {
                let history = format_history(prior);
                info!("Establishing remote conversation for {} with {} history items", model, history.len());
                let established = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.service.start_chat(history, model.config()) => Some(result),
                };
                let Some(conversation) = established else {
                    info!("Turn cancelled while establishing the remote conversation");
                    return Ok((None, AccumulatedResponse::interrupted()));
                };
                RemoteConversationHandle { model, conversation: conversation? }
            }
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = handle.conversation.send_message_stream(parts) => Some(result),
        };
        let Some(stream) = sent else {
            info!("Turn cancelled before the response stream opened");
            return Ok((None, AccumulatedResponse::interrupted()));
        };

        let response = StreamAccumulator::new(placeholder.id, cancel).consume(stream?, ctx, events).await?;
        Ok((Some(handle), response))
    }

    async fn finalize(
        &self,
        ctx: &SharedContext,
        message_id: &str,
        handle: Option<RemoteConversationHandle>,
        response: &AccumulatedResponse,
        latency_ms: u64,
        events: &TurnEventSender
    ) {
        let mut guard = ctx.lock().await;
        if let Some(message) = guard.message_mut(message_id) {
            message.finish_streaming(latency_ms);
        }
        match handle {
            Some(mut handle) if !response.cancelled => {
                handle.conversation.commit_reply(&response.content);
                guard.store_remote(handle);
            }
            // The remote side never saw the end of this reply; replay next time.
            _ => guard.transition(TurnState::Cancelled),
        }
        guard.transition(TurnState::Finalized);
        info!(
            "Turn finalized in {} ms ({} fragments, {} sources, cancelled={})",
            latency_ms,
            response.fragments,
            response.grounding_sources.len(),
            response.cancelled
        );
        drop(guard);

        let _ = events.send(TurnEvent::MessageFinalized {
            message_id: message_id.to_string(),
            latency_ms: Some(latency_ms),
            cancelled: response.cancelled,
        });
    }

    async fn fail(
        &self,
        ctx: &SharedContext,
        placeholder_id: Option<&str>,
        err: ChatError,
        events: &TurnEventSender
    ) -> TurnOutcome {
        error!("Turn failed: {}", err);
        let error_message = Message::error(GENERIC_FAILURE_TEXT);
        let error_message_id = error_message.id.clone();

        let mut guard = ctx.lock().await;
        if let Some(id) = placeholder_id {
            if let Some(message) = guard.message_mut(id) {
                message.abort_streaming();
            }
            let _ = events.send(TurnEvent::MessageFinalized {
                message_id: id.to_string(),
                latency_ms: None,
                cancelled: false,
            });
        }
        guard.push_message(error_message.clone());
        guard.transition(TurnState::Failed);
        drop(guard);

        let _ = events.send(TurnEvent::MessageAppended(error_message));
        TurnOutcome::Failed { error_message_id }
    }

    /// Writes the current session into the library unless it only holds the greeting.
    pub async fn save_current(&self, ctx: &SharedContext) -> ChatResult<()> {
        let guard = ctx.lock().await;
        self.persist(&guard).await
    }

    async fn persist(&self, ctx: &ConversationContext) -> ChatResult<()> {
        match ctx.to_session() {
            Some(session) => self.library.upsert(session).await,
            None => {
                debug!("Session {} holds only the greeting; not saving", ctx.session_id());
                Ok(())
            }
        }
    }

    /// Saves the current session and starts an empty one. Refused while a turn runs.
    pub async fn new_session(&self, ctx: &SharedContext) -> ChatResult<()> {
        let mut guard = ctx.lock().await;
        if guard.is_turn_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        if let Err(e) = self.persist(&guard).await {
            error!("Failed to persist session {}: {}", guard.session_id(), e);
        }
        guard.reset();
        info!("Started new session {}", guard.session_id());
        Ok(())
    }

    /// Saves the current session and loads `session_id` from the library.
    /// Refused while a turn runs.
    pub async fn switch_session(&self, ctx: &SharedContext, session_id: &str) -> ChatResult<()> {
        let mut guard = ctx.lock().await;
        if guard.is_turn_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        if guard.session_id() == session_id {
            return Ok(());
        }
        let session = self.library
            .get(session_id).await
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;

        if let Err(e) = self.persist(&guard).await {
            error!("Failed to persist session {}: {}", guard.session_id(), e);
        }
        guard.restore(session);
        info!("Switched to session {}", session_id);
        Ok(())
    }
}
