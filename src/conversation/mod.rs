pub mod accumulator;
pub mod orchestrator;

pub use self::accumulator::{ AccumulatedResponse, StreamAccumulator };
pub use self::orchestrator::{ Submission, TurnOrchestrator, TurnOutcome };

use chrono::{ DateTime, Utc };
use log::debug;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use tokio::sync::{ mpsc, Mutex, Notify };
use uuid::Uuid;

use crate::llm::chat::RemoteConversation;
use crate::llm::{ ModelConfig, ModelId };
use crate::models::chat::{ ChatSession, GroundingSource, Message, Role };

const TITLE_MAX_CHARS: usize = 30;
const UNTITLED: &str = "New Chat";

pub type SharedContext = Arc<Mutex<ConversationContext>>;
pub type TurnEventSender = mpsc::UnboundedSender<TurnEvent>;

/// Cooperative cancellation signal for one turn. Waiters parked in
/// [`CancelFlag::cancelled`] are woken when the flag is set.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Submitting,
    AwaitingFirstFragment,
    Streaming,
    Finalized,
    Cancelled,
    Failed,
}

impl TurnState {
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            TurnState::Submitting | TurnState::AwaitingFirstFragment | TurnState::Streaming
        )
    }
}

/// Changes to the transcript, in the order they happen, for whoever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    MessageAppended(Message),
    MessageUpdated {
        message_id: String,
        content: String,
        grounding_sources: Vec<GroundingSource>,
    },
    MessageFinalized {
        message_id: String,
        latency_ms: Option<u64>,
        cancelled: bool,
    },
}

/// Remote conversation together with the model it was established for.
pub struct RemoteConversationHandle {
    pub model: ModelId,
    pub conversation: Box<dyn RemoteConversation>,
}

/// Live state of the session a connection is working on.
pub struct ConversationContext {
    session_id: String,
    created_at: DateTime<Utc>,
    greeting: String,
    messages: Vec<Message>,
    model: ModelId,
    state: TurnState,
    cancel: CancelFlag,
    remote: Option<RemoteConversationHandle>,
}

impl ConversationContext {
    pub fn new(greeting: &str, model: ModelId) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            greeting: greeting.to_string(),
            messages: vec![Message::greeting(greeting)],
            model,
            state: TurnState::Idle,
            cancel: CancelFlag::new(),
            remote: None,
        }
    }

    pub fn shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn model_config(&self) -> &'static ModelConfig {
        self.model.config()
    }

    pub fn set_model(&mut self, model: ModelId) {
        self.model = model;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_turn_in_flight(&self) -> bool {
        self.state.is_in_flight()
    }

    pub(crate) fn transition(&mut self, next: TurnState) {
        debug!("Session {} turn state {:?} -> {:?}", self.session_id, self.state, next);
        self.state = next;
    }

    /// Starts a turn with a fresh cancellation flag.
    pub(crate) fn begin_turn(&mut self) -> CancelFlag {
        self.cancel = CancelFlag::new();
        self.transition(TurnState::Submitting);
        self.cancel.clone()
    }

    /// Requests cancellation of the in-flight turn. Returns false when idle.
    pub fn cancel_turn(&mut self) -> bool {
        if !self.is_turn_in_flight() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Takes the remote handle if it was established for `model`; a handle for
    /// another model is dropped.
    pub(crate) fn take_remote_for(&mut self, model: ModelId) -> Option<RemoteConversationHandle> {
        match self.remote.take() {
            Some(handle) if handle.model == model => Some(handle),
            Some(handle) => {
                debug!("Discarding remote conversation for {} (now {})", handle.model, model);
                None
            }
            None => None,
        }
    }

    pub(crate) fn store_remote(&mut self, handle: RemoteConversationHandle) {
        self.remote = Some(handle);
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Title derived from the first user message.
    pub fn title(&self) -> String {
        let first_user = self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.chars().take(TITLE_MAX_CHARS).collect::<String>())
            .unwrap_or_default();
        if first_user.is_empty() {
            UNTITLED.to_string()
        } else {
            first_user
        }
    }

    /// Snapshot for persistence. Sessions holding nothing but the greeting
    /// are never persisted.
    pub fn to_session(&self) -> Option<ChatSession> {
        if self.messages.iter().all(|m| m.is_greeting()) {
            return None;
        }
        Some(ChatSession {
            id: self.session_id.clone(),
            title: self.title(),
            messages: self.messages.clone(),
            created_at: self.created_at,
            last_model_id: Some(self.model),
        })
    }

    /// Starts an empty session. The remote conversation is dropped so the
    /// next turn is established from scratch.
    pub(crate) fn reset(&mut self) {
        self.session_id = Uuid::new_v4().to_string();
        self.created_at = Utc::now();
        self.messages = vec![Message::greeting(&self.greeting)];
        self.remote = None;
        self.state = TurnState::Idle;
    }

    /// Replaces the live transcript with a stored session.
    pub(crate) fn restore(&mut self, session: ChatSession) {
        self.session_id = session.id;
        self.created_at = session.created_at;
        self.messages = session.messages;
        self.remote = None;
        self.state = TurnState::Idle;
    }
}
