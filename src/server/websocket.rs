use crate::attachment::{ self, RawFile };
use crate::conversation::{ SharedContext, Submission, TurnEvent, TurnEventSender, TurnOrchestrator, TurnOutcome };
use crate::llm::ModelId;
use crate::models::chat::Attachment;
use crate::models::websocket::{ ClientMessage, ServerMessage };

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tokio_tungstenite::{ accept_async_with_config, WebSocketStream };
use tokio_tungstenite::tungstenite::protocol::{ Message as WsMessage, WebSocketConfig };

use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use futures::{ Sink, SinkExt, StreamExt };
use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use log::{ debug, info, warn, error };

const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;
const CONNECTIONS_PER_SECOND: u32 = 10;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::MIN.saturating_add(CONNECTIONS_PER_SECOND - 1)));
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

pub async fn start_ws_server(
    addr: &str,
    orchestrator: Arc<TurnOrchestrator>,
    default_model: ModelId
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }
        info!("Incoming connection from: {}", peer);

        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            match accept_async_with_config(stream, Some(ws_config())).await {
                Ok(ws) => handle_connection(peer, ws, orchestrator, default_model).await,
                Err(e) => error!("Handshake failed for {}: {}", peer, e),
            }
        });
    }
}

async fn send_frame<S>(tx: &mut S, frame: &ServerMessage) -> bool
    where S: Sink<WsMessage> + Unpin, S::Error: std::fmt::Display
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize frame: {}", e);
            return true;
        }
    };
    match tx.send(WsMessage::Text(json)).await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to send frame: {}", e);
            false
        }
    }
}

fn event_frame(event: TurnEvent) -> ServerMessage {
    match event {
        TurnEvent::MessageAppended(message) => ServerMessage::Message { message },
        TurnEvent::MessageUpdated { message_id, content, grounding_sources } =>
            ServerMessage::Update { message_id, content, grounding_sources },
        TurnEvent::MessageFinalized { message_id, latency_ms, cancelled } =>
            ServerMessage::Finalized { message_id, latency_ms, cancelled },
    }
}

/// Accepts both bare base64 and `data:<mime>;base64,<payload>` URLs.
fn decode_upload(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    STANDARD.decode(payload.trim())
}

pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    orchestrator: Arc<TurnOrchestrator>,
    default_model: ModelId
)
    where S: AsyncRead + AsyncWrite + Unpin + Send
{
    let (mut tx, mut rx) = websocket.split();
    let (events, mut event_rx) = mpsc::unbounded_channel();
    let mut connection = Connection::new(orchestrator, default_model, events);
    info!("Assigned session {} to {}", connection.session_id().await, peer);

    if send_frame(&mut tx, &connection.session_frame().await).await {
        loop {
            tokio::select! {
                incoming = rx.next() => {
                    let replies = match incoming {
                        Some(Ok(WsMessage::Text(text))) => connection.handle_text(&text).await,
                        Some(Ok(WsMessage::Ping(data))) => {
                            if tx.send(WsMessage::Pong(data)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Connection closed by {}", peer);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            error!("WebSocket error from {}: {}", peer, e);
                            break;
                        }
                    };
                    let mut delivered = true;
                    for reply in &replies {
                        delivered = send_frame(&mut tx, reply).await;
                        if !delivered {
                            break;
                        }
                    }
                    if !delivered {
                        break;
                    }
                }
                Some(event) = event_rx.recv() => {
                    if !send_frame(&mut tx, &event_frame(event)).await {
                        break;
                    }
                }
            }
        }
    }

    connection.shutdown().await;
    info!("Connection from {} finished", peer);
}

/// Per-connection state: the live conversation, attachments staged for the
/// next submission and the running turn, if any.
struct Connection {
    orchestrator: Arc<TurnOrchestrator>,
    ctx: SharedContext,
    pending: Vec<Attachment>,
    events: TurnEventSender,
    turn: Option<JoinHandle<TurnOutcome>>,
}

impl Connection {
    fn new(orchestrator: Arc<TurnOrchestrator>, model: ModelId, events: TurnEventSender) -> Self {
        let ctx = orchestrator.new_context(model).shared();
        Self {
            orchestrator,
            ctx,
            pending: Vec::new(),
            events,
            turn: None,
        }
    }

    async fn session_id(&self) -> String {
        self.ctx.lock().await.session_id().to_string()
    }

    async fn session_frame(&self) -> ServerMessage {
        let ctx = self.ctx.lock().await;
        ServerMessage::Session {
            session_id: ctx.session_id().to_string(),
            title: ctx.title(),
            messages: ctx.messages().to_vec(),
            model: ctx.model(),
        }
    }

    fn turn_running(&self) -> bool {
        self.turn.as_ref().is_some_and(|turn| !turn.is_finished())
    }

    async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse client frame: {}", e);
                return vec![ServerMessage::Error { message: format!("Failed to parse message: {}", e) }];
            }
        };

        match message {
            ClientMessage::Chat { content } => self.submit(content),
            ClientMessage::Attach { file_name, mime_type, data } => {
                let bytes = match decode_upload(&data) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Attachment '{}' is not valid base64: {}", file_name, e);
                        return vec![ServerMessage::Error { message: "Failed to process file".to_string() }];
                    }
                };
                match attachment::normalize(RawFile { bytes, mime_type, file_name }) {
                    Ok(attachment) => {
                        self.pending.push(attachment.clone());
                        vec![ServerMessage::AttachmentAdded { attachment }]
                    }
                    Err(e) => vec![ServerMessage::Error { message: e.user_message() }],
                }
            }
            ClientMessage::RemoveAttachment { id } => {
                let before = self.pending.len();
                self.pending.retain(|a| a.id != id);
                if self.pending.len() == before {
                    Vec::new()
                } else {
                    vec![ServerMessage::AttachmentRemoved { id }]
                }
            }
            ClientMessage::Stop => {
                if !self.ctx.lock().await.cancel_turn() {
                    debug!("Stop requested with no turn in flight");
                }
                Vec::new()
            }
            ClientMessage::NewSession => {
                match self.orchestrator.new_session(&self.ctx).await {
                    Ok(()) => {
                        self.pending.clear();
                        vec![self.session_frame().await]
                    }
                    Err(e) => vec![ServerMessage::Error { message: e.user_message() }],
                }
            }
            ClientMessage::LoadSession { session_id } => {
                match self.orchestrator.switch_session(&self.ctx, &session_id).await {
                    Ok(()) => {
                        self.pending.clear();
                        vec![self.session_frame().await]
                    }
                    Err(e) => vec![ServerMessage::Error { message: e.user_message() }],
                }
            }
            ClientMessage::SelectModel { model } => {
                self.ctx.lock().await.set_model(model);
                info!("Model set to {}", model);
                Vec::new()
            }
            ClientMessage::ListSessions => {
                vec![ServerMessage::Sessions { sessions: self.orchestrator.library().list().await }]
            }
        }
    }

    fn submit(&mut self, content: String) -> Vec<ServerMessage> {
        if self.turn_running() {
            return vec![ServerMessage::Error { message: "A response is already being generated".to_string() }];
        }
        let submission = Submission::new(content, std::mem::take(&mut self.pending));
        if submission.is_empty() {
            return Vec::new();
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let ctx = Arc::clone(&self.ctx);
        let events = self.events.clone();
        self.turn = Some(
            tokio::spawn(async move { orchestrator.submit(&ctx, submission, &events).await })
        );
        Vec::new()
    }

    /// Cancels and awaits a running turn, then saves the session.
    async fn shutdown(&mut self) {
        self.ctx.lock().await.cancel_turn();
        if let Some(turn) = self.turn.take() {
            match turn.await {
                Ok(outcome) => debug!("Turn ended on disconnect: {:?}", outcome),
                Err(e) => error!("Turn task failed: {}", e),
            }
        }
        if let Err(e) = self.orchestrator.save_current(&self.ctx).await {
            error!("Failed to save session on disconnect: {}", e);
        }
    }
}
