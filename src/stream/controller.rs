//! Streaming session controller
//!
//! Owns the lifecycle of question/answer exchanges: issues the outbound
//! request, bridges the response body through the decoder, applies events to
//! the session, and enforces the one-live-stream-per-conversation rule.

use crate::chat::{Message, MessageRole, TranscriptStore};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::stream::decoder::{StreamDecoder, StreamEvent};
use crate::stream::session::{SessionUpdate, StreamSession};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Capacity of the per-session update channel
const UPDATE_CHANNEL_CAPACITY: usize = 100;

/// Outbound request payload for the conversation endpoint
#[derive(Debug, Serialize)]
struct ChatStreamRequest {
    /// The new user turn
    conversation: Vec<ConversationEntry>,
    /// Identifier of this exchange
    uuid: String,
    /// Free-form identifying field forwarded to the endpoint
    study_program: String,
}

#[derive(Debug, Serialize)]
struct ConversationEntry {
    role: String,
    content: String,
}

/// Handle to a running session returned by `start`
///
/// Carries the session (for state inspection and cancellation) and the
/// receiver of display updates.
pub struct SessionHandle {
    session: Arc<StreamSession>,
    updates: mpsc::Receiver<SessionUpdate>,
}

impl SessionHandle {
    /// The session behind this handle
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Receive the next update, or `None` once the session has wound down
    pub async fn recv(&mut self) -> Option<SessionUpdate> {
        self.updates.recv().await
    }

    /// Split the handle into the session and a `Stream` of updates
    pub fn into_update_stream(self) -> (Arc<StreamSession>, ReceiverStream<SessionUpdate>) {
        (self.session, ReceiverStream::new(self.updates))
    }
}

/// Orchestrates streaming exchanges against the conversation endpoint
///
/// At most one live session per conversation; sessions for different
/// conversations run independently and may interleave arbitrarily. The
/// transcript store is the only shared resource across sessions.
pub struct SessionController {
    client: reqwest::Client,
    endpoint: String,
    study_program: String,
    store: Arc<TranscriptStore>,
    /// Map from conversation id to its live session
    active: Arc<RwLock<HashMap<String, Arc<StreamSession>>>>,
}

impl SessionController {
    /// Create a controller from configuration
    pub fn new(config: &ChatConfig, store: Arc<TranscriptStore>) -> Self {
        Self::with_endpoint(&config.endpoint, &config.study_program, store)
    }

    /// Create a controller against an explicit endpoint (used by tests)
    pub fn with_endpoint(endpoint: &str, study_program: &str, store: Arc<TranscriptStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            study_program: study_program.to_string(),
            store,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The transcript store backing this controller
    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    /// Prior history of a conversation, for hydration at session start
    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        self.store.messages(conversation_id)
    }

    /// Start a streaming exchange
    ///
    /// Appends the user turn and an empty live message (role `system`) to the
    /// store, issues the outbound request, and spawns a task that drives the
    /// decoder until the stream finishes, fails, or is cancelled.
    ///
    /// # Errors
    /// * `ChatError::StreamInProgress` if the conversation already has a live
    ///   session
    /// * `ChatError::Transport` / `ChatError::UpstreamStatus` if the request
    ///   fails before any bytes are consumed; the session is left `Failed`
    ///   and the live message keeps its empty content
    pub async fn start(
        &self,
        conversation_id: &str,
        question: &str,
    ) -> Result<SessionHandle, ChatError> {
        let live_message_id = format!("system-{}", Uuid::new_v4());
        let session = Arc::new(StreamSession::new(
            conversation_id.to_string(),
            live_message_id.clone(),
        ));

        // Reserve the conversation, or reject if a live stream exists
        {
            let mut active = self.active.write().await;
            if let Some(existing) = active.get(conversation_id) {
                if existing.is_live().await {
                    return Err(ChatError::StreamInProgress(conversation_id.to_string()));
                }
            }
            active.insert(conversation_id.to_string(), session.clone());
        }

        info!(
            conversation_id = %conversation_id,
            message_id = %live_message_id,
            question_len = question.len(),
            "Starting streaming session"
        );

        // Persist the user turn, then the empty live message
        let user_message = Message::new(
            format!("user-{}", Uuid::new_v4()),
            MessageRole::User,
            question.to_string(),
        );
        if let Err(e) = self.store.upsert_message(conversation_id, user_message) {
            self.release(&session).await;
            return Err(e.into());
        }
        let live_message = Message::new(live_message_id, MessageRole::System, String::new());
        if let Err(e) = self.store.upsert_message(conversation_id, live_message) {
            self.release(&session).await;
            return Err(e.into());
        }

        let request = ChatStreamRequest {
            conversation: vec![ConversationEntry {
                role: MessageRole::User.as_str().to_string(),
                content: question.to_string(),
            }],
            uuid: Uuid::new_v4().to_string(),
            study_program: self.study_program.clone(),
        };
        let url = format!("{}/chat_stream/", self.endpoint);

        let response = match self
            .client
            .post(&url)
            .query(&[("question", question)])
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to reach conversation endpoint"
                );
                session.mark_failed().await;
                self.release(&session).await;
                return Err(ChatError::Transport(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            error!(
                conversation_id = %conversation_id,
                status = status.as_u16(),
                "Conversation endpoint returned error status"
            );
            session.mark_failed().await;
            self.release(&session).await;
            return Err(ChatError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        session.mark_streaming().await;

        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        tokio::spawn(drive_stream(
            session.clone(),
            self.store.clone(),
            tx,
            response,
            self.active.clone(),
        ));

        Ok(SessionHandle {
            session,
            updates: rx,
        })
    }

    /// Request cancellation of a conversation's live session
    ///
    /// Returns whether a live stream was signalled. A session that already
    /// reached a terminal state but has not been reaped from the active map
    /// yet counts as not cancellable.
    pub async fn cancel(&self, conversation_id: &str) -> bool {
        let active = self.active.read().await;
        match active.get(conversation_id) {
            Some(session) if session.is_live().await => {
                session.cancel();
                true
            }
            _ => false,
        }
    }

    /// Number of sessions currently occupying a conversation
    pub async fn active_sessions(&self) -> usize {
        self.active.read().await.len()
    }

    /// Drop the session's reservation of its conversation
    async fn release(&self, session: &Arc<StreamSession>) {
        remove_from_active(&self.active, session).await;
    }
}

/// Bridge a response body through the decoder into a typed event stream
fn event_stream(response: reqwest::Response) -> impl Stream<Item = Result<StreamEvent, ChatError>> {
    use async_stream::stream;

    stream! {
        let mut decoder = StreamDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => match decoder.feed(&bytes) {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(ChatError::Decode(e));
                        return;
                    }
                },
                Err(e) => {
                    yield Err(ChatError::Transport(e));
                    return;
                }
            }
        }

        match decoder.close() {
            Ok(events) => {
                for event in events {
                    yield Ok(event);
                }
            }
            Err(e) => yield Err(ChatError::Decode(e)),
        }
    }
}

/// Drive one session to a terminal state
///
/// Processes events strictly in arrival order; each write-through upsert
/// completes before the next event is handled. Cancellation races the next
/// chunk, so a cancelled session stops reading promptly and keeps whatever
/// content had accumulated.
async fn drive_stream(
    session: Arc<StreamSession>,
    store: Arc<TranscriptStore>,
    updates: mpsc::Sender<SessionUpdate>,
    response: reqwest::Response,
    active: Arc<RwLock<HashMap<String, Arc<StreamSession>>>>,
) {
    let events = event_stream(response);
    tokio::pin!(events);

    loop {
        tokio::select! {
            _ = session.cancelled() => {
                if session.mark_cancelled().await {
                    info!(
                        conversation_id = %session.conversation_id(),
                        "Session cancelled, partial content retained"
                    );
                    let _ = updates.send(SessionUpdate::Cancelled).await;
                }
                break;
            }
            next = events.next() => match next {
                Some(Ok(event)) => {
                    session.apply_event(&store, &updates, event).await;
                    if session.state().await.is_terminal() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(
                        conversation_id = %session.conversation_id(),
                        error = %e,
                        "Stream failed mid-flight"
                    );
                    session.mark_failed().await;
                    let _ = updates.send(SessionUpdate::Failed(e.to_string())).await;
                    break;
                }
                None => {
                    session.finish_at_eof(&updates).await;
                    break;
                }
            }
        }
    }

    remove_from_active(&active, &session).await;
    let state = session.state().await;
    debug!(
        conversation_id = %session.conversation_id(),
        state = ?state,
        "Session wound down"
    );
}

/// Remove a session's conversation entry, but only if it still owns it
async fn remove_from_active(
    active: &RwLock<HashMap<String, Arc<StreamSession>>>,
    session: &Arc<StreamSession>,
) {
    let mut active = active.write().await;
    if let Some(current) = active.get(session.conversation_id()) {
        if Arc::ptr_eq(current, session) {
            active.remove(session.conversation_id());
        }
    }
}
