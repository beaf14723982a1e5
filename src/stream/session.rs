//! Streaming session
//!
//! State machine for a single question/answer exchange. One session owns one
//! live message; decoder events mutate the session and are written through
//! to the transcript store before the next event is processed.

use crate::chat::{Message, MessageRole, TranscriptStore};
use crate::stream::decoder::StreamEvent;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, error, warn};

/// Lifecycle state of a streaming session
///
/// `Idle → Streaming → {Finalizing → Completed | Cancelled | Failed}`.
/// `Finalizing` exists so the wholesale replace plus feedback-flag set on a
/// final event is atomic with respect to concurrent reads of the live
/// message. `Completed`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but the outbound request has not been issued yet
    Idle,
    /// Receiving partial answer fragments
    Streaming,
    /// A final event arrived and is being applied
    Finalizing,
    /// The exchange finished normally
    Completed,
    /// The exchange was cancelled by the caller
    Cancelled,
    /// The transport failed before or during the stream
    Failed,
}

impl SessionState {
    /// Whether the session has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Update surfaced to the caller while a session runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// An incremental text fragment was appended to the live message
    Delta(String),
    /// The exchange finished; carries the authoritative answer
    Completed {
        /// Final content of the live message
        full_text: String,
        /// Whether the caller should offer a feedback prompt
        feedback_eligible: bool,
    },
    /// A write-through persist failed; the displayed text is unaffected
    PersistFailed(String),
    /// The exchange was cancelled; accumulated partial content is retained
    Cancelled,
    /// The transport failed mid-stream
    Failed(String),
}

/// Mutable session data, guarded by one lock so state, content and the
/// feedback flag always change together.
#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    content: String,
    feedback_eligible: bool,
}

/// One streaming question/answer exchange
///
/// Created by the controller when the user submits input; destroyed (dropped
/// from the active map) once the state is terminal.
pub struct StreamSession {
    /// Conversation this session streams into
    conversation_id: String,
    /// Id of the live message being filled
    live_message_id: String,
    inner: RwLock<SessionInner>,
    cancel: Notify,
}

impl StreamSession {
    /// Create a new session in `Idle` state
    pub(crate) fn new(conversation_id: String, live_message_id: String) -> Self {
        Self {
            conversation_id,
            live_message_id,
            inner: RwLock::new(SessionInner {
                state: SessionState::Idle,
                content: String::new(),
                feedback_eligible: false,
            }),
            cancel: Notify::new(),
        }
    }

    /// Conversation id this session belongs to
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Id of the live message being streamed into
    pub fn live_message_id(&self) -> &str {
        &self.live_message_id
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    /// Current content of the live message
    pub async fn content(&self) -> String {
        self.inner.read().await.content.clone()
    }

    /// Whether a final event flagged this exchange as feedback-eligible
    pub async fn feedback_eligible(&self) -> bool {
        self.inner.read().await.feedback_eligible
    }

    /// Whether the session still occupies its conversation
    ///
    /// A conversation admits at most one non-terminal session at a time.
    pub async fn is_live(&self) -> bool {
        !self.state().await.is_terminal()
    }

    /// Request cooperative cancellation
    ///
    /// Signals the stream driver to stop reading chunks. The live message
    /// retains whatever partial content had accumulated; nothing is rolled
    /// back.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// Resolves once cancellation has been requested
    pub(crate) async fn cancelled(&self) {
        self.cancel.notified().await;
    }

    /// Transition `Idle → Streaming` once the request is underway
    pub(crate) async fn mark_streaming(&self) {
        self.inner.write().await.state = SessionState::Streaming;
    }

    /// Transition to `Failed`
    pub(crate) async fn mark_failed(&self) {
        self.inner.write().await.state = SessionState::Failed;
    }

    /// Transition `Streaming → Cancelled`
    ///
    /// Returns whether the transition happened; cancellation of a session
    /// that already reached `Finalizing` or a terminal state is a no-op.
    pub(crate) async fn mark_cancelled(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state == SessionState::Streaming {
            inner.state = SessionState::Cancelled;
            true
        } else {
            false
        }
    }

    /// Apply one decoded protocol event
    ///
    /// Partial events append to the live content, final events replace it
    /// wholesale (the final payload is authoritative and supersedes any
    /// partials), malformed events are logged and skipped. Every content
    /// change is write-through persisted before the update is surfaced.
    pub(crate) async fn apply_event(
        &self,
        store: &TranscriptStore,
        updates: &mpsc::Sender<SessionUpdate>,
        event: StreamEvent,
    ) {
        match event {
            StreamEvent::Partial { text } => {
                let snapshot = {
                    let mut inner = self.inner.write().await;
                    if inner.state != SessionState::Streaming {
                        debug!(
                            conversation_id = %self.conversation_id,
                            state = ?inner.state,
                            "Dropping partial event outside Streaming state"
                        );
                        return;
                    }
                    inner.content.push_str(&text);
                    inner.content.clone()
                };

                self.persist_content(store, updates, snapshot).await;
                let _ = updates.send(SessionUpdate::Delta(text)).await;
            }
            StreamEvent::Final {
                full_text,
                feedback_eligible,
            } => {
                {
                    let mut inner = self.inner.write().await;
                    if inner.state != SessionState::Streaming {
                        debug!(
                            conversation_id = %self.conversation_id,
                            state = ?inner.state,
                            "Dropping final event outside Streaming state"
                        );
                        return;
                    }
                    inner.state = SessionState::Finalizing;
                    inner.content = full_text.clone();
                    inner.feedback_eligible = feedback_eligible;
                }

                self.persist_content(store, updates, full_text.clone())
                    .await;

                self.inner.write().await.state = SessionState::Completed;
                debug!(
                    conversation_id = %self.conversation_id,
                    message_id = %self.live_message_id,
                    feedback_eligible = feedback_eligible,
                    "Session completed"
                );
                let _ = updates
                    .send(SessionUpdate::Completed {
                        full_text,
                        feedback_eligible,
                    })
                    .await;
            }
            StreamEvent::Malformed { raw } => {
                warn!(
                    conversation_id = %self.conversation_id,
                    record_len = raw.len(),
                    "Skipping malformed event record"
                );
            }
        }
    }

    /// Complete a session whose stream ended cleanly without a final record
    ///
    /// The accumulated partial content stands as the answer and the feedback
    /// flag stays unset.
    pub(crate) async fn finish_at_eof(&self, updates: &mpsc::Sender<SessionUpdate>) {
        let full_text = {
            let mut inner = self.inner.write().await;
            if inner.state != SessionState::Streaming {
                return;
            }
            inner.state = SessionState::Completed;
            inner.content.clone()
        };

        debug!(
            conversation_id = %self.conversation_id,
            "Stream ended without a final record, completing with accumulated content"
        );
        let _ = updates
            .send(SessionUpdate::Completed {
                full_text,
                feedback_eligible: false,
            })
            .await;
    }

    /// Write the live message through to the store
    ///
    /// Persistence failures never block display: the error is reported as a
    /// distinct update and streaming continues.
    async fn persist_content(
        &self,
        store: &TranscriptStore,
        updates: &mpsc::Sender<SessionUpdate>,
        content: String,
    ) {
        let message = Message::new(self.live_message_id.clone(), MessageRole::System, content);
        if let Err(e) = store.upsert_message(&self.conversation_id, message) {
            error!(
                conversation_id = %self.conversation_id,
                message_id = %self.live_message_id,
                error = %e,
                "Failed to persist live message"
            );
            let _ = updates
                .send(SessionUpdate::PersistFailed(e.to_string()))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, TranscriptStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = TranscriptStore::open(temp_file.path());
        (temp_file, store)
    }

    fn partial(text: &str) -> StreamEvent {
        StreamEvent::Partial {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_partials_accumulate_and_persist() {
        let (_file, store) = test_store();
        let (tx, mut rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;

        session.apply_event(&store, &tx, partial("Hel")).await;
        session.apply_event(&store, &tx, partial("lo")).await;

        assert_eq!(session.content().await, "Hello");
        assert_eq!(store.messages("conv-1")[0].content, "Hello");
        assert_eq!(rx.recv().await, Some(SessionUpdate::Delta("Hel".into())));
        assert_eq!(rx.recv().await, Some(SessionUpdate::Delta("lo".into())));
    }

    #[tokio::test]
    async fn test_final_replaces_accumulated_partials() {
        let (_file, store) = test_store();
        let (tx, mut rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;

        session.apply_event(&store, &tx, partial("Hello")).await;
        session
            .apply_event(
                &store,
                &tx,
                StreamEvent::Final {
                    full_text: "Hello, world!".to_string(),
                    feedback_eligible: true,
                },
            )
            .await;

        // Wholesale replace, not concatenation
        assert_eq!(session.content().await, "Hello, world!");
        assert_eq!(session.state().await, SessionState::Completed);
        assert!(session.feedback_eligible().await);
        assert_eq!(store.messages("conv-1")[0].content, "Hello, world!");

        assert_eq!(rx.recv().await, Some(SessionUpdate::Delta("Hello".into())));
        assert_eq!(
            rx.recv().await,
            Some(SessionUpdate::Completed {
                full_text: "Hello, world!".to_string(),
                feedback_eligible: true,
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_event_changes_nothing() {
        let (_file, store) = test_store();
        let (tx, _rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;

        session.apply_event(&store, &tx, partial("keep")).await;
        session
            .apply_event(
                &store,
                &tx,
                StreamEvent::Malformed {
                    raw: "data: {not json}".to_string(),
                },
            )
            .await;

        assert_eq!(session.state().await, SessionState::Streaming);
        assert_eq!(session.content().await, "keep");
    }

    #[tokio::test]
    async fn test_cancel_retains_partial_content() {
        let (_file, store) = test_store();
        let (tx, _rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;

        session.apply_event(&store, &tx, partial("partial answer")).await;
        assert!(session.mark_cancelled().await);

        assert_eq!(session.state().await, SessionState::Cancelled);
        assert_eq!(store.messages("conv-1")[0].content, "partial answer");
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let (_file, store) = test_store();
        let (tx, _rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;

        session
            .apply_event(
                &store,
                &tx,
                StreamEvent::Final {
                    full_text: "done".to_string(),
                    feedback_eligible: false,
                },
            )
            .await;

        assert!(!session.mark_cancelled().await);
        assert_eq!(session.state().await, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_partial_after_terminal_state_is_dropped() {
        let (_file, store) = test_store();
        let (tx, _rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;
        session.mark_failed().await;

        session.apply_event(&store, &tx, partial("late")).await;

        assert_eq!(session.content().await, "");
        assert!(store.messages("conv-1").is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported_but_does_not_block_display() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "a file where a directory is needed").unwrap();

        // The store's parent path is a file, so every write-through fails
        let store = TranscriptStore::open(blocker.join("transcripts.json"));
        let (tx, mut rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;

        session.apply_event(&store, &tx, partial("shown anyway")).await;

        assert!(matches!(
            rx.recv().await,
            Some(SessionUpdate::PersistFailed(_))
        ));
        assert_eq!(
            rx.recv().await,
            Some(SessionUpdate::Delta("shown anyway".into()))
        );
        // Display state is unaffected and the stream keeps going
        assert_eq!(session.content().await, "shown anyway");
        assert_eq!(session.state().await, SessionState::Streaming);
    }

    #[tokio::test]
    async fn test_eof_without_final_completes_with_accumulated_text() {
        let (_file, store) = test_store();
        let (tx, mut rx) = mpsc::channel(16);
        let session = StreamSession::new("conv-1".to_string(), "msg-live".to_string());
        session.mark_streaming().await;

        session.apply_event(&store, &tx, partial("tail")).await;
        session.finish_at_eof(&tx).await;

        assert_eq!(session.state().await, SessionState::Completed);
        assert!(!session.feedback_eligible().await);
        assert_eq!(rx.recv().await, Some(SessionUpdate::Delta("tail".into())));
        assert_eq!(
            rx.recv().await,
            Some(SessionUpdate::Completed {
                full_text: "tail".to_string(),
                feedback_eligible: false,
            })
        );
    }
}
