//! Chat transcript store
//!
//! Durable, synchronous key-value persistence of conversation histories.
//! The whole structure is kept in memory and written through to a versioned
//! JSON file on every mutation; deletion is an external concern and is not
//! offered here.

use crate::chat::models::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Current version of the transcript file format
const TRANSCRIPT_FILE_VERSION: u32 = 1;

/// Errors that can occur while persisting the transcript
#[derive(Error, Debug)]
pub enum StoreError {
    /// File I/O error while writing the transcript
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializable envelope for the transcript file
///
/// The version field exists for future migration support.
#[derive(Debug, Serialize, Deserialize)]
struct TranscriptFile {
    version: u32,
    conversations: HashMap<String, Vec<Message>>,
}

/// Durable per-conversation message log
///
/// Maps conversation id to its ordered message sequence. Loaded once on
/// `open`; every `upsert_message` call is a complete, non-interleaved
/// read-modify-write cycle guarded by a single critical section, so two
/// conversations streaming concurrently can never lose each other's updates.
pub struct TranscriptStore {
    path: PathBuf,
    conversations: Mutex<HashMap<String, Vec<Message>>>,
}

impl TranscriptStore {
    /// Open a transcript store backed by the given file
    ///
    /// A missing, unreadable or unrecognized file degrades to an empty store
    /// rather than failing the caller.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let conversations = Self::load_from_file(&path);
        debug!(
            path = %path.display(),
            conversations = conversations.len(),
            "Opened transcript store"
        );
        Self {
            path,
            conversations: Mutex::new(conversations),
        }
    }

    /// Read the persisted structure, degrading to empty on any problem
    fn load_from_file(path: &Path) -> HashMap<String, Vec<Message>> {
        if !path.exists() {
            return HashMap::new();
        }

        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Transcript file unreadable, starting with empty history"
                );
                return HashMap::new();
            }
        };

        let file: TranscriptFile = match serde_json::from_str(&json) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Transcript file corrupt, starting with empty history"
                );
                return HashMap::new();
            }
        };

        if file.version != TRANSCRIPT_FILE_VERSION {
            warn!(
                path = %path.display(),
                version = file.version,
                "Unsupported transcript version, starting with empty history"
            );
            return HashMap::new();
        }

        file.conversations
    }

    /// Snapshot of the entire conversation mapping
    pub fn load(&self) -> HashMap<String, Vec<Message>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages of one conversation, in insertion order
    ///
    /// Returns an empty list for unknown conversation ids.
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert or update a message within a conversation
    ///
    /// Unknown conversation ids get an empty conversation created first. If a
    /// message with the same id exists it is replaced in place, preserving
    /// its position; otherwise the message is appended. The updated structure
    /// is persisted synchronously before returning, and the operation is
    /// idempotent.
    pub fn upsert_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let messages = conversations
            .entry(conversation_id.to_string())
            .or_default();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => messages.push(message),
        }

        self.persist(&conversations)
    }

    /// Write the whole structure to disk
    fn persist(&self, conversations: &HashMap<String, Vec<Message>>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = TranscriptFile {
            version: TRANSCRIPT_FILE_VERSION,
            conversations: conversations.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, json)?;

        Ok(())
    }
}
