//! Chat data models
//!
//! Defines the message structure shared by the transcript store and the
//! streaming session.

use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message produced by the system while an answer is streaming in
    System,
    /// Message from the user
    User,
    /// Message from the assistant
    Assistant,
    /// Function-call message
    Function,
    /// Data message
    Data,
    /// Tool message
    Tool,
}

impl MessageRole {
    /// Convert the role to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Function => "function",
            MessageRole::Data => "data",
            MessageRole::Tool => "tool",
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s {
            "system" => MessageRole::System,
            "assistant" => MessageRole::Assistant,
            "function" => MessageRole::Function,
            "data" => MessageRole::Data,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        }
    }
}

/// A single message in a conversation
///
/// The id is assigned once and never reused within a conversation. Content is
/// appended to incrementally while the message is live and immutable once the
/// exchange has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message (unique within its conversation)
    pub id: String,
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new message
    pub fn new(id: String, role: MessageRole, content: String) -> Self {
        Self { id, role, content }
    }
}
