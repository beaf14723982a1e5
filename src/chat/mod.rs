//! Chat data layer
//!
//! Message and role models plus the durable per-conversation transcript
//! store.

pub mod models;
pub mod store;

pub use models::{Message, MessageRole};
pub use store::{StoreError, TranscriptStore};
