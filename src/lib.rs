//! Copilot Chat Core Library
//!
//! Client-side core for a streaming chat application: a pull-based stream
//! decoder for the server-push wire format, a session controller that drives
//! one question/answer exchange, and a durable per-conversation transcript
//! store. Rendering, navigation and credential handling live elsewhere; this
//! crate only exposes state transitions and data for such layers to consume.

pub mod chat;
pub mod config;
pub mod error;
/// Streaming pipeline
///
/// Handles the wire-format decoder, per-exchange sessions, and the controller
/// that bridges decoder events into the transcript store.
pub mod stream;
