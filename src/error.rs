//! Error types and error handling for the chat core
//!
//! This module defines the crate-level error type. Module-specific errors
//! (`DecodeError`, `StoreError`) convert into it via `#[from]` so callers
//! deal with a single failure surface.

use thiserror::Error;

/// Crate-level error type
///
/// Session-level failures (transport, persistence, concurrency) are surfaced
/// through this enum. Per-record decode failures are *not* errors — the
/// decoder recovers from those locally and reports them as `Malformed` events.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The outbound request could not be sent or the response body broke off
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream endpoint answered with a non-success status
    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus {
        /// HTTP status code returned by the endpoint
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// A stream is already active for this conversation
    #[error("A stream is already in progress for conversation {0}")]
    StreamInProgress(String),

    /// Error from the transcript store
    #[error("Store error: {0}")]
    Store(#[from] crate::chat::StoreError),

    /// Error from the stream decoder
    #[error("Decode error: {0}")]
    Decode(#[from] crate::stream::DecodeError),
}
