//! Streaming response pipeline
//!
//! The decoder turns raw response-body bytes into typed protocol events, the
//! session owns the state machine of one question/answer exchange, and the
//! controller bridges decoder events into the transcript store.

pub mod controller;
pub mod decoder;
pub mod session;

pub use controller::{SessionController, SessionHandle};
pub use decoder::{DecodeError, StreamDecoder, StreamEvent};
pub use session::{SessionState, SessionUpdate, StreamSession};
