//! Stream decoder
//!
//! Converts the raw byte chunks of a live response body into discrete, typed
//! protocol events. Chunks arrive at arbitrary boundaries, so records are
//! reassembled in an internal buffer and only classified once the delimiter
//! proves them complete. Each decoder instance is single-use, bound to one
//! response body.

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Delimiter separating event records on the wire
const RECORD_DELIMITER: &[u8] = b"\ndata: ";

/// Prefix every event record must carry
const RECORD_PREFIX: &str = "data: ";

/// Errors that can occur while decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The decoder was fed after `close`
    #[error("Decoder is closed")]
    Closed,
}

/// A decoded protocol event
///
/// Produced by the decoder, consumed by the session controller. Transient,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental answer fragment to append in arrival order
    Partial {
        /// Text fragment
        text: String,
    },
    /// Terminal record carrying the authoritative complete answer
    Final {
        /// Complete answer text, superseding all partial fragments
        full_text: String,
        /// Whether the caller should offer a feedback prompt
        feedback_eligible: bool,
    },
    /// A prefixed record whose payload failed to parse
    Malformed {
        /// The raw record, for diagnostics
        raw: String,
    },
}

/// Wire payload of one event record, after the `data: ` prefix
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireRecord {
    Stream { data: String },
    Final { data: FinalPayload },
}

#[derive(Debug, Deserialize)]
struct FinalPayload {
    full_answer: String,
    #[serde(default)]
    feedback_trigger: bool,
}

/// Pull-based parser over the raw bytes of one response body
///
/// `feed` buffers bytes and yields every event completed by a delimiter;
/// `close` flushes the trailing record and makes the decoder terminal.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    closed: bool,
}

impl StreamDecoder {
    /// Create a decoder for one response body
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and yield all events completed by it
    ///
    /// Splits the buffer on `\ndata: `; everything before a delimiter is a
    /// complete record and gets classified. Only the `\n` of the delimiter is
    /// consumed, so the remainder keeps its `data: ` prefix and stays
    /// buffered until the next call completes it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, DecodeError> {
        if self.closed {
            return Err(DecodeError::Closed);
        }

        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(split_index) = find_delimiter(&self.buffer) {
            let record_bytes: Vec<u8> = self.buffer.drain(..=split_index).collect();
            // Drop the trailing '\n'; the buffer now starts at "data: "
            let record = String::from_utf8_lossy(&record_bytes[..split_index]);
            if let Some(event) = classify(&record) {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Flush the trailing record and make the decoder terminal
    ///
    /// Called when the transport reports end-of-stream. Any remaining
    /// buffered content is classified as a final record; further `feed` or
    /// `close` calls are rejected.
    pub fn close(&mut self) -> Result<Vec<StreamEvent>, DecodeError> {
        if self.closed {
            return Err(DecodeError::Closed);
        }
        self.closed = true;

        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let record = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            if let Some(event) = classify(&record) {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Find the first occurrence of the record delimiter
fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(RECORD_DELIMITER.len())
        .position(|window| window == RECORD_DELIMITER)
}

/// Classify one complete event record
///
/// Records without the `data: ` prefix are silently discarded — the wire
/// format interleaves event and non-event lines. A prefixed record whose
/// payload fails to parse yields `Malformed` so decoding of subsequent
/// records continues.
fn classify(record: &str) -> Option<StreamEvent> {
    let payload = record.strip_prefix(RECORD_PREFIX)?;

    match serde_json::from_str::<WireRecord>(payload) {
        Ok(WireRecord::Stream { data }) => Some(StreamEvent::Partial { text: data }),
        Ok(WireRecord::Final { data }) => Some(StreamEvent::Final {
            full_text: data.full_answer,
            feedback_eligible: data.feedback_trigger,
        }),
        Err(e) => {
            warn!(
                error = %e,
                record_len = record.len(),
                "Discarding malformed event record"
            );
            Some(StreamEvent::Malformed {
                raw: record.to_string(),
            })
        }
    }
}
