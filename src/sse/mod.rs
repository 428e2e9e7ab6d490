//! Server-Sent Events framing
//!
//! The backend pushes job status as a `text/event-stream`. Only two kinds of
//! frames matter to the stream client:
//! - `data: <JSON>` lines, dispatched on the blank line that ends an event
//! - `: comment` lines, which the server sends as keepalive

pub mod decoder;

pub use decoder::SseDecoder;

/// A decoded frame from an event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Payload of one event; multiple `data:` lines are joined with `\n`
    Data(String),
    /// Comment line (keepalive), without the leading `:`
    Comment(String),
}
