//! Transport-neutral frame type
//!
//! The session loop only sees `Frame`s; the websocket handler converts warp
//! messages to and from this type, and tests drive it through channels.

use std::fmt;

/// A single unit exchanged with a connected peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
    /// Control frames (ping/pong) the relay does not act on
    Control,
}

impl Frame {
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Frame::Close {
            code,
            reason: reason.into(),
        }
    }
}

/// Failure reported by the inbound half of a transport
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}
