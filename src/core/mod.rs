//! Core functionality for the relay server

pub mod broadcast;
pub mod connection;
pub mod context;
pub mod gate;
pub mod ip_extractor;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;

// Re-export main components for convenience
pub use broadcast::{BroadcastRouter, BroadcastStats};
pub use connection::{Session, SessionId, Teardown};
pub use gate::{GateOutcome, ModerationGate};
pub use message::{InboundContent, OutboundEvent};
pub use server::{ChatRelay, SharedRelay};
pub use session::{SessionRegistry, SessionState, SharedRegistry};
pub use transport::{Frame, TransportError};
