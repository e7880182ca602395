//! Moderated Chat - a WebSocket relay where every message is screened before broadcast
//!
//! This library provides the session registry, broadcast fan-out and
//! moderation gate of a single-room chat relay. Clients whose content the
//! classifier blocks are banned by network address.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod moderation;
pub mod security_log;

// Re-export main components
pub use config::*;
pub use constants::*;
