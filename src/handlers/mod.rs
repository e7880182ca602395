//! Request handlers for different server endpoints

pub mod session;
pub mod websocket;

// Re-export the handlers
pub use session::run_session;
pub use websocket::{handle_ws_client, routes};
