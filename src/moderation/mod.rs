//! Moderation client boundary
//!
//! A `Moderator` is an opaque policy oracle: given content it answers ALLOW or
//! BLOCK. Every call may fail or hang; callers are expected to fail closed.

pub mod gemini;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

pub use gemini::GeminiModerator;

/// Binary classifier answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block,
}

#[async_trait]
pub trait Moderator: Send + Sync {
    /// Classify `current`, using `context` (oldest first, ending with
    /// `current`) as extra evidence for content split across messages
    async fn classify_text(&self, current: &str, context: &[String]) -> Result<Verdict>;

    /// Classify raw image bytes
    async fn classify_image(&self, bytes: &[u8]) -> Result<Verdict>;
}

pub type SharedModerator = Arc<dyn Moderator>;
