//! Security-focused logging module to track moderation and connection events
//!
//! Each event kind is logged at its own level under the `security` target and
//! counted, so a classifier outage can be told apart from genuine blocks.

use log::{debug, error, warn};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

const TARGET: &str = "security";

/// Types of security events to track
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    /// A banned address tried to connect
    ConnectionRejected { ip: IpAddr },
    /// The classifier returned a genuine BLOCK verdict
    ContentBlocked { ip: IpAddr, content_kind: &'static str, excerpt: String },
    /// The classifier failed; treated as BLOCK
    ClassifierFailure { ip: IpAddr, content_kind: &'static str, error: String },
    /// An address was added to the ban set
    AddressBanned { ip: IpAddr, reason: String },
    /// An inbound frame could not be decoded
    DecodeFailure { ip: IpAddr, details: String },
    /// A recipient could not take a broadcast and was dropped
    DeliveryFailure { ip: IpAddr, session_id: u64 },
}

impl SecurityEvent {
    /// Stable counter key for this kind of event
    pub fn key(&self) -> &'static str {
        match self {
            SecurityEvent::ConnectionRejected { .. } => "connection_rejected",
            SecurityEvent::ContentBlocked { .. } => "content_blocked",
            SecurityEvent::ClassifierFailure { .. } => "classifier_failure",
            SecurityEvent::AddressBanned { .. } => "address_banned",
            SecurityEvent::DecodeFailure { .. } => "decode_failure",
            SecurityEvent::DeliveryFailure { .. } => "delivery_failure",
        }
    }
}

/// Security logger for tracking moderation outcomes
pub struct SecurityLogger {
    event_counts: RwLock<HashMap<&'static str, usize>>,
}

impl SecurityLogger {
    /// Create a new security logger
    pub fn new() -> Self {
        Self {
            event_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Log a security event
    pub async fn log_event(&self, event: SecurityEvent) {
        match &event {
            SecurityEvent::ConnectionRejected { ip } => {
                warn!(target: TARGET, "Rejected connection from banned address {}", ip);
            }
            SecurityEvent::ContentBlocked { ip, content_kind, excerpt } => {
                error!(target: TARGET, "HARMFUL CONTENT DETECTED from {} ({}): {}", ip, content_kind, excerpt);
            }
            SecurityEvent::ClassifierFailure { ip, content_kind, error } => {
                error!(
                    target: TARGET,
                    "Classifier failure for {} from {}, failing closed: {}",
                    content_kind, ip, error
                );
            }
            SecurityEvent::AddressBanned { ip, reason } => {
                warn!(target: TARGET, "BANNED IP {}: {}", ip, reason);
            }
            SecurityEvent::DecodeFailure { ip, details } => {
                warn!(target: TARGET, "Dropped undecodable frame from {}: {}", ip, details);
            }
            SecurityEvent::DeliveryFailure { ip, session_id } => {
                debug!(target: TARGET, "Delivery to session {} ({}) failed, dropping it", session_id, ip);
            }
        }

        let mut counts = self.event_counts.write().await;
        *counts.entry(event.key()).or_insert(0) += 1;
    }

    /// How many events of the given kind have been logged
    pub async fn count(&self, key: &str) -> usize {
        let counts = self.event_counts.read().await;
        counts.get(key).copied().unwrap_or(0)
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSecurityLogger = Arc<SecurityLogger>;

/// Shorten content for log lines
pub fn excerpt(content: &str) -> String {
    const MAX_EXCERPT_CHARS: usize = 120;
    if content.chars().count() <= MAX_EXCERPT_CHARS {
        content.to_string()
    } else {
        let cut: String = content.chars().take(MAX_EXCERPT_CHARS).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failures_and_blocks_are_counted_apart() {
        let logger = SecurityLogger::new();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        logger
            .log_event(SecurityEvent::ContentBlocked {
                ip,
                content_kind: "text",
                excerpt: "bad".to_string(),
            })
            .await;
        logger
            .log_event(SecurityEvent::ClassifierFailure {
                ip,
                content_kind: "text",
                error: "timeout".to_string(),
            })
            .await;
        logger
            .log_event(SecurityEvent::ClassifierFailure {
                ip,
                content_kind: "image",
                error: "bad reply".to_string(),
            })
            .await;

        assert_eq!(logger.count("content_blocked").await, 1);
        assert_eq!(logger.count("classifier_failure").await, 2);
        assert_eq!(logger.count("address_banned").await, 0);
    }

    #[test]
    fn test_excerpt_truncates_long_content() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).len(), 123);
        assert_eq!(excerpt("short"), "short");
    }
}
