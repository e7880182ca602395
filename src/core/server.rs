//! Relay coordinator that wires the registry, router and moderation gate together

use std::sync::Arc;

use crate::config::RelaySettings;
use crate::core::broadcast::BroadcastRouter;
use crate::core::gate::ModerationGate;
use crate::core::session::{create_registry, SharedRegistry};
use crate::error::Result;
use crate::moderation::SharedModerator;
use crate::security_log::{SecurityLogger, SharedSecurityLogger};

/// Shared state every connection handler works against
pub struct ChatRelay {
    registry: SharedRegistry,
    router: BroadcastRouter,
    gate: ModerationGate,
    security: SharedSecurityLogger,
    settings: RelaySettings,
}

impl ChatRelay {
    /// Create a relay that moderates through `moderator`
    pub fn new(moderator: SharedModerator, settings: RelaySettings) -> Self {
        let registry = create_registry(settings.send_queue_capacity);
        let security: SharedSecurityLogger = Arc::new(SecurityLogger::new());
        let router = BroadcastRouter::new(registry.clone(), security.clone());
        let gate = ModerationGate::new(
            registry.clone(),
            router.clone(),
            moderator,
            security.clone(),
            &settings,
        );

        Self {
            registry,
            router,
            gate,
            security,
            settings,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    pub fn gate(&self) -> &ModerationGate {
        &self.gate
    }

    pub fn security(&self) -> &SharedSecurityLogger {
        &self.security
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Get connection count
    pub fn connection_count(&self) -> Result<usize> {
        self.registry.client_count()
    }
}

// Shared reference to the relay
pub type SharedRelay = Arc<ChatRelay>;
