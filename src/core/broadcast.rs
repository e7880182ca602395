//! Broadcast router
//!
//! Serializes an event once and queues it to every registered session. A
//! recipient that cannot take the event is retired by the registry and a single
//! leave notice is sent for it; recipients failing that follow-up pass are
//! dropped silently.

use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::connection::SessionId;
use crate::core::message::OutboundEvent;
use crate::core::session::SharedRegistry;
use crate::error::Result;
use crate::security_log::{SecurityEvent, SharedSecurityLogger};

/// Statistics for broadcast operations
#[derive(Debug, Default, Clone)]
pub struct BroadcastStats {
    pub total_recipients: usize,
    pub sent_count: usize,
    /// Recipients dropped because delivery failed, in any pass
    pub dropped: usize,
    /// Leave notices issued for dropped recipients
    pub departures_announced: usize,
    /// The event was withheld because its sender had already left
    pub origin_gone: bool,
    pub duration: Duration,
}

#[derive(Clone)]
pub struct BroadcastRouter {
    registry: SharedRegistry,
    security: SharedSecurityLogger,
}

impl BroadcastRouter {
    pub fn new(registry: SharedRegistry, security: SharedSecurityLogger) -> Self {
        Self { registry, security }
    }

    /// Deliver `event` to every active session except `exclude`
    pub async fn broadcast(&self, event: &OutboundEvent, exclude: Option<SessionId>) -> Result<BroadcastStats> {
        self.dispatch(event, exclude, None).await
    }

    /// Deliver an event originating from session `origin`. Nothing is sent if
    /// the origin has been torn down (banned or disconnected) in the meantime.
    pub async fn broadcast_from(
        &self,
        event: &OutboundEvent,
        origin: SessionId,
        exclude: Option<SessionId>,
    ) -> Result<BroadcastStats> {
        self.dispatch(event, exclude, Some(origin)).await
    }

    async fn dispatch(
        &self,
        event: &OutboundEvent,
        exclude: Option<SessionId>,
        origin: Option<SessionId>,
    ) -> Result<BroadcastStats> {
        let start = Instant::now();
        let payload: Arc<str> = Arc::from(event.to_json()?);

        let first_pass = self.registry.fan_out(&payload, exclude, origin)?;
        if first_pass.origin_gone {
            debug!("Dropping {} event: its sender is no longer connected", event.kind());
            return Ok(BroadcastStats {
                origin_gone: true,
                duration: start.elapsed(),
                ..Default::default()
            });
        }

        let mut stats = BroadcastStats {
            total_recipients: first_pass.attempted,
            sent_count: first_pass.delivered,
            dropped: first_pass.failed.len(),
            ..Default::default()
        };

        for gone in first_pass.failed {
            self.security
                .log_event(SecurityEvent::DeliveryFailure {
                    ip: gone.address,
                    session_id: gone.id,
                })
                .await;

            // One retry-less pass: failures here are not announced again
            let notice = OutboundEvent::left(gone.address);
            let notice_payload: Arc<str> = Arc::from(notice.to_json()?);
            let follow_up = self.registry.fan_out(&notice_payload, None, None)?;
            stats.departures_announced += 1;
            stats.dropped += follow_up.failed.len();

            for also_gone in follow_up.failed {
                debug!(
                    "Session {} ({}) dropped during departure notice, not announced",
                    also_gone.id, also_gone.address
                );
                self.security
                    .log_event(SecurityEvent::DeliveryFailure {
                        ip: also_gone.address,
                        session_id: also_gone.id,
                    })
                    .await;
            }
            info!("User from {} dropped after failed delivery", gone.address);
        }

        stats.duration = start.elapsed();
        debug!(
            "Broadcast {} to {}/{} recipients",
            event.kind(),
            stats.sent_count,
            stats.total_recipients
        );
        Ok(stats)
    }
}
