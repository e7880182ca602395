//! Moderation gate: decides what happens to each inbound item
//!
//! RECEIVED -> CLASSIFYING -> ALLOWED | BLOCKED. Allowed content is broadcast;
//! blocked content (including any classifier failure) bans the sender.

use log::{debug, info};
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::RelaySettings;
use crate::constants::BAN_REASON;
use crate::core::broadcast::{BroadcastRouter, BroadcastStats};
use crate::core::connection::Session;
use crate::core::context::ContextWindow;
use crate::core::message::{InboundContent, OutboundEvent};
use crate::core::session::SharedRegistry;
use crate::error::{RelayError, Result};
use crate::moderation::{SharedModerator, Verdict};
use crate::security_log::{excerpt, SecurityEvent, SharedSecurityLogger};

/// Terminal state of one inbound item
#[derive(Debug)]
pub enum GateOutcome {
    /// Empty or whitespace-only text; nothing happened
    Dropped,
    /// Allowed and broadcast
    Delivered(BroadcastStats),
    /// Allowed, but the sender was torn down while it was being classified
    Discarded,
    /// Blocked; the sender's address is banned. `announced` is false when the
    /// ban closed no session, since those departures were already announced.
    Banned { newly_banned: bool, announced: bool },
}

#[derive(Clone)]
pub struct ModerationGate {
    registry: SharedRegistry,
    router: BroadcastRouter,
    moderator: SharedModerator,
    security: SharedSecurityLogger,
    classifier_timeout: Duration,
    echo_to_sender: bool,
}

impl ModerationGate {
    pub fn new(
        registry: SharedRegistry,
        router: BroadcastRouter,
        moderator: SharedModerator,
        security: SharedSecurityLogger,
        settings: &RelaySettings,
    ) -> Self {
        Self {
            registry,
            router,
            moderator,
            security,
            classifier_timeout: settings.classifier_timeout,
            echo_to_sender: settings.echo_to_sender,
        }
    }

    /// Run one decoded inbound item through moderation.
    ///
    /// The sender's context window stays locked until the item is judged, image
    /// bytes included, so the next item from the same address waits for it.
    pub async fn process(&self, session: &Session, content: InboundContent) -> Result<GateOutcome> {
        match content {
            InboundContent::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(GateOutcome::Dropped);
                }
                let slot = self.registry.contexts().window(session.address)?;
                let mut window = slot.lock().await;

                if self.check_text(&mut window, session.address, text).await == Verdict::Block {
                    return self.ban(session).await;
                }
                drop(window);

                let event = OutboundEvent::chat(session.address, text.to_string());
                self.deliver(session, event).await
            }
            InboundContent::Image { name, bytes } => {
                let slot = self.registry.contexts().window(session.address)?;
                let mut window = slot.lock().await;

                // Cheaper check first: the declared name goes down the text path
                let declared = name.trim();
                if !declared.is_empty()
                    && self.check_text(&mut window, session.address, declared).await == Verdict::Block
                {
                    return self.ban(session).await;
                }

                let verdict = self
                    .classify(
                        session.address,
                        "image",
                        format!("image {}", excerpt(&name)),
                        self.moderator.classify_image(&bytes),
                    )
                    .await;
                if verdict == Verdict::Block {
                    return self.ban(session).await;
                }
                drop(window);

                let event = OutboundEvent::image(session.address, name, bytes);
                self.deliver(session, event).await
            }
        }
    }

    /// Append `text` to the address's window and classify it with everything
    /// the window retains
    async fn check_text(&self, window: &mut ContextWindow, address: IpAddr, text: &str) -> Verdict {
        window.push(text.to_string());
        let context = window.entries();

        self.classify(
            address,
            "text",
            excerpt(text),
            self.moderator.classify_text(text, &context),
        )
        .await
    }

    /// Await a classifier call with a bound; any error or expiry is a BLOCK
    async fn classify<F>(&self, address: IpAddr, content_kind: &'static str, preview: String, call: F) -> Verdict
    where
        F: Future<Output = Result<Verdict>>,
    {
        let outcome = match tokio::time::timeout(self.classifier_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::ClassifierTimeout),
        };

        match outcome {
            Ok(Verdict::Allow) => {
                debug!("{} from {} allowed", content_kind, address);
                Verdict::Allow
            }
            Ok(Verdict::Block) => {
                self.security
                    .log_event(SecurityEvent::ContentBlocked {
                        ip: address,
                        content_kind,
                        excerpt: preview,
                    })
                    .await;
                Verdict::Block
            }
            Err(e) => {
                self.security
                    .log_event(SecurityEvent::ClassifierFailure {
                        ip: address,
                        content_kind,
                        error: e.to_string(),
                    })
                    .await;
                Verdict::Block
            }
        }
    }

    async fn deliver(&self, session: &Session, event: OutboundEvent) -> Result<GateOutcome> {
        let exclude = if self.echo_to_sender { None } else { Some(session.id) };
        let stats = self.router.broadcast_from(&event, session.id, exclude).await?;
        if stats.origin_gone {
            return Ok(GateOutcome::Discarded);
        }
        info!(
            "{} from {} delivered to {} client(s)",
            event.kind(),
            session.address,
            stats.sent_count
        );
        Ok(GateOutcome::Delivered(stats))
    }

    /// Tear down the offender, record the ban, then tell the room. The first two
    /// happen atomically in the registry. The notice follows only for a new ban
    /// that actually closed a session; a sender already retired for another
    /// reason has had its departure announced.
    async fn ban(&self, session: &Session) -> Result<GateOutcome> {
        let outcome = self.registry.ban(session.address, BAN_REASON)?;
        if !outcome.newly_banned {
            return Ok(GateOutcome::Banned {
                newly_banned: false,
                announced: false,
            });
        }

        self.security
            .log_event(SecurityEvent::AddressBanned {
                ip: session.address,
                reason: BAN_REASON.to_string(),
            })
            .await;

        if outcome.removed.is_empty() {
            debug!("Ban of {} closed no session, no notice sent", session.address);
            return Ok(GateOutcome::Banned {
                newly_banned: true,
                announced: false,
            });
        }
        self.router
            .broadcast(&OutboundEvent::banned(session.address), None)
            .await?;
        Ok(GateOutcome::Banned {
            newly_banned: true,
            announced: true,
        })
    }
}
