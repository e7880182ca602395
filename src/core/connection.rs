//! Outbound side of a session
//! Every session owns a bounded FIFO queue drained by its own writer task, and a
//! teardown signal observed by both its reader loop and its writer task.

use chrono::{DateTime, Utc};
use log::warn;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;

/// Opaque session handle. Allocated from a monotonic counter and never reused.
pub type SessionId = u64;

/// A registry-tracked record for one connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    pub id: SessionId,
    pub address: IpAddr,
    pub joined_at: DateTime<Utc>,
}

/// Why a session was removed from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    /// The peer went away (closed, read error) and its handler retired it
    Disconnected,
    /// A broadcast could not be queued for this recipient
    DeliveryFailed,
    /// The moderation gate banned the session's address
    Banned { reason: String },
}

/// Registry-owned handle used to deliver events to one session
pub struct Connection {
    pub session: Session,
    sender: mpsc::Sender<Arc<str>>,
    teardown: watch::Sender<Option<Teardown>>,
}

/// Receiving ends, held by the tasks serving the connection
pub struct ConnectionEnds {
    pub outbound: mpsc::Receiver<Arc<str>>,
    pub teardown: watch::Receiver<Option<Teardown>>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue
    pub fn new(session: Session, capacity: usize) -> (Self, ConnectionEnds) {
        let (sender, outbound) = mpsc::channel(capacity.max(1));
        let (teardown, teardown_rx) = watch::channel(None);
        (
            Self {
                session,
                sender,
                teardown,
            },
            ConnectionEnds {
                outbound,
                teardown: teardown_rx,
            },
        )
    }

    /// Queue a serialized event without waiting. A full queue means the
    /// recipient is stuck, which counts as a failed delivery.
    pub fn try_deliver(&self, payload: &Arc<str>) -> bool {
        match self.sender.try_send(payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for session {} ({})", self.session.id, self.session.address);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Failed to send message to session {} ({})", self.session.id, self.session.address);
                false
            }
        }
    }

    /// Signal the connection's tasks that the session is gone
    pub fn tear_down(self, reason: Teardown) {
        self.teardown.send_replace(Some(reason));
    }
}

/// Wait until the session is torn down. If the registry dropped the handle
/// without a reason, the session is treated as disconnected.
pub async fn wait_for_teardown(rx: &mut watch::Receiver<Option<Teardown>>) -> Teardown {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(reason) = current {
            return reason;
        }
        if rx.changed().await.is_err() {
            let last = rx.borrow().clone();
            return last.unwrap_or(Teardown::Disconnected);
        }
    }
}
