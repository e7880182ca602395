//! Session registry: the single authority for who is connected and who is banned
//!
//! All mutations (admit, remove, ban) and all enumerations (snapshot, fan-out)
//! run under one lock, so a broadcast can never observe a half-applied ban and
//! an admit can never slip in after its address was banned.

use chrono::Utc;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::constants::DEFAULT_SEND_QUEUE_CAPACITY;
use crate::core::connection::{Connection, ConnectionEnds, Session, SessionId, Teardown};
use crate::core::context::ContextStore;
use crate::error::{RelayError, Result};

/// Lifecycle of a session handle as seen by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NeverExisted,
    Active,
    TornDown,
}

/// Outcome of queueing one payload to every recipient
#[derive(Debug, Default)]
pub struct FanOut {
    pub attempted: usize,
    pub delivered: usize,
    /// Recipients whose delivery failed; already retired from the registry
    pub failed: Vec<Session>,
    /// The originating session was no longer active, so nothing was sent
    pub origin_gone: bool,
}

/// Outcome of banning an address
#[derive(Debug, Default)]
pub struct BanOutcome {
    /// Sessions from the address that were torn down
    pub removed: Vec<Session>,
    /// False when the address was already in the ban set
    pub newly_banned: bool,
}

struct RegistryState {
    // Keyed by monotonically increasing id, so iteration follows join order
    sessions: BTreeMap<SessionId, Connection>,
    banned: HashSet<IpAddr>,
    next_id: SessionId,
}

pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    contexts: ContextStore,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_SEND_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: BTreeMap::new(),
                banned: HashSet::new(),
                next_id: 1,
            }),
            contexts: ContextStore::new(),
            queue_capacity,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state.lock().map_err(RelayError::from)
    }

    /// Admit a new connection from `address`, unless the address is banned
    pub fn admit(&self, address: IpAddr) -> Result<(Session, ConnectionEnds)> {
        let mut state = self.lock()?;
        if state.banned.contains(&address) {
            return Err(RelayError::AddressBanned(address));
        }

        let session = Session {
            id: state.next_id,
            address,
            joined_at: Utc::now(),
        };
        state.next_id += 1;

        let (connection, ends) = Connection::new(session, self.queue_capacity);
        state.sessions.insert(session.id, connection);

        info!("Session {} admitted from {}", session.id, address);
        info!("Current connections: {}", state.sessions.len());
        Ok((session, ends))
    }

    /// Retire a session. Returns the session if it was active; removing a
    /// session that is already gone is a no-op returning `None`.
    pub fn remove(&self, id: SessionId, reason: Teardown) -> Result<Option<Session>> {
        let mut state = self.lock()?;
        Ok(Self::retire(&mut state, id, reason))
    }

    fn retire(state: &mut RegistryState, id: SessionId, reason: Teardown) -> Option<Session> {
        let connection = state.sessions.remove(&id)?;
        let session = connection.session;
        debug!("Session {} ({}) retired: {:?}", id, session.address, reason);
        connection.tear_down(reason);
        Some(session)
    }

    /// Ban an address. Every active session from it is torn down with the ban
    /// reason before the ban is recorded, inside the same critical section.
    pub fn ban(&self, address: IpAddr, reason: &str) -> Result<BanOutcome> {
        let mut state = self.lock()?;

        let offenders: Vec<SessionId> = state
            .sessions
            .values()
            .filter(|conn| conn.session.address == address)
            .map(|conn| conn.session.id)
            .collect();

        let removed: Vec<Session> = offenders
            .into_iter()
            .filter_map(|id| {
                Self::retire(
                    &mut state,
                    id,
                    Teardown::Banned {
                        reason: reason.to_string(),
                    },
                )
            })
            .collect();

        let newly_banned = state.banned.insert(address);
        if newly_banned {
            warn!("Banned {} ({} session(s) closed): {}", address, removed.len(), reason);
        } else {
            debug!("Address {} was already banned", address);
        }
        Ok(BanOutcome { removed, newly_banned })
    }

    /// Point-in-time view of the active sessions, in join order
    pub fn snapshot(&self) -> Result<Vec<Session>> {
        let state = self.lock()?;
        Ok(state.sessions.values().map(|conn| conn.session).collect())
    }

    /// Queue `payload` to every active session except `exclude`.
    ///
    /// Enumeration and queueing happen under the registry lock; queueing never
    /// waits. Recipients that cannot take the payload are retired before the
    /// lock is released, so later fan-outs never see them. When `origin` is
    /// given and that session is no longer active, nothing is sent.
    pub fn fan_out(
        &self,
        payload: &Arc<str>,
        exclude: Option<SessionId>,
        origin: Option<SessionId>,
    ) -> Result<FanOut> {
        let mut state = self.lock()?;
        let mut result = FanOut::default();

        if let Some(origin) = origin {
            if !state.sessions.contains_key(&origin) {
                result.origin_gone = true;
                return Ok(result);
            }
        }
        let mut failed_ids = Vec::new();

        for (id, connection) in &state.sessions {
            if Some(*id) == exclude {
                continue;
            }
            result.attempted += 1;
            if connection.try_deliver(payload) {
                result.delivered += 1;
            } else {
                failed_ids.push(*id);
            }
        }

        for id in failed_ids {
            if let Some(session) = Self::retire(&mut state, id, Teardown::DeliveryFailed) {
                result.failed.push(session);
            }
        }

        Ok(result)
    }

    pub fn state_of(&self, id: SessionId) -> Result<SessionState> {
        let state = self.lock()?;
        Ok(if state.sessions.contains_key(&id) {
            SessionState::Active
        } else if id > 0 && id < state.next_id {
            SessionState::TornDown
        } else {
            SessionState::NeverExisted
        })
    }

    pub fn is_banned(&self, address: IpAddr) -> Result<bool> {
        Ok(self.lock()?.banned.contains(&address))
    }

    pub fn client_count(&self) -> Result<usize> {
        Ok(self.lock()?.sessions.len())
    }

    /// Moderation context windows, keyed by address
    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Thread-safe registry wrapper
pub type SharedRegistry = Arc<SessionRegistry>;

pub fn create_registry(queue_capacity: usize) -> SharedRegistry {
    Arc::new(SessionRegistry::with_queue_capacity(queue_capacity))
}
