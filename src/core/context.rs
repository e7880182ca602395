//! Per-address rolling moderation context
//!
//! Each address that has sent text keeps its last few raw messages so the
//! classifier can see content split across turns. Windows are never cleared on
//! disconnect; they live for the lifetime of the process.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::constants::MAX_CONTEXT_MESSAGES;
use crate::error::Result;

/// Bounded FIFO of recent message texts for one address
#[derive(Debug, Clone)]
pub struct ContextWindow {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a text, evicting the oldest entry once the window is full
    pub fn push(&mut self, text: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(text);
    }

    /// Entries oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

/// Map from address to its context window.
///
/// The outer lock only guards the map; each window sits behind its own async
/// lock which the gate holds for the whole classification, so two messages from
/// one address are always evaluated one after the other.
pub struct ContextStore {
    windows: Mutex<HashMap<IpAddr, Arc<AsyncMutex<ContextWindow>>>>,
    capacity: usize,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONTEXT_MESSAGES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Get (or create) the window for an address
    pub fn window(&self, address: IpAddr) -> Result<Arc<AsyncMutex<ContextWindow>>> {
        let mut windows = self.windows.lock()?;
        let capacity = self.capacity;
        Ok(windows
            .entry(address)
            .or_insert_with(|| Arc::new(AsyncMutex::new(ContextWindow::new(capacity))))
            .clone())
    }

    /// Snapshot of an address's retained texts, oldest first
    pub async fn entries(&self, address: IpAddr) -> Result<Vec<String>> {
        let window = {
            let windows = self.windows.lock()?;
            windows.get(&address).cloned()
        };
        match window {
            Some(window) => Ok(window.lock().await.entries()),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}
