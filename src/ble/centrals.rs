//! # Central Registry
//!
//! Remembers which centrals have talked to the dashboard service, so that
//! connection state follows those peers only. Other devices attached to the
//! same adapter never count as a dashboard connection.
//!
//! A falling edge stays pending until the Disconnected event has actually been
//! queued; a full event queue only delays it.

use std::collections::HashSet;
use std::hash::Hash;

/// Centrals seen writing to the service
#[derive(Debug, Clone)]
pub struct CentralRegistry<A> {
    known: HashSet<A>,
    disconnect_pending: bool,
}

impl<A: Copy + Eq + Hash> Default for CentralRegistry<A> {
    fn default() -> Self {
        Self {
            known: HashSet::new(),
            disconnect_pending: false,
        }
    }
}

impl<A: Copy + Eq + Hash> CentralRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a central that wrote a characteristic
    ///
    /// Returns `true` the first time `address` is seen, when a Connected event
    /// is due.
    pub fn observe(&mut self, address: A) -> bool {
        let first = self.known.insert(address);
        if first {
            self.disconnect_pending = false;
        }
        first
    }

    /// Forget a central whose Connected event could not be queued
    pub fn forget(&mut self, address: A) {
        self.known.remove(&address);
    }

    /// Addresses to check for a live connection
    pub fn known(&self) -> Vec<A> {
        self.known.iter().copied().collect()
    }

    /// Whether any dashboard central is connected
    pub fn is_connected(&self) -> bool {
        !self.known.is_empty()
    }

    /// Drop centrals that are no longer connected
    ///
    /// Returns `true` while a Disconnected event is owed: the last central went
    /// away and [`CentralRegistry::disconnect_reported`] has not been called.
    pub fn prune(&mut self, gone: &[A]) -> bool {
        let was_connected = self.is_connected();
        for address in gone {
            self.known.remove(address);
        }
        if was_connected && !self.is_connected() {
            self.disconnect_pending = true;
        }
        self.disconnect_pending
    }

    /// The Disconnected event was queued
    pub fn disconnect_reported(&mut self) {
        self.disconnect_pending = false;
    }
}
