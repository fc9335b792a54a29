//! # Connection State Tracker
//!
//! Tracks the BLE central's connection and reports each transition exactly
//! once, so the control loop restarts advertising a single time per disconnect.

/// Transition observed by [`ConnectionTracker::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTransition {
    /// No change since the last poll
    Unchanged,
    /// A central connected
    Connected,
    /// The central disconnected; advertising must be restarted
    Disconnected,
}

/// Connected flag plus the value seen by the previous poll
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionTracker {
    connected: bool,
    was_connected: bool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&mut self) {
        self.connected = true;
    }

    pub fn on_disconnect(&mut self) {
        self.connected = false;
    }

    /// Current link state
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Compare against the previous poll and latch the current state
    pub fn poll(&mut self) -> ConnectionTransition {
        let transition = match (self.was_connected, self.connected) {
            (true, false) => ConnectionTransition::Disconnected,
            (false, true) => ConnectionTransition::Connected,
            _ => ConnectionTransition::Unchanged,
        };
        self.was_connected = self.connected;
        transition
    }
}
