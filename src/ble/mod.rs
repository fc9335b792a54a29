//! # BLE Link Module
//!
//! GATT service layout and the boundary between the wireless stack and the
//! bridge control loop.
//!
//! The BLE stack delivers connect/disconnect and characteristic writes from its
//! own tasks. Those callbacks never touch bridge state: they push a
//! [`LinkEvent`] into a bounded queue that the control loop drains once per
//! iteration. Notifications go the other way through [`GattLink`].

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod centrals;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::Result;

/// Dashboard GATT service UUID
pub const SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/// Button characteristic (write without response)
pub const CHAR_BUTTON_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// Variable data characteristic (notify)
pub const CHAR_VAR_DATA_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a9";

/// Variable request characteristic (write without response)
pub const CHAR_VAR_REQUEST_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26aa";

/// Default advertised local name
pub const DEFAULT_DEVICE_NAME: &str = "ESP32 Dashboard";

/// Characteristics of the dashboard service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Button index or mask written by the peer
    Button,
    /// Batched variable values notified to the peer
    VariableData,
    /// Batched variable hashes written by the peer
    VariableRequest,
}

impl Characteristic {
    /// All characteristics, in service declaration order
    pub const ALL: [Characteristic; 3] = [
        Characteristic::Button,
        Characteristic::VariableData,
        Characteristic::VariableRequest,
    ];

    /// UUID string of this characteristic
    pub fn uuid(&self) -> &'static str {
        match self {
            Characteristic::Button => CHAR_BUTTON_UUID,
            Characteristic::VariableData => CHAR_VAR_DATA_UUID,
            Characteristic::VariableRequest => CHAR_VAR_REQUEST_UUID,
        }
    }

    /// Whether the peer writes to this characteristic
    pub fn is_writable(&self) -> bool {
        !matches!(self, Characteristic::VariableData)
    }
}

/// Event delivered by the BLE stack to the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A central connected
    Connected,
    /// The central disconnected
    Disconnected,
    /// The peer wrote a characteristic value
    Write {
        characteristic: Characteristic,
        value: Vec<u8>,
    },
}

/// Outbound side of the wireless link
///
/// Implementations must never block in [`GattLink::notify`]: the control loop
/// calls it inline and a missing subscriber simply drops the payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattLink: Send {
    /// Whether a subscriber holds a valid notify handle on the variable data characteristic
    fn can_notify(&self) -> bool;

    /// Notify the variable data characteristic
    ///
    /// Returns `false` if the payload was dropped.
    fn notify(&mut self, payload: &[u8]) -> bool;

    /// Ask the BLE stack to advertise again after a disconnect
    async fn restart_advertising(&mut self) -> Result<()>;
}

/// Producer half of the inbound event queue, cloned into every BLE callback
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<LinkEvent>,
}

impl EventSender {
    /// Enqueue an event without waiting
    ///
    /// Returns `false` when the queue is full or the control loop is gone; the
    /// event is dropped in both cases.
    pub fn push(&self, event: LinkEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("BLE event queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("BLE event queue closed");
                false
            }
        }
    }

    /// Enqueue a characteristic write
    pub fn push_write(&self, characteristic: Characteristic, value: &[u8]) -> bool {
        self.push(LinkEvent::Write {
            characteristic,
            value: value.to_vec(),
        })
    }
}

/// Create the bounded inbound event queue
///
/// A capacity of 0 is raised to 1.
pub fn event_queue(capacity: usize) -> (EventSender, mpsc::Receiver<LinkEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_uuids_in_service_family() {
        for characteristic in Characteristic::ALL {
            assert!(characteristic.uuid().starts_with("beb5483e-36e1-4688-b7f5-ea07361b26a"));
        }
        assert_eq!(Characteristic::VariableRequest.uuid(), CHAR_VAR_REQUEST_UUID);
    }

    #[test]
    fn test_characteristic_uuids_distinct() {
        let uuids: Vec<_> = Characteristic::ALL.iter().map(|c| c.uuid()).collect();
        assert_eq!(uuids.len(), 3);
        assert_ne!(uuids[0], uuids[1]);
        assert_ne!(uuids[1], uuids[2]);
        assert_ne!(uuids[0], uuids[2]);
    }

    #[test]
    fn test_only_data_is_notify_only() {
        assert!(Characteristic::Button.is_writable());
        assert!(Characteristic::VariableRequest.is_writable());
        assert!(!Characteristic::VariableData.is_writable());
    }

    #[test]
    fn test_event_queue_preserves_order() {
        let (tx, mut rx) = event_queue(4);
        assert!(tx.push(LinkEvent::Connected));
        assert!(tx.push_write(Characteristic::Button, &[3]));

        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Connected);
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Write {
                characteristic: Characteristic::Button,
                value: vec![3],
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_queue_full_drops() {
        let (tx, _rx) = event_queue(1);
        assert!(tx.push(LinkEvent::Connected));
        assert!(!tx.push(LinkEvent::Disconnected));
    }

    #[test]
    fn test_event_queue_closed() {
        let (tx, rx) = event_queue(1);
        drop(rx);
        assert!(!tx.push(LinkEvent::Connected));
    }

    #[test]
    fn test_event_queue_zero_capacity() {
        let (tx, mut rx) = event_queue(0);
        assert!(tx.push(LinkEvent::Connected));
        assert!(rx.try_recv().is_ok());
    }
}
