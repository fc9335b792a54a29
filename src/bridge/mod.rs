//! # Bridge Module
//!
//! The control loop tying the BLE link to the CAN bus.
//!
//! This module handles:
//! - Forwarding button writes to the button box
//! - Resolving batched variable requests against the ECU
//! - Draining received CAN frames every iteration
//! - Restarting advertising after the central disconnects
//!
//! [`Bridge`] owns every piece of mutable state. BLE callbacks only enqueue
//! [`LinkEvent`]s, which are applied once per iteration, so each
//! event runs to completion before the next one is looked at.

pub mod batch;
pub mod buttons;
pub mod connection;
pub mod dispatcher;

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ble::{Characteristic, GattLink, LinkEvent};
use crate::can::protocol::{BusAddresses, VAR_RESPONSE_SIZE};
use crate::config::Config;
use crate::slcan::CanBus;
use batch::VariableBatchController;
use buttons::ButtonBridge;
use connection::{ConnectionTracker, ConnectionTransition};
use dispatcher::{request_variable, BusRxDispatcher};

/// Runtime parameters of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Bus identifiers
    pub addresses: BusAddresses,
    /// Pause between a disconnect and the advertising restart
    pub advertising_restart_delay: Duration,
    /// Control loop period
    pub poll_interval: Duration,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        let can = &config.can;
        Self {
            addresses: BusAddresses::with_bases(
                can.button_box_address,
                can.button_category,
                can.request_base,
                can.response_base,
                can.ecu_id,
            ),
            advertising_restart_delay: Duration::from_millis(config.ble.advertising_restart_delay_ms),
            poll_interval: Duration::from_millis(config.bridge.poll_interval_ms),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Traffic counters, logged at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub button_frames: u64,
    pub variable_requests: u64,
    pub batches_started: u64,
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
}

/// BLE ↔ CAN bridge
pub struct Bridge<B, L> {
    bus: B,
    link: L,
    events: mpsc::Receiver<LinkEvent>,
    settings: BridgeSettings,
    buttons: ButtonBridge,
    batch: VariableBatchController,
    dispatcher: BusRxDispatcher,
    connection: ConnectionTracker,
    stats: BridgeStats,
}

impl<B: CanBus, L: GattLink> Bridge<B, L> {
    /// Create a bridge consuming BLE events from `events`
    pub fn new(bus: B, link: L, events: mpsc::Receiver<LinkEvent>, settings: BridgeSettings) -> Self {
        let addrs = settings.addresses;
        Self {
            bus,
            link,
            events,
            settings,
            buttons: ButtonBridge::new(addrs.button_box, addrs.button_category),
            batch: VariableBatchController::new(addrs.response),
            dispatcher: BusRxDispatcher::new(addrs.request),
            connection: ConnectionTracker::new(),
            stats: BridgeStats::default(),
        }
    }

    /// Run the control loop until `shutdown` completes
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Bridge running (button box 0x{:03X}, requests 0x{:03X}, responses 0x{:03X})",
            self.settings.addresses.button_box,
            self.settings.addresses.request,
            self.settings.addresses.response
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = &mut shutdown => break,
            }
        }

        info!("Bridge stopped: {:?}", self.stats);
    }

    /// One control loop iteration
    ///
    /// Drains the bus, applies all queued BLE events, drains the bus again,
    /// then handles connection transitions. Frames already buffered are
    /// credited to the batch in flight before a new request can preempt it.
    pub async fn run_cycle(&mut self) {
        self.drain_bus().await;

        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }

        self.drain_bus().await;
        self.update_connection().await;
    }

    async fn drain_bus(&mut self) {
        let report = self.dispatcher.drain(&mut self.bus, &mut self.batch).await;
        self.stats.variable_requests += report.requests_sent as u64;
        for payload in report.notifications {
            self.publish(&payload);
        }
    }

    async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                self.connection.on_connect();
                info!("BLE device connected");
            }
            LinkEvent::Disconnected => {
                self.connection.on_disconnect();
                info!("BLE device disconnected");
            }
            LinkEvent::Write { characteristic: Characteristic::Button, value } => {
                self.on_button_write(&value).await;
            }
            LinkEvent::Write { characteristic: Characteristic::VariableRequest, value } => {
                self.on_variable_request(&value).await;
            }
            LinkEvent::Write { characteristic: Characteristic::VariableData, .. } => {
                debug!("Ignoring write to notify-only characteristic");
            }
        }
    }

    async fn on_button_write(&mut self, value: &[u8]) {
        let Some(frame) = self.buttons.on_write(value) else {
            return;
        };

        if self.bus.send(&frame).await {
            self.stats.button_frames += 1;
            info!("CAN TX 0x{:03X} mask=0x{:X}", frame.id(), self.buttons.last_mask());
        } else {
            warn!("CAN TX 0x{:03X} mask=0x{:X} failed", frame.id(), self.buttons.last_mask());
        }
    }

    async fn on_variable_request(&mut self, value: &[u8]) {
        let preempted = !self.batch.is_idle();
        let Some(first) = self.batch.start(value) else {
            debug!("Variable request without a complete hash ({} bytes)", value.len());
            return;
        };

        if preempted {
            debug!("New batch replaces the one in flight");
        }
        self.stats.batches_started += 1;
        info!("Batch request: {} vars", self.batch.pending().len());

        if request_variable(&mut self.bus, self.settings.addresses.request, first).await {
            self.stats.variable_requests += 1;
        }
    }

    fn publish(&mut self, payload: &[u8]) {
        let count = payload.len() / VAR_RESPONSE_SIZE;

        if !self.connection.is_connected() || !self.link.can_notify() {
            self.stats.notifications_dropped += 1;
            debug!("No BLE subscriber, dropping batch of {} vars", count);
            return;
        }

        if self.link.notify(payload) {
            self.stats.notifications_sent += 1;
            info!("BLE TX batch: {} vars", count);
        } else {
            self.stats.notifications_dropped += 1;
            warn!("BLE notify of {} vars failed", count);
        }
    }

    async fn update_connection(&mut self) {
        match self.connection.poll() {
            ConnectionTransition::Disconnected => {
                sleep(self.settings.advertising_restart_delay).await;
                match self.link.restart_advertising().await {
                    Ok(()) => info!("BLE advertising restarted"),
                    Err(e) => warn!("Failed to restart advertising: {}", e),
                }
            }
            ConnectionTransition::Connected | ConnectionTransition::Unchanged => {}
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn batch(&self) -> &VariableBatchController {
        &self.batch
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{event_queue, EventSender, MockGattLink};
    use crate::can::CanFrame;
    use crate::slcan::bus_trait::mocks::MockCanBus;
    use std::sync::{Arc, Mutex};

    fn test_settings() -> BridgeSettings {
        BridgeSettings {
            advertising_restart_delay: Duration::ZERO,
            ..BridgeSettings::default()
        }
    }

    fn response(hash: i32, value: [u8; 4]) -> CanFrame {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&hash.to_be_bytes());
        data[4..].copy_from_slice(&value);
        CanFrame::new(0x721, &data).unwrap()
    }

    /// Link that is always subscribed and records every notification
    fn recording_link() -> (MockGattLink, Arc<Mutex<Vec<Vec<u8>>>>) {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();

        let mut link = MockGattLink::new();
        link.expect_can_notify().return_const(true);
        link.expect_notify().returning(move |payload| {
            sink.lock().unwrap().push(payload.to_vec());
            true
        });
        (link, notified)
    }

    fn setup(link: MockGattLink) -> (Bridge<MockCanBus, MockGattLink>, MockCanBus, EventSender) {
        let bus = MockCanBus::new();
        let (tx, rx) = event_queue(32);
        let bridge = Bridge::new(bus.clone(), link, rx, test_settings());
        (bridge, bus, tx)
    }

    #[tokio::test]
    async fn test_two_hash_batch_end_to_end() {
        let (link, notified) = recording_link();
        let (mut bridge, bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 1, 0, 0, 0, 2]);
        bridge.run_cycle().await;

        let sent = bus.get_sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), 0x701);
        assert_eq!(sent[0].data(), &[0, 0, 0, 1]);

        bus.push_inbound(response(1, [0x41, 0x20, 0x00, 0x00]));
        bridge.run_cycle().await;

        let sent = bus.get_sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].data(), &[0, 0, 0, 2]);
        assert!(notified.lock().unwrap().is_empty());

        bus.push_inbound(response(2, [0xDE, 0xAD, 0xBE, 0xEF]));
        bridge.run_cycle().await;

        let notified = notified.lock().unwrap();
        assert_eq!(notified.len(), 1);
        assert_eq!(
            notified[0],
            vec![
                0x00, 0x00, 0x00, 0x01, 0x41, 0x20, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x02, 0xDE, 0xAD, 0xBE, 0xEF,
            ]
        );
        assert!(bridge.batch().is_idle());
        assert_eq!(bus.get_sent_frames().len(), 2);
        assert_eq!(bridge.stats().notifications_sent, 1);
        assert_eq!(bridge.stats().variable_requests, 2);
    }

    #[tokio::test]
    async fn test_requests_issued_one_at_a_time() {
        let (link, _notified) = recording_link();
        let (mut bridge, bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
        bridge.run_cycle().await;
        bridge.run_cycle().await;
        bridge.run_cycle().await;

        assert_eq!(bus.get_sent_frames().len(), 1);
        assert_eq!(bridge.batch().awaiting(), Some(1));
    }

    #[tokio::test]
    async fn test_button_writes_deduplicated() {
        let mut link = MockGattLink::new();
        link.expect_notify().times(0);
        let (mut bridge, bus, tx) = setup(link);

        tx.push_write(Characteristic::Button, &[0x03]);
        tx.push_write(Characteristic::Button, &[0x03]);
        tx.push_write(Characteristic::Button, &[0x05]);
        bridge.run_cycle().await;

        let sent = bus.get_sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].id(), 0x711);
        assert_eq!(sent[0].data(), &[0x5A, 0x00, 27, 0x00, 0x08]);
        assert_eq!(sent[1].data(), &[0x5A, 0x00, 27, 0x00, 0x20]);
        assert_eq!(bridge.stats().button_frames, 2);
    }

    #[tokio::test]
    async fn test_button_send_failure_not_retried() {
        let (mut bridge, bus, tx) = setup(MockGattLink::new());
        bus.set_send_fails(true);

        tx.push_write(Characteristic::Button, &[0x01]);
        bridge.run_cycle().await;
        bus.set_send_fails(false);
        tx.push_write(Characteristic::Button, &[0x01]);
        bridge.run_cycle().await;

        assert!(bus.get_sent_frames().is_empty());
        assert_eq!(bridge.stats().button_frames, 0);
    }

    #[tokio::test]
    async fn test_batch_dropped_when_disconnected() {
        let mut link = MockGattLink::new();
        link.expect_can_notify().return_const(true);
        link.expect_notify().times(0);
        let (mut bridge, bus, tx) = setup(link);

        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 9]);
        bridge.run_cycle().await;
        bus.push_inbound(response(9, [1, 2, 3, 4]));
        bridge.run_cycle().await;

        assert!(bridge.batch().is_idle());
        assert_eq!(bridge.stats().notifications_dropped, 1);
    }

    #[tokio::test]
    async fn test_batch_dropped_without_subscriber() {
        let mut link = MockGattLink::new();
        link.expect_can_notify().return_const(false);
        link.expect_notify().times(0);
        let (mut bridge, bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 9]);
        bridge.run_cycle().await;
        bus.push_inbound(response(9, [1, 2, 3, 4]));
        bridge.run_cycle().await;

        assert!(bridge.batch().is_idle());
    }

    #[tokio::test]
    async fn test_preemption_never_mixes_batches() {
        let (link, notified) = recording_link();
        let (mut bridge, bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 1, 0, 0, 0, 2]);
        bridge.run_cycle().await;
        bus.push_inbound(response(1, [0xAA; 4]));
        bridge.run_cycle().await;

        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 7]);
        bridge.run_cycle().await;

        let sent = bus.get_sent_frames();
        assert_eq!(sent.last().unwrap().data(), &[0, 0, 0, 7]);

        bus.push_inbound(response(7, [0xBB; 4]));
        bridge.run_cycle().await;

        let notified = notified.lock().unwrap();
        assert_eq!(*notified, vec![vec![0, 0, 0, 7, 0xBB, 0xBB, 0xBB, 0xBB]]);
    }

    #[tokio::test]
    async fn test_buffered_response_completes_old_batch_before_preemption() {
        let (link, notified) = recording_link();
        let (mut bridge, bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 1]);
        bridge.run_cycle().await;

        bus.push_inbound(response(1, [0xAA; 4]));
        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 7]);
        bridge.run_cycle().await;

        assert_eq!(*notified.lock().unwrap(), vec![vec![0, 0, 0, 1, 0xAA, 0xAA, 0xAA, 0xAA]]);
        assert_eq!(bridge.batch().awaiting(), Some(7));
        assert_eq!(bridge.batch().collected(), 0);
        assert_eq!(bus.get_sent_frames().last().unwrap().data(), &[0, 0, 0, 7]);

        bus.push_inbound(response(7, [0xBB; 4]));
        bridge.run_cycle().await;

        let notified = notified.lock().unwrap();
        assert_eq!(notified.len(), 2);
        assert_eq!(notified[1], vec![0, 0, 0, 7, 0xBB, 0xBB, 0xBB, 0xBB]);
    }

    #[tokio::test]
    async fn test_noise_frames_do_not_touch_batch() {
        let (link, notified) = recording_link();
        let (mut bridge, bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        tx.push_write(Characteristic::VariableRequest, &[0, 0, 0, 1]);
        bridge.run_cycle().await;

        bus.push_inbound(CanFrame::new(0x720, &[0, 0, 0, 1, 0, 0, 0, 0]).unwrap());
        bus.push_inbound(CanFrame::new(0x721, &[0, 0, 0, 1]).unwrap());
        bridge.run_cycle().await;

        assert_eq!(bridge.batch().awaiting(), Some(1));
        assert_eq!(bridge.batch().collected(), 0);
        assert!(notified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_request_write_ignored() {
        let (mut bridge, bus, tx) = setup(MockGattLink::new());

        tx.push_write(Characteristic::VariableRequest, &[0, 0, 1]);
        tx.push_write(Characteristic::VariableData, &[0, 0, 0, 1]);
        bridge.run_cycle().await;

        assert!(bus.get_sent_frames().is_empty());
        assert!(bridge.batch().is_idle());
    }

    #[tokio::test]
    async fn test_disconnect_restarts_advertising_once() {
        let mut link = MockGattLink::new();
        link.expect_restart_advertising().times(1).returning(|| Ok(()));
        let (mut bridge, _bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        bridge.run_cycle().await;
        assert!(bridge.is_connected());

        tx.push(LinkEvent::Disconnected);
        bridge.run_cycle().await;
        bridge.run_cycle().await;
        assert!(!bridge.is_connected());
    }

    #[tokio::test]
    async fn test_connect_does_not_advertise() {
        let mut link = MockGattLink::new();
        link.expect_restart_advertising().times(0);
        let (mut bridge, _bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        bridge.run_cycle().await;
        bridge.run_cycle().await;
    }

    #[tokio::test]
    async fn test_advertising_failure_is_not_fatal() {
        let mut link = MockGattLink::new();
        link.expect_restart_advertising()
            .times(1)
            .returning(|| Err(crate::error::BridgeError::Ble("adapter busy".to_string())));
        let (mut bridge, bus, tx) = setup(link);

        tx.push(LinkEvent::Connected);
        bridge.run_cycle().await;
        tx.push(LinkEvent::Disconnected);
        bridge.run_cycle().await;

        tx.push_write(Characteristic::Button, &[0x02]);
        bridge.run_cycle().await;
        assert_eq!(bus.get_sent_frames().len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_processes_events() {
        let (link, _notified) = recording_link();
        let (mut bridge, bus, tx) = setup(link);

        tx.push_write(Characteristic::Button, &[0x04]);
        bridge.run_until(sleep(Duration::from_millis(20))).await;

        assert_eq!(bus.get_sent_frames().len(), 1);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.can.ecu_id = 3;
        config.ble.advertising_restart_delay_ms = 250;

        let settings = BridgeSettings::from_config(&config);
        assert_eq!(settings.addresses.request, 0x703);
        assert_eq!(settings.addresses.response, 0x723);
        assert_eq!(settings.addresses.button_box, 0x711);
        assert_eq!(settings.advertising_restart_delay, Duration::from_millis(250));
        assert_eq!(settings.poll_interval, Duration::from_millis(1));
    }
}
