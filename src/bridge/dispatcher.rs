//! # Bus RX Dispatcher
//!
//! Drains every frame the bus has buffered, without waiting, and feeds them to
//! the batch controller in arrival order.

use std::time::Duration;
use tracing::{debug, warn};

use super::batch::{BatchStep, VariableBatchController};
use crate::can::encoder::encode_variable_request;
use crate::can::protocol::VariableHash;
use crate::slcan::CanBus;

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Frames pulled from the bus
    pub frames: usize,
    /// Frames accepted as variable responses
    pub responses: usize,
    /// Follow-up requests written to the bus
    pub requests_sent: usize,
    /// Completed batch notifications, oldest first
    pub notifications: Vec<Vec<u8>>,
}

/// Routes received frames to the batch controller and sends follow-up requests
#[derive(Debug, Clone, Copy)]
pub struct BusRxDispatcher {
    request_id: u32,
}

impl BusRxDispatcher {
    /// Create a dispatcher sending follow-up requests on `request_id`
    pub fn new(request_id: u32) -> Self {
        Self { request_id }
    }

    /// Drain all buffered frames
    ///
    /// Each frame is polled with a zero timeout, so this never waits for bus
    /// traffic. Non-response frames are dropped.
    pub async fn drain<B: CanBus>(
        &self,
        bus: &mut B,
        batch: &mut VariableBatchController,
    ) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(frame) = bus.receive(Duration::ZERO).await {
            report.frames += 1;

            match batch.accept(&frame) {
                BatchStep::Ignored => {
                    debug!("Ignoring CAN frame 0x{:03X} ({} bytes)", frame.id(), frame.len());
                }
                BatchStep::Request(hash) => {
                    report.responses += 1;
                    if request_variable(bus, self.request_id, hash).await {
                        report.requests_sent += 1;
                    }
                }
                BatchStep::Complete(payload) => {
                    report.responses += 1;
                    report.notifications.push(payload);
                }
            }
        }

        report
    }
}

/// Send one variable request frame
///
/// A failed send is logged and not retried; the batch keeps waiting for the
/// response of this hash.
pub async fn request_variable<B: CanBus>(bus: &mut B, address: u32, hash: VariableHash) -> bool {
    let frame = match encode_variable_request(address, hash) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Cannot encode variable request: {}", e);
            return false;
        }
    };

    let ok = bus.send(&frame).await;
    if ok {
        debug!("CAN TX var request hash={}", hash);
    } else {
        warn!("CAN TX var request hash={} failed", hash);
    }
    ok
}
