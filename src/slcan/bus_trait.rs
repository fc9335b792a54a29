//! Trait abstraction for CAN bus operations to enable testing

use async_trait::async_trait;
use std::time::Duration;

use crate::can::CanFrame;

/// Trait for CAN bus I/O operations
///
/// Failures are reported as `false`/`None` only: the bridge never retries a
/// frame and has nothing to propagate.
#[async_trait]
pub trait CanBus: Send {
    /// Transmit one frame
    async fn send(&mut self, frame: &CanFrame) -> bool;

    /// Receive one buffered frame, waiting at most `timeout`
    ///
    /// A zero timeout makes this a non-blocking poll.
    async fn receive(&mut self, timeout: Duration) -> Option<CanFrame>;
}
