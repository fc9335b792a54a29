//! # SLCAN Bus Module
//!
//! Handles the CAN bus through a USB-serial SLCAN (Lawicel) adapter.
//!
//! This module handles:
//! - Opening the adapter's serial port (8N1)
//! - Setting the bus bitrate and opening the CAN channel
//! - Transmitting button and variable request frames
//! - Non-blocking reception of variable responses

pub mod bus_trait;
pub mod codec;

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::can::CanFrame;
use crate::error::{BridgeError, Result};
pub use bus_trait::CanBus;
use codec::{SLCAN_BELL, SLCAN_CLOSE, SLCAN_CR, SLCAN_OPEN};

/// Default serial baud rate of SLCAN adapters
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default CAN bitrate (500 kbit/s)
pub const DEFAULT_BITRATE: u32 = 500_000;

/// Longest line an adapter can send (extended frame, 8 bytes, timestamp, CR)
const MAX_LINE_LENGTH: usize = 32;

/// Default adapter device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC adapters (CANable, most common)
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// SLCAN Bus Handler
///
/// Owns the adapter stream and the partially received line buffer.
pub struct SlcanBus<P = tokio_serial::SerialStream> {
    /// Adapter stream
    port: P,
    /// Device path (e.g., /dev/ttyACM0)
    device_path: String,
    /// Bytes received but not yet terminated by CR
    rx_buf: BytesMut,
}

impl<P> std::fmt::Debug for SlcanBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlcanBus")
            .field("device_path", &self.device_path)
            .field("buffered", &self.rx_buf.len())
            .finish_non_exhaustive()
    }
}

impl SlcanBus<tokio_serial::SerialStream> {
    /// Open the first SLCAN adapter found at the default paths
    ///
    /// # Errors
    ///
    /// Returns error if no adapter found or the channel cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use buttonbox_bridge::slcan::{SlcanBus, DEFAULT_BAUD_RATE, DEFAULT_BITRATE};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let bus = SlcanBus::open(DEFAULT_BAUD_RATE, DEFAULT_BITRATE).await?;
    ///     println!("CAN adapter at {}", bus.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub async fn open(baud_rate: u32, bitrate: u32) -> Result<Self> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate, bitrate).await
    }

    /// Open an SLCAN adapter trying each of the given device paths
    pub async fn open_with_paths(paths: &[&str], baud_rate: u32, bitrate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open SLCAN adapter: {}", path);

            let port = match Self::open_port(path, baud_rate) {
                Ok(port) => port,
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            };

            match Self::from_port(port, *path, bitrate).await {
                Ok(bus) => {
                    info!("CAN initialized at {}kbps on {}", bitrate / 1000, path);
                    return Ok(bus);
                }
                Err(e) => {
                    warn!("Failed to start CAN channel on {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(BridgeError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with SLCAN settings (8N1, no flow control)
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| BridgeError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl<P> SlcanBus<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Start the CAN channel on an already opened adapter stream
    ///
    /// Sends close, bitrate setup and open commands. Acknowledgements are not
    /// awaited; they are skipped by the receive path.
    ///
    /// # Errors
    ///
    /// Returns error if the bitrate has no SLCAN code or a command cannot be written
    pub async fn from_port(port: P, device_path: impl Into<String>, bitrate: u32) -> Result<Self> {
        let setup = codec::bitrate_command(bitrate).ok_or_else(|| {
            BridgeError::Serial(format!("Unsupported CAN bitrate {}", bitrate))
        })?;

        let mut bus = Self {
            port,
            device_path: device_path.into(),
            rx_buf: BytesMut::with_capacity(MAX_LINE_LENGTH * 4),
        };

        bus.write_command(SLCAN_CLOSE).await?;
        bus.write_command(&setup).await?;
        bus.write_command(SLCAN_OPEN).await?;

        Ok(bus)
    }

    /// Get the device path of the adapter
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    async fn write_command(&mut self, command: &[u8]) -> Result<()> {
        self.port
            .write_all(command)
            .await
            .map_err(|e| BridgeError::Serial(format!("Failed to write command: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| BridgeError::Serial(format!("Failed to flush serial port: {}", e)))?;

        Ok(())
    }

    /// Pop the next complete data frame out of the receive buffer
    ///
    /// Acknowledgements, remote frames, BELL responses and malformed lines are
    /// consumed and skipped.
    fn next_buffered_frame(&mut self) -> Option<CanFrame> {
        loop {
            let Some(end) = self
                .rx_buf
                .iter()
                .position(|&b| b == SLCAN_CR || b == SLCAN_BELL)
            else {
                if self.rx_buf.len() > MAX_LINE_LENGTH {
                    warn!("Discarding {} unterminated SLCAN bytes", self.rx_buf.len());
                    self.rx_buf.clear();
                }
                return None;
            };

            let line = self.rx_buf.split_to(end + 1);
            if line[end] == SLCAN_BELL {
                debug!("SLCAN adapter rejected a command");
                continue;
            }

            // Tolerate LF from adapters that send CRLF
            let body: &[u8] = match line[..end].first() {
                Some(b'\n') => &line[1..end],
                _ => &line[..end],
            };

            match codec::decode_line(body) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => continue,
                Err(e) => {
                    debug!("Dropping SLCAN line: {}", e);
                    continue;
                }
            }
        }
    }
}

#[async_trait]
impl<P> CanBus for SlcanBus<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &CanFrame) -> bool {
        let line = codec::encode_frame(frame);

        if let Err(e) = self.write_command(&line).await {
            warn!("CAN TX 0x{:03X} failed: {}", frame.id(), e);
            return false;
        }

        debug!("Sent CAN frame 0x{:03X} ({} bytes)", frame.id(), frame.len());
        true
    }

    async fn receive(&mut self, timeout: Duration) -> Option<CanFrame> {
        loop {
            if let Some(frame) = self.next_buffered_frame() {
                return Some(frame);
            }

            match tokio::time::timeout(timeout, self.port.read_buf(&mut self.rx_buf)).await {
                Ok(Ok(0)) => {
                    warn!("SLCAN adapter {} closed the stream", self.device_path);
                    return None;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    warn!("SLCAN read failed: {}", e);
                    return None;
                }
                Err(_) => return None,
            }
        }
    }
}
