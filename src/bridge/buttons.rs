//! # Button Bridge
//!
//! Forwards button writes from the BLE peer to the button box.
//!
//! The last transmitted mask is remembered and an identical mask is never sent
//! twice in a row. This is change detection only, there is no timing window:
//! a peer alternating between two masks produces one frame per write.

use tracing::warn;

use crate::can::decoder::decode_button_write;
use crate::can::encoder::encode_button_frame;
use crate::can::protocol::{ButtonMask, CanFrame};

/// Button write handler and change filter
#[derive(Debug, Clone)]
pub struct ButtonBridge {
    address: u32,
    category: u8,
    last_mask: ButtonMask,
}

impl ButtonBridge {
    /// Create a bridge targeting the button box at `address`
    pub fn new(address: u32, category: u8) -> Self {
        Self {
            address,
            category,
            last_mask: 0,
        }
    }

    /// Handle a write to the button characteristic
    ///
    /// Returns the frame to transmit, or `None` when the write is malformed or
    /// carries the mask that was sent last.
    pub fn on_write(&mut self, payload: &[u8]) -> Option<CanFrame> {
        let mask = decode_button_write(payload)?;
        if mask == self.last_mask {
            return None;
        }

        match encode_button_frame(self.address, self.category, mask) {
            Ok(frame) => {
                self.last_mask = mask;
                Some(frame)
            }
            Err(e) => {
                warn!("Cannot encode button frame: {}", e);
                None
            }
        }
    }

    /// Last mask handed out for transmission
    pub fn last_mask(&self) -> ButtonMask {
        self.last_mask
    }
}
