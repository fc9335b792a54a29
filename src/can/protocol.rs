//! # Bus Protocol Constants and Types
//!
//! Frame identifiers, payload layouts and the classic CAN frame type shared by
//! the button box, the ECU variable protocol and the SLCAN adapter.

use crate::error::{BridgeError, Result};

/// Maximum classic CAN payload size
pub const CAN_MAX_DLC: usize = 8;

/// Largest 11-bit (standard) identifier
pub const CAN_STANDARD_ID_MAX: u32 = 0x7FF;

/// Largest 29-bit (extended) identifier
pub const CAN_EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// First byte of every button box frame
pub const BUTTON_FRAME_HEADER: u8 = 0x5A;

/// Second byte of every button box frame
pub const BUTTON_FRAME_RESERVED: u8 = 0x00;

/// Button frame payload size: header + reserved + category + mask(2)
pub const BUTTON_FRAME_LENGTH: usize = 5;

/// Hardware button box 1 category
pub const DEFAULT_BUTTONBOX_CATEGORY: u8 = 27;

/// Button box TX identifier
pub const DEFAULT_BUTTONBOX_ADDRESS: u32 = 0x711;

/// ECU identifier added to the request/response bases
pub const DEFAULT_ECU_ID: u8 = 1;

/// Variable request base (TX: base + ECU id)
pub const DEFAULT_VAR_REQUEST_BASE: u32 = 0x700;

/// Variable response base (RX: base + ECU id)
pub const DEFAULT_VAR_RESPONSE_BASE: u32 = 0x720;

/// Variable request payload size (big-endian hash)
pub const VAR_REQUEST_LENGTH: usize = 4;

/// Variable response entry size: hash(4) + value(4)
pub const VAR_RESPONSE_SIZE: usize = 8;

/// Maximum number of hashes resolved per batch
pub const MAX_BATCH_VARS: usize = 16;

/// Largest batch notification (16 entries × 8 bytes)
pub const MAX_NOTIFICATION_SIZE: usize = MAX_BATCH_VARS * VAR_RESPONSE_SIZE;

/// Highest button index accepted in single-byte button writes
pub const MAX_BUTTON_INDEX: u8 = 15;

/// Opaque identifier of a named ECU telemetry variable
pub type VariableHash = i32;

/// 16-bit mask of pressed buttons (bit n = button n)
pub type ButtonMask = u16;

/// A classic CAN data frame
///
/// Identifiers up to 0x7FF are sent as standard frames unless built with
/// [`CanFrame::new_extended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    len: u8,
    data: [u8; CAN_MAX_DLC],
}

impl CanFrame {
    /// Create a frame, picking the standard format when the identifier fits in 11 bits
    ///
    /// # Errors
    ///
    /// Returns error if the payload exceeds 8 bytes or the identifier exceeds 29 bits
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, id > CAN_STANDARD_ID_MAX, data)
    }

    /// Create a frame that always uses the 29-bit identifier format
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, true, data)
    }

    fn build(id: u32, extended: bool, data: &[u8]) -> Result<Self> {
        if data.len() > CAN_MAX_DLC {
            return Err(BridgeError::Codec(format!(
                "Payload size {} exceeds maximum {}",
                data.len(),
                CAN_MAX_DLC
            )));
        }

        let id_max = if extended { CAN_EXTENDED_ID_MAX } else { CAN_STANDARD_ID_MAX };
        if id > id_max {
            return Err(BridgeError::Codec(format!(
                "Identifier 0x{:X} exceeds maximum 0x{:X}",
                id, id_max
            )));
        }

        let mut buf = [0u8; CAN_MAX_DLC];
        buf[..data.len()].copy_from_slice(data);

        Ok(Self {
            id,
            extended,
            len: data.len() as u8,
            data: buf,
        })
    }

    /// Frame identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the frame uses a 29-bit identifier
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Data length code (0-8)
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes (exactly `len()` bytes)
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Bus identifiers used by one bridge instance
///
/// The request and response identifiers are derived from their bases plus the
/// configured ECU id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusAddresses {
    /// Button box TX identifier
    pub button_box: u32,
    /// Category byte written into button frames
    pub button_category: u8,
    /// Variable request TX identifier
    pub request: u32,
    /// Variable response RX identifier
    pub response: u32,
}

impl BusAddresses {
    /// Default layout for the given ECU id
    pub fn for_ecu(ecu_id: u8) -> Self {
        Self::with_bases(
            DEFAULT_BUTTONBOX_ADDRESS,
            DEFAULT_BUTTONBOX_CATEGORY,
            DEFAULT_VAR_REQUEST_BASE,
            DEFAULT_VAR_RESPONSE_BASE,
            ecu_id,
        )
    }

    /// Layout from explicit bases
    pub fn with_bases(
        button_box: u32,
        button_category: u8,
        request_base: u32,
        response_base: u32,
        ecu_id: u8,
    ) -> Self {
        Self {
            button_box,
            button_category,
            request: request_base.saturating_add(ecu_id as u32),
            response: response_base.saturating_add(ecu_id as u32),
        }
    }
}

impl Default for BusAddresses {
    fn default() -> Self {
        Self::for_ecu(DEFAULT_ECU_ID)
    }
}

/// One resolved variable: the hash echoed by the ECU and its raw big-endian value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableResponse {
    /// Variable hash as echoed by the ECU
    pub hash: VariableHash,
    /// Value bytes, big-endian, interpretation depends on the variable
    pub raw_value: [u8; 4],
}

impl VariableResponse {
    /// Value interpreted as a big-endian IEEE-754 float
    pub fn value_f32(&self) -> f32 {
        f32::from_be_bytes(self.raw_value)
    }

    /// Value interpreted as a big-endian signed integer
    pub fn value_i32(&self) -> i32 {
        i32::from_be_bytes(self.raw_value)
    }

    /// The 8-byte wire entry: hash then value
    pub fn to_bytes(&self) -> [u8; VAR_RESPONSE_SIZE] {
        let mut out = [0u8; VAR_RESPONSE_SIZE];
        out[..4].copy_from_slice(&self.hash.to_be_bytes());
        out[4..].copy_from_slice(&self.raw_value);
        out
    }
}
