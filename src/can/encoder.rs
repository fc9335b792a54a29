//! # Bus Frame Encoder
//!
//! Builds button box frames, ECU variable requests and the consolidated BLE
//! batch notification. Every field embedded in a payload is big-endian.

use super::protocol::*;
use crate::error::Result;

/// Encode a signed 32-bit integer as 4 big-endian bytes
pub fn write_i32_be(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Encode an IEEE-754 float as 4 big-endian bytes
pub fn write_f32_be(value: f32) -> [u8; 4] {
    value.to_bits().to_be_bytes()
}

/// Encode a button mask into a button box frame
///
/// # Arguments
///
/// * `address` - Button box identifier (default 0x711)
/// * `category` - Category byte (default 27)
/// * `mask` - 16-bit button mask
///
/// # Returns
///
/// * `Result<CanFrame>` - 5-byte frame: `[0x5A][0x00][category][mask hi][mask lo]`
///
/// # Examples
///
/// ```
/// use buttonbox_bridge::can::encoder::encode_button_frame;
///
/// let frame = encode_button_frame(0x711, 27, 0x0008).unwrap();
/// assert_eq!(frame.data(), &[0x5A, 0x00, 27, 0x00, 0x08]);
/// ```
pub fn encode_button_frame(address: u32, category: u8, mask: ButtonMask) -> Result<CanFrame> {
    let [hi, lo] = mask.to_be_bytes();
    let payload: [u8; BUTTON_FRAME_LENGTH] = [
        BUTTON_FRAME_HEADER,
        BUTTON_FRAME_RESERVED,
        category,
        hi,
        lo,
    ];
    CanFrame::new(address, &payload)
}

/// Encode a variable request frame (4-byte big-endian hash)
///
/// # Examples
///
/// ```
/// use buttonbox_bridge::can::encoder::encode_variable_request;
///
/// let frame = encode_variable_request(0x701, 0x0102_0304).unwrap();
/// assert_eq!(frame.id(), 0x701);
/// assert_eq!(frame.data(), &[1, 2, 3, 4]);
/// ```
pub fn encode_variable_request(address: u32, hash: VariableHash) -> Result<CanFrame> {
    CanFrame::new(address, &write_i32_be(hash))
}

/// Concatenate 8-byte response entries into one BLE notification payload
///
/// Entries beyond [`MAX_BATCH_VARS`] are not encoded.
pub fn encode_batch_notification(entries: &[[u8; VAR_RESPONSE_SIZE]]) -> Vec<u8> {
    let count = entries.len().min(MAX_BATCH_VARS);
    let mut payload = Vec::with_capacity(count * VAR_RESPONSE_SIZE);
    for entry in &entries[..count] {
        payload.extend_from_slice(entry);
    }
    payload
}
