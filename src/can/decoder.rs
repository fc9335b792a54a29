//! # Bus Frame Decoder
//!
//! Decodes ECU variable responses and the payloads written by the BLE peer
//! (button writes, batched variable requests).

use super::protocol::*;
use crate::error::{BridgeError, Result};

/// Decode 4 big-endian bytes as a signed 32-bit integer
///
/// # Errors
///
/// Returns error if fewer than 4 bytes are given
pub fn read_i32_be(bytes: &[u8]) -> Result<i32> {
    Ok(i32::from_be_bytes(first_four(bytes)?))
}

/// Decode 4 big-endian bytes as an IEEE-754 float
pub fn read_f32_be(bytes: &[u8]) -> Result<f32> {
    Ok(f32::from_bits(u32::from_be_bytes(first_four(bytes)?)))
}

fn first_four(bytes: &[u8]) -> Result<[u8; 4]> {
    match bytes.get(..4) {
        Some(b) => Ok([b[0], b[1], b[2], b[3]]),
        None => Err(BridgeError::Codec(format!(
            "Need 4 bytes, got {}",
            bytes.len()
        ))),
    }
}

/// Extract the 8-byte response entry of a variable response frame
///
/// Returns `None` when the frame is not addressed to `response_id` or carries
/// fewer than 8 bytes. Such frames are not part of the variable protocol and
/// are dropped by the caller.
pub fn response_entry(frame: &CanFrame, response_id: u32) -> Option<[u8; VAR_RESPONSE_SIZE]> {
    if frame.id() != response_id || frame.len() < VAR_RESPONSE_SIZE {
        return None;
    }

    let mut entry = [0u8; VAR_RESPONSE_SIZE];
    entry.copy_from_slice(&frame.data()[..VAR_RESPONSE_SIZE]);
    Some(entry)
}

/// Decode a variable response frame into hash and value
pub fn decode_variable_response(frame: &CanFrame, response_id: u32) -> Option<VariableResponse> {
    response_entry(frame, response_id).map(|entry| decode_entry(&entry))
}

fn decode_entry(entry: &[u8; VAR_RESPONSE_SIZE]) -> VariableResponse {
    VariableResponse {
        hash: i32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]),
        raw_value: [entry[4], entry[5], entry[6], entry[7]],
    }
}

/// Parse a batched variable request write into up to 16 hashes
///
/// Hashes are read in arrival order; a trailing group shorter than 4 bytes
/// and anything past the 16th hash are dropped.
///
/// # Examples
///
/// ```
/// use buttonbox_bridge::can::decoder::decode_variable_hashes;
///
/// let hashes = decode_variable_hashes(&[0, 0, 0, 1, 0, 0, 0, 2, 0xFF]);
/// assert_eq!(hashes, vec![1, 2]);
/// ```
pub fn decode_variable_hashes(payload: &[u8]) -> Vec<VariableHash> {
    payload
        .chunks_exact(VAR_REQUEST_LENGTH)
        .take(MAX_BATCH_VARS)
        .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Parse a button characteristic write into a mask
///
/// - 1 byte: button index 0-15, mapped to a single-bit mask
/// - 2+ bytes: little-endian 16-bit mask (extra bytes ignored)
///
/// Returns `None` for empty writes and for indices above 15.
pub fn decode_button_write(payload: &[u8]) -> Option<ButtonMask> {
    match payload {
        [] => None,
        [index] if *index <= MAX_BUTTON_INDEX => Some(1u16 << *index),
        [_] => None,
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
    }
}

/// Split a batch notification back into its entries
///
/// This is the companion-app side of the notification contract. A trailing
/// partial entry is ignored.
pub fn decode_batch_notification(payload: &[u8]) -> Vec<VariableResponse> {
    payload
        .chunks_exact(VAR_RESPONSE_SIZE)
        .map(|c| {
            let mut entry = [0u8; VAR_RESPONSE_SIZE];
            entry.copy_from_slice(c);
            decode_entry(&entry)
        })
        .collect()
}
