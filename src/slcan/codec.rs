//! # SLCAN (Lawicel) ASCII Codec
//!
//! Frames are exchanged with USB-serial CAN adapters as carriage-return
//! terminated ASCII lines:
//!
//! | Line | Meaning |
//! |------|---------|
//! | `tIIILDD..` | Standard data frame, 3 hex id digits, DLC digit, 2 hex digits per byte |
//! | `TIIIIIIIILDD..` | Extended data frame, 8 hex id digits |
//! | `rIIIL` / `RIIIIIIIIL` | Remote frames (ignored by the bridge) |
//! | `z` / `Z` | Transmit acknowledgements |
//! | *(empty)* | Command acknowledgement |
//! | `0x07` | Command rejected (BELL) |
//!
//! Some adapters append a 4-digit timestamp after the data; it is ignored.

use crate::can::protocol::{CanFrame, CAN_MAX_DLC};
use crate::error::{BridgeError, Result};

/// Line terminator
pub const SLCAN_CR: u8 = b'\r';

/// Error response
pub const SLCAN_BELL: u8 = 0x07;

/// Close channel command
pub const SLCAN_CLOSE: &[u8] = b"C\r";

/// Open channel command
pub const SLCAN_OPEN: &[u8] = b"O\r";

/// Supported bus bitrates and their `S<n>` setup codes
pub const SLCAN_BITRATES: [(u32, u8); 9] = [
    (10_000, 0),
    (20_000, 1),
    (50_000, 2),
    (100_000, 3),
    (125_000, 4),
    (250_000, 5),
    (500_000, 6),
    (800_000, 7),
    (1_000_000, 8),
];

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Build the `S<n>\r` bitrate setup command
///
/// Returns `None` for bitrates the SLCAN protocol has no code for.
pub fn bitrate_command(bitrate: u32) -> Option<[u8; 3]> {
    SLCAN_BITRATES
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, code)| [b'S', b'0' + code, SLCAN_CR])
}

/// Encode a data frame as an SLCAN transmit command (including the trailing CR)
///
/// # Examples
///
/// ```
/// use buttonbox_bridge::can::CanFrame;
/// use buttonbox_bridge::slcan::codec::encode_frame;
///
/// let frame = CanFrame::new(0x701, &[0x00, 0x00, 0x00, 0x01]).unwrap();
/// assert_eq!(encode_frame(&frame), b"t701400000001\r".to_vec());
/// ```
pub fn encode_frame(frame: &CanFrame) -> Vec<u8> {
    let id_digits = if frame.is_extended() { 8 } else { 3 };
    let mut line = Vec::with_capacity(2 + id_digits + frame.len() * 2 + 1);

    line.push(if frame.is_extended() { b'T' } else { b't' });
    for shift in (0..id_digits).rev() {
        line.push(HEX_DIGITS[((frame.id() >> (shift * 4)) & 0xF) as usize]);
    }
    line.push(b'0' + frame.len() as u8);
    for &byte in frame.data() {
        line.push(HEX_DIGITS[(byte >> 4) as usize]);
        line.push(HEX_DIGITS[(byte & 0xF) as usize]);
    }
    line.push(SLCAN_CR);

    line
}

/// Decode one SLCAN line (terminator already stripped)
///
/// # Returns
///
/// * `Ok(Some(frame))` - a received data frame
/// * `Ok(None)` - an acknowledgement or remote frame, nothing to deliver
///
/// # Errors
///
/// Returns error if the line is a truncated or non-hex frame, or an unknown response
pub fn decode_line(line: &[u8]) -> Result<Option<CanFrame>> {
    let Some((&kind, rest)) = line.split_first() else {
        return Ok(None);
    };

    match kind {
        b't' => decode_data(rest, 3, false).map(Some),
        b'T' => decode_data(rest, 8, true).map(Some),
        b'r' | b'R' | b'z' | b'Z' => Ok(None),
        other => Err(BridgeError::Codec(format!(
            "Unexpected SLCAN response 0x{:02X}",
            other
        ))),
    }
}

fn decode_data(rest: &[u8], id_digits: usize, extended: bool) -> Result<CanFrame> {
    if rest.len() < id_digits + 1 {
        return Err(BridgeError::Codec(format!(
            "SLCAN frame too short: {} bytes",
            rest.len() + 1
        )));
    }

    let id = parse_hex(&rest[..id_digits])?;

    let dlc = rest[id_digits].wrapping_sub(b'0') as usize;
    if dlc > CAN_MAX_DLC {
        return Err(BridgeError::Codec(format!(
            "Invalid SLCAN DLC '{}'",
            rest[id_digits] as char
        )));
    }

    let hex = &rest[id_digits + 1..];
    if hex.len() < dlc * 2 {
        return Err(BridgeError::Codec(format!(
            "SLCAN frame truncated: DLC {} but {} data digits",
            dlc,
            hex.len()
        )));
    }

    let mut data = [0u8; CAN_MAX_DLC];
    for (i, pair) in hex[..dlc * 2].chunks_exact(2).enumerate() {
        data[i] = parse_hex(pair)? as u8;
    }

    if extended {
        CanFrame::new_extended(id, &data[..dlc])
    } else {
        CanFrame::new(id, &data[..dlc])
    }
}

fn parse_hex(digits: &[u8]) -> Result<u32> {
    digits.iter().try_fold(0u32, |acc, &d| {
        let nibble = match d {
            b'0'..=b'9' => d - b'0',
            b'a'..=b'f' => d - b'a' + 10,
            b'A'..=b'F' => d - b'A' + 10,
            _ => {
                return Err(BridgeError::Codec(format!(
                    "Invalid hex digit '{}'",
                    d as char
                )))
            }
        };
        Ok((acc << 4) | nibble as u32)
    })
}
