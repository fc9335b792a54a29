//! # CAN Frame Codec Module
//!
//! Wire formats exchanged with the button box and the ECU.
//!
//! This module handles:
//! - Big-endian encoding of variable hashes and values
//! - Button box event frames (0x711)
//! - Variable request (0x700 + ECU id) and response (0x720 + ECU id) frames
//! - The consolidated batch notification sent over BLE

pub mod protocol;
pub mod encoder;
pub mod decoder;

pub use protocol::{BusAddresses, CanFrame, VariableHash, VariableResponse};
