//! # Buttonbox Bridge Library
//!
//! Bridge a BLE dashboard app to a vehicle CAN bus.
//!
//! The host advertises a GATT service with three characteristics. Button
//! writes become button-box frames on the bus, and batched variable requests
//! are resolved against the ECU one hash at a time before being notified back
//! as a single payload. The CAN bus is reached through an SLCAN serial
//! adapter; the BLE side runs on BlueZ behind the `bluez` feature.

pub mod ble;
pub mod bridge;
pub mod can;
pub mod config;
pub mod error;
pub mod slcan;
