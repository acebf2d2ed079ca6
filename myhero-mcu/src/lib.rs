//! MyHero MCU Library
//!
//! Traits the BLE protocol engine uses to reach the rest of the recorder.
//!
//! This crate provides:
//! - Persistent storage of the BLE shared secret
//! - Device hooks: LED indicator, playlist rescan, battery level
//!
//! # Implementations
//! - ESP32: NVS key store and GPIO hooks in `myhero-esp32`
//! - Host: file and in-memory key stores in `myhero-ble`
//!
//! # Note
//! This crate has no I/O of its own. Protocol constants live in
//! `myhero_proto::ble` and are re-exported here for firmware crates.

pub mod device;
pub mod storage;

pub use device::*;
pub use storage::*;

pub use myhero_proto::ble;
