//! Device collaborators the BLE engine drives
//!
//! The engine never renders LED patterns, samples the battery or walks the
//! music library itself. It asks the firmware through these traits.

/// LED indicator modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Off,
    /// Advertising or connected, no transfer running
    BlePairing,
    /// A file transfer is in progress
    BleTransfer,
    Idle,
}

/// Status LED
pub trait Indicator {
    fn set_mode(&mut self, mode: LedMode);
}

/// Track list kept by the player
pub trait Playlist {
    /// Called after files were added or removed on storage
    fn rescan(&mut self);
}

/// Battery gauge
pub trait Battery {
    /// Charge level, 0-100
    fn level_percent(&self) -> u8;
}

/// Everything the BLE engine needs from the device, as one object
pub trait DeviceHooks: Indicator + Playlist + Battery {}

impl<T: Indicator + Playlist + Battery> DeviceHooks for T {}

/// Hooks for hosts without LED, player or battery
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Indicator for NoHooks {
    fn set_mode(&mut self, _mode: LedMode) {}
}

impl Playlist for NoHooks {
    fn rescan(&mut self) {}
}

impl Battery for NoHooks {
    fn level_percent(&self) -> u8 {
        100
    }
}
