//! Device hooks for hosts that have no LED, player or battery

use std::sync::{Arc, Mutex};

use myhero_mcu::{Battery, Indicator, LedMode, Playlist};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookLog {
    pub led: Vec<LedMode>,
    pub rescans: usize,
    pub battery: u8,
}

impl Default for HookLog {
    fn default() -> Self {
        Self { led: Vec::new(), rescans: 0, battery: 100 }
    }
}

/// Remembers what the engine asked of the device
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    log: Arc<Mutex<HookLog>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_battery(self, percent: u8) -> Self {
        self.update(|log| log.battery = percent.min(100));
        self
    }

    pub fn snapshot(&self) -> HookLog {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn led(&self) -> Option<LedMode> {
        self.snapshot().led.last().copied()
    }

    fn update(&self, f: impl FnOnce(&mut HookLog)) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

impl Indicator for RecordingHooks {
    fn set_mode(&mut self, mode: LedMode) {
        self.update(|log| log.led.push(mode));
    }
}

impl Playlist for RecordingHooks {
    fn rescan(&mut self) {
        self.update(|log| log.rescans += 1);
    }
}

impl Battery for RecordingHooks {
    fn level_percent(&self) -> u8 {
        self.snapshot().battery
    }
}
