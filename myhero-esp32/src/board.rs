//! Board collaborators handed to the BLE engine

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use esp_idf_svc::hal::gpio::{Gpio2, Output, PinDriver};
use log::*;
use myhero_mcu::{Battery, Indicator, LedMode, Playlist};

/// Shared with the player and the battery task, which live outside this crate
#[derive(Clone)]
pub struct BoardStatus {
    pub battery: Arc<AtomicU8>,
    /// Set after storage changed; the player rescans on its next loop
    pub rescan_pending: Arc<AtomicBool>,
}

impl BoardStatus {
    pub fn new() -> Self {
        Self {
            battery: Arc::new(AtomicU8::new(100)),
            rescan_pending: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub struct BoardHooks {
    // GPIO2 is the built-in LED on most ESP32 dev boards
    led: PinDriver<'static, Gpio2, Output>,
    status: BoardStatus,
}

impl BoardHooks {
    pub fn new(led: PinDriver<'static, Gpio2, Output>, status: BoardStatus) -> Self {
        Self { led, status }
    }
}

impl Indicator for BoardHooks {
    fn set_mode(&mut self, mode: LedMode) {
        // One pin cannot show patterns, any active mode lights it
        let lit = !matches!(mode, LedMode::Off | LedMode::Idle);
        let result = if lit { self.led.set_high() } else { self.led.set_low() };
        if let Err(e) = result {
            warn!("LED update to {:?} failed: {:?}", mode, e);
        }
    }
}

impl Playlist for BoardHooks {
    fn rescan(&mut self) {
        self.status.rescan_pending.store(true, Ordering::Relaxed);
    }
}

impl Battery for BoardHooks {
    fn level_percent(&self) -> u8 {
        self.status.battery.load(Ordering::Relaxed)
    }
}
