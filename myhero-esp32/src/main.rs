//! MyHero recorder BLE firmware for ESP32
//!
//! Brings up storage and the status LED, loads the pairing key from NVS and
//! serves the MyHero GATT services through the shared engine.

mod ble;
mod board;
mod nvs;

use std::ffi::CStr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use esp_idf_svc::{
    hal::{gpio::PinDriver, prelude::Peripherals},
    nvs::EspDefaultNvsPartition,
    sys::{self, esp},
};
use log::*;
use myhero_ble::{deferred_queue, run_blocking, AuthStore, Config, Dispatcher};

// Where the storage partition is mounted; peers may use it as a path prefix
const MOUNT_POINT: &CStr = c"/Storage";
const STORAGE_PARTITION: &CStr = c"storage";

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("MyHero recorder v0.1");

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    mount_storage()?;

    let config = Config {
        storage_root: PathBuf::from(MOUNT_POINT.to_str()?),
        ..Config::default()
    };

    let status = board::BoardStatus::new();
    let led = PinDriver::output(peripherals.pins.gpio2)?;
    let hooks = board::BoardHooks::new(led, status.clone());

    let auth = AuthStore::load(nvs::NvsKeyStore::open(&nvs)?)?;
    match auth.fingerprint() {
        Some(fp) => info!("Paired, key fingerprint {}", fp),
        None => info!("=== FIRST PAIRING MODE === the next key written is bound"),
    }

    let (gatt, notifier) = ble::create_services(&config.device_name)?;
    let (deferred, rx) = deferred_queue();
    let dispatcher = Dispatcher::new(&config, auth, hooks, notifier, deferred)?;
    let dispatcher = Arc::new(Mutex::new(dispatcher));

    let worker = dispatcher.clone();
    let delay = config.notify_delay();
    std::thread::Builder::new()
        .name("ble-deferred".to_string())
        .stack_size(8192)
        .spawn(move || run_blocking(worker, rx, delay))?;

    gatt.attach(dispatcher, &config.device_name)?;

    loop {
        if status.rescan_pending.swap(false, Ordering::Relaxed) {
            info!("Storage changed, playlist rescan requested");
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Mount the FAT partition with wear levelling, formatting it on first boot
fn mount_storage() -> anyhow::Result<()> {
    let mount_config = sys::esp_vfs_fat_mount_config_t {
        format_if_mount_failed: true,
        max_files: 5,
        allocation_unit_size: 0,
        ..Default::default()
    };
    let mut handle: sys::wl_handle_t = sys::WL_INVALID_HANDLE as _;
    esp!(unsafe {
        sys::esp_vfs_fat_spiflash_mount_rw_wl(
            MOUNT_POINT.as_ptr(),
            STORAGE_PARTITION.as_ptr(),
            &mount_config,
            &mut handle,
        )
    })?;
    info!("Storage mounted at {:?}", MOUNT_POINT);
    Ok(())
}
