//! NimBLE GATT server for the MyHero services
//!
//! Registers the auth, file and battery services and forwards every access
//! to the shared [`Dispatcher`]. Notifications leave through a channel to a
//! sender thread, so no characteristic is locked twice from one callback.

use std::sync::mpsc;
use std::sync::Arc;

use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{
    uuid128, BLEAdvertisementData, BLECharacteristic, BLEConnDesc, BLEDevice, BLEError, BLEService,
    NimbleProperties,
};
use log::*;
use myhero_ble::{ConnHandle, Dispatcher, Notifier, NotifyError, SharedDispatcher};
use myhero_proto::ble::{self, Endpoint};

use crate::nvs::NvsKeyStore;

// These must match myhero_proto::ble::*_UUID.
// We use uuid128! macro for compile-time generation of BleUuid
const AUTH_SERVICE_UUID: BleUuid = uuid128!("00000001-4d59-4842-8000-00805f9b34fb");
const AUTH_KEY_WRITE_UUID: BleUuid = uuid128!("00000101-4d59-4842-8000-00805f9b34fb");
const AUTH_STATUS_UUID: BleUuid = uuid128!("00000102-4d59-4842-8000-00805f9b34fb");
const AUTH_KEY_CLEAR_UUID: BleUuid = uuid128!("00000103-4d59-4842-8000-00805f9b34fb");
const FILE_SERVICE_UUID: BleUuid = uuid128!("00000002-4d59-4842-8000-00805f9b34fb");
const FILE_LIST_UUID: BleUuid = uuid128!("00000201-4d59-4842-8000-00805f9b34fb");
const FILE_DELETE_UUID: BleUuid = uuid128!("00000202-4d59-4842-8000-00805f9b34fb");
const TRANSFER_CONTROL_UUID: BleUuid = uuid128!("00000203-4d59-4842-8000-00805f9b34fb");
const TRANSFER_DATA_UUID: BleUuid = uuid128!("00000204-4d59-4842-8000-00805f9b34fb");
const TRANSFER_PROGRESS_UUID: BleUuid = uuid128!("00000205-4d59-4842-8000-00805f9b34fb");

type Characteristic = Arc<NimbleMutex<BLECharacteristic>>;
type Shared = SharedDispatcher<NvsKeyStore>;

/// Queues notifications for the sender thread
pub struct GattNotifier {
    tx: mpsc::Sender<(Endpoint, Vec<u8>)>,
}

impl Notifier for GattNotifier {
    fn notify(&mut self, _conn: ConnHandle, endpoint: Endpoint, value: &[u8]) -> Result<(), NotifyError> {
        self.tx.send((endpoint, value.to_vec())).map_err(|_| NotifyError {
            endpoint,
            reason: "notify thread stopped".to_string(),
        })
    }
}

/// Characteristics created but not yet wired to a dispatcher
pub struct Gatt {
    chars: Vec<(Endpoint, Characteristic)>,
    rx: mpsc::Receiver<(Endpoint, Vec<u8>)>,
}

/// Create services and characteristics. The returned notifier goes into
/// the dispatcher, then [`Gatt::attach`] connects the callbacks to it.
pub fn create_services(device_name: &str) -> anyhow::Result<(Gatt, GattNotifier)> {
    let ble_device = BLEDevice::take();
    BLEDevice::set_device_name(device_name).map_err(ble_error)?;
    ble_device.set_preferred_mtu(ble::PREFERRED_MTU).map_err(ble_error)?;

    let server = ble_device.get_server();
    let auth = server.create_service(AUTH_SERVICE_UUID);
    let files = server.create_service(FILE_SERVICE_UUID);
    let battery = server.create_service(BleUuid::from_uuid16(ble::BATTERY_SERVICE_UUID16));

    let read_notify = NimbleProperties::READ | NimbleProperties::NOTIFY;
    let write = NimbleProperties::WRITE;

    let mut chars = Vec::new();
    let mut add = |service: &Arc<NimbleMutex<BLEService>>,
                   endpoint: Endpoint,
                   uuid: BleUuid,
                   props: NimbleProperties| {
        let characteristic = service.lock().create_characteristic(uuid, props);
        chars.push((endpoint, characteristic));
    };
    add(&auth, Endpoint::AuthKeyWrite, AUTH_KEY_WRITE_UUID, write);
    add(&auth, Endpoint::AuthStatus, AUTH_STATUS_UUID, read_notify);
    add(&auth, Endpoint::AuthKeyClear, AUTH_KEY_CLEAR_UUID, write);
    add(&files, Endpoint::FileList, FILE_LIST_UUID, read_notify);
    add(&files, Endpoint::FileDelete, FILE_DELETE_UUID, write);
    add(&files, Endpoint::TransferControl, TRANSFER_CONTROL_UUID, write | NimbleProperties::NOTIFY);
    add(&files, Endpoint::TransferData, TRANSFER_DATA_UUID, read_notify | write);
    add(&files, Endpoint::TransferProgress, TRANSFER_PROGRESS_UUID, read_notify);
    add(
        &battery,
        Endpoint::BatteryLevel,
        BleUuid::from_uuid16(ble::BATTERY_LEVEL_UUID16),
        NimbleProperties::READ,
    );

    let (tx, rx) = mpsc::channel();
    Ok((Gatt { chars, rx }, GattNotifier { tx }))
}

impl Gatt {
    /// Route accesses and connection events to `dispatcher`, start the
    /// notification sender and begin advertising
    pub fn attach(self, dispatcher: Shared, device_name: &str) -> anyhow::Result<()> {
        let ble_device = BLEDevice::take();
        let server = ble_device.get_server();

        let d = dispatcher.clone();
        server.on_connect(move |server, desc| {
            info!("BLE client connected: conn_handle={}", desc.conn_handle());
            let bound = with_dispatcher(&d, |d| d.on_connect(desc.conn_handle()));
            if !matches!(bound, Some(Ok(()))) {
                warn!("Refusing peer conn_handle={}", desc.conn_handle());
                if let Err(e) = server.disconnect(desc.conn_handle()) {
                    error!("Disconnect of refused peer failed: {:?}", e);
                }
                return;
            }
            // Update connection parameters for better throughput
            let _ = server.update_conn_params(desc.conn_handle(), 24, 48, 0, 60);
        });

        let d = dispatcher.clone();
        server.on_disconnect(move |desc, reason| {
            info!("BLE client disconnected: {:?}", reason);
            with_dispatcher(&d, |d| d.on_disconnect(desc.conn_handle()));
        });

        for (endpoint, characteristic) in &self.chars {
            let endpoint = *endpoint;
            let mut characteristic = characteristic.lock();

            let d = dispatcher.clone();
            characteristic.on_read(move |value, desc| {
                let bytes = with_dispatcher(&d, |d| {
                    track_mtu(d, desc);
                    d.read(desc.conn_handle(), endpoint)
                });
                let bytes = match bytes {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        // Reads cannot be rejected from here, answer with nothing
                        warn!("Read of {:?} failed: {}", endpoint, e);
                        Vec::new()
                    }
                    None => Vec::new(),
                };
                value.set_value(&bytes);
            });

            let d = dispatcher.clone();
            characteristic.on_write(move |args| {
                let result = with_dispatcher(&d, |d| {
                    track_mtu(d, args.desc());
                    d.write(args.desc().conn_handle(), endpoint, args.recv_data())
                });
                if let Some(Err(e)) = result {
                    args.reject_with_error_code(e.att_code());
                }
            });
        }

        let Gatt { chars, rx } = self;
        std::thread::Builder::new()
            .name("ble-notify".to_string())
            .stack_size(4096)
            .spawn(move || send_notifications(rx, chars))?;

        let advertising = ble_device.get_advertising();
        advertising
            .lock()
            .set_data(
                BLEAdvertisementData::new()
                    .name(device_name)
                    .add_service_uuid(FILE_SERVICE_UUID),
            )
            .map_err(ble_error)?;
        advertising.lock().start().map_err(ble_error)?;
        info!("BLE advertising started as '{}'", device_name);
        Ok(())
    }
}

fn with_dispatcher<T>(dispatcher: &Shared, f: impl FnOnce(&mut Dispatcher<NvsKeyStore>) -> T) -> Option<T> {
    match dispatcher.lock() {
        Ok(mut d) => Some(f(&mut d)),
        Err(_) => {
            error!("Dispatcher lock poisoned");
            None
        }
    }
}

fn ble_error(e: BLEError) -> anyhow::Error {
    anyhow::anyhow!("BLE: {:?}", e)
}

fn track_mtu(dispatcher: &mut Dispatcher<NvsKeyStore>, desc: &BLEConnDesc) {
    if dispatcher.session().mtu() != Some(desc.mtu()) {
        dispatcher.on_mtu_update(desc.conn_handle(), desc.mtu());
    }
}

fn send_notifications(rx: mpsc::Receiver<(Endpoint, Vec<u8>)>, chars: Vec<(Endpoint, Characteristic)>) {
    for (endpoint, value) in rx {
        match chars.iter().find(|(e, _)| *e == endpoint) {
            Some((_, characteristic)) => {
                characteristic.lock().set_value(&value).notify();
            }
            None => warn!("No characteristic for {:?}, dropping notification", endpoint),
        }
    }
    info!("Notification sender stopped");
}
