//! BLE GATT Service Protocol Constants for MyHero recorders
//!
//! Every custom UUID shares the base `xxxxxxxx-4D59-4842-8000-00805F9B34FB`,
//! the leading 32 bits select the service or characteristic.

/// Auth Service UUID
pub const AUTH_SERVICE_UUID: &str = "00000001-4d59-4842-8000-00805f9b34fb";

/// Auth Key Characteristic UUID (write)
pub const AUTH_KEY_WRITE_UUID: &str = "00000101-4d59-4842-8000-00805f9b34fb";

/// Auth Status Characteristic UUID (read/notify)
pub const AUTH_STATUS_UUID: &str = "00000102-4d59-4842-8000-00805f9b34fb";

/// Auth Key Clear Characteristic UUID (write)
pub const AUTH_KEY_CLEAR_UUID: &str = "00000103-4d59-4842-8000-00805f9b34fb";

/// File Service UUID
pub const FILE_SERVICE_UUID: &str = "00000002-4d59-4842-8000-00805f9b34fb";

/// File List Characteristic UUID (read triggers notify stream)
pub const FILE_LIST_UUID: &str = "00000201-4d59-4842-8000-00805f9b34fb";

/// File Delete Characteristic UUID (write)
pub const FILE_DELETE_UUID: &str = "00000202-4d59-4842-8000-00805f9b34fb";

/// Transfer Control Characteristic UUID (write/notify)
pub const TRANSFER_CONTROL_UUID: &str = "00000203-4d59-4842-8000-00805f9b34fb";

/// Transfer Data Characteristic UUID (read/write/notify)
pub const TRANSFER_DATA_UUID: &str = "00000204-4d59-4842-8000-00805f9b34fb";

/// Transfer Progress Characteristic UUID (read/notify)
pub const TRANSFER_PROGRESS_UUID: &str = "00000205-4d59-4842-8000-00805f9b34fb";

/// Standard Battery Service and Battery Level characteristic
pub const BATTERY_SERVICE_UUID16: u16 = 0x180F;
pub const BATTERY_LEVEL_UUID16: u16 = 0x2A19;

/// GAP Device Name characteristic
pub const DEVICE_NAME_UUID16: u16 = 0x2A00;

/// Advertised name when nothing else is configured
pub const DEFAULT_DEVICE_NAME: &str = "MyHero";

/// MTU requested from the central right after connecting
pub const PREFERRED_MTU: u16 = 512;

/// ATT header bytes that do not carry attribute value
pub const ATT_OVERHEAD: u16 = 3;

/// Transfer control opcodes (first byte of a control write)
pub mod opcodes {
    /// Cancel the active transfer, trailing bytes are ignored
    pub const CANCEL: u8 = 0x00;

    /// Start upload: `[0x01][size:4 LE][filename\0]`
    pub const UPLOAD: u8 = 0x01;

    /// Start download: `[0x02][filename\0]`
    pub const DOWNLOAD: u8 = 0x02;
}

/// First byte of a `[status:1][size:4]` frame
pub mod status {
    pub const ERROR: u8 = 0x00;
    pub const READY: u8 = 0x01;
    pub const COMPLETE: u8 = 0x02;
}

/// Entry type byte in file list notifications
pub mod file_type {
    pub const FILE: u8 = 0x00;
    pub const DIRECTORY: u8 = 0x01;
    pub const END: u8 = 0xFF;
}

/// ATT protocol error codes returned from characteristic accesses
pub mod att {
    pub const REQUEST_NOT_SUPPORTED: u8 = 0x06;
    pub const INSUFFICIENT_AUTHEN: u8 = 0x05;
    pub const INVALID_ATTR_VALUE_LEN: u8 = 0x0D;
    pub const UNLIKELY: u8 = 0x0E;
}

/// Addressable endpoints exposed by the GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    AuthKeyWrite,
    AuthStatus,
    AuthKeyClear,
    FileList,
    FileDelete,
    TransferControl,
    TransferData,
    TransferProgress,
    BatteryLevel,
    DeviceName,
}

impl Endpoint {
    pub const ALL: [Endpoint; 10] = [
        Endpoint::AuthKeyWrite,
        Endpoint::AuthStatus,
        Endpoint::AuthKeyClear,
        Endpoint::FileList,
        Endpoint::FileDelete,
        Endpoint::TransferControl,
        Endpoint::TransferData,
        Endpoint::TransferProgress,
        Endpoint::BatteryLevel,
        Endpoint::DeviceName,
    ];

    /// 128-bit UUID string, `None` for the two standard 16-bit characteristics
    pub fn uuid(&self) -> Option<&'static str> {
        match self {
            Endpoint::AuthKeyWrite => Some(AUTH_KEY_WRITE_UUID),
            Endpoint::AuthStatus => Some(AUTH_STATUS_UUID),
            Endpoint::AuthKeyClear => Some(AUTH_KEY_CLEAR_UUID),
            Endpoint::FileList => Some(FILE_LIST_UUID),
            Endpoint::FileDelete => Some(FILE_DELETE_UUID),
            Endpoint::TransferControl => Some(TRANSFER_CONTROL_UUID),
            Endpoint::TransferData => Some(TRANSFER_DATA_UUID),
            Endpoint::TransferProgress => Some(TRANSFER_PROGRESS_UUID),
            Endpoint::BatteryLevel | Endpoint::DeviceName => None,
        }
    }

    pub fn from_uuid(uuid: &str) -> Option<Endpoint> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.uuid().is_some_and(|u| u.eq_ignore_ascii_case(uuid)))
    }

    /// Endpoints reachable without an authenticated session
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Endpoint::AuthKeyWrite
                | Endpoint::AuthStatus
                | Endpoint::AuthKeyClear
                | Endpoint::BatteryLevel
                | Endpoint::DeviceName
        )
    }
}
