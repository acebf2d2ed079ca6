//! Persistent Storage Abstraction Traits

use myhero_proto::AUTH_KEY_SIZE;

/// Non-volatile home of the BLE shared secret
///
/// MCU-specific crates implement this trait using their storage backend
/// (NVS for ESP32, a key file on a host).
pub trait KeyStore {
    /// Error type for storage operations
    type Error;

    /// Read the stored secret, `None` when the device was never paired
    fn load_key(&self) -> Result<Option<[u8; AUTH_KEY_SIZE]>, Self::Error>;

    /// Persist the secret, replacing any previous one
    fn save_key(&mut self, key: &[u8; AUTH_KEY_SIZE]) -> Result<(), Self::Error>;

    /// Erase the secret; erasing a missing secret is not an error
    fn erase_key(&mut self) -> Result<(), Self::Error>;
}
