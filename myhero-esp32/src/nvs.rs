//! BLE shared secret kept in ESP32 NVS (Non-Volatile Storage)

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_svc::sys::EspError;
use log::*;
use myhero_mcu::KeyStore;
use myhero_proto::AUTH_KEY_SIZE;

const NVS_NAMESPACE: &str = "ble_auth";
const KEY_AUTH: &str = "auth_key";

pub struct NvsKeyStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsKeyStore {
    pub fn open(partition: &EspNvsPartition<NvsDefault>) -> Result<Self, EspError> {
        let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }
}

impl KeyStore for NvsKeyStore {
    type Error = EspError;

    fn load_key(&self) -> Result<Option<[u8; AUTH_KEY_SIZE]>, EspError> {
        let mut buf = [0u8; AUTH_KEY_SIZE];
        match self.nvs.get_blob(KEY_AUTH, &mut buf)? {
            Some(data) if data.len() == AUTH_KEY_SIZE => Ok(Some(buf)),
            Some(data) => {
                warn!("Stored auth key has {} bytes, ignoring it", data.len());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn save_key(&mut self, key: &[u8; AUTH_KEY_SIZE]) -> Result<(), EspError> {
        self.nvs.set_blob(KEY_AUTH, key)?;
        info!("Auth key saved to NVS");
        Ok(())
    }

    fn erase_key(&mut self) -> Result<(), EspError> {
        self.nvs.remove(KEY_AUTH)?;
        Ok(())
    }
}
