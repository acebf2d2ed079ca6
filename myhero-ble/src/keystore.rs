//! Host-side key stores

use std::fs;
use std::path::{Path, PathBuf};

use myhero_mcu::KeyStore;
use myhero_proto::AUTH_KEY_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("key file I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("key file {} is corrupt", .0.display())]
    Corrupt(PathBuf),
}

/// Secret stored as lowercase hex in a single file
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    type Error = KeyFileError;

    fn load_key(&self) -> Result<Option<[u8; AUTH_KEY_SIZE]>, Self::Error> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(content.trim().as_bytes())
            .map_err(|_| KeyFileError::Corrupt(self.path.clone()))?;
        let key = bytes
            .try_into()
            .map_err(|_| KeyFileError::Corrupt(self.path.clone()))?;
        Ok(Some(key))
    }

    fn save_key(&mut self, key: &[u8; AUTH_KEY_SIZE]) -> Result<(), Self::Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, data_encoding::HEXLOWER.encode(key))?;
        Ok(())
    }

    fn erase_key(&mut self) -> Result<(), Self::Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile key store for tests and benches
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    key: Option<[u8; AUTH_KEY_SIZE]>,
}

impl MemoryKeyStore {
    pub fn with_key(key: [u8; AUTH_KEY_SIZE]) -> Self {
        Self { key: Some(key) }
    }
}

impl KeyStore for MemoryKeyStore {
    type Error = std::convert::Infallible;

    fn load_key(&self) -> Result<Option<[u8; AUTH_KEY_SIZE]>, Self::Error> {
        Ok(self.key)
    }

    fn save_key(&mut self, key: &[u8; AUTH_KEY_SIZE]) -> Result<(), Self::Error> {
        self.key = Some(*key);
        Ok(())
    }

    fn erase_key(&mut self) -> Result<(), Self::Error> {
        self.key = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_roundtrip_and_erase() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileKeyStore::new(dir.path().join("keys/auth.key"));
        assert_eq!(store.load_key().unwrap(), None);

        store.save_key(&[0xAB; 32]).unwrap();
        let on_disk = fs::read_to_string(store.path()).unwrap();
        assert_eq!(on_disk, "ab".repeat(32));
        assert_eq!(store.load_key().unwrap(), Some([0xAB; 32]));

        store.erase_key().unwrap();
        store.erase_key().unwrap();
        assert_eq!(store.load_key().unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.key");
        fs::write(&path, "abcd").unwrap();
        let store = FileKeyStore::new(&path);
        assert!(matches!(store.load_key(), Err(KeyFileError::Corrupt(_))));
    }
}
