//! Shared-secret authentication with trust on first pairing
//!
//! While no secret is stored every session counts as authenticated; the first
//! key written becomes the secret. After that a session is authenticated only
//! once it has written the matching key, and only until it disconnects.

use log::*;
use myhero_mcu::KeyStore;
use myhero_proto::{AUTH_KEY_SIZE, AUTH_STATUS_AUTHENTICATED, AUTH_STATUS_LOCKED};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

pub struct AuthStore<S> {
    store: S,
    stored: Option<[u8; AUTH_KEY_SIZE]>,
    session_authenticated: bool,
}

impl<S> AuthStore<S>
where
    S: KeyStore,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    /// Read the persisted secret; a missing one selects first-pairing mode
    pub fn load(store: S) -> Result<Self> {
        let stored = store.load_key().map_err(Error::key_store)?;
        match &stored {
            Some(key) => info!("Auth key loaded ({})", fingerprint(key)),
            None => info!("No auth key stored - device is in first-pairing mode"),
        }
        Ok(Self { store, stored, session_authenticated: false })
    }

    /// Validate a candidate key for the current session.
    ///
    /// Without a stored secret the candidate is persisted and accepted.
    /// Any length other than 32 bytes is refused.
    pub fn check(&mut self, candidate: &[u8]) -> Result<bool> {
        let Ok(candidate) = <[u8; AUTH_KEY_SIZE]>::try_from(candidate) else {
            warn!("Invalid key length: expected {}, got {}", AUTH_KEY_SIZE, candidate.len());
            self.session_authenticated = false;
            return Ok(false);
        };

        let Some(stored) = &self.stored else {
            self.store.save_key(&candidate).map_err(Error::key_store)?;
            info!("First pairing - key saved ({})", fingerprint(&candidate));
            self.stored = Some(candidate);
            self.session_authenticated = true;
            return Ok(true);
        };

        self.session_authenticated = constant_time_eq(stored, &candidate);
        if self.session_authenticated {
            info!("Authentication successful");
        } else {
            warn!("Authentication failed - key mismatch");
        }
        Ok(self.session_authenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        self.stored.is_none() || self.session_authenticated
    }

    pub fn has_stored_key(&self) -> bool {
        self.stored.is_some()
    }

    /// Erase the secret and go back to first-pairing mode
    pub fn clear(&mut self) -> Result<()> {
        if !self.is_authenticated() {
            warn!("Key clear rejected - not authenticated");
            return Err(Error::Unauthenticated);
        }
        self.store.erase_key().map_err(Error::key_store)?;
        self.stored = None;
        self.session_authenticated = false;
        info!("Auth key cleared - device entering first-pairing mode");
        Ok(())
    }

    pub fn on_disconnect(&mut self) {
        if self.session_authenticated {
            debug!("Session authentication cleared");
        }
        self.session_authenticated = false;
    }

    pub fn status_byte(&self) -> u8 {
        if self.is_authenticated() {
            AUTH_STATUS_AUTHENTICATED
        } else {
            AUTH_STATUS_LOCKED
        }
    }

    /// Short digest of the stored key, safe to log
    pub fn fingerprint(&self) -> Option<String> {
        self.stored.as_ref().map(fingerprint)
    }

    pub fn key_store(&self) -> &S {
        &self.store
    }
}

fn fingerprint(key: &[u8; AUTH_KEY_SIZE]) -> String {
    let digest = Sha256::digest(key);
    data_encoding::HEXLOWER.encode(&digest[..4])
}

fn constant_time_eq(a: &[u8; AUTH_KEY_SIZE], b: &[u8; AUTH_KEY_SIZE]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKeyStore;

    #[test]
    fn first_pairing_bootstraps_the_key() {
        let mut auth = AuthStore::load(MemoryKeyStore::default()).unwrap();
        assert!(auth.is_authenticated());
        assert!(!auth.has_stored_key());

        assert!(auth.check(&[1u8; 32]).unwrap());
        assert_eq!(auth.key_store().load_key().unwrap(), Some([1u8; 32]));

        assert!(auth.check(&[1u8; 32]).unwrap());
        assert!(!auth.check(&[2u8; 32]).unwrap());
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn disconnect_requires_reauthentication() {
        let mut auth = AuthStore::load(MemoryKeyStore::with_key([9u8; 32])).unwrap();
        assert!(!auth.is_authenticated());
        assert_eq!(auth.status_byte(), 0x00);

        assert!(auth.check(&[9u8; 32]).unwrap());
        assert_eq!(auth.status_byte(), 0x01);

        auth.on_disconnect();
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn wrong_length_fails_closed() {
        let mut auth = AuthStore::load(MemoryKeyStore::default()).unwrap();
        assert!(!auth.check(&[1u8; 16]).unwrap());
        assert!(!auth.has_stored_key());
    }

    #[test]
    fn clear_needs_an_authenticated_session() {
        let mut auth = AuthStore::load(MemoryKeyStore::with_key([3u8; 32])).unwrap();
        assert!(matches!(auth.clear(), Err(Error::Unauthenticated)));
        assert!(auth.has_stored_key());

        auth.check(&[3u8; 32]).unwrap();
        auth.clear().unwrap();
        assert!(!auth.has_stored_key());
        assert!(auth.is_authenticated());
        assert_eq!(auth.key_store().load_key().unwrap(), None);
    }

    #[test]
    fn fingerprint_does_not_leak_the_key() {
        let auth = AuthStore::load(MemoryKeyStore::with_key([0x5A; 32])).unwrap();
        let fp = auth.fingerprint().unwrap();
        assert_eq!(fp.len(), 8);
        assert_ne!(fp, "5a5a5a5a");
    }
}
