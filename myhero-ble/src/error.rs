use std::path::PathBuf;

use myhero_proto::DecodeError;
use myhero_proto::ble::{Endpoint, att};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session is not authenticated")]
    Unauthenticated,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("{0:?} does not support this operation")]
    NotSupported(Endpoint),

    #[error("key store failure: {0}")]
    KeyStore(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl Error {
    /// ATT error code returned to the peer for a failed access
    pub fn att_code(&self) -> u8 {
        match self {
            Error::Unauthenticated => att::INSUFFICIENT_AUTHEN,
            Error::InvalidArgument(_) => att::INVALID_ATTR_VALUE_LEN,
            Error::NotSupported(_) => att::REQUEST_NOT_SUPPORTED,
            Error::InvalidState(_)
            | Error::NotFound(_)
            | Error::Io(_)
            | Error::SizeMismatch { .. }
            | Error::KeyStore(_) => att::UNLIKELY,
        }
    }

    pub(crate) fn key_store<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::KeyStore(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn att_codes() {
        assert_eq!(Error::Unauthenticated.att_code(), 0x05);
        assert_eq!(Error::InvalidArgument("x".into()).att_code(), 0x0D);
        assert_eq!(Error::InvalidState("busy").att_code(), 0x0E);
        assert_eq!(Error::SizeMismatch { expected: 1, actual: 2 }.att_code(), 0x0E);
        assert_eq!(Error::NotSupported(Endpoint::FileList).att_code(), 0x06);
    }

    #[test]
    fn decode_errors_are_invalid_arguments() {
        let e: Error = DecodeError::EmptyName.into();
        assert!(matches!(e, Error::InvalidArgument(_)));
    }
}
