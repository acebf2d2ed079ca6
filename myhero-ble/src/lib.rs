//! MyHero BLE engine
//!
//! Everything the recorder does over GATT except the radio itself: pairing
//! with a shared key, chunked file transfer in both directions, file
//! listing and deletion, and the per-connection session. The radio glue
//! feeds accesses into a [`Dispatcher`] and implements [`Notifier`].

pub mod auth;
pub mod config;
pub mod deferred;
pub mod dispatcher;
pub mod error;
pub mod files;
pub mod hooks;
pub mod keystore;
#[cfg(feature = "async")]
pub mod loopback;
pub mod notify;
pub mod session;
pub mod transfer;

pub use auth::AuthStore;
pub use config::{CONFIG_FILE, Config, ConfigError};
#[cfg(feature = "host")]
pub use config::myhero_home;
pub use deferred::{
    DeferredAction, DeferredNotification, DeferredReceiver, DeferredSender, SharedDispatcher,
    deferred_queue, drain, run_blocking,
};
#[cfg(feature = "async")]
pub use deferred::run_worker;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use files::Storage;
pub use hooks::{HookLog, RecordingHooks};
pub use keystore::{FileKeyStore, KeyFileError, MemoryKeyStore};
#[cfg(feature = "async")]
pub use loopback::{Loopback, PeerError, PeerResult};
pub use notify::{ChannelNotifier, Notification, Notifier, NotifyError, RecordingNotifier};
pub use session::{ConnHandle, Session};
pub use transfer::{
    ChunkOutcome, Direction, TransferEngine, TransferSnapshot, TransferState, UploadStatus,
};

pub use myhero_proto::ble::Endpoint;
