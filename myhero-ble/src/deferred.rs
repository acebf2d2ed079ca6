//! Notifications that must not be sent from the access that caused them
//!
//! The radio host forbids notifying from inside a read callback. Handlers
//! push a [`DeferredNotification`] instead and a worker running on another
//! context sends it after a short delay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::*;
use myhero_mcu::KeyStore;
use tokio::sync::mpsc;

use crate::dispatcher::Dispatcher;
use crate::session::ConnHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    /// A download chunk of this length is buffered
    ChunkReady(usize),
    Complete,
    Error,
    /// Stream the file list to the peer
    FileList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredNotification {
    pub conn: ConnHandle,
    /// Transfer generation that produced this item
    pub generation: u64,
    pub action: DeferredAction,
}

pub type DeferredReceiver = mpsc::UnboundedReceiver<DeferredNotification>;

#[derive(Debug, Clone)]
pub struct DeferredSender {
    tx: mpsc::UnboundedSender<DeferredNotification>,
}

pub fn deferred_queue() -> (DeferredSender, DeferredReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeferredSender { tx }, rx)
}

impl DeferredSender {
    pub fn push(&self, item: DeferredNotification) {
        debug!("[DEFERRED] queued {:?}", item.action);
        if self.tx.send(item).is_err() {
            warn!("[DEFERRED] worker is gone, dropping {:?}", item.action);
        }
    }
}

pub type SharedDispatcher<S> = Arc<Mutex<Dispatcher<S>>>;

fn fire<S>(dispatcher: &SharedDispatcher<S>, item: DeferredNotification) -> bool
where
    S: KeyStore,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    match dispatcher.lock() {
        Ok(mut d) => {
            d.fire_deferred(item);
            true
        }
        Err(_) => {
            error!("[DEFERRED] dispatcher lock poisoned, stopping");
            false
        }
    }
}

/// Worker task: waits `delay` after each item, then sends it
#[cfg(feature = "async")]
pub async fn run_worker<S>(dispatcher: SharedDispatcher<S>, mut rx: DeferredReceiver, delay: Duration)
where
    S: KeyStore,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(item) = rx.recv().await {
        tokio::time::sleep(delay).await;
        if !fire(&dispatcher, item) {
            break;
        }
    }
    debug!("[DEFERRED] worker stopped");
}

/// Worker loop for a plain thread; returns when every sender is dropped
pub fn run_blocking<S>(dispatcher: SharedDispatcher<S>, mut rx: DeferredReceiver, delay: Duration)
where
    S: KeyStore,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(item) = rx.blocking_recv() {
        std::thread::sleep(delay);
        if !fire(&dispatcher, item) {
            break;
        }
    }
    debug!("[DEFERRED] worker stopped");
}

/// Send everything queued so far on the caller's context
pub fn drain<S>(dispatcher: &mut Dispatcher<S>, rx: &mut DeferredReceiver) -> usize
where
    S: KeyStore,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let mut fired = 0;
    while let Ok(item) = rx.try_recv() {
        dispatcher.fire_deferred(item);
        fired += 1;
    }
    fired
}
