//! A virtual central driving the dispatcher without a radio
//!
//! Accesses go straight to the shared dispatcher, notifications come back
//! through a channel, and the real deferred worker runs as a tokio task.
//! Must be used from inside a tokio runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::*;
use myhero_mcu::{DeviceHooks, KeyStore};
use myhero_proto::ble::{Endpoint, status};
use myhero_proto::{
    AUTH_KEY_SIZE, AUTH_STATUS_AUTHENTICATED, DecodeError, FileEntry, ListItem, StatusFrame,
    TransferCommand,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::auth::AuthStore;
use crate::config::Config;
use crate::deferred::{SharedDispatcher, deferred_queue, run_worker};
use crate::dispatcher::Dispatcher;
use crate::notify::{ChannelNotifier, Notification};
use crate::session::ConnHandle;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("{endpoint:?} access failed (ATT 0x{code:02x}): {source}")]
    Att {
        endpoint: Endpoint,
        code: u8,
        #[source]
        source: crate::Error,
    },
    #[error("connection refused: {0}")]
    Connect(#[source] crate::Error),
    #[error("timed out waiting for {0:?}")]
    Timeout(Endpoint),
    #[error("device reported an error on {0:?}")]
    Rejected(Endpoint),
    #[error("unexpected notification on {0:?}")]
    Unexpected(Endpoint),
    #[error("malformed notification: {0}")]
    Decode(#[from] DecodeError),
    #[error("notification channel closed")]
    Closed,
    #[error("dispatcher lock poisoned")]
    Poisoned,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;

pub struct Loopback<S> {
    dispatcher: SharedDispatcher<S>,
    inbox: UnboundedReceiver<Notification>,
    worker: JoinHandle<()>,
    conn: ConnHandle,
    timeout: Duration,
    history: Vec<Notification>,
}

impl<S> Loopback<S>
where
    S: KeyStore + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    /// Build a dispatcher for `config` and spawn its deferred worker
    pub fn start(
        config: &Config,
        auth: AuthStore<S>,
        hooks: impl DeviceHooks + Send + 'static,
    ) -> crate::Result<Self> {
        let (notifier, inbox) = ChannelNotifier::new();
        let (deferred, rx) = deferred_queue();
        let dispatcher = Dispatcher::new(config, auth, hooks, notifier, deferred)?;
        let dispatcher = Arc::new(Mutex::new(dispatcher));
        let worker = tokio::spawn(run_worker(dispatcher.clone(), rx, config.notify_delay()));
        Ok(Self {
            dispatcher,
            inbox,
            worker,
            conn: 1,
            timeout: Duration::from_secs(5),
            history: Vec::new(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &SharedDispatcher<S> {
        &self.dispatcher
    }

    /// Every notification received so far, in order
    pub fn history(&self) -> &[Notification] {
        &self.history
    }

    fn with<T>(&self, f: impl FnOnce(&mut Dispatcher<S>) -> T) -> PeerResult<T> {
        let mut dispatcher = self.dispatcher.lock().map_err(|_| PeerError::Poisoned)?;
        Ok(f(&mut dispatcher))
    }

    pub fn connect(&mut self, conn: ConnHandle) -> PeerResult<()> {
        self.conn = conn;
        self.with(|d| d.on_connect(conn))?.map_err(PeerError::Connect)
    }

    pub fn set_mtu(&mut self, mtu: u16) -> PeerResult<()> {
        let conn = self.conn;
        self.with(|d| d.on_mtu_update(conn, mtu))
    }

    pub fn disconnect(&mut self) -> PeerResult<()> {
        let conn = self.conn;
        self.with(|d| d.on_disconnect(conn))
    }

    pub fn read(&self, endpoint: Endpoint) -> PeerResult<Vec<u8>> {
        let conn = self.conn;
        self.with(|d| d.read(conn, endpoint))?
            .map_err(|source| PeerError::Att { endpoint, code: source.att_code(), source })
    }

    pub fn write(&self, endpoint: Endpoint, value: &[u8]) -> PeerResult<()> {
        let conn = self.conn;
        self.with(|d| d.write(conn, endpoint, value))?
            .map_err(|source| PeerError::Att { endpoint, code: source.att_code(), source })
    }

    /// Wait for the next notification on one of `endpoints`, skipping others
    pub async fn next_from(&mut self, endpoints: &[Endpoint]) -> PeerResult<Notification> {
        let wanted = endpoints.first().copied().unwrap_or(Endpoint::TransferControl);
        loop {
            let next = tokio::time::timeout(self.timeout, self.inbox.recv())
                .await
                .map_err(|_| PeerError::Timeout(wanted))?
                .ok_or(PeerError::Closed)?;
            self.history.push(next.clone());
            if endpoints.contains(&next.endpoint) {
                return Ok(next);
            }
            trace!("skipping {:?} notification", next.endpoint);
        }
    }

    /// Move whatever already arrived into the history without looking at it
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(n) = self.inbox.try_recv() {
            self.history.push(n);
            discarded += 1;
        }
        discarded
    }

    pub async fn next_status(&mut self, endpoint: Endpoint) -> PeerResult<StatusFrame> {
        let n = self.next_from(&[endpoint]).await?;
        Ok(StatusFrame::from_bytes(&n.value)?)
    }

    /// Write the key and wait for the auth status notification
    pub async fn authenticate(&mut self, key: &[u8; AUTH_KEY_SIZE]) -> PeerResult<bool> {
        self.write(Endpoint::AuthKeyWrite, key)?;
        let n = self.next_from(&[Endpoint::AuthStatus]).await?;
        Ok(n.value.first() == Some(&AUTH_STATUS_AUTHENTICATED))
    }

    pub async fn unpair(&mut self) -> PeerResult<()> {
        self.write(Endpoint::AuthKeyClear, &[0x01])?;
        self.next_from(&[Endpoint::AuthStatus]).await?;
        Ok(())
    }

    pub async fn upload(&mut self, name: &str, data: &[u8], chunk_size: usize) -> PeerResult<()> {
        let size = u32::try_from(data.len()).map_err(|_| PeerError::Rejected(Endpoint::TransferControl))?;
        self.write(
            Endpoint::TransferControl,
            &TransferCommand::Upload { size, name: name.to_string() }.to_bytes(),
        )?;
        self.expect_control(status::READY).await?;

        let mut chunks = data.chunks(chunk_size.max(1)).peekable();
        while let Some(chunk) = chunks.next() {
            self.write(Endpoint::TransferData, chunk)?;
            let expected = if chunks.peek().is_some() { status::READY } else { status::COMPLETE };
            self.expect_control(expected).await?;
        }
        info!("Uploaded {} ({} bytes)", name, data.len());
        Ok(())
    }

    async fn expect_control(&mut self, expected: u8) -> PeerResult<()> {
        let frame = self.next_status(Endpoint::TransferControl).await?;
        match frame.status {
            s if s == expected => Ok(()),
            status::ERROR => Err(PeerError::Rejected(Endpoint::TransferControl)),
            _ => Err(PeerError::Unexpected(Endpoint::TransferControl)),
        }
    }

    pub async fn download(&mut self, name: &str) -> PeerResult<Vec<u8>> {
        self.write(
            Endpoint::TransferControl,
            &TransferCommand::Download { name: name.to_string() }.to_bytes(),
        )?;
        let start = self.next_status(Endpoint::TransferData).await?;
        if start.status != status::READY {
            return Err(PeerError::Rejected(Endpoint::TransferData));
        }

        let total = start.size as usize;
        let mut data = Vec::with_capacity(total);
        if total > 0 {
            loop {
                data.extend_from_slice(&self.read(Endpoint::TransferData)?);
                let n = self.next_from(&[Endpoint::TransferData, Endpoint::TransferControl]).await?;
                let frame = StatusFrame::from_bytes(&n.value)?;
                match (n.endpoint, frame.status) {
                    (Endpoint::TransferData, status::READY) => continue,
                    (Endpoint::TransferControl, status::COMPLETE) => break,
                    (endpoint, _) => return Err(PeerError::Rejected(endpoint)),
                }
            }
        } else {
            self.expect_control(status::COMPLETE).await?;
        }
        info!("Downloaded {} ({} bytes)", name, data.len());
        Ok(data)
    }

    pub async fn list(&mut self) -> PeerResult<Vec<FileEntry>> {
        self.read(Endpoint::FileList)?;
        let mut entries = Vec::new();
        loop {
            let n = self.next_from(&[Endpoint::FileList]).await?;
            match ListItem::from_bytes(&n.value)? {
                ListItem::Entry(entry) => entries.push(entry),
                ListItem::End => return Ok(entries),
            }
        }
    }

    pub fn delete(&self, name: &str) -> PeerResult<()> {
        self.write(Endpoint::FileDelete, name.as_bytes())
    }

    pub fn cancel(&self) -> PeerResult<()> {
        self.write(Endpoint::TransferControl, &TransferCommand::Cancel.to_bytes())
    }
}

impl<S> Drop for Loopback<S> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
