//! Routes characteristic accesses to the auth store, the transfer engine and
//! storage, and decides which notifications follow.
//!
//! Writes may notify right away. Anything caused by a read is queued on the
//! deferred channel and sent later by the worker.

use log::*;
use myhero_mcu::{DeviceHooks, KeyStore, LedMode};
use myhero_proto::ble::Endpoint;
use myhero_proto::{AuthKey, LIST_END_MARKER, MAX_DELETE_PATH, StatusFrame, TransferCommand};

use crate::auth::AuthStore;
use crate::config::Config;
use crate::deferred::{DeferredAction, DeferredNotification, DeferredSender};
use crate::files::Storage;
use crate::notify::Notifier;
use crate::session::{ConnHandle, Session};
use crate::transfer::{ChunkOutcome, TransferEngine, TransferState, UploadStatus};
use crate::{Error, Result};

pub struct Dispatcher<S> {
    auth: AuthStore<S>,
    engine: TransferEngine,
    session: Session,
    hooks: Box<dyn DeviceHooks + Send>,
    notifier: Box<dyn Notifier + Send>,
    deferred: DeferredSender,
    chunk_size: usize,
    device_name: String,
}

impl<S> Dispatcher<S>
where
    S: KeyStore,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    pub fn new(
        config: &Config,
        auth: AuthStore<S>,
        hooks: impl DeviceHooks + Send + 'static,
        notifier: impl Notifier + Send + 'static,
        deferred: DeferredSender,
    ) -> Result<Self> {
        let storage = Storage::new(&config.storage_root, config.mount_prefix.as_str());
        storage.ensure_root()?;
        info!(
            "Dispatcher ready: storage={}, chunk_size={}",
            storage.root().display(),
            config.chunk_size
        );
        Ok(Self {
            auth,
            engine: TransferEngine::new(storage, config.chunk_size),
            session: Session::new(),
            hooks: Box::new(hooks),
            notifier: Box::new(notifier),
            deferred,
            chunk_size: config.chunk_size,
            device_name: config.device_name.clone(),
        })
    }

    pub fn auth(&self) -> &AuthStore<S> {
        &self.auth
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // ============ Connection events ============

    pub fn on_connect(&mut self, conn: ConnHandle) -> Result<()> {
        self.session.connect(conn)?;
        self.engine.set_chunk_size(self.chunk_size);
        self.hooks.set_mode(LedMode::BlePairing);
        Ok(())
    }

    /// Cancel the transfer, forget authentication and unbind the peer
    pub fn on_disconnect(&mut self, conn: ConnHandle) {
        if self.session.conn() != Some(conn) {
            debug!("Disconnect for inactive conn_handle={}, ignoring", conn);
            return;
        }
        if self.engine.cancel() {
            warn!("Transfer aborted by disconnect");
        }
        self.auth.on_disconnect();
        self.session.disconnect(conn);
        self.engine.set_chunk_size(self.chunk_size);
        self.hooks.set_mode(LedMode::BlePairing);
    }

    pub fn on_mtu_update(&mut self, conn: ConnHandle, mtu: u16) {
        if self.session.update_mtu(conn, mtu) {
            let chunk_size = self.session.chunk_size(self.chunk_size);
            self.engine.set_chunk_size(chunk_size);
            debug!("Chunk size for next transfer: {}", chunk_size);
        }
    }

    // ============ Attribute access ============

    /// Only the bound peer reaches the handlers; the auth state belongs to it
    fn gate(&self, conn: ConnHandle, endpoint: Endpoint) -> Result<()> {
        if self.session.conn() != Some(conn) {
            warn!("{:?} rejected - conn_handle={} is not the bound peer", endpoint, conn);
            return Err(Error::Unauthenticated);
        }
        if endpoint.is_open() || self.auth.is_authenticated() {
            return Ok(());
        }
        warn!("{:?} rejected - not authenticated", endpoint);
        Err(Error::Unauthenticated)
    }

    pub fn read(&mut self, conn: ConnHandle, endpoint: Endpoint) -> Result<Vec<u8>> {
        self.gate(conn, endpoint)?;
        match endpoint {
            Endpoint::AuthStatus => Ok(vec![self.auth.status_byte()]),
            Endpoint::FileList => {
                self.deferred.push(DeferredNotification {
                    conn,
                    generation: self.engine.generation(),
                    action: DeferredAction::FileList,
                });
                Ok(Vec::new())
            }
            Endpoint::TransferData => self.read_chunk(conn),
            Endpoint::TransferProgress => Ok(self.engine.snapshot().progress().to_bytes().to_vec()),
            Endpoint::BatteryLevel => Ok(vec![self.hooks.level_percent()]),
            Endpoint::DeviceName => Ok(self.device_name.as_bytes().to_vec()),
            Endpoint::AuthKeyWrite
            | Endpoint::AuthKeyClear
            | Endpoint::FileDelete
            | Endpoint::TransferControl => Err(Error::NotSupported(endpoint)),
        }
    }

    pub fn write(&mut self, conn: ConnHandle, endpoint: Endpoint, value: &[u8]) -> Result<()> {
        self.gate(conn, endpoint)?;
        match endpoint {
            Endpoint::AuthKeyWrite => {
                let key = AuthKey::from_bytes(value)?;
                let accepted = self.auth.check(key.as_bytes())?;
                info!("Auth key write: {}", if accepted { "SUCCESS" } else { "FAILED" });
                self.notify_auth_status();
                Ok(())
            }
            Endpoint::AuthKeyClear => {
                self.auth.clear()?;
                self.notify_auth_status();
                Ok(())
            }
            Endpoint::FileDelete => self.delete_file(value),
            Endpoint::TransferControl => self.control(conn, value),
            Endpoint::TransferData => self.write_chunk(value),
            Endpoint::AuthStatus
            | Endpoint::FileList
            | Endpoint::TransferProgress
            | Endpoint::BatteryLevel
            | Endpoint::DeviceName => Err(Error::NotSupported(endpoint)),
        }
    }

    fn control(&mut self, _conn: ConnHandle, value: &[u8]) -> Result<()> {
        match TransferCommand::from_bytes(value)? {
            TransferCommand::Cancel => {
                if self.engine.cancel() {
                    self.hooks.set_mode(LedMode::BlePairing);
                }
                Ok(())
            }
            TransferCommand::Upload { size, name } => self.start_upload(&name, size),
            TransferCommand::Download { name } => self.start_download(&name),
        }
    }

    fn start_upload(&mut self, name: &str, size: u32) -> Result<()> {
        if let Err(e) = self.engine.start_upload(name, size) {
            warn!("Upload of {} rejected: {}", name, e);
            self.notify_status(Endpoint::TransferControl, StatusFrame::error());
            return Err(e);
        }
        self.hooks.set_mode(LedMode::BleTransfer);
        self.notify_status(Endpoint::TransferControl, StatusFrame::ready(0));
        Ok(())
    }

    fn start_download(&mut self, name: &str) -> Result<()> {
        let total = match self.engine.start_download(name) {
            Ok(total) => total,
            Err(e) => {
                warn!("Download of {} rejected: {}", name, e);
                self.notify_status(Endpoint::TransferData, StatusFrame::error());
                return Err(e);
            }
        };
        self.hooks.set_mode(LedMode::BleTransfer);
        self.notify_status(Endpoint::TransferData, StatusFrame::ready(total));

        // Nothing to read from an empty file
        if self.engine.state() == TransferState::Complete {
            self.notify_status(Endpoint::TransferControl, StatusFrame::complete());
            self.end_transfer();
        }
        Ok(())
    }

    fn write_chunk(&mut self, value: &[u8]) -> Result<()> {
        match self.engine.receive_chunk(value) {
            Ok(UploadStatus::Ready) => {
                self.notify_progress();
                self.notify_status(Endpoint::TransferControl, StatusFrame::ready(0));
                Ok(())
            }
            Ok(UploadStatus::Complete) => {
                self.notify_progress();
                self.notify_status(Endpoint::TransferControl, StatusFrame::complete());
                self.hooks.rescan();
                self.end_transfer();
                Ok(())
            }
            Err(e) => {
                if self.engine.state() == TransferState::Error {
                    self.notify_progress();
                    self.notify_status(Endpoint::TransferControl, StatusFrame::error());
                    self.end_transfer();
                }
                Err(e)
            }
        }
    }

    /// Hand out the buffered chunk, then refill it. Whatever the refill
    /// produced is announced by the deferred worker.
    fn read_chunk(&mut self, conn: ConnHandle) -> Result<Vec<u8>> {
        let chunk = self.engine.current_chunk()?.to_vec();
        let generation = self.engine.generation();
        let action = match self.engine.chunk_read_complete() {
            Some(ChunkOutcome::Ready(len)) => DeferredAction::ChunkReady(len),
            Some(ChunkOutcome::Complete) => DeferredAction::Complete,
            Some(ChunkOutcome::Failed) | None => DeferredAction::Error,
        };
        self.deferred.push(DeferredNotification { conn, generation, action });
        Ok(chunk)
    }

    fn delete_file(&mut self, value: &[u8]) -> Result<()> {
        if value.is_empty() || value.len() > MAX_DELETE_PATH {
            return Err(Error::InvalidArgument(format!("path of {} bytes", value.len())));
        }
        let name = std::str::from_utf8(value)
            .map_err(|_| Error::InvalidArgument("path is not valid UTF-8".to_string()))?
            .trim_end_matches('\0');
        let path = self.engine.storage().resolve(name)?;
        let busy = self.engine.is_active()
            && self.engine.active_path().is_some_and(|active| Storage::same_file(active, &path));
        if busy {
            warn!("Refusing to delete {} during its transfer", name);
            return Err(Error::InvalidState("file is being transferred"));
        }
        self.engine.storage().remove(&path)?;
        self.hooks.rescan();
        Ok(())
    }

    fn end_transfer(&mut self) {
        self.engine.finish();
        self.hooks.set_mode(LedMode::BlePairing);
    }

    // ============ Deferred work ============

    /// Called by the deferred worker, never from inside an access
    pub fn fire_deferred(&mut self, item: DeferredNotification) {
        if self.session.conn() != Some(item.conn) {
            debug!("[DEFERRED] peer {} is gone, dropping {:?}", item.conn, item.action);
            return;
        }
        match item.action {
            DeferredAction::FileList => self.send_file_list(),
            _ if item.generation != self.engine.generation() => {
                debug!("[DEFERRED] stale {:?} from generation {}", item.action, item.generation);
            }
            DeferredAction::ChunkReady(len) => {
                if self.engine.state() == TransferState::Downloading {
                    debug!("[DEFERRED] Sending CHUNK_READY notification, size={}", len);
                    self.notify_status(Endpoint::TransferData, StatusFrame::ready(len as u32));
                    self.notify_progress();
                }
            }
            DeferredAction::Complete => {
                if self.engine.state() == TransferState::Complete {
                    debug!("[DEFERRED] Sending COMPLETE notification");
                    self.notify_status(Endpoint::TransferControl, StatusFrame::complete());
                    self.end_transfer();
                }
            }
            DeferredAction::Error => {
                if self.engine.state() == TransferState::Error {
                    debug!("[DEFERRED] Sending ERROR notification");
                    self.notify_status(Endpoint::TransferControl, StatusFrame::error());
                    self.end_transfer();
                }
            }
        }
    }

    fn send_file_list(&mut self) {
        let entries = match self.engine.storage().list() {
            Ok(entries) => entries,
            Err(e) => {
                error!("File list failed: {}", e);
                Vec::new()
            }
        };
        for entry in &entries {
            self.send(Endpoint::FileList, &entry.to_bytes());
        }
        self.send(Endpoint::FileList, &LIST_END_MARKER);
        info!("File list sent: {} entries", entries.len());
    }

    // ============ Notifications ============

    fn send(&mut self, endpoint: Endpoint, value: &[u8]) -> bool {
        let Some(conn) = self.session.conn() else {
            return false;
        };
        match self.notifier.notify(conn, endpoint, value) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    fn notify_status(&mut self, endpoint: Endpoint, frame: StatusFrame) {
        debug!("[NOTIFY] {:?} status=0x{:02X} size={}", endpoint, frame.status, frame.size);
        if !self.send(endpoint, &frame.to_bytes()) && !self.session.is_connected() {
            warn!("[NOTIFY] {:?} skipped - no peer bound", endpoint);
        }
    }

    /// Dropped silently when nobody is bound
    fn notify_progress(&mut self) {
        let progress = self.engine.snapshot().progress();
        self.send(Endpoint::TransferProgress, &progress.to_bytes());
    }

    fn notify_auth_status(&mut self) {
        let status = self.auth.status_byte();
        self.send(Endpoint::AuthStatus, &[status]);
    }
}
