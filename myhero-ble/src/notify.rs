//! Outbound notifications

use myhero_proto::ble::Endpoint;

use crate::session::ConnHandle;

#[derive(Debug, thiserror::Error)]
#[error("notify on {endpoint:?} failed: {reason}")]
pub struct NotifyError {
    pub endpoint: Endpoint,
    pub reason: String,
}

/// Sends a characteristic notification to the connected peer.
///
/// Implemented by the radio glue; never called from inside a read access.
pub trait Notifier {
    fn notify(&mut self, conn: ConnHandle, endpoint: Endpoint, value: &[u8]) -> Result<(), NotifyError>;
}

/// A notification as seen by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub conn: ConnHandle,
    pub endpoint: Endpoint,
    pub value: Vec<u8>,
}

/// Keeps every notification in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: std::sync::Arc<std::sync::Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far
    pub fn take(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(mut sent) => std::mem::take(&mut *sent),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, conn: ConnHandle, endpoint: Endpoint, value: &[u8]) -> Result<(), NotifyError> {
        let mut sent = self.sent.lock().map_err(|_| NotifyError {
            endpoint,
            reason: "recorder poisoned".to_string(),
        })?;
        sent.push(Notification { conn, endpoint, value: value.to_vec() });
        Ok(())
    }
}

/// Forwards notifications into a channel, the way a radio would deliver them
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: tokio::sync::mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&mut self, conn: ConnHandle, endpoint: Endpoint, value: &[u8]) -> Result<(), NotifyError> {
        self.tx
            .send(Notification { conn, endpoint, value: value.to_vec() })
            .map_err(|_| NotifyError { endpoint, reason: "peer went away".to_string() })
    }
}
