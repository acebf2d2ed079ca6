//! The single peer connection and its negotiated MTU

use log::*;
use myhero_proto::ble::ATT_OVERHEAD;

use crate::{Error, Result};

/// Opaque connection handle assigned by the radio stack
pub type ConnHandle = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    conn: ConnHandle,
    mtu: Option<u16>,
}

#[derive(Debug, Default)]
pub struct Session {
    link: Option<Link>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind notifications to `conn`; only one peer at a time
    pub fn connect(&mut self, conn: ConnHandle) -> Result<()> {
        if let Some(link) = self.link {
            warn!("Connection {} rejected - {} is already connected", conn, link.conn);
            return Err(Error::InvalidState("another peer is connected"));
        }
        self.link = Some(Link { conn, mtu: None });
        info!("Peer connected: conn_handle={}", conn);
        Ok(())
    }

    /// Unbind; returns false if `conn` was not the active connection
    pub fn disconnect(&mut self, conn: ConnHandle) -> bool {
        match self.link {
            Some(link) if link.conn == conn => {
                self.link = None;
                info!("Peer disconnected: conn_handle={}", conn);
                true
            }
            _ => {
                debug!("Ignoring disconnect of unknown conn_handle={}", conn);
                false
            }
        }
    }

    pub fn update_mtu(&mut self, conn: ConnHandle, mtu: u16) -> bool {
        match &mut self.link {
            Some(link) if link.conn == conn => {
                link.mtu = Some(mtu);
                info!("MTU update: conn_handle={}, mtu={}", conn, mtu);
                true
            }
            _ => false,
        }
    }

    /// Where notifications go, `None` when nobody is bound
    pub fn conn(&self) -> Option<ConnHandle> {
        self.link.map(|l| l.conn)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn mtu(&self) -> Option<u16> {
        self.link.and_then(|l| l.mtu)
    }

    /// Chunk size for the next transfer. Until an MTU exchange happened the
    /// configured size is used as is.
    pub fn chunk_size(&self, configured: usize) -> usize {
        match self.mtu() {
            Some(mtu) => configured.min(usize::from(mtu.saturating_sub(ATT_OVERHEAD))).max(1),
            None => configured,
        }
    }
}
