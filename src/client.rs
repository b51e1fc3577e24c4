use std::sync::Arc;

use crate::permission::{Access, NoPrompt, PermissionGate, PermissionProvider, Platform};
use crate::scanner::{ScanConfig, ScanStream, Scanner};
use crate::session::{ReadOutcome, SessionConfig, SessionManager, SessionState};
use crate::transport::Transport;
use crate::{BtleTransport, Error, PeripheralHandle, Result};

/// Everything an app needs to talk to its peripheral: permissions, scanning,
/// the device list and the session, over one shared transport.
pub struct Client<T: Transport, P = NoPrompt> {
    gate: PermissionGate<P>,
    scanner: Scanner<T>,
    session: SessionManager<T>,
}

impl Client<BtleTransport, NoPrompt> {
    /// Client on the first bluetooth adapter of this machine.
    pub async fn btleplug(config: SessionConfig) -> Result<Self> {
        let transport = BtleTransport::new(0).await?;
        Ok(Self::new(
            transport,
            PermissionGate::new(Platform::Desktop, NoPrompt),
            config,
        ))
    }
}

impl<T: Transport, P: PermissionProvider> Client<T, P> {
    pub fn new(transport: T, gate: PermissionGate<P>, config: SessionConfig) -> Self {
        let transport = Arc::new(transport);

        Self {
            gate,
            scanner: Scanner::new(transport.clone()),
            session: SessionManager::new(transport, config),
        }
    }

    /// Ask for radio permissions. Denial is logged and returned, never fatal.
    pub async fn authorize(&mut self) -> Access {
        self.gate.request_access().await
    }

    /// Drop the current session and device list, then start a new scan.
    pub async fn scan(&mut self, config: ScanConfig) -> Result<ScanStream> {
        if let Err(e) = self.session.disconnect().await {
            log::warn!("Could not cleanly close the session: {}", e);
        }

        self.scanner.start(config).await
    }

    pub async fn stop_scan(&mut self) -> Result<()> {
        self.scanner.stop().await
    }

    /// Devices found by the latest scan.
    pub fn devices(&self) -> Vec<PeripheralHandle> {
        self.scanner.devices()
    }

    /// Stop scanning and open a session with `device`.
    pub async fn connect(&mut self, device: &PeripheralHandle) -> Result<()> {
        if let Err(e) = self.scanner.stop().await {
            log::warn!("Scan ended with an error: {}", e);
        }

        self.session.connect(device).await
    }

    /// Connect to a listed device by its id.
    pub async fn connect_by_id(&mut self, id: &str) -> Result<()> {
        let device = self
            .scanner
            .device(id)
            .ok_or_else(|| Error::Connect(format!("{} was not found by the last scan", id)))?;

        self.connect(&device).await
    }

    pub async fn write(&mut self, value: &str) -> Result<()> {
        self.session.write(value).await
    }

    pub async fn read(&mut self) -> Result<ReadOutcome> {
        self.session.read().await
    }

    pub async fn monitor(&mut self) -> Result<()> {
        self.session.monitor().await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Stop everything and forget the device list.
    pub async fn reset(&mut self) -> Result<()> {
        if let Err(e) = self.scanner.stop().await {
            log::warn!("Scan ended with an error: {}", e);
        }

        let result = self.session.disconnect().await;
        self.scanner.clear();

        result
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn last_value(&self) -> Option<String> {
        self.session.last_value()
    }

    pub fn connected_device(&self) -> Option<&PeripheralHandle> {
        self.session.peripheral()
    }

    pub fn scanner(&self) -> &Scanner<T> {
        &self.scanner
    }

    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<T> {
        &mut self.session
    }
}
