//! One-time radio authorization.
//!
//! Android asks the user for runtime permissions before an app may scan;
//! which ones depends on the API level. Other platforms either grant at
//! install time or have no consent step, so the gate passes straight through.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{Error, Result};

/// A runtime permission needed for scanning or connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    BluetoothScan,
    BluetoothConnect,
    /// Legacy bluetooth permission (Android 6 to 11)
    Bluetooth,
    /// Legacy bluetooth admin permission (Android 6 to 11)
    BluetoothAdmin,
    FineLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Denied, and the platform will no longer prompt for it.
    NeverAskAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android { api_level: u32 },
    Ios,
    Desktop,
}

impl Platform {
    /// Capabilities that have to be requested at runtime before scanning.
    pub fn required_capabilities(&self) -> Vec<Capability> {
        match *self {
            Platform::Android { api_level } if api_level >= 31 => vec![
                Capability::BluetoothScan,
                Capability::BluetoothConnect,
                Capability::FineLocation,
            ],
            Platform::Android { api_level } if api_level >= 23 => vec![
                Capability::Bluetooth,
                Capability::BluetoothAdmin,
                Capability::FineLocation,
            ],
            _ => Vec::new(),
        }
    }
}

/// Platform hook that prompts for permissions.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request(
        &self,
        capabilities: &[Capability],
    ) -> Result<HashMap<Capability, PermissionStatus>>;
}

/// Provider for stacks without a runtime consent step.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

#[async_trait]
impl PermissionProvider for NoPrompt {
    async fn request(
        &self,
        capabilities: &[Capability],
    ) -> Result<HashMap<Capability, PermissionStatus>> {
        Ok(capabilities
            .iter()
            .map(|capability| (*capability, PermissionStatus::Granted))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
}

impl Access {
    pub fn is_granted(self) -> bool {
        self == Access::Granted
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Access::Granted => Ok(()),
            Access::Denied => Err(Error::PermissionDenied),
        }
    }
}

/// Asks for the radio permissions once and remembers the answer.
///
/// A denial is not fatal: a scan may still be attempted, it will just find
/// nothing or fail in the platform layer.
pub struct PermissionGate<P> {
    platform: Platform,
    provider: P,
    decision: Option<Access>,
}

impl<P: PermissionProvider> PermissionGate<P> {
    pub fn new(platform: Platform, provider: P) -> Self {
        Self {
            platform,
            provider,
            decision: None,
        }
    }

    /// Request the capabilities this platform needs.
    ///
    /// Only the first answered call prompts; later calls return the
    /// remembered decision until [`PermissionGate::refresh`] is called. If
    /// the provider itself fails, access is denied for this call only and the
    /// next call prompts again.
    pub async fn request_access(&mut self) -> Access {
        if let Some(decision) = self.decision {
            return decision;
        }

        match self.ask().await {
            Ok(decision) => {
                self.decision = Some(decision);
                decision
            }
            Err(e) => {
                log::error!("Permission request failed: {}", e);
                Access::Denied
            }
        }
    }

    /// Forget the remembered decision, so the next request prompts again.
    pub fn refresh(&mut self) {
        self.decision = None;
    }

    pub fn decision(&self) -> Option<Access> {
        self.decision
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    async fn ask(&self) -> Result<Access> {
        let capabilities = self.platform.required_capabilities();
        if capabilities.is_empty() {
            return Ok(Access::Granted);
        }

        let statuses = self.provider.request(&capabilities).await?;

        let denied = capabilities
            .iter()
            .filter(|capability| statuses.get(*capability) != Some(&PermissionStatus::Granted))
            .collect::<Vec<_>>();

        if denied.is_empty() {
            log::debug!("All bluetooth permissions granted");
            Ok(Access::Granted)
        } else {
            log::warn!("Some permissions were denied: {:?}", denied);
            Ok(Access::Denied)
        }
    }
}
