//! The seam between this crate and the radio stack.
//!
//! [`BtleTransport`](crate::BtleTransport) implements these traits on top of
//! btleplug. Everything above this module only talks to the traits, so a
//! session can be driven by any stack that can scan, connect, and exchange
//! characteristic values.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use crate::{PeripheralHandle, Result};

/// Advertisements observed while scanning. An `Err` item ends the scan.
pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Result<PeripheralHandle>> + Send>>;

/// Raw notification frames for one characteristic. An `Err` item ends the
/// subscription.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// A resolved characteristic: the service it lives in and its own UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// A discovered GATT service and the characteristics it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: Link;

    /// Begin scanning. Advertisements keep flowing until [`Transport::stop_scan`].
    async fn start_scan(&self) -> Result<AdvertisementStream>;

    /// Stop scanning. Stopping an idle radio is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a connection to a previously advertised peripheral.
    async fn connect(&self, id: &str) -> Result<Self::Link>;
}

/// An open connection to one peripheral.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Enumerate services and their characteristics.
    async fn discover(&self) -> Result<Vec<ServiceInfo>>;

    /// Read the current value. `None` means the peripheral returned no payload.
    async fn read(&self, target: &CharacteristicRef) -> Result<Option<Vec<u8>>>;

    /// Write with response; resolves once the peripheral acknowledged.
    async fn write(&self, target: &CharacteristicRef, data: &[u8]) -> Result<()>;

    async fn subscribe(&self, target: &CharacteristicRef) -> Result<NotificationStream>;

    async fn unsubscribe(&self, target: &CharacteristicRef) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Resolves once the link is lost, for whatever reason.
    async fn disconnected(&self);
}
