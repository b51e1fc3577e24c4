use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic as BtleCharacteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use stream_cancel::{Trigger, Valved};
use tokio::sync::watch;

use crate::transport::{
    AdvertisementStream, CharacteristicRef, Link, NotificationStream, ServiceInfo, Transport,
};
use crate::{Error, PeripheralHandle, Result};

/// [`Transport`] backed by the platform's native BLE stack through btleplug.
pub struct BtleTransport {
    _manager: Manager,
    adapter: Adapter,
    /// Platform ids of the peripherals seen so far, keyed by the id we hand out
    known: Arc<Mutex<HashMap<String, PeripheralId>>>,
}

impl BtleTransport {
    /// Use the bluetooth adapter at the given index. The first adapter is `0`.
    pub async fn new(adapter_index: usize) -> Result<Self> {
        let manager = Manager::new().await?;
        let mut adapters = manager.adapters().await?;

        if adapter_index >= adapters.len() {
            return Err(Error::AdapterNotFound);
        }

        let adapter = adapters.swap_remove(adapter_index);

        log::trace!("Using adapter: {:?}", adapter);

        Ok(Self {
            _manager: manager,
            adapter,
            known: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn lookup(&self, id: &str) -> Option<PeripheralId> {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl Transport for BtleTransport {
    type Link = BtleLink;

    async fn start_scan(&self) -> Result<AdvertisementStream> {
        let events = self.adapter.events().await.map_err(scan_error)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(scan_error)?;

        let adapter = self.adapter.clone();
        let known = self.known.clone();

        let advertisements = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let known = known.clone();

            async move {
                let peripheral_id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };

                let peripheral = match adapter.peripheral(&peripheral_id).await {
                    Ok(peripheral) => peripheral,
                    Err(e) => {
                        log::trace!("Advertisement from an unknown peripheral: {:?}", e);
                        return None;
                    }
                };

                let name = peripheral
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .and_then(|props| props.local_name);

                let id = format!("{:?}", peripheral_id);
                known
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id.clone(), peripheral_id);

                Some(Ok(PeripheralHandle::new(id, name)))
            }
        });

        Ok(Box::pin(advertisements))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(scan_error)
    }

    async fn connect(&self, id: &str) -> Result<BtleLink> {
        let peripheral_id = self
            .lookup(id)
            .ok_or_else(|| Error::Connect(format!("unknown peripheral {}", id)))?;

        let peripheral = self
            .adapter
            .peripheral(&peripheral_id)
            .await
            .map_err(connect_error)?;

        // Listen before connecting so a drop right after connecting is not missed.
        let events = self.adapter.events().await.map_err(connect_error)?;
        let (watcher, mut events) = Valved::new(events);
        let (lost_sender, lost) = watch::channel(false);

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        log::debug!("Peripheral {:?} disconnected", id);
                        lost_sender.send_replace(true);
                        break;
                    }
                }
            }
        });

        if !peripheral.is_connected().await.unwrap_or(false) {
            log::debug!("Connecting to device {}", peripheral.address());
            peripheral.connect().await.map_err(connect_error)?;
        }

        Ok(BtleLink {
            peripheral,
            lost,
            _watcher: watcher,
        })
    }
}

/// An open btleplug connection.
pub struct BtleLink {
    peripheral: Peripheral,
    lost: watch::Receiver<bool>,
    _watcher: Trigger,
}

impl BtleLink {
    fn characteristic(&self, target: &CharacteristicRef) -> Result<BtleCharacteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == target.characteristic && c.service_uuid == target.service)
            .ok_or(Error::CharacteristicNotFound {
                characteristic: target.characteristic,
            })
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn discover(&self) -> Result<Vec<ServiceInfo>> {
        let mut services = self.peripheral.services();
        if services.is_empty() {
            log::debug!("Discovering services for {}", self.peripheral.address());
            self.peripheral
                .discover_services()
                .await
                .map_err(connect_error)?;
            services = self.peripheral.services();
        }

        Ok(services
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn read(&self, target: &CharacteristicRef) -> Result<Option<Vec<u8>>> {
        let characteristic = self.characteristic(target)?;
        let value = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(|e| Error::Read(e.to_string()))?;

        Ok(Some(value).filter(|value| !value.is_empty()))
    }

    async fn write(&self, target: &CharacteristicRef, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(target)?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| Error::Write(e.to_string()))
    }

    async fn subscribe(&self, target: &CharacteristicRef) -> Result<NotificationStream> {
        let characteristic = self.characteristic(target)?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(monitor_error)?;

        let stream = self.peripheral.notifications().await.map_err(monitor_error)?;
        let uuid = characteristic.uuid;

        Ok(Box::pin(stream.filter_map(move |n| async move {
            if n.uuid == uuid {
                Some(Ok(n.value))
            } else {
                None
            }
        })))
    }

    async fn unsubscribe(&self, target: &CharacteristicRef) -> Result<()> {
        let characteristic = self.characteristic(target)?;
        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(monitor_error)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn disconnected(&self) {
        let mut lost = self.lost.clone();
        // A closed channel means the event stream is gone, which we treat as lost too.
        let _ = lost.wait_for(|lost| *lost).await;
    }
}

fn scan_error(e: btleplug::Error) -> Error {
    Error::Scan(e.to_string())
}

fn connect_error(e: btleplug::Error) -> Error {
    Error::Connect(e.to_string())
}

fn monitor_error(e: btleplug::Error) -> Error {
    Error::Monitor(e.to_string())
}
