//! In-memory transport for driving scans and sessions without a radio.
//!
//! ```ignore
//! let (transport, radio) = FakeTransport::new();
//! let mut scanner = Scanner::new(Arc::new(transport));
//! let devices = scanner.start(ScanConfig::default()).await?;
//! radio.advertise("A", Some("X"));
//! ```

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blexchange::codec;
use blexchange::transport::{
    AdvertisementStream, CharacteristicRef, Link, NotificationStream, ServiceInfo, Transport,
};
use blexchange::{Error, PeripheralHandle, Result};
use btleplug::api::bleuuid::uuid_from_u16;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// A transport call, in the order the fake saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(String),
    Discover,
    Read,
    Write(Vec<u8>),
    /// The peripheral acknowledged the preceding write.
    WriteAcked,
    Subscribe,
    Unsubscribe,
    Disconnect,
}

#[derive(Default)]
struct Radio {
    calls: Vec<Call>,
    advertisements: Option<mpsc::UnboundedSender<Result<PeripheralHandle>>>,
    notifications: Option<mpsc::UnboundedSender<Result<Vec<u8>>>>,
    services: Vec<ServiceInfo>,
    read_value: Option<Vec<u8>>,
    connect_error: Option<String>,
    write_error: Option<String>,
    subscribe_error: Option<String>,
    hang_reads: bool,
    hang_writes: bool,
}

struct Shared {
    radio: Mutex<Radio>,
    lost: watch::Sender<bool>,
}

pub struct FakeTransport {
    shared: Arc<Shared>,
}

/// Test-side handle to the fake radio.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl FakeTransport {
    pub fn new() -> (FakeTransport, Controller) {
        let (lost, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            radio: Mutex::new(Radio::default()),
            lost,
        });

        (
            FakeTransport {
                shared: shared.clone(),
            },
            Controller { shared },
        )
    }
}

impl Shared {
    fn record(&self, call: Call) {
        self.radio.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Link = FakeLink;

    async fn start_scan(&self) -> Result<AdvertisementStream> {
        self.shared.record(Call::StartScan);

        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.radio.lock().unwrap().advertisements = Some(sender);

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.shared.record(Call::StopScan);
        self.shared.radio.lock().unwrap().advertisements = None;
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<FakeLink> {
        self.shared.record(Call::Connect(id.to_string()));

        let connect_error = self.shared.radio.lock().unwrap().connect_error.clone();
        if let Some(e) = connect_error {
            return Err(Error::Connect(e));
        }

        self.shared.lost.send_replace(false);

        Ok(FakeLink {
            shared: self.shared.clone(),
        })
    }
}

pub struct FakeLink {
    shared: Arc<Shared>,
}

#[async_trait]
impl Link for FakeLink {
    async fn discover(&self) -> Result<Vec<ServiceInfo>> {
        self.shared.record(Call::Discover);
        Ok(self.shared.radio.lock().unwrap().services.clone())
    }

    async fn read(&self, _target: &CharacteristicRef) -> Result<Option<Vec<u8>>> {
        self.shared.record(Call::Read);

        let (hang, value) = {
            let radio = self.shared.radio.lock().unwrap();
            (radio.hang_reads, radio.read_value.clone())
        };

        if hang {
            futures::future::pending::<()>().await;
        }

        Ok(value)
    }

    async fn write(&self, _target: &CharacteristicRef, data: &[u8]) -> Result<()> {
        self.shared.record(Call::Write(data.to_vec()));

        let (hang, write_error) = {
            let radio = self.shared.radio.lock().unwrap();
            (radio.hang_writes, radio.write_error.clone())
        };

        if let Some(e) = write_error {
            return Err(Error::Write(e));
        }

        if hang {
            futures::future::pending::<()>().await;
        }

        // The acknowledgement arrives later than the request.
        tokio::task::yield_now().await;
        self.shared.record(Call::WriteAcked);

        Ok(())
    }

    async fn subscribe(&self, _target: &CharacteristicRef) -> Result<NotificationStream> {
        self.shared.record(Call::Subscribe);

        let subscribe_error = self.shared.radio.lock().unwrap().subscribe_error.clone();
        if let Some(e) = subscribe_error {
            return Err(Error::Monitor(e));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.radio.lock().unwrap().notifications = Some(sender);

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn unsubscribe(&self, _target: &CharacteristicRef) -> Result<()> {
        // The sender is kept so tests can push notifications after cancelling.
        self.shared.record(Call::Unsubscribe);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.record(Call::Disconnect);
        self.shared.lost.send_replace(true);
        Ok(())
    }

    async fn disconnected(&self) {
        let mut lost = self.shared.lost.subscribe();
        let _ = lost.wait_for(|lost| *lost).await;
    }
}

impl Controller {
    /// Deliver an advertisement to the running scan.
    pub fn advertise(&self, id: &str, name: Option<&str>) {
        let radio = self.shared.radio.lock().unwrap();
        let sender = radio.advertisements.as_ref().expect("no scan running");
        sender
            .send(Ok(PeripheralHandle::new(id, name.map(str::to_string))))
            .ok();
    }

    pub fn fail_scan(&self, reason: &str) {
        let radio = self.shared.radio.lock().unwrap();
        let sender = radio.advertisements.as_ref().expect("no scan running");
        sender.send(Err(Error::Scan(reason.to_string()))).ok();
    }

    /// Push a notification carrying `value` base64-encoded. Returns whether
    /// anyone was still listening.
    pub fn notify(&self, value: &str) -> bool {
        self.notify_raw(codec::encode(value).into_bytes())
    }

    pub fn notify_raw(&self, frame: Vec<u8>) -> bool {
        let radio = self.shared.radio.lock().unwrap();
        radio
            .notifications
            .as_ref()
            .is_some_and(|sender| sender.send(Ok(frame)).is_ok())
    }

    pub fn fail_notifications(&self, reason: &str) {
        let radio = self.shared.radio.lock().unwrap();
        if let Some(sender) = radio.notifications.as_ref() {
            sender.send(Err(Error::Monitor(reason.to_string()))).ok();
        }
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self) {
        self.shared.lost.send_replace(true);
    }

    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        self.shared.radio.lock().unwrap().services = services;
    }

    /// Value returned by reads, as the base64 text of `value`. `None` makes
    /// reads return no payload.
    pub fn set_read(&self, value: Option<&str>) {
        self.shared.radio.lock().unwrap().read_value =
            value.map(|value| codec::encode(value).into_bytes());
    }

    pub fn set_read_raw(&self, frame: Option<Vec<u8>>) {
        self.shared.radio.lock().unwrap().read_value = frame;
    }

    pub fn fail_connect(&self, reason: Option<&str>) {
        self.shared.radio.lock().unwrap().connect_error = reason.map(str::to_string);
    }

    pub fn fail_writes(&self, reason: Option<&str>) {
        self.shared.radio.lock().unwrap().write_error = reason.map(str::to_string);
    }

    pub fn fail_subscribe(&self, reason: Option<&str>) {
        self.shared.radio.lock().unwrap().subscribe_error = reason.map(str::to_string);
    }

    pub fn hang_reads(&self, hang: bool) {
        self.shared.radio.lock().unwrap().hang_reads = hang;
    }

    /// Writes are sent but never acknowledged.
    pub fn hang_writes(&self, hang: bool) {
        self.shared.radio.lock().unwrap().hang_writes = hang;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.radio.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.shared.radio.lock().unwrap().calls.clear();
    }
}

pub fn service(uuid: Uuid, characteristics: &[Uuid]) -> ServiceInfo {
    ServiceInfo {
        uuid,
        characteristics: characteristics.to_vec(),
    }
}

/// A peripheral exposing the player state characteristic next to a device
/// information service.
pub fn player_services() -> Vec<ServiceInfo> {
    vec![
        service(
            uuid_from_u16(0x180A),
            &[uuid_from_u16(0x2A29), uuid_from_u16(0x2A24)],
        ),
        service(
            uuid_from_u16(0x1800),
            &[
                uuid_from_u16(0x2A00),
                blexchange::common::characteristics::PLAYER_STATE,
            ],
        ),
    ]
}

pub fn handle(id: &str, name: Option<&str>) -> PeripheralHandle {
    PeripheralHandle::new(id, name.map(str::to_string))
}

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}
