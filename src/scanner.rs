use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{Stream, StreamExt};
use stream_cancel::{Trigger, Valved};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::registry::DeviceRegistry;
use crate::transport::{AdvertisementStream, Transport};
use crate::{Error, PeripheralHandle, Result};

/// How long a scan runs unless configured otherwise.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_millis(5000);

/// Devices found by one scan. Ends when the scan stops; a scan failure is
/// yielded as the last item.
pub type ScanStream = Pin<Box<dyn Stream<Item = Result<PeripheralHandle>> + Send>>;

type DeviceFilter = Box<dyn Fn(&PeripheralHandle) -> bool + Send + Sync>;

pub struct ScanConfig {
    /// Every filter has to accept a device for it to be listed.
    filters: Vec<DeviceFilter>,
    /// Maximum results before the scan is stopped.
    max_results: Option<usize>,
    /// The scan is stopped when timeout duration is reached.
    timeout: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            max_results: None,
            timeout: Some(DEFAULT_SCAN_WINDOW),
        }
    }
}

impl ScanConfig {
    /// Filter scanned devices with an arbitrary predicate
    pub fn filter(
        mut self,
        func: impl Fn(&PeripheralHandle) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filters.push(Box::new(func));
        self
    }

    /// Filter scanned devices based on the device name. Devices without a
    /// name never pass.
    pub fn filter_by_name(self, func: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter(move |device| device.name().is_some_and(|name| func(name)))
    }

    /// Require that the scanned devices have a name
    pub fn require_name(self) -> Self {
        self.filter_by_name(|name| !name.is_empty())
    }

    /// Only list devices advertising exactly this name
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.filter_by_name(move |n| n == name)
    }

    /// Stop the scan after given number of matches
    pub fn stop_after_matches(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Stop the scan after the first match
    pub fn stop_after_first_match(self) -> Self {
        self.stop_after_matches(1)
    }

    /// Stop the scan after given duration
    pub fn stop_after_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep scanning until stopped explicitly
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn accepts(&self, device: &PeripheralHandle) -> bool {
        self.filters.iter().all(|filter| filter(device))
    }
}

struct ScanHandle {
    stopper: Trigger,
    task: JoinHandle<Result<()>>,
}

/// Time-boxed discovery of peripherals.
pub struct Scanner<T: Transport> {
    transport: Arc<T>,
    registry: Arc<RwLock<DeviceRegistry>>,
    scan: Option<ScanHandle>,
}

impl<T: Transport> Scanner<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            registry: Arc::new(RwLock::new(DeviceRegistry::new())),
            scan: None,
        }
    }

    /// Start scanning for ble devices.
    ///
    /// A running scan is stopped and the device list cleared first. The
    /// returned stream yields every newly listed device.
    pub async fn start(&mut self, config: ScanConfig) -> Result<ScanStream> {
        if let Err(e) = self.stop().await {
            log::warn!("Previous scan ended with an error: {}", e);
        }

        self.clear();

        log::info!("Starting the scan");

        let advertisements = self.transport.start_scan().await.map_err(into_scan_error)?;
        let (stopper, advertisements) = Valved::new(advertisements);
        let (sender, receiver) = mpsc::unbounded_channel();

        let ctx = ScanContext {
            result_count: 0,
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            config,
            sender,
        };

        let task = tokio::spawn(ctx.listen(advertisements));

        self.scan = Some(ScanHandle { stopper, task });

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    /// Stop scanning for ble devices.
    ///
    /// Safe to call at any time; stopping a scan that already ended does
    /// nothing. Returns the error the transport reported while stopping.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(scan) = self.scan.take() else {
            log::info!("Scanner is already stopped");
            return Ok(());
        };

        scan.stopper.cancel();

        match scan.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Scan(e.to_string())),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan
            .as_ref()
            .is_some_and(|scan| !scan.task.is_finished())
    }

    /// Devices listed so far, in the order they were first seen.
    pub fn devices(&self) -> Vec<PeripheralHandle> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn device(&self, id: &str) -> Option<PeripheralHandle> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn clear(&self) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

struct ScanContext<T> {
    /// Number of matching devices found so far
    result_count: usize,
    transport: Arc<T>,
    registry: Arc<RwLock<DeviceRegistry>>,
    /// Filters and stop conditions for the scan
    config: ScanConfig,
    /// Channel for sending found devices to the client
    sender: UnboundedSender<Result<PeripheralHandle>>,
}

impl<T: Transport> ScanContext<T> {
    async fn listen(mut self, mut advertisements: Valved<AdvertisementStream>) -> Result<()> {
        let deadline = self.config.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, advertisements.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        log::info!("Scan window elapsed.");
                        break;
                    }
                },
                None => advertisements.next().await,
            };

            match next {
                Some(Ok(device)) => {
                    self.on_advertisement(device);

                    let max_result_reached = self
                        .config
                        .max_results
                        .is_some_and(|max_results| self.result_count >= max_results);

                    if max_result_reached {
                        log::info!("Scanner stop condition reached.");
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Scan failed: {}", e);
                    self.sender.send(Err(into_scan_error(e))).ok();
                    break;
                }
                None => break,
            }
        }

        let result = self.transport.stop_scan().await.map_err(into_scan_error);

        if let Err(Error::Scan(reason)) = &result {
            log::warn!("Could not stop the scan: {}", reason);
            self.sender.send(Err(Error::Scan(reason.clone()))).ok();
        }

        log::info!("Scanner was stopped.");

        result
    }

    fn on_advertisement(&mut self, device: PeripheralHandle) {
        log::trace!("Advertisement: {:?}", device);

        if !self.config.accepts(&device) {
            return;
        }

        let added = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.clone());

        if added {
            log::info!("Found device: {}", device);
            self.result_count += 1;
            // The caller may have dropped the stream; the registry still gets the device.
            self.sender.send(Ok(device)).ok();
        }
    }
}

fn into_scan_error(e: Error) -> Error {
    match e {
        Error::Scan(_) => e,
        e => Error::Scan(e.to_string()),
    }
}
