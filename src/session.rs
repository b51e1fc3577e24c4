use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{characteristics, parse_uuid};
use crate::monitor::{into_monitor_error, Subscription};
use crate::transport::{CharacteristicRef, Link, ServiceInfo, Transport};
use crate::{codec, Error, PeripheralHandle, Result};

/// Lifecycle of the connection to the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection has been attempted yet, or the last attempt failed.
    Idle,
    Connecting,
    Discovering,
    /// Connected, and the target characteristic has been resolved.
    Ready,
    /// Ready, with a live notification subscription.
    Notifying,
    Disconnected,
}

impl SessionState {
    /// Whether reads, writes and subscriptions are allowed.
    pub fn is_ready(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Notifying)
    }
}

/// Result of a characteristic read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Value(String),
    /// The peripheral answered without a payload. The last observed value is
    /// left as it was.
    NoData,
}

impl ReadOutcome {
    pub fn value(&self) -> Option<&str> {
        match self {
            ReadOutcome::Value(value) => Some(value),
            ReadOutcome::NoData => None,
        }
    }
}

/// Which characteristic a session talks to.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Restrict the search to this service. Any service by default.
    service: Option<Uuid>,
    characteristic: Uuid,
    /// Subscribe to notifications as soon as the session is ready.
    auto_monitor: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(characteristics::PLAYER_STATE)
    }
}

impl SessionConfig {
    pub fn new(characteristic: Uuid) -> Self {
        Self {
            service: None,
            characteristic,
            auto_monitor: true,
        }
    }

    /// Build a config from UUID strings, in full or short form and any case.
    pub fn from_strs(service: Option<&str>, characteristic: &str) -> Result<Self> {
        let config = Self::new(parse_uuid(characteristic)?);

        match service {
            Some(service) => Ok(config.in_service(parse_uuid(service)?)),
            None => Ok(config),
        }
    }

    /// Only accept the characteristic inside the given service
    pub fn in_service(mut self, service: Uuid) -> Self {
        self.service = Some(service);
        self
    }

    /// Whether to subscribe to notifications right after connecting
    pub fn auto_monitor(mut self, enabled: bool) -> Self {
        self.auto_monitor = enabled;
        self
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    pub fn service(&self) -> Option<Uuid> {
        self.service
    }

    /// First characteristic matching the target, walking services in order.
    pub(crate) fn resolve(&self, services: &[ServiceInfo]) -> Option<CharacteristicRef> {
        services
            .iter()
            .filter(|service| self.service.map_or(true, |uuid| uuid == service.uuid))
            .find_map(|service| {
                service
                    .characteristics
                    .iter()
                    .find(|uuid| **uuid == self.characteristic)
                    .map(|uuid| CharacteristicRef {
                        service: service.uuid,
                        characteristic: *uuid,
                    })
            })
    }
}

struct Session<L> {
    peripheral: PeripheralHandle,
    link: Arc<L>,
    characteristic: CharacteristicRef,
    subscription: Option<Subscription>,
    watcher: LinkWatcher,
}

impl<L> Session<L> {
    fn is_live(&self) -> bool {
        !self.watcher.is_lost()
    }
}

/// Moves the session to `Disconnected` as soon as the link drops.
struct LinkWatcher {
    lost: Arc<AtomicBool>,
    /// Set once the session is closed on purpose; the watcher then stays quiet.
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LinkWatcher {
    fn spawn<L: Link>(
        link: Arc<L>,
        peripheral: PeripheralHandle,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let lost = lost.clone();
            let closed = closed.clone();

            async move {
                link.disconnected().await;

                state.send_if_modified(|state| {
                    if closed.load(Ordering::SeqCst) {
                        return false;
                    }

                    log::warn!("Lost the link to {}", peripheral);
                    lost.store(true, Ordering::SeqCst);

                    let changed = *state != SessionState::Disconnected;
                    *state = SessionState::Disconnected;
                    changed
                });
            }
        });

        Self { lost, closed, task }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for LinkWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the one connection to the peripheral and everything exchanged over it.
///
/// Connecting again replaces the previous session, so at most one connection
/// is open at a time.
pub struct SessionManager<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    session: Option<Session<T::Link>>,
    state: Arc<watch::Sender<SessionState>>,
    value: Arc<watch::Sender<Option<String>>>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (value, _) = watch::channel(None);

        Self {
            transport,
            config,
            session: None,
            state: Arc::new(state),
            value: Arc::new(value),
        }
    }

    /// Connect to a peripheral and resolve the target characteristic.
    ///
    /// Any existing session is disconnected first. If the characteristic is
    /// not found the new connection is closed again and
    /// [`Error::CharacteristicNotFound`] is returned.
    ///
    /// With `auto_monitor` on, a failed subscription is returned as
    /// [`Error::Monitor`] while the session stays connected and `Ready`.
    pub async fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<()> {
        if let Err(e) = self.disconnect().await {
            log::warn!("Could not cleanly close the previous session: {}", e);
        }

        self.value.send_replace(None);
        self.set_state(SessionState::Connecting);

        log::info!("Connecting to {}", peripheral);

        let link = match self.transport.connect(peripheral.id()).await {
            Ok(link) => link,
            Err(e) => {
                log::warn!("Could not connect to {}: {}", peripheral, e);
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        self.set_state(SessionState::Discovering);

        let characteristic = match link.discover().await {
            Ok(services) => self.config.resolve(&services),
            Err(e) => {
                log::warn!("Service discovery on {} failed: {}", peripheral, e);
                close(&link).await;
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        let Some(characteristic) = characteristic else {
            log::warn!(
                "{} has no characteristic {}",
                peripheral,
                self.config.characteristic
            );
            close(&link).await;
            self.set_state(SessionState::Disconnected);
            return Err(Error::CharacteristicNotFound {
                characteristic: self.config.characteristic,
            });
        };

        log::info!(
            "Connected to {}, using characteristic {} of service {}",
            peripheral,
            characteristic.characteristic,
            characteristic.service
        );

        self.set_state(SessionState::Ready);

        let link = Arc::new(link);
        let watcher = LinkWatcher::spawn(link.clone(), peripheral.clone(), self.state.clone());

        self.session = Some(Session {
            peripheral: peripheral.clone(),
            link,
            characteristic,
            subscription: None,
            watcher,
        });

        if self.config.auto_monitor {
            if let Err(e) = self.monitor().await {
                log::warn!("Could not subscribe to notifications: {}", e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Encode `value` and write it with response. Not retried on failure.
    pub async fn write(&mut self, value: &str) -> Result<()> {
        self.reap_lost().await;

        let session = self.ready_session()?;
        let frame = codec::encode(value);

        log::debug!("Writing {:?} as {}", value, frame);

        let result = until_lost(
            session.link.as_ref(),
            session.link.write(&session.characteristic, frame.as_bytes()),
        )
        .await;

        if let Err(Error::Disconnected) = result {
            self.teardown().await;
        }

        result
    }

    /// Read and decode the current value of the characteristic.
    ///
    /// A payload that is not valid base64 text fails as [`Error::Read`].
    pub async fn read(&mut self) -> Result<ReadOutcome> {
        self.reap_lost().await;

        let session = self.ready_session()?;
        let result = until_lost(
            session.link.as_ref(),
            session.link.read(&session.characteristic),
        )
        .await;

        match result {
            Ok(Some(frame)) => {
                let value = codec::decode_bytes(&frame)
                    .map_err(|e| Error::Read(format!("undecodable value: {}", e)))?;
                log::debug!("Read {:?}", value);
                self.value.send_replace(Some(value.clone()));
                Ok(ReadOutcome::Value(value))
            }
            Ok(None) => {
                log::debug!("Read returned no data");
                Ok(ReadOutcome::NoData)
            }
            Err(Error::Disconnected) => {
                self.teardown().await;
                Err(Error::Disconnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Subscribe to notifications, replacing any existing subscription.
    pub async fn monitor(&mut self) -> Result<()> {
        self.monitor_with(|_| {}).await
    }

    /// Like [`SessionManager::monitor`], also calling `on_update` with every
    /// decoded notification until the subscription is cancelled.
    pub async fn monitor_with<F>(&mut self, on_update: F) -> Result<()>
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.reap_lost().await;

        let state = self.state();
        let session = match self.session.as_mut() {
            Some(session) if state.is_ready() => session,
            _ => return Err(Error::NotReady(state)),
        };

        if let Some(previous) = session.subscription.take() {
            if let Err(e) = previous.cancel().await {
                log::debug!("Previous subscription had ended: {}", e);
            }
        }

        let notifications = session
            .link
            .subscribe(&session.characteristic)
            .await
            .map_err(into_monitor_error)?;

        self.state.send_if_modified(|state| {
            let ready = state.is_ready();
            if ready {
                *state = SessionState::Notifying;
            }
            ready
        });
        session.subscription = Some(Subscription::spawn(
            notifications,
            self.value.clone(),
            self.state.clone(),
            on_update,
        ));

        log::debug!("Subscribed to {}", session.characteristic.characteristic);

        Ok(())
    }

    /// Cancel the notification subscription, if any.
    ///
    /// Returns the error that ended the subscription if it had failed.
    pub async fn unmonitor(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(subscription) = session.subscription.take() else {
            return Ok(());
        };

        let result = subscription.cancel().await;

        if let Err(e) = session.link.unsubscribe(&session.characteristic).await {
            log::debug!("Unsubscribe failed: {}", e);
        }

        result
    }

    /// Close the session. Does nothing if there is none.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        log::info!("Disconnecting from {}", session.peripheral);

        session.watcher.close();

        if let Some(subscription) = session.subscription.take() {
            if let Err(e) = subscription.cancel().await {
                log::debug!("Subscription had ended: {}", e);
            }
        }

        let result = match session.link.disconnect().await {
            Err(e) if !session.is_live() => {
                log::debug!("Disconnecting a lost link failed: {}", e);
                Ok(())
            }
            result => result,
        };
        self.set_state(SessionState::Disconnected);

        result
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Last value read or notified during the current session.
    pub fn last_value(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    /// Receiver that always holds the latest observed value.
    pub fn watch_value(&self) -> watch::Receiver<Option<String>> {
        self.value.subscribe()
    }

    /// The connected peripheral. `None` once the link was lost.
    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.live_session().map(|session| &session.peripheral)
    }

    pub fn characteristic(&self) -> Option<CharacteristicRef> {
        self.live_session().map(|session| session.characteristic)
    }

    pub fn is_monitoring(&self) -> bool {
        self.live_session()
            .and_then(|session| session.subscription.as_ref())
            .is_some_and(|subscription| !subscription.is_finished())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn live_session(&self) -> Option<&Session<T::Link>> {
        self.session.as_ref().filter(|session| session.is_live())
    }

    /// Release a session whose link dropped while nothing was running.
    async fn reap_lost(&mut self) {
        if self.session.is_some() && self.live_session().is_none() {
            self.teardown().await;
        }
    }

    fn ready_session(&self) -> Result<&Session<T::Link>> {
        let state = self.state();
        ensure_ready(state)?;
        self.session.as_ref().ok_or(Error::NotReady(state))
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.disconnect().await {
            log::debug!("Disconnect after losing the link failed: {}", e);
        }
    }

    fn set_state(&self, state: SessionState) {
        log::trace!("Session state: {:?}", state);
        self.state.send_replace(state);
    }
}

fn ensure_ready(state: SessionState) -> Result<()> {
    if state.is_ready() {
        Ok(())
    } else {
        Err(Error::NotReady(state))
    }
}

/// Run `op`, failing with [`Error::Disconnected`] if the link drops first.
async fn until_lost<L: Link, R>(link: &L, op: impl Future<Output = Result<R>>) -> Result<R> {
    tokio::select! {
        biased;
        _ = link.disconnected() => Err(Error::Disconnected),
        result = op => result,
    }
}

async fn close<L: Link>(link: &L) {
    if let Err(e) = link.disconnect().await {
        log::debug!("Disconnect failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::bleuuid::uuid_from_u16;

    fn service(uuid: u16, characteristics: &[u16]) -> ServiceInfo {
        ServiceInfo {
            uuid: uuid_from_u16(uuid),
            characteristics: characteristics.iter().copied().map(uuid_from_u16).collect(),
        }
    }

    #[test]
    fn only_ready_states_allow_exchange() {
        for state in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Discovering,
            SessionState::Disconnected,
        ] {
            assert!(matches!(ensure_ready(state), Err(Error::NotReady(s)) if s == state));
        }

        assert!(ensure_ready(SessionState::Ready).is_ok());
        assert!(ensure_ready(SessionState::Notifying).is_ok());
    }

    #[test]
    fn first_matching_characteristic_wins() {
        let services = [
            service(0x180A, &[0x2A29, 0x2A24]),
            service(0x9800, &[0x9801, 0x9802]),
            service(0x9900, &[0x9801]),
        ];

        let found = SessionConfig::new(uuid_from_u16(0x9801))
            .resolve(&services)
            .unwrap();

        assert_eq!(found.service, uuid_from_u16(0x9800));
        assert_eq!(found.characteristic, uuid_from_u16(0x9801));
    }

    #[test]
    fn service_restriction_is_honoured() {
        let services = [service(0x9800, &[0x9801]), service(0x9900, &[0x9801])];

        let found = SessionConfig::new(uuid_from_u16(0x9801))
            .in_service(uuid_from_u16(0x9900))
            .resolve(&services)
            .unwrap();
        assert_eq!(found.service, uuid_from_u16(0x9900));

        let missing = SessionConfig::new(uuid_from_u16(0x9801))
            .in_service(uuid_from_u16(0xFFFF))
            .resolve(&services);
        assert!(missing.is_none());
    }

    #[test]
    fn config_from_mixed_case_strings() {
        let config = SessionConfig::from_strs(None, "00002a3d-0000-1000-8000-00805F9B34FB").unwrap();
        assert_eq!(config.characteristic(), characteristics::PLAYER_STATE);
        assert_eq!(config.service(), None);

        let config = SessionConfig::from_strs(Some("9800"), "9801").unwrap();
        assert_eq!(config.service(), Some(uuid_from_u16(0x9800)));
        assert_eq!(config.characteristic(), uuid_from_u16(0x9801));

        assert!(SessionConfig::from_strs(Some("zz"), "9801").is_err());
    }
}
