use std::sync::Arc;

use futures::StreamExt;
use stream_cancel::{Trigger, Valved};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::NotificationStream;
use crate::{codec, Error, Result, SessionState};

/// A live notification subscription on the session's characteristic.
///
/// Every notification is decoded and replaces the session's last observed
/// value. Nothing is queued: a consumer that looks at the value less often
/// than the peripheral notifies only sees the latest one.
pub struct Subscription {
    stopper: Trigger,
    task: JoinHandle<Result<()>>,
}

impl Subscription {
    pub(crate) fn spawn<F>(
        notifications: NotificationStream,
        value: Arc<watch::Sender<Option<String>>>,
        state: Arc<watch::Sender<SessionState>>,
        mut on_update: F,
    ) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        let (stopper, mut notifications) = Valved::new(notifications);

        let task = tokio::spawn(async move {
            let mut result = Ok(());

            while let Some(frame) = notifications.next().await {
                let decoded = frame
                    .map_err(into_monitor_error)
                    .and_then(|frame| codec::decode_bytes(&frame));

                match decoded {
                    Ok(decoded) => {
                        log::trace!("Notification: {:?}", decoded);
                        value.send_replace(Some(decoded.clone()));
                        on_update(decoded.as_str());
                    }
                    Err(e) => {
                        log::warn!("Notification subscription ended: {}", e);
                        result = Err(e);
                        break;
                    }
                }
            }

            state.send_if_modified(|state| {
                let notifying = *state == SessionState::Notifying;
                if notifying {
                    *state = SessionState::Ready;
                }
                notifying
            });

            result
        });

        Self { stopper, task }
    }

    /// Whether the subscription ended on its own (stream closed or failed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the subscription.
    ///
    /// Once this returns, `on_update` is never called again. Returns the error
    /// that ended the subscription if it had already failed.
    pub async fn cancel(self) -> Result<()> {
        self.stopper.cancel();

        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Monitor(e.to_string())),
        }
    }
}

pub(crate) fn into_monitor_error(e: Error) -> Error {
    match e {
        Error::Monitor(_) => e,
        e => Error::Monitor(e.to_string()),
    }
}
