use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Some of the requested radio permissions were not granted.
    #[error("bluetooth permissions were denied")]
    PermissionDenied,

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("characteristic {characteristic} not found on the peripheral")]
    CharacteristicNotFound { characteristic: Uuid },

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("notification subscription ended: {0}")]
    Monitor(String),

    /// The operation requires a Ready or Notifying session.
    #[error("session is not ready (state: {0:?})")]
    NotReady(SessionState),

    #[error("peripheral disconnected")]
    Disconnected,

    #[error("could not decode value: {0}")]
    Decode(String),

    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    #[error("no bluetooth adapter found")]
    AdapterNotFound,

    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),
}
