//! Talk to a single BLE peripheral by exchanging string values.
//!
//! The peripheral exposes one characteristic that supports write with
//! response, read, and notify. Values travel as base64 text. This crate scans
//! for the peripheral, connects, resolves the characteristic, and keeps the
//! last value it reported up to date.
//!
//! ## Usage
//!
//! Here is an example on how to find a named device, switch it on, and
//! follow the state it reports back:
//!
//! ```rust,no_run
//! use blexchange::{Client, Error, ScanConfig, SessionConfig};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     pretty_env_logger::init();
//!
//!     let mut client = Client::btleplug(SessionConfig::default()).await?;
//!     client.authorize().await;
//!
//!     // Scan for five seconds, listing only devices that advertise a name
//!     let mut devices = client.scan(ScanConfig::default().require_name()).await?;
//!     let device = devices.next().await.unwrap()?;
//!
//!     client.connect(&device).await?;
//!     client.write("on").await?;
//!
//!     println!("State: {:?}", client.read().await?);
//!
//!     client.disconnect().await
//! }
//!```

#![warn(clippy::all, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub use btle::{BtleLink, BtleTransport};
pub use client::Client;
pub use device::PeripheralHandle;
pub use error::{Error, Result};
pub use monitor::Subscription;
pub use permission::{
    Access, Capability, NoPrompt, PermissionGate, PermissionProvider, PermissionStatus, Platform,
};
pub use registry::DeviceRegistry;
pub use scanner::{ScanConfig, ScanStream, Scanner, DEFAULT_SCAN_WINDOW};
pub use session::{ReadOutcome, SessionConfig, SessionManager, SessionState};
pub use transport::{CharacteristicRef, Link, ServiceInfo, Transport};

mod btle;
mod client;
mod device;
mod error;
mod monitor;
mod permission;
mod registry;
mod scanner;
mod session;

pub mod codec;
pub mod common;
pub mod transport;
