//! This example lists the named BLE devices found during a five second scan.

use blexchange::{Error, ScanConfig, Scanner};
use futures::StreamExt;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    // Create a new BLE device scanner on the first adapter
    let transport = blexchange::BtleTransport::new(0).await?;
    let mut scanner = Scanner::new(Arc::new(transport));

    // List devices as they are discovered, until the scan window closes
    let mut device_stream = scanner.start(ScanConfig::default().require_name()).await?;

    while let Some(device) = device_stream.next().await {
        match device {
            Ok(device) => println!("Device discovered: {}", device),
            Err(e) => println!("Scan failed: {}", e),
        }
    }

    println!("{} devices found", scanner.devices().len());

    Ok(())
}
