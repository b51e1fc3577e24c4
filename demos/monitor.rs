//! This example connects to the "MyBLESim" iOS peripheral simulator and
//! prints every value it notifies on its first data characteristic.

use blexchange::common::{characteristics::BLE_SIM_VALUE, services::BLE_SIM_DATA};
use blexchange::{Client, Error, ScanConfig, SessionConfig};
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let config = SessionConfig::new(BLE_SIM_VALUE).in_service(BLE_SIM_DATA);
    let mut client = Client::btleplug(config).await?;

    let mut device_stream = client.scan(ScanConfig::default().require_name()).await?;
    let device = device_stream.next().await.expect("No device found")?;

    client.connect(&device).await?;

    let mut values = client.session().watch_value();

    while values.changed().await.is_ok() {
        if let Some(value) = values.borrow_and_update().as_deref() {
            println!("Data received: {}", value);
        }
    }

    Ok(())
}
