//! This example switches a player on or off.
//! The device name and "on"/"off" should be given as command line arguments.

use blexchange::{Client, Error, ScanConfig, SessionConfig};
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let name = std::env::args().nth(1).expect("Expected device name");
    let value = std::env::args().nth(2).unwrap_or_else(|| "on".to_string());

    pretty_env_logger::init();

    let mut client = Client::btleplug(SessionConfig::default().auto_monitor(false)).await?;
    client.authorize().await.into_result()?;

    let config = ScanConfig::default()
        .with_name(name)
        .stop_after_first_match();

    let mut device_stream = client.scan(config).await?;

    let device = match device_stream.next().await {
        Some(device) => device?,
        None => {
            println!("Device not found");
            return Ok(());
        }
    };

    client.connect(&device).await?;
    client.write(&value).await?;

    println!("State: {:?}", client.read().await?);

    client.disconnect().await
}
