//! Watch every key under `twitch` and list what is currently stored there
//!
//! Run with `KILOVOLT_PASSWORD=... cargo run --example subscribe_prefix`

use kilovolt_client::{ClientConfig, Session};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ClientConfig::default().maybe_password(std::env::var("KILOVOLT_PASSWORD").ok());
    let session = Session::new(config);
    session.connect().await?;
    info!("Connected to Kilovolt {:?}", session.version());

    session
        .subscribe_prefix("twitch", |key, value| {
            println!("{} changed: {}", key, value);
        })
        .await?;

    let keys = session.list("twitch").await?;
    println!("{} keys under twitch:", keys.len());
    for key in keys {
        println!("  {}", key);
    }

    tokio::signal::ctrl_c().await?;
    session.close().await;
    Ok(())
}
