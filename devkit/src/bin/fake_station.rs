use anyhow::{Context, Result};
use log::{info, warn};
use station_devkit::{ReportBuilder, SensorReadings, SimulatedStation};
use std::net::SocketAddr;
use tokio::time::{sleep, Duration};

// ===== Configuration =====
const DEFAULT_ADDR: &str = "127.0.0.1:9999";
const DEFAULT_INTERVAL_SECS: u64 = 2;
/// Retries of the pending slot between two sweeps
const FLUSH_ATTEMPTS: u64 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let addr: SocketAddr = std::env::var("STATION_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("STATION_ADDR must be host:port")?;
    let secret = std::env::var("STATION_SECRET_KEY").context("STATION_SECRET_KEY is required")?;
    let interval: u64 = match std::env::var("STATION_SEND_INTERVAL_SECS") {
        Ok(v) => v.parse().context("STATION_SEND_INTERVAL_SECS must be an integer")?,
        Err(_) => DEFAULT_INTERVAL_SECS,
    };

    info!("🚀 fake station sending to {addr} every {interval}s");
    let mut station = SimulatedStation::new(addr);

    let mut step = 0u64;
    loop {
        let line = ReportBuilder::new(secret.as_bytes(), SensorReadings::synthetic(step)).to_line()?;
        match station.send(&line).await {
            Ok(()) => info!("📤 report {step} sent ({} bytes)", line.len()),
            Err(e) => warn!("⚠️ report {step} pending: {e}"),
        }

        // same cadence as the firmware main loop: short sleeps with flush attempts
        for _ in 0..FLUSH_ATTEMPTS {
            sleep(Duration::from_secs(interval.max(1)) / FLUSH_ATTEMPTS as u32).await;
            if station.pending().is_some() {
                if let Err(e) = station.flush_pending().await {
                    warn!("⚠️ flush failed: {e}");
                }
            }
        }
        step += 1;
    }
}
