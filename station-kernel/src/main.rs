/**
 * STATION KERNEL - ingestion server entry point
 *
 * ROLE: load config (.env, station.yaml, STATION_* env), install logging,
 * bind the listener and hand control to the accept loop.
 */

use anyhow::Context;
use station_kernel::config::{config_path, load_config};
use station_kernel::logging::init_tracing;
use station_kernel::IngestServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let path = config_path();
    let cfg = load_config(&path)
        .with_context(|| format!("failed to load configuration ({})", path.display()))?;

    init_tracing(&cfg.log_level);
    if path.exists() {
        info!(path = %path.display(), "configuration loaded");
    } else {
        info!(path = %path.display(), "no config file, using defaults and environment");
    }

    let server = IngestServer::bind(&cfg).context("failed to start ingest server")?;
    let addr = server.local_addr()?;
    info!(
        %addr,
        output = %cfg.output_file.display(),
        framing = ?cfg.framing,
        max_connections = cfg.max_connections,
        "station kernel listening"
    );

    server.run().await?;
    Ok(())
}
