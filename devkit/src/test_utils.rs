/*!
Test harness for the station kernel

Runs a real `IngestServer` on an ephemeral loopback port with its output
file in a temp directory, and offers:
- builders and simulated stations wired to the harness secret
- polling helpers that wait for persisted lines or counters
- typed access to the persisted records
*/

use crate::device_stub::SimulatedStation;
use crate::report_builder::{ReportBuilder, SensorReadings};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use station_kernel::error::ServerError;
use station_kernel::health::{IngestHealth, IngestStats};
use station_kernel::{Framing, IngestServer, KernelConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const HARNESS_SECRET: &str = "harness-secret";

/// One line of the output file
#[derive(Debug, Clone, Deserialize)]
pub struct StoredReport {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
    pub received_at: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

pub struct TestHarness {
    addr: SocketAddr,
    output: PathBuf,
    stats: IngestStats,
    server: JoinHandle<Result<(), ServerError>>,
    _dir: TempDir,
}

impl TestHarness {
    /// Starts a kernel with test-friendly defaults and the given framing.
    pub async fn start(framing: Framing) -> Result<Self> {
        Self::with_config(|cfg| cfg.framing = framing).await
    }

    /// Starts a kernel after letting `tweak` adjust the config.
    pub async fn with_config<F>(tweak: F) -> Result<Self>
    where
        F: FnOnce(&mut KernelConfig),
    {
        env_logger::try_init().ok();

        let dir = TempDir::new()?;
        let mut cfg = KernelConfig {
            bind_addr: "127.0.0.1".into(),
            port: 0,
            output_file: dir.path().join("data.txt"),
            secret_key: HARNESS_SECRET.into(),
            read_timeout_secs: 1,
            sync_writes: false,
            stats_interval_secs: 0,
            ..KernelConfig::default()
        };
        tweak(&mut cfg);

        let server = IngestServer::bind(&cfg)?;
        let addr = server.local_addr()?;
        let stats = server.stats();
        log::info!("kernel under test on {addr} ({:?} framing)", cfg.framing);

        Ok(Self {
            addr,
            output: cfg.output_file.clone(),
            stats,
            server: tokio::spawn(server.run()),
            _dir: dir,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Builder signing with the harness secret
    pub fn report(&self, readings: SensorReadings) -> ReportBuilder {
        ReportBuilder::new(HARNESS_SECRET, readings)
    }

    pub fn station(&self) -> SimulatedStation {
        SimulatedStation::new(self.addr)
    }

    pub fn stats(&self) -> IngestHealth {
        self.stats.snapshot()
    }

    /// Raw lines of the output file; empty before the first write
    pub fn read_lines(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(self.output_path()) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_reports(&self) -> Result<Vec<StoredReport>> {
        self.read_lines()?
            .iter()
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    /// Polls the output file until it holds at least `count` lines.
    pub async fn wait_for_lines(&self, count: usize, timeout_ms: u64) -> Result<Vec<String>> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let lines = self.read_lines()?;
            if lines.len() >= count {
                return Ok(lines);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let lines = self.read_lines()?;
        anyhow::bail!("timeout waiting for {count} lines, got {}", lines.len());
    }

    /// Polls the kernel counters until `done` holds.
    pub async fn wait_for<F>(&self, done: F, timeout_ms: u64) -> Result<IngestHealth>
    where
        F: Fn(&IngestHealth) -> bool,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let health = self.stats();
            if done(&health) {
                return Ok(health);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        anyhow::bail!("timeout waiting for kernel state, last: {:?}", self.stats());
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.server.abort();
    }
}
