use crate::models::{PeerState, PeersMap};
use crate::state::{new_state, snapshot, Shared};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct IngestHealth {
    pub uptime_seconds: u64,
    pub active_connections: usize,
    pub connections_accepted: u64,
    pub accept_errors: u64,
    pub reports_persisted: u64,
    pub reports_rejected: u64,
    pub malformed_messages: u64,
    pub persist_failures: u64,
    pub idle_timeouts: u64,
    pub memory_usage_mb: f32,
    pub peers: Vec<PeerState>,
}

#[derive(Default)]
struct Counters {
    connections_accepted: AtomicU64,
    accept_errors: AtomicU64,
    reports_persisted: AtomicU64,
    reports_rejected: AtomicU64,
    malformed_messages: AtomicU64,
    persist_failures: AtomicU64,
    idle_timeouts: AtomicU64,
}

/// Process-wide ingest counters plus the registry of live connections
#[derive(Clone)]
pub struct IngestStats {
    start_time: Instant,
    counters: Arc<Counters>,
    peers: Shared<PeersMap>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            peers: new_state(PeersMap::new()),
        }
    }

    pub fn connection_opened(&self, id: Uuid, peer: SocketAddr) {
        self.counters.connections_accepted.fetch_add(1, Ordering::Relaxed);
        let now = OffsetDateTime::now_utc();
        self.peers.lock().insert(
            id,
            PeerState {
                peer,
                connected_at: now,
                last_activity: now,
                reports: 0,
            },
        );
    }

    pub fn connection_closed(&self, id: &Uuid) {
        self.peers.lock().remove(id);
    }

    pub fn record_accept_error(&self) {
        self.counters.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self, id: &Uuid) {
        self.counters.reports_persisted.fetch_add(1, Ordering::Relaxed);
        if let Some(peer) = self.peers.lock().get_mut(id) {
            peer.reports += 1;
            peer.last_activity = OffsetDateTime::now_utc();
        }
    }

    pub fn record_rejected(&self) {
        self.counters.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.counters.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn snapshot(&self) -> IngestHealth {
        let c = &self.counters;
        let mut peers: Vec<PeerState> = snapshot(&self.peers).into_values().collect();
        peers.sort_by_key(|p| p.connected_at);

        IngestHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            active_connections: peers.len(),
            connections_accepted: c.connections_accepted.load(Ordering::Relaxed),
            accept_errors: c.accept_errors.load(Ordering::Relaxed),
            reports_persisted: c.reports_persisted.load(Ordering::Relaxed),
            reports_rejected: c.reports_rejected.load(Ordering::Relaxed),
            malformed_messages: c.malformed_messages.load(Ordering::Relaxed),
            persist_failures: c.persist_failures.load(Ordering::Relaxed),
            idle_timeouts: c.idle_timeouts.load(Ordering::Relaxed),
            memory_usage_mb: get_memory_usage_mb(),
            peers,
        }
    }

    /// Logs a summary line every `period`
    pub fn spawn_stats_reporter(&self, period: Duration) -> task::JoinHandle<()> {
        let stats = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let h = stats.snapshot();
                info!(
                    uptime_s = h.uptime_seconds,
                    active = h.active_connections,
                    accepted = h.connections_accepted,
                    persisted = h.reports_persisted,
                    rejected = h.reports_rejected,
                    malformed = h.malformed_messages,
                    persist_failures = h.persist_failures,
                    rss_mb = h.memory_usage_mb,
                    "ingest stats"
                );
            }
        })
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return (kb as f32) / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
