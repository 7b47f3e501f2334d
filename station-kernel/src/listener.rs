use crate::auth::Authenticator;
use crate::config::KernelConfig;
use crate::error::ServerError;
use crate::handler::{ConnectionHandler, HandlerSettings, Pipeline};
use crate::health::IngestStats;
use crate::log_writer::LogWriter;
use crate::normalize::Normalizer;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

const LISTEN_BACKLOG: i32 = 128;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Binds with `SO_REUSEADDR` so a restart does not trip over `TIME_WAIT`.
pub fn bind_reuse(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };

    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Accept loop plus everything a connection task needs
pub struct IngestServer {
    listener: TcpListener,
    handler: ConnectionHandler,
    slots: Arc<Semaphore>,
    stats: IngestStats,
    stats_interval: Option<Duration>,
}

impl IngestServer {
    /// Builds the pipeline from `cfg` and binds the listening socket.
    ///
    /// Must be called inside a tokio runtime.
    pub fn bind(cfg: &KernelConfig) -> Result<Self, ServerError> {
        cfg.validate()?;

        let ip: IpAddr = cfg
            .bind_addr
            .parse()
            .map_err(|_| ServerError::Address(cfg.bind_addr.clone()))?;
        let addr = SocketAddr::new(ip, cfg.port);
        let listener =
            bind_reuse(addr, LISTEN_BACKLOG).map_err(|source| ServerError::Bind { addr, source })?;

        let writer = LogWriter::open(&cfg.output_file, cfg.sync_writes)?;
        let pipeline = Pipeline::new(
            Authenticator::new(cfg.secret_key.as_bytes(), cfg.signed_marker.clone()),
            Normalizer::new(cfg.utc_offset()?),
            writer,
        );

        let stats = IngestStats::new();
        let handler = ConnectionHandler::new(
            Arc::new(pipeline),
            HandlerSettings {
                framing: cfg.framing,
                buffer_size: cfg.buffer_size,
                read_timeout: cfg.read_timeout(),
                keepalive: cfg.keepalive(),
            },
            stats.clone(),
        );

        Ok(Self {
            listener,
            handler,
            slots: Arc::new(Semaphore::new(cfg.max_connections)),
            stats,
            stats_interval: (cfg.stats_interval_secs > 0)
                .then(|| Duration::from_secs(cfg.stats_interval_secs)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats.clone()
    }

    /// Accepts forever; one task per connection, at most `max_connections` at once.
    pub async fn run(self) -> Result<(), ServerError> {
        if let Some(period) = self.stats_interval {
            self.stats.spawn_stats_reporter(period);
        }

        loop {
            // only fails once the semaphore is closed, which never happens
            let Ok(slot) = self.slots.clone().acquire_owned().await else {
                return Ok(());
            };

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        let reason = handler.run(stream, peer).await;
                        drop(slot);
                        debug!(%peer, ?reason, "connection task finished");
                    });
                }
                Err(e) => {
                    drop(slot);
                    self.stats.record_accept_error();
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for IngestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("free_slots", &self.slots.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn config(dir: &TempDir) -> KernelConfig {
        KernelConfig {
            bind_addr: "127.0.0.1".into(),
            port: 0,
            output_file: dir.path().join("data.txt"),
            secret_key: "listener-secret".into(),
            read_timeout_secs: 1,
            sync_writes: false,
            stats_interval_secs: 0,
            ..KernelConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_reuse_allows_rebind() {
        let first = bind_reuse("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = first.local_addr().unwrap();
        drop(first);
        let again = bind_reuse(addr, 16).unwrap();
        assert_eq!(again.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.bind_addr = "not-an-ip".into();
        assert!(matches!(IngestServer::bind(&cfg), Err(ServerError::Address(_))));
    }

    #[tokio::test]
    async fn test_bind_requires_secret() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.secret_key.clear();
        assert!(matches!(IngestServer::bind(&cfg), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_slot_is_released_after_clean_close() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.max_connections = 1;
        let server = IngestServer::bind(&cfg).unwrap();
        let addr = server.local_addr().unwrap();
        let stats = server.stats();
        tokio::spawn(server.run());

        // with a single slot, the second client is only served after the first leaves
        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"not json").await.unwrap();
        first.shutdown().await.unwrap();
        drop(first);

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"also not json").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while stats.snapshot().malformed_messages < 2 {
            assert!(tokio::time::Instant::now() < deadline, "second client never served");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stats.snapshot().connections_accepted, 2);
    }
}
