//! Per-connection lifecycle: read, authenticate, normalize, persist.
//!
//! Nothing here can take the server down. Transport problems end the one
//! connection they happen on; a bad message is logged and dropped while the
//! connection keeps reading. The station never gets an answer either way.

use crate::auth::Authenticator;
use crate::config::Framing;
use crate::error::{AuthError, FrameError, IngestError};
use crate::frame::{Frame, FrameReader};
use crate::health::IngestStats;
use crate::log_writer::LogWriter;
use crate::models::{CloseReason, Connection, Liveness};
use crate::normalize::Normalizer;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};

/// Authenticator -> Normalizer -> LogWriter, shared by every connection
#[derive(Debug)]
pub struct Pipeline {
    authenticator: Authenticator,
    normalizer: Normalizer,
    writer: LogWriter,
}

impl Pipeline {
    pub fn new(authenticator: Authenticator, normalizer: Normalizer, writer: LogWriter) -> Self {
        Self {
            authenticator,
            normalizer,
            writer,
        }
    }

    pub fn writer(&self) -> &LogWriter {
        &self.writer
    }

    /// Runs one raw message through the whole chain. Blocking (file I/O).
    pub fn process(&self, raw: &str) -> Result<(), IngestError> {
        let report = self.authenticator.verify(raw)?;
        let report = self.normalizer.normalize(report)?;
        self.writer.append(&report)?;
        Ok(())
    }
}

/// Socket-level settings applied to every accepted connection
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub framing: Framing,
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub keepalive: Option<Duration>,
}

#[derive(Clone)]
pub struct ConnectionHandler {
    pipeline: Arc<Pipeline>,
    settings: HandlerSettings,
    stats: IngestStats,
}

impl ConnectionHandler {
    pub fn new(pipeline: Arc<Pipeline>, settings: HandlerSettings, stats: IngestStats) -> Self {
        Self {
            pipeline,
            settings,
            stats,
        }
    }

    /// Serves one station until it disconnects or the socket fails.
    pub async fn run(&self, stream: TcpStream, peer: SocketAddr) -> CloseReason {
        let mut conn = Connection::new(peer, self.settings.read_timeout);
        let span = info_span!("conn", id = %conn.id, %peer);
        self.serve(&mut conn, stream).instrument(span).await
    }

    async fn serve(&self, conn: &mut Connection, stream: TcpStream) -> CloseReason {
        info!("connection established");
        self.stats.connection_opened(conn.id, conn.peer);

        if let Some(idle) = self.settings.keepalive {
            match enable_keepalive(&stream, idle) {
                Ok(()) => conn.keep_alive = true,
                Err(e) => warn!("could not enable TCP keep-alive: {e}"),
            }
        }

        let mut reader = FrameReader::new(
            stream,
            self.settings.framing,
            self.settings.buffer_size,
            conn.idle_timeout,
        );

        let reason = loop {
            match reader.next_frame().await {
                Ok(Frame::Message(raw)) => self.dispatch(conn, raw).await,
                Ok(Frame::Idle) => {
                    debug!("no data for {:?}, still waiting", conn.idle_timeout);
                    self.stats.record_idle();
                }
                Ok(Frame::Closed) => {
                    info!("connection closed by peer");
                    break CloseReason::Clean;
                }
                Err(e) if !e.is_fatal() => {
                    warn!("dropping message: {e}");
                    self.stats.record_malformed();
                }
                Err(e) => {
                    conn.liveness = Liveness::Closing;
                    warn!("closing connection: {e}");
                    break match e {
                        FrameError::Decode(_) => CloseReason::Decode,
                        _ => CloseReason::Transport,
                    };
                }
            }
        };

        conn.liveness = Liveness::Closed;
        self.stats.connection_closed(&conn.id);
        reason
    }

    /// Processes one message on the blocking pool and waits for it, so
    /// messages of a connection are persisted in arrival order.
    async fn dispatch(&self, conn: &Connection, raw: String) {
        let pipeline = self.pipeline.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let res = pipeline.process(&raw);
            (res, raw)
        })
        .await;

        match outcome {
            Ok((Ok(()), _)) => {
                self.stats.record_persisted(&conn.id);
                debug!("report persisted");
            }
            Ok((Err(IngestError::Auth(e)), raw)) => {
                if matches!(e, AuthError::Malformed(_) | AuthError::NotAnObject) {
                    self.stats.record_malformed();
                    warn!("invalid JSON ({e}): {}", raw.trim_end());
                } else {
                    self.stats.record_rejected();
                    warn!("invalid report ({e}): {}", raw.trim_end());
                }
            }
            Ok((Err(e), _)) => {
                self.stats.record_persist_failure();
                warn!(path = %self.pipeline.writer().path().display(), "report lost: {e}");
            }
            Err(join) => {
                self.stats.record_persist_failure();
                warn!("report lost: {}", IngestError::from(join));
            }
        }
    }
}

fn enable_keepalive(stream: &TcpStream, idle: Duration) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(idle);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
