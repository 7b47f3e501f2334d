/*!
Simulated station TCP client

Behaves like the station network driver: one pending-message slot (a newer
message overwrites an undelivered one), reconnect on the next send or flush
after a failure, and no reply expected from the server.
*/

use crate::report_builder::MAX_MESSAGE_LEN;
use anyhow::Result;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub struct SimulatedStation {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    pending: Option<String>,
    sent: u64,
}

impl SimulatedStation {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: None,
            pending: None,
            sent: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Message waiting for a connection, if any
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(self.addr).await?;
            stream.set_nodelay(true)?;
            log::info!("station connected to {}", self.addr);
            self.stream = Some(stream);
        }
        Ok(())
    }

    /// Queues `msg` in the pending slot and tries to deliver it.
    ///
    /// Empty messages and messages of `MAX_MESSAGE_LEN` bytes or more are
    /// refused before touching the slot.
    pub async fn send(&mut self, msg: &str) -> Result<()> {
        if msg.is_empty() || msg.len() >= MAX_MESSAGE_LEN {
            anyhow::bail!("message length {} outside 1..{}", msg.len(), MAX_MESSAGE_LEN);
        }
        if self.pending.replace(msg.to_string()).is_some() {
            log::warn!("pending message overwritten");
        }
        self.flush_pending().await.map(|_| ())
    }

    /// Delivers the pending message. `Ok(false)` when there was nothing to send.
    pub async fn flush_pending(&mut self) -> Result<bool> {
        let Some(msg) = self.pending.clone() else {
            return Ok(false);
        };

        if let Err(e) = self.connect().await {
            log::warn!("reconnect to {} failed: {e}", self.addr);
            return Err(e);
        }
        let Some(stream) = self.stream.as_mut() else {
            anyhow::bail!("no connection to {}", self.addr);
        };

        let written = stream.write_all(msg.as_bytes()).await;
        match written {
            Ok(()) => {
                self.pending = None;
                self.sent += 1;
                log::debug!("sent {} bytes", msg.len());
                Ok(true)
            }
            Err(e) => {
                // keep the message, drop the socket, reconnect next time
                self.stream = None;
                log::warn!("send failed, message kept for retry: {e}");
                Err(e.into())
            }
        }
    }

    /// Half-closes the connection so the server sees a clean end of stream.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            log::info!("station disconnected from {}", self.addr);
        }
        Ok(())
    }
}
