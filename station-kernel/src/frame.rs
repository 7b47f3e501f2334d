//! Cuts the byte stream of one connection into textual messages.
//!
//! Legacy stations have no delimiter protocol: the server assumes one read
//! call carries exactly one complete document (`Framing::Chunk`). A read that
//! holds half a document, or two, fails JSON parsing downstream and the
//! message is dropped. `Framing::Newline` splits on the `\n` the firmware
//! appends and is opt-in.

use crate::config::Framing;
use crate::error::FrameError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Message(String),
    /// Read timeout elapsed with nothing received
    Idle,
    /// Peer closed its side
    Closed,
}

pub struct FrameReader<R> {
    reader: R,
    framing: Framing,
    timeout: Duration,
    buf: Vec<u8>,
    /// Newline framing only: bytes after the last complete line
    pending: Vec<u8>,
    /// Newline framing only: skipping the tail of an oversized line
    discarding: bool,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, framing: Framing, buffer_size: usize, timeout: Duration) -> Self {
        Self {
            reader,
            framing,
            timeout,
            buf: vec![0u8; buffer_size.max(1)],
            pending: Vec::new(),
            discarding: false,
            eof: false,
        }
    }

    pub async fn next_frame(&mut self) -> Result<Frame, FrameError> {
        match self.framing {
            Framing::Chunk => self.next_chunk().await,
            Framing::Newline => self.next_line().await,
        }
    }

    /// Waits up to the idle timeout; `None` means it elapsed.
    async fn read_some(&mut self) -> Result<Option<usize>, FrameError> {
        match tokio::time::timeout(self.timeout, self.reader.read(&mut self.buf)).await {
            Err(_) => Ok(None),
            Ok(res) => Ok(Some(res?)),
        }
    }

    async fn next_chunk(&mut self) -> Result<Frame, FrameError> {
        match self.read_some().await? {
            None => Ok(Frame::Idle),
            Some(0) => Ok(Frame::Closed),
            Some(n) => {
                let text = std::str::from_utf8(&self.buf[..n])?;
                Ok(Frame::Message(text.to_owned()))
            }
        }
    }

    async fn next_line(&mut self) -> Result<Frame, FrameError> {
        let limit = self.buf.len();
        loop {
            if self.discarding {
                self.skip_oversized_tail();
            }
            if let Some(line) = self.take_line()? {
                return Ok(Frame::Message(line));
            }
            if self.eof {
                if self.discarding || self.pending.iter().all(u8::is_ascii_whitespace) {
                    self.pending.clear();
                    return Ok(Frame::Closed);
                }
                // a trailing message without its newline still counts
                let rest = std::mem::take(&mut self.pending);
                if rest.len() > limit {
                    return Err(FrameError::Oversized { limit });
                }
                return Ok(Frame::Message(decode_line(&rest)?));
            }
            if self.pending.len() > limit {
                self.pending.clear();
                self.discarding = true;
                return Err(FrameError::Oversized { limit });
            }

            match self.read_some().await? {
                None => return Ok(Frame::Idle),
                Some(0) => self.eof = true,
                Some(n) => self.pending.extend_from_slice(&self.buf[..n]),
            }
        }
    }

    /// Drops the rest of an oversized line, up to and including its `\n`.
    fn skip_oversized_tail(&mut self) {
        match self.pending.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                self.pending.drain(..=pos);
                self.discarding = false;
            }
            None => self.pending.clear(),
        }
    }

    /// Pops the next non-blank line out of `pending`.
    fn take_line(&mut self) -> Result<Option<String>, FrameError> {
        let limit = self.buf.len();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if pos > limit {
                return Err(FrameError::Oversized { limit });
            }
            let text = decode_line(&line[..pos])?;
            if !text.trim().is_empty() {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }
}

fn decode_line(bytes: &[u8]) -> Result<String, FrameError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(text.trim_end_matches('\r').to_owned())
}
