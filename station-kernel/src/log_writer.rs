//! Append-only JSON-lines output shared by every connection.
//!
//! Each record gets its own open/write/flush/close cycle; no handle is kept
//! between writes. The whole cycle runs under one process-wide lock, so
//! lines from concurrent connections never interleave.

use crate::error::PersistError;
use crate::models::Report;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    /// Also `fsync` the data after each append
    sync: bool,
    lock: Mutex<()>,
}

impl LogWriter {
    /// Prepares the target; creates missing parent directories.
    pub fn open<P: Into<PathBuf>>(path: P, sync: bool) -> Result<Self, PersistError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            sync,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `report` as one compact JSON line. Blocking.
    pub fn append(&self, report: &Report) -> Result<(), PersistError> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');

        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        if self.sync {
            file.sync_data()?;
        }
        Ok(())
    }
}
