use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::UtcOffset;

/// How bytes coming off a socket are cut into messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One read call is one message (legacy station behaviour)
    Chunk,
    /// Messages end with `\n`; partial reads are buffered
    Newline,
}

impl std::str::FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chunk" => Ok(Framing::Chunk),
            "newline" | "line" => Ok(Framing::Newline),
            other => Err(format!("unknown framing {other:?}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub bind_addr: String,
    pub port: u16,
    pub output_file: PathBuf,
    pub buffer_size: usize,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub read_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub max_connections: usize,
    pub framing: Framing,
    pub utc_offset_hours: i8,
    pub signed_marker: String,
    pub sync_writes: bool,
    pub stats_interval_secs: u64,
    pub log_level: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 9999,
            output_file: PathBuf::from("data.txt"),
            buffer_size: 4096,
            secret_key: String::new(),
            read_timeout_secs: 30,
            keepalive_secs: 60,
            max_connections: 256,
            framing: Framing::Chunk,
            utc_offset_hours: -3,
            signed_marker: "lux1".into(),
            sync_writes: true,
            stats_interval_secs: 60,
            log_level: "info".into(),
        }
    }
}

impl KernelConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn utc_offset(&self) -> Result<UtcOffset, ConfigError> {
        if !(-23..=23).contains(&self.utc_offset_hours) {
            return Err(ConfigError::InvalidOffset(self.utc_offset_hours));
        }
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0)
            .map_err(|_| ConfigError::InvalidOffset(self.utc_offset_hours))
    }

    /// Parses a YAML document; an empty document yields the defaults.
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Applies `STATION_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STATION_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("STATION_PORT") {
            self.port = parse_env("STATION_PORT", &v)?;
        }
        if let Some(v) = lookup("STATION_OUTPUT_FILE") {
            self.output_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("STATION_BUFFER_SIZE") {
            self.buffer_size = parse_env("STATION_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = lookup("STATION_SECRET_KEY") {
            self.secret_key = v;
        }
        if let Some(v) = lookup("STATION_READ_TIMEOUT_SECS") {
            self.read_timeout_secs = parse_env("STATION_READ_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("STATION_KEEPALIVE_SECS") {
            self.keepalive_secs = parse_env("STATION_KEEPALIVE_SECS", &v)?;
        }
        if let Some(v) = lookup("STATION_MAX_CONNECTIONS") {
            self.max_connections = parse_env("STATION_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("STATION_FRAMING") {
            self.framing = parse_env("STATION_FRAMING", &v)?;
        }
        if let Some(v) = lookup("STATION_UTC_OFFSET_HOURS") {
            self.utc_offset_hours = parse_env("STATION_UTC_OFFSET_HOURS", &v)?;
        }
        if let Some(v) = lookup("STATION_SIGNED_MARKER") {
            self.signed_marker = v;
        }
        if let Some(v) = lookup("STATION_SYNC_WRITES") {
            self.sync_writes = parse_env("STATION_SYNC_WRITES", &v)?;
        }
        if let Some(v) = lookup("STATION_STATS_INTERVAL_SECS") {
            self.stats_interval_secs = parse_env("STATION_STATS_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("STATION_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be > 0".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be > 0".into()));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid("read_timeout_secs must be > 0".into()));
        }
        if self.signed_marker.is_empty() {
            return Err(ConfigError::Invalid("signed_marker cannot be empty".into()));
        }
        self.utc_offset()?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Path of the YAML config: `STATION_CONFIG`, default `station.yaml`
pub fn config_path() -> PathBuf {
    std::env::var("STATION_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("station.yaml"))
}

/// Loads the YAML file at `path` if present, then applies the environment.
pub fn load_config(path: &Path) -> Result<KernelConfig, ConfigError> {
    let mut cfg = if path.exists() {
        KernelConfig::from_yaml(&std::fs::read_to_string(path)?)?
    } else {
        KernelConfig::default()
    };
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
