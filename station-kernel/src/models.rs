use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DATA_FIELD: &str = "data";
pub const META_FIELD: &str = "meta";
pub const DIGEST_FIELD: &str = "hmac";
pub const RECEIVED_AT_FIELD: &str = "received_at";

/// One telemetry record as sent by a station.
///
/// Kept as a raw JSON object: measurements under `data` are free-form and
/// no business validation happens on the server. Field order of the
/// incoming text survives re-serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
    fields: Map<String, Value>,
}

impl Report {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn data(&self) -> Option<&Value> {
        self.fields.get(DATA_FIELD)
    }

    pub fn meta(&self) -> Option<&Map<String, Value>> {
        self.fields.get(META_FIELD).and_then(Value::as_object)
    }

    pub fn meta_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.fields.get_mut(META_FIELD).and_then(Value::as_object_mut)
    }

    /// Digest carried under `meta.hmac`, if it is a string.
    pub fn digest(&self) -> Option<&str> {
        self.meta()?.get(DIGEST_FIELD)?.as_str()
    }

    pub fn received_at(&self) -> Option<&Value> {
        self.fields.get(RECEIVED_AT_FIELD)
    }

    pub fn has_received_at(&self) -> bool {
        self.fields.contains_key(RECEIVED_AT_FIELD)
    }

    pub fn set_received_at(&mut self, stamp: String) {
        self.fields
            .insert(RECEIVED_AT_FIELD.to_string(), Value::String(stamp));
    }
}

/// Liveness of a connection as seen by its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Liveness {
    Active,
    Closing,
    Closed,
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloseReason {
    /// Peer sent EOF
    Clean,
    /// Reset, broken pipe or any other socket error
    Transport,
    /// Bytes were not valid UTF-8
    Decode,
}

/// One transport session with a single station
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub keep_alive: bool,
    pub idle_timeout: Duration,
    pub liveness: Liveness,
}

impl Connection {
    pub fn new(peer: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            keep_alive: false,
            idle_timeout,
            liveness: Liveness::Active,
        }
    }
}

/// Registry entry for a live connection
#[derive(Debug, Clone, Serialize)]
pub struct PeerState {
    pub peer: SocketAddr,
    #[serde(with = "time::serde::rfc3339")]
    pub connected_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    pub reports: u64,
}

pub type PeersMap = HashMap<Uuid, PeerState>;
