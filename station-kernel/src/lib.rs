//! Solar station ingestion kernel.
//!
//! Stations open a TCP connection and push JSON reports; each report is
//! checked against an HMAC over its signed fragment, stamped, and appended
//! as one line to a shared output file. Nothing is ever written back to a
//! station.

pub mod auth;
pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod health;
pub mod listener;
pub mod log_writer;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod state;

pub use auth::{signed_fragment, Authenticator};
pub use config::{Framing, KernelConfig};
pub use error::{AuthError, ServerError};
pub use listener::IngestServer;
pub use models::Report;
