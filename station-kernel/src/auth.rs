//! Payload authentication for station reports.
//!
//! Stations sign a narrow slice of the raw text, not the parsed document:
//! the `{"lux1":<value>}` field as it appears at the start of the `data`
//! object. The digest is HMAC-SHA256 keyed with the pre-shared secret and
//! travels hex-encoded under `meta.hmac`.
//!
//! The canonicalization is string-based and brittle. It breaks when the
//! marker field is missing, renamed, written with whitespace (`{ "lux1"`),
//! or when its value holds a comma or a nested object. Deployed firmware
//! depends on the exact framing, so it is kept as is; changing it needs a
//! protocol version bump on both sides.

use crate::error::AuthError;
use crate::models::Report;
use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use std::sync::LazyLock;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_MARKER: &str = "lux1";

/// `data` object assigned after a `"data":` key, greedy to the last brace.
static DATA_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)"data"\s*:\s*(\{.*\})"#).expect("static regex"));

/// Extracts the fragment the station signed from the raw message text.
///
/// Step one captures the `data` object from the raw text. Step two finds the
/// first `{"<marker>"` inside it, takes the text up to the next `}`, keeps
/// only the marker's own field and closes the brace again. For
/// `{"lux1":123,"temp":22}` this yields `{"lux1":123}`.
pub fn signed_fragment(raw: &str, marker: &str) -> Option<String> {
    let captured = DATA_OBJECT.captures(raw)?.get(1)?.as_str();

    let needle = format!("{{\"{marker}\"");
    let start = captured.find(&needle)?;
    let tail = &captured[start..];
    let close = tail.find('}')?;

    let object = &tail[..close];
    let field_end = object.find(',').unwrap_or(object.len());
    Some(format!("{}}}", &object[..field_end]))
}

/// Verifies station digests with the process-wide secret.
#[derive(Clone)]
pub struct Authenticator {
    key: Vec<u8>,
    marker: String,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(secret: impl Into<Vec<u8>>, marker: impl Into<String>) -> Self {
        Self {
            key: secret.into(),
            marker: marker.into(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC takes keys of any length, so this cannot fail
        <HmacSha256 as Mac>::new_from_slice(&self.key).unwrap_or_else(|_| unreachable!())
    }

    /// Lowercase hex HMAC-SHA256 of `fragment`, as the firmware computes it.
    pub fn sign(&self, fragment: &str) -> String {
        let mut mac = self.mac();
        mac.update(fragment.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a raw message and returns the parsed report when it is authentic.
    ///
    /// Fails closed on every problem; never panics on hostile input.
    pub fn verify(&self, raw: &str) -> Result<Report, AuthError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let serde_json::Value::Object(fields) = value else {
            return Err(AuthError::NotAnObject);
        };
        let report = Report::from_map(fields);

        let received = report.digest().ok_or(AuthError::MissingDigest)?;
        let fragment =
            signed_fragment(raw, &self.marker).ok_or(AuthError::NoSignedFragment)?;
        let received = hex::decode(received)?;

        let mut mac = self.mac();
        mac.update(fragment.as_bytes());
        mac.verify_slice(&received)
            .map_err(|_| AuthError::DigestMismatch)?;

        Ok(report)
    }

    pub fn is_authentic(&self, raw: &str) -> bool {
        self.verify(raw).is_ok()
    }
}
