/*!
Signed report builder

Produces report lines the way station firmware writes them:
- readings with fixed precision (`%.2f`, currents and power `%.4f`)
- `lux1` first in `data`, no whitespace
- HMAC-SHA256 over `{"lux1":<value>}`, lowercase hex, under `meta.hmac`

Overrides exist for negative tests: a fixed or missing digest, a different
signed scope, a device-side `received_at`.
*/

use anyhow::Result;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

/// Firmware send buffer; a message must be strictly shorter
pub const MAX_MESSAGE_LEN: usize = 512;

/// Lowercase hex HMAC-SHA256, as `crypto.c` on the station computes it.
pub fn sign(secret: &[u8], fragment: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
    mac.update(fragment.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// One sweep of the station sensors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReadings {
    pub lux1: f64,
    pub lux2: f64,
    pub lux3: f64,
    /// pitch, degrees
    pub pt: f64,
    /// roll, degrees
    pub rl: f64,
    /// bus voltage
    pub vb: f64,
    /// shunt voltage
    pub vs: f64,
    pub i: f64,
    pub p: f64,
}

impl SensorReadings {
    /// Plausible readings that drift with `step`
    pub fn synthetic(step: u64) -> Self {
        let t = step as f64;
        let sun = (t / 12.0).sin().abs();
        let lux = 800.0 + 52_000.0 * sun;
        let vb = 12.1 + 1.4 * sun;
        let i = 0.005 + 0.123 * sun;

        Self {
            lux1: lux,
            lux2: lux * 0.97,
            lux3: lux * 1.02,
            pt: 12.0 + 3.0 * (t / 7.0).sin(),
            rl: -1.5 + (t / 5.0).cos(),
            vb,
            vs: 0.0005 + 0.0123 * sun,
            i,
            p: vb * i,
        }
    }

    /// The firmware `data` object
    pub fn to_data_json(&self) -> String {
        format!(
            "{{\"lux1\":{:.2},\"lux2\":{:.2},\"lux3\":{:.2},\"pt\":{:.2},\"rl\":{:.2},\"vb\":{:.2},\"vs\":{:.4},\"i\":{:.4},\"p\":{:.4}}}",
            self.lux1, self.lux2, self.lux3, self.pt, self.rl, self.vb, self.vs, self.i, self.p
        )
    }
}

/// Which text the digest is computed over
#[derive(Debug, Clone, PartialEq)]
pub enum SignedScope {
    /// `{"lux1":<value>}`, what deployed firmware signs
    Marker,
    /// The complete `data` object
    WholeData,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq)]
enum DigestMode {
    Computed,
    Fixed(String),
    Omitted,
}

/// Builds one report line for a station
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    secret: Vec<u8>,
    readings: SensorReadings,
    extra: Vec<(String, Value)>,
    scope: SignedScope,
    digest: DigestMode,
    received_at: Option<String>,
}

impl ReportBuilder {
    pub fn new(secret: impl Into<Vec<u8>>, readings: SensorReadings) -> Self {
        Self {
            secret: secret.into(),
            readings,
            extra: Vec::new(),
            scope: SignedScope::Marker,
            digest: DigestMode::Computed,
            received_at: None,
        }
    }

    /// Appends a field after the sensor readings in `data`
    pub fn extra_field<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.extra.push((key.into(), value));
        self
    }

    pub fn signed_scope(mut self, scope: SignedScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sends `digest` verbatim instead of computing one
    pub fn digest<S: Into<String>>(mut self, digest: S) -> Self {
        self.digest = DigestMode::Fixed(digest.into());
        self
    }

    pub fn without_digest(mut self) -> Self {
        self.digest = DigestMode::Omitted;
        self
    }

    pub fn received_at<S: Into<String>>(mut self, ts: S) -> Self {
        self.received_at = Some(ts.into());
        self
    }

    /// Stamps `received_at` from the local clock, minute precision
    pub fn with_device_clock(self) -> Self {
        let ts = chrono::Local::now().format("%Y-%m-%dT%H:%M%:z").to_string();
        self.received_at(ts)
    }

    pub fn data_json(&self) -> String {
        let mut data = self.readings.to_data_json();
        if !self.extra.is_empty() {
            data.pop();
            for (key, value) in &self.extra {
                data.push_str(&format!(",{}:{}", Value::from(key.as_str()), value));
            }
            data.push('}');
        }
        data
    }

    /// Text the digest covers for the current scope
    pub fn fragment(&self) -> String {
        match &self.scope {
            SignedScope::Marker => format!("{{\"lux1\":{:.2}}}", self.readings.lux1),
            SignedScope::WholeData => self.data_json(),
            SignedScope::Custom(text) => text.clone(),
        }
    }

    pub fn build(&self) -> Result<String> {
        let meta = match &self.digest {
            DigestMode::Computed => {
                format!("{{\"hmac\":\"{}\"}}", sign(&self.secret, &self.fragment())?)
            }
            DigestMode::Fixed(digest) => format!("{{\"hmac\":{}}}", Value::from(digest.as_str())),
            DigestMode::Omitted => "{}".to_string(),
        };

        let mut report = format!("{{\"data\":{},\"meta\":{}", self.data_json(), meta);
        if let Some(ts) = &self.received_at {
            report.push_str(&format!(",\"received_at\":{}", Value::from(ts.as_str())));
        }
        report.push('}');
        Ok(report)
    }

    /// `build()` plus the trailing newline the firmware sends
    pub fn to_line(&self) -> Result<String> {
        let mut line = self.build()?;
        line.push('\n');
        Ok(line)
    }
}
