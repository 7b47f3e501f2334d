use crate::error::NormalizeError;
use crate::models::{Report, DIGEST_FIELD};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Stamps and scrubs authenticated reports before they are persisted.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    offset: UtcOffset,
}

impl Normalizer {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn normalize(&self, report: Report) -> Result<Report, NormalizeError> {
        self.normalize_at(report, OffsetDateTime::now_utc())
    }

    /// Drops `meta.hmac` and adds `received_at` when the station did not send one.
    ///
    /// A device-supplied `received_at` is left untouched, whatever its shape.
    pub fn normalize_at(
        &self,
        mut report: Report,
        now: OffsetDateTime,
    ) -> Result<Report, NormalizeError> {
        if let Some(meta) = report.meta_mut() {
            meta.remove(DIGEST_FIELD);
        }
        if !report.has_received_at() {
            report.set_received_at(receipt_timestamp(now, self.offset)?);
        }
        Ok(report)
    }
}

/// `2026-10-18T09:41-03:00`: ISO-8601, minute precision, fixed offset.
pub fn receipt_timestamp(now: OffsetDateTime, offset: UtcOffset) -> Result<String, NormalizeError> {
    let fmt = format_description!(
        "[year]-[month]-[day]T[hour]:[minute][offset_hour sign:mandatory]:[offset_minute]"
    );
    Ok(now.to_offset(offset).format(fmt)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    fn report(raw: &str) -> Report {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_receipt_timestamp_format() {
        let now = datetime!(2026-10-18 12:41:59 UTC);
        assert_eq!(
            receipt_timestamp(now, offset!(-3)).unwrap(),
            "2026-10-18T09:41-03:00"
        );
        assert_eq!(
            receipt_timestamp(now, offset!(+5:30)).unwrap(),
            "2026-10-18T18:11+05:30"
        );
    }

    #[test]
    fn test_strips_digest_and_stamps() {
        let n = Normalizer::new(offset!(-3));
        let out = n
            .normalize_at(
                report(r#"{"data":{"lux1":1},"meta":{"hmac":"ab","fw":"2.1"}}"#),
                datetime!(2026-01-02 03:04 UTC),
            )
            .unwrap();
        assert!(out.meta().unwrap().get("hmac").is_none());
        assert_eq!(out.meta().unwrap()["fw"], "2.1");
        assert_eq!(out.received_at().unwrap(), "2026-01-02T00:04-03:00");
    }

    #[test]
    fn test_device_timestamp_wins() {
        let n = Normalizer::new(offset!(-3));
        let out = n
            .normalize(report(
                r#"{"data":{"lux1":1},"meta":{"hmac":"ab"},"received_at":"2025-05-05T05:05-03:00"}"#,
            ))
            .unwrap();
        assert_eq!(out.received_at().unwrap(), "2025-05-05T05:05-03:00");
    }

    #[test]
    fn test_idempotent() {
        let n = Normalizer::new(offset!(-3));
        let once = n
            .normalize_at(
                report(r#"{"data":{"lux1":1},"meta":{"hmac":"ab"}}"#),
                datetime!(2026-01-02 03:04 UTC),
            )
            .unwrap();
        let twice = n
            .normalize_at(once.clone(), datetime!(2030-12-31 23:59 UTC))
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_report_without_meta_still_stamped() {
        let n = Normalizer::new(UtcOffset::UTC);
        let out = n
            .normalize_at(report(r#"{"data":{}}"#), datetime!(2026-01-02 03:04 UTC))
            .unwrap();
        assert_eq!(out.received_at().unwrap(), "2026-01-02T03:04+00:00");
    }
}
