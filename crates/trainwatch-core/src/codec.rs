//! Sample codec
//!
//! Turns one inbound text frame into either a keep-alive, a
//! [`MetricSample`], or a [`DecodeError`]. Decoding never panics and never
//! touches history; the caller decides what to do with the result.
//!
//! Wire format is a JSON object with optional fields `training_id`,
//! `timestamp`, `epoch`, `batch`, `total_batches`, `loss`, `accuracy`,
//! `learning_rate` and `custom_metrics`. Unknown fields are ignored.

use crate::error::DecodeError;
use crate::sample::{MetricSample, SampleBuilder};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Bare keep-alive frame sent by the server
pub const KEEP_ALIVE: &str = "ping";

/// Bare tokens some JSON encoders emit for non-finite floats
const NON_FINITE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Successful decode result
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Keep-alive token, carries no data
    KeepAlive,
    /// A metric sample
    Sample(MetricSample),
}

/// Stateless frame decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleCodec;

impl SampleCodec {
    /// Create new codec
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decode one text frame
    ///
    /// # Errors
    /// - `DecodeError::Parse` if the frame is not valid JSON
    /// - `DecodeError::Schema` if it is not an object or carries no metric
    pub fn decode(&self, raw: &str) -> Result<Decoded, DecodeError> {
        if raw == KEEP_ALIVE {
            return Ok(Decoded::KeepAlive);
        }

        let text = null_non_finite(raw);
        let value: Value =
            serde_json::from_str(&text).map_err(|e| DecodeError::Parse(e.to_string()))?;

        let Value::Object(fields) = value else {
            return Err(DecodeError::Schema(format!(
                "expected an object, found {}",
                kind(&value)
            )));
        };

        sample_from_fields(&fields).map(Decoded::Sample)
    }
}

fn sample_from_fields(fields: &Map<String, Value>) -> Result<MetricSample, DecodeError> {
    let mut builder = SampleBuilder::default();

    if let Some(id) = fields.get("training_id").and_then(Value::as_str) {
        builder = builder.training_id(id);
    }
    if let Some(at) = fields
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
    {
        builder = builder.timestamp(at);
    }
    if let Some(epoch) = integer(fields, "epoch") {
        builder = builder.epoch(epoch);
    }
    if let Some(batch) = integer(fields, "batch") {
        builder = builder.batch(batch);
    }
    if let Some(total) = integer(fields, "total_batches") {
        builder = builder.total_batches(total);
    }
    if let Some(loss) = number(fields, "loss") {
        builder = builder.loss(loss);
    }
    if let Some(accuracy) = number(fields, "accuracy") {
        builder = builder.accuracy(accuracy);
    }
    if let Some(lr) = number(fields, "learning_rate") {
        builder = builder.learning_rate(lr);
    }
    if let Some(Value::Object(custom)) = fields.get("custom_metrics") {
        for (name, value) in custom {
            // Non-numeric entries such as "100MB" are skipped
            if let Some(value) = value.as_f64() {
                builder = builder.custom_metric(name.clone(), value);
            }
        }
    }

    builder.build()
}

fn number(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64)
}

fn integer(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = fields.get(key)?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    // Accept 3.0 but not 3.5
    let f = value.as_f64()?;
    if !(f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let n = f as i64;
    Some(n)
}

/// Parse RFC 3339, or a naive ISO-8601 date-time taken as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Rewrite bare `NaN`/`Infinity`/`-Infinity` and number literals too large
/// for an `f64` (such as `1e400`) to `null`, leaving string literals alone
fn null_non_finite(raw: &str) -> Cow<'_, str> {
    let bytes = raw.as_bytes();
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        let replaced = if let Some(token) = NON_FINITE_TOKENS
            .iter()
            .find(|t| bytes[i..].starts_with(t.as_bytes()))
        {
            Some(i + token.len())
        } else if b == b'-' || b.is_ascii_digit() {
            let end = i + bytes[i..]
                .iter()
                .take_while(|&&c| {
                    c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'e' | b'E')
                })
                .count();
            if raw[i..end].parse::<f64>().is_ok_and(f64::is_infinite) {
                Some(end)
            } else {
                i = end;
                continue;
            }
        } else {
            None
        };

        match replaced {
            Some(end) => {
                let buf = out.get_or_insert_with(|| String::with_capacity(raw.len()));
                buf.push_str(&raw[copied..i]);
                buf.push_str("null");
                i = end;
                copied = i;
            }
            None => i += 1,
        }
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&raw[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(raw: &str) -> MetricSample {
        match SampleCodec::new().decode(raw) {
            Ok(Decoded::Sample(sample)) => sample,
            other => panic!("expected sample, got {other:?}"),
        }
    }

    #[test]
    fn keep_alive_is_not_a_sample() {
        assert_eq!(SampleCodec::new().decode("ping"), Ok(Decoded::KeepAlive));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = SampleCodec::new().decode("not json {").unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn non_object_is_a_schema_error() {
        let err = SampleCodec::new().decode("[1, 2]").unwrap_err();
        assert!(err.is_schema());
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn payload_without_metrics_is_a_schema_error() {
        let err = SampleCodec::new()
            .decode(r#"{"epoch": 1, "learning_rate": 0.01}"#)
            .unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn full_report_decodes() {
        let s = sample(
            r#"{
                "training_id": "run-7",
                "epoch": 2,
                "batch": 40,
                "total_batches": 100,
                "loss": 0.25,
                "accuracy": 0.91,
                "learning_rate": 0.001,
                "timestamp": "2024-05-01T12:30:05Z",
                "custom_metrics": {"grad_norm": 1.5, "gpu_mem": "100MB"}
            }"#,
        );

        assert_eq!(s.training_id(), Some("run-7"));
        assert_eq!(s.epoch(), Some(2));
        assert_eq!(s.batch(), Some(40));
        assert_eq!(s.total_batches(), Some(100));
        assert_eq!(s.loss(), Some(0.25));
        assert_eq!(s.accuracy(), Some(0.91));
        assert_eq!(s.learning_rate(), Some(0.001));
        assert_eq!(
            s.timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap())
        );
        assert_eq!(s.custom_metrics().len(), 1);
        assert_eq!(s.custom_metrics().get("grad_norm"), Some(&1.5));
    }

    #[test]
    fn naive_and_fractional_timestamps() {
        let naive = sample(r#"{"loss": 1.0, "timestamp": "2024-05-01T12:30:05.123456"}"#);
        assert!(naive.timestamp().is_some());

        let fractional = sample(r#"{"loss": 1.0, "timestamp": "2024-05-01T12:30:05.123456Z"}"#);
        assert!(fractional.timestamp().is_some());

        let junk = sample(r#"{"loss": 1.0, "timestamp": "yesterday"}"#);
        assert_eq!(junk.timestamp(), None);
    }

    #[test]
    fn non_finite_tokens_become_absent() {
        let s = sample(r#"{"loss": NaN, "accuracy": 0.5, "custom_metrics": {"x": -Infinity}}"#);
        assert_eq!(s.loss(), None);
        assert_eq!(s.accuracy(), Some(0.5));
        assert!(s.custom_metrics().is_empty());

        let err = SampleCodec::new().decode(r#"{"loss": Infinity}"#).unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn out_of_range_numbers_become_absent() {
        let s = sample(r#"{"epoch":1,"loss":1e400,"accuracy":0.5}"#);
        assert_eq!(s.loss(), None);
        assert_eq!(s.accuracy(), Some(0.5));
        assert_eq!(s.epoch(), Some(1));

        let s = sample(r#"{"loss":0.5,"custom_metrics":{"g":-1e999,"h":2.5}}"#);
        assert_eq!(s.loss(), Some(0.5));
        assert_eq!(s.custom_metrics().get("g"), None);
        assert_eq!(s.custom_metrics().get("h"), Some(&2.5));

        // Huge but finite stays a number
        let s = sample(r#"{"loss":1e300,"batch":123456789012345678901234567890}"#);
        assert_eq!(s.loss(), Some(1e300));
        assert_eq!(s.batch(), None);

        let err = SampleCodec::new().decode(r#"{"loss":1e400}"#).unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn tokens_inside_strings_are_untouched() {
        let s = sample(r#"{"loss": 0.1, "training_id": "NaN-\"Infinity\""}"#);
        assert_eq!(s.training_id(), Some("NaN-\"Infinity\""));
    }

    #[test]
    fn integral_floats_count_as_ordinals() {
        let s = sample(r#"{"loss": 0.1, "epoch": 3.0, "batch": 2.5}"#);
        assert_eq!(s.epoch(), Some(3));
        assert_eq!(s.batch(), None);
    }

    #[test]
    fn null_rewrite_borrows_when_clean() {
        assert!(matches!(null_non_finite(r#"{"a":1}"#), Cow::Borrowed(_)));
        assert_eq!(null_non_finite("[NaN,1]"), "[null,1]");
        assert_eq!(
            null_non_finite(r#"{"a":-2E+999,"b":"1e400"}"#),
            r#"{"a":null,"b":"1e400"}"#
        );
        assert!(matches!(null_non_finite(r#"{"a":-1.5e3}"#), Cow::Borrowed(_)));
    }
}
