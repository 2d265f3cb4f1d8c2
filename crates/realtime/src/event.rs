//! Raw live-channel events and their normalized form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RealtimeError;

/// Event kinds the pipeline understands. Anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ActivityLogged,
    ClockInOut,
}

impl EventKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "activity-logged" => Some(Self::ActivityLogged),
            "clock-in-out" => Some(Self::ClockInOut),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivityLogged => "activity-logged",
            Self::ClockInOut => "clock-in-out",
        }
    }
}

/// An event as received from the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub kind: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    /// Event received now.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self::received(kind, payload, Utc::now())
    }

    pub fn received(kind: impl Into<String>, payload: Value, received_at: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            received_at,
        }
    }
}

/// Uniform per-worker update derived from exactly one raw event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceUpdate {
    pub subject_id: String,
    pub total_hours: f64,
    pub total_entries: u64,
    /// Minutes per entry.
    pub avg_duration: f64,
    pub last_active: DateTime<Utc>,
}

const USER_ID_KEYS: &[&str] = &["userId", "user_id", "workerId"];
const ACTIVITY_DURATION_KEYS: &[&str] = &["duration", "durationMinutes"];
const CLOCK_DURATION_KEYS: &[&str] = &["durationMinutes", "duration_minutes", "duration"];
const TIMESTAMP_KEYS: &[&str] = &["createdAt", "created_at", "timestamp"];

/// Subject id as a string; numeric ids are rendered, anything else is
/// `"unknown"`.
fn subject_id(payload: &Value) -> String {
    USER_ID_KEYS
        .iter()
        .find_map(|k| match payload.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// First numeric field found, accepting numeric strings. Missing or
/// unparseable values are zero.
fn minutes(payload: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|k| match payload.get(*k) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|m| m.is_finite())
        .unwrap_or(0.0)
}

fn timestamp(payload: &Value) -> Option<DateTime<Utc>> {
    TIMESTAMP_KEYS
        .iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

/// Normalize one event. Returns `None` for unknown kinds; never fails for
/// known ones.
pub fn normalize(event: &RawEvent) -> Option<PerformanceUpdate> {
    let kind = EventKind::parse(&event.kind)?;
    let payload = &event.payload;

    let (duration, last_active) = match kind {
        EventKind::ActivityLogged => (
            minutes(payload, ACTIVITY_DURATION_KEYS),
            timestamp(payload).unwrap_or(event.received_at),
        ),
        EventKind::ClockInOut => (minutes(payload, CLOCK_DURATION_KEYS), event.received_at),
    };

    Some(PerformanceUpdate {
        subject_id: subject_id(payload),
        total_hours: duration / 60.0,
        total_entries: 1,
        avg_duration: duration,
        last_active,
    })
}

/// Wire frame: `{"type": "<kind>", "data": {...}, "receivedAt"?: RFC3339}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    received_at: Option<String>,
}

/// Parse a JSON text frame into a [`RawEvent`].
///
/// Only rejects frames that are not JSON objects or lack a string `type`.
/// A missing or malformed `receivedAt` means "now".
pub fn parse_frame(frame: &str) -> Result<RawEvent, RealtimeError> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| RealtimeError::Parse(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(RealtimeError::Parse("frame is not a JSON object".into()));
    }
    let frame: Frame =
        serde_json::from_value(value).map_err(|e| RealtimeError::Parse(e.to_string()))?;

    let received_at = frame
        .received_at
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or_else(Utc::now);
    Ok(RawEvent::received(frame.kind, frame.data, received_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 8, 30, 0).unwrap()
    }

    #[test]
    fn activity_logged_normalizes() {
        let event = RawEvent::received(
            "activity-logged",
            json!({"userId": 7, "duration": 90, "createdAt": "2026-03-14T07:00:00Z"}),
            at(),
        );
        let update = normalize(&event).unwrap();
        assert_eq!(update.subject_id, "7");
        assert_eq!(update.total_hours, 1.5);
        assert_eq!(update.total_entries, 1);
        assert_eq!(update.avg_duration, 90.0);
        assert_eq!(update.last_active, Utc.with_ymd_and_hms(2026, 3, 14, 7, 0, 0).unwrap());
    }

    #[test]
    fn clock_in_out_normalizes() {
        let event = RawEvent::received("clock-in-out", json!({"userId": "w-12", "durationMinutes": 30}), at());
        let update = normalize(&event).unwrap();
        assert_eq!(update.subject_id, "w-12");
        assert_eq!(update.total_hours, 0.5);
        assert_eq!(update.avg_duration, 30.0);
        assert_eq!(update.last_active, at());
    }

    #[test]
    fn missing_fields_default_to_zero_and_receipt_time() {
        let event = RawEvent::received("activity-logged", json!({}), at());
        let update = normalize(&event).unwrap();
        assert_eq!(update.subject_id, "unknown");
        assert_eq!(update.total_hours, 0.0);
        assert_eq!(update.avg_duration, 0.0);
        assert_eq!(update.last_active, at());
    }

    #[test]
    fn non_object_payload_still_normalizes() {
        let event = RawEvent::received("clock-in-out", Value::Null, at());
        assert_eq!(normalize(&event).unwrap().total_hours, 0.0);
    }

    #[test]
    fn numeric_strings_are_accepted_and_garbage_is_zero() {
        let event = RawEvent::received("activity-logged", json!({"userId": 3, "duration": "45"}), at());
        assert_eq!(normalize(&event).unwrap().avg_duration, 45.0);

        let event = RawEvent::received("activity-logged", json!({"userId": 3, "duration": "lots"}), at());
        assert_eq!(normalize(&event).unwrap().avg_duration, 0.0);
    }

    #[test]
    fn bad_created_at_falls_back_to_receipt_time() {
        let event = RawEvent::received(
            "activity-logged",
            json!({"userId": 1, "duration": 10, "createdAt": "yesterday"}),
            at(),
        );
        assert_eq!(normalize(&event).unwrap().last_active, at());
    }

    #[test]
    fn unknown_kind_is_dropped() {
        let event = RawEvent::received("approval-requested", json!({"userId": 1}), at());
        assert!(normalize(&event).is_none());
    }

    #[test]
    fn parse_frame_reads_type_data_and_received_at() {
        let event = parse_frame(
            r#"{"type":"clock-in-out","data":{"userId":4,"durationMinutes":15},"receivedAt":"2026-03-14T08:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, "clock-in-out");
        assert_eq!(event.payload["userId"], 4);
        assert_eq!(event.received_at, at());
    }

    #[test]
    fn parse_frame_without_data_or_timestamp() {
        let before = Utc::now();
        let event = parse_frame(r#"{"type":"activity-logged"}"#).unwrap();
        assert_eq!(event.payload, Value::Null);
        assert!(event.received_at >= before);
    }

    #[test]
    fn parse_frame_rejects_non_objects() {
        assert!(matches!(parse_frame("[1,2]"), Err(RealtimeError::Parse(_))));
        assert!(matches!(parse_frame("not json"), Err(RealtimeError::Parse(_))));
        assert!(matches!(parse_frame(r#"{"data":{}}"#), Err(RealtimeError::Parse(_))));
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [EventKind::ActivityLogged, EventKind::ClockInOut] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
    }
}
