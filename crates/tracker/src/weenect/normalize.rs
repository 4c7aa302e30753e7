//! Weenect API response normalization
//!
//! Converts Weenect position payloads to domain models.

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};

use super::api::WeenectPosition;
use crate::models::{Position, PositionId, TrackerId};

/// Naive layouts the API uses when it omits an offset
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a Weenect timestamp
///
/// Accepts RFC 3339 and offset-less values, which are taken as UTC.
/// Returns `None` for empty or unparseable input.
pub fn parse_weenect_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Normalize a Weenect position to a domain Position
///
/// The canonical timestamp is the tracker's own clock, falling back to the
/// server receipt time and then the last-message time.
pub fn normalize_position(wire: WeenectPosition, tracker_id: TrackerId) -> Result<Position> {
    if wire.id.is_empty() {
        bail!("position for tracker {tracker_id} has no id");
    }

    let date_tracker = wire.date_tracker.as_deref().and_then(parse_weenect_time);
    let date_server = wire.date_server.as_deref().and_then(parse_weenect_time);
    let last_message = wire.last_message.as_deref().and_then(parse_weenect_time);

    let Some(timestamp) = date_tracker.or(date_server).or(last_message) else {
        bail!("position {} has no usable timestamp", wire.id);
    };

    Ok(Position::builder(PositionId::new(wire.id), tracker_id)
        .timestamp(timestamp)
        .coordinates(wire.latitude, wire.longitude)
        .battery(wire.battery)
        .speed(wire.speed)
        .direction(wire.direction)
        .valid_signal(wire.valid_signal)
        .satellites(wire.satellites)
        .gsm(wire.gsm)
        .kind(wire.kind)
        .last_message(last_message)
        .date_server(date_server)
        .date_tracker(date_tracker)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wire(id: &str) -> WeenectPosition {
        WeenectPosition {
            id: id.to_string(),
            latitude: 59.91,
            longitude: 10.75,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_weenect_time() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 10, 12, 30, 0).unwrap();

        assert_eq!(parse_weenect_time("2024-01-10T12:30:00Z"), Some(expected));
        assert_eq!(parse_weenect_time("2024-01-10T13:30:00+01:00"), Some(expected));
        assert_eq!(parse_weenect_time("2024-01-10T12:30:00"), Some(expected));
        assert_eq!(parse_weenect_time("2024-01-10 12:30:00"), Some(expected));
        assert_eq!(
            parse_weenect_time("2024-01-10T12:30:00.250"),
            Some(expected + chrono::TimeDelta::milliseconds(250))
        );
        assert_eq!(parse_weenect_time(""), None);
        assert_eq!(parse_weenect_time("yesterday"), None);
    }

    #[test]
    fn test_timestamp_prefers_tracker_clock() {
        let mut w = wire("p1");
        w.date_tracker = Some("2024-01-10T12:00:00Z".into());
        w.date_server = Some("2024-01-10T12:00:05Z".into());
        w.last_message = Some("2024-01-10T12:00:09Z".into());

        let pos = normalize_position(w, TrackerId::new(42)).unwrap();
        assert_eq!(pos.timestamp, Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap());
        assert_eq!(pos.tracker_id, TrackerId::new(42));
        assert!(pos.date_server.is_some());
    }

    #[test]
    fn test_timestamp_fallbacks() {
        let mut w = wire("p2");
        w.date_server = Some("2024-01-10T12:00:05Z".into());
        w.last_message = Some("2024-01-10T12:00:09Z".into());
        let pos = normalize_position(w, TrackerId::new(1)).unwrap();
        assert_eq!(pos.timestamp, Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 5).unwrap());

        let mut w = wire("p3");
        w.date_tracker = Some("garbage".into());
        w.last_message = Some("2024-01-10T12:00:09Z".into());
        let pos = normalize_position(w, TrackerId::new(1)).unwrap();
        assert_eq!(pos.timestamp, Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 9).unwrap());
        assert!(pos.date_tracker.is_none());
    }

    #[test]
    fn test_rejects_position_without_time() {
        assert!(normalize_position(wire("p4"), TrackerId::new(1)).is_err());
    }

    #[test]
    fn test_rejects_position_without_id() {
        let mut w = wire("");
        w.date_tracker = Some("2024-01-10T12:00:00Z".into());
        assert!(normalize_position(w, TrackerId::new(1)).is_err());
    }

    #[test]
    fn test_copies_telemetry_fields() {
        let mut w = wire("p5");
        w.date_tracker = Some("2024-01-10T12:00:00Z".into());
        w.battery = Some(80);
        w.speed = Some(3.5);
        w.satellites = Some(7);
        w.valid_signal = Some(true);
        w.kind = Some("GPS".into());

        let pos = normalize_position(w, TrackerId::new(1)).unwrap();
        assert_eq!(pos.battery, Some(80));
        assert_eq!(pos.speed, Some(3.5));
        assert_eq!(pos.satellites, Some(7));
        assert_eq!(pos.valid_signal, Some(true));
        assert_eq!(pos.kind.as_deref(), Some("GPS"));
        assert_eq!(pos.latitude, 59.91);
    }
}
