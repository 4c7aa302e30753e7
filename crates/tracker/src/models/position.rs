//! Position model representing a single GPS fix

use super::TrackerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-assigned position identifier, the deduplication key on storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub String);

impl PositionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PositionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PositionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A GPS fix reported by a tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    /// Tracker that reported this fix
    pub tracker_id: TrackerId,
    /// Observation time
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Battery level in percent
    pub battery: Option<i64>,
    /// Speed in km/h
    pub speed: Option<f64>,
    /// Heading in degrees
    pub direction: Option<i64>,
    pub valid_signal: Option<bool>,
    pub satellites: Option<i64>,
    /// GSM signal strength
    pub gsm: Option<i64>,
    /// Provider record type (e.g. "GPS", "WIFI")
    pub kind: Option<String>,
    pub last_message: Option<DateTime<Utc>>,
    pub date_server: Option<DateTime<Utc>>,
    pub date_tracker: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a new position builder
    pub fn builder(id: PositionId, tracker_id: TrackerId) -> PositionBuilder {
        PositionBuilder::new(id, tracker_id)
    }
}

/// Builder for creating Position instances
pub struct PositionBuilder {
    id: PositionId,
    tracker_id: TrackerId,
    timestamp: Option<DateTime<Utc>>,
    latitude: f64,
    longitude: f64,
    battery: Option<i64>,
    speed: Option<f64>,
    direction: Option<i64>,
    valid_signal: Option<bool>,
    satellites: Option<i64>,
    gsm: Option<i64>,
    kind: Option<String>,
    last_message: Option<DateTime<Utc>>,
    date_server: Option<DateTime<Utc>>,
    date_tracker: Option<DateTime<Utc>>,
}

impl PositionBuilder {
    fn new(id: PositionId, tracker_id: TrackerId) -> Self {
        Self {
            id,
            tracker_id,
            timestamp: None,
            latitude: 0.0,
            longitude: 0.0,
            battery: None,
            speed: None,
            direction: None,
            valid_signal: None,
            satellites: None,
            gsm: None,
            kind: None,
            last_message: None,
            date_server: None,
            date_tracker: None,
        }
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn battery(mut self, battery: Option<i64>) -> Self {
        self.battery = battery;
        self
    }

    pub fn speed(mut self, speed: Option<f64>) -> Self {
        self.speed = speed;
        self
    }

    pub fn direction(mut self, direction: Option<i64>) -> Self {
        self.direction = direction;
        self
    }

    pub fn valid_signal(mut self, valid_signal: Option<bool>) -> Self {
        self.valid_signal = valid_signal;
        self
    }

    pub fn satellites(mut self, satellites: Option<i64>) -> Self {
        self.satellites = satellites;
        self
    }

    pub fn gsm(mut self, gsm: Option<i64>) -> Self {
        self.gsm = gsm;
        self
    }

    pub fn kind(mut self, kind: Option<String>) -> Self {
        self.kind = kind;
        self
    }

    pub fn last_message(mut self, last_message: Option<DateTime<Utc>>) -> Self {
        self.last_message = last_message;
        self
    }

    pub fn date_server(mut self, date_server: Option<DateTime<Utc>>) -> Self {
        self.date_server = date_server;
        self
    }

    pub fn date_tracker(mut self, date_tracker: Option<DateTime<Utc>>) -> Self {
        self.date_tracker = date_tracker;
        self
    }

    pub fn build(self) -> Position {
        Position {
            id: self.id,
            tracker_id: self.tracker_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            latitude: self.latitude,
            longitude: self.longitude,
            battery: self.battery,
            speed: self.speed,
            direction: self.direction,
            valid_signal: self.valid_signal,
            satellites: self.satellites,
            gsm: self.gsm,
            kind: self.kind,
            last_message: self.last_message,
            date_server: self.date_server,
            date_tracker: self.date_tracker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_sets_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let position = Position::builder(PositionId::new("p1"), TrackerId::new(42))
            .timestamp(ts)
            .coordinates(59.91, 10.75)
            .battery(Some(87))
            .kind(Some("GPS".to_string()))
            .build();

        assert_eq!(position.id.as_str(), "p1");
        assert_eq!(position.tracker_id, TrackerId::new(42));
        assert_eq!(position.timestamp, ts);
        assert_eq!(position.latitude, 59.91);
        assert_eq!(position.longitude, 10.75);
        assert_eq!(position.battery, Some(87));
        assert_eq!(position.kind.as_deref(), Some("GPS"));
        assert!(position.speed.is_none());
        assert!(position.date_tracker.is_none());
    }
}
