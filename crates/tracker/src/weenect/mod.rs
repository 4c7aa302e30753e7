//! Weenect API integration
//!
//! This module provides:
//! - Weenect API client implementing [`crate::upstream::TelemetryProvider`]
//! - Response normalization to domain models

mod client;
mod normalize;

pub use client::WeenectClient;
pub use normalize::{normalize_position, parse_weenect_time};

/// Weenect API response types
pub mod api {
    use serde::{Deserialize, Deserializer, Serialize};

    /// Login request body
    #[derive(Debug, Serialize)]
    pub struct LoginRequest<'a> {
        pub username: &'a str,
        pub password: &'a str,
    }

    /// Login response
    #[derive(Debug, Deserialize)]
    pub struct LoginResponse {
        pub access_token: String,
    }

    /// Response from listing trackers
    #[derive(Debug, Deserialize)]
    pub struct ListTrackersResponse {
        #[serde(default)]
        pub items: Vec<WeenectTracker>,
    }

    /// Tracker summary
    #[derive(Debug, Deserialize)]
    pub struct WeenectTracker {
        pub id: i64,
        #[serde(default)]
        pub name: String,
    }

    /// Position as returned by the positions endpoint
    #[derive(Debug, Default, Deserialize)]
    pub struct WeenectPosition {
        #[serde(deserialize_with = "string_or_number")]
        pub id: String,
        pub latitude: f64,
        pub longitude: f64,
        pub battery: Option<i64>,
        pub speed: Option<f64>,
        pub direction: Option<i64>,
        pub valid_signal: Option<bool>,
        pub satellites: Option<i64>,
        pub gsm: Option<i64>,
        #[serde(rename = "type")]
        pub kind: Option<String>,
        pub last_message: Option<String>,
        pub date_server: Option<String>,
        pub date_tracker: Option<String>,
    }

    /// Position IDs arrive as strings or bare integers depending on the endpoint
    fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Number(n) => n.to_string(),
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_position_with_numeric_id() {
            let json = r#"{
                "id": 123456,
                "latitude": 59.91,
                "longitude": 10.75,
                "battery": 64,
                "type": "GPS",
                "date_tracker": "2024-01-10T12:00:00Z"
            }"#;

            let pos: WeenectPosition = serde_json::from_str(json).unwrap();
            assert_eq!(pos.id, "123456");
            assert_eq!(pos.battery, Some(64));
            assert_eq!(pos.kind.as_deref(), Some("GPS"));
            assert!(pos.speed.is_none());
        }

        #[test]
        fn test_parse_tracker_list() {
            let json = r#"{ "items": [ { "id": 42, "name": "Bella" } ], "total": 1 }"#;
            let list: ListTrackersResponse = serde_json::from_str(json).unwrap();
            assert_eq!(list.items.len(), 1);
            assert_eq!(list.items[0].id, 42);
            assert_eq!(list.items[0].name, "Bella");
        }
    }
}
