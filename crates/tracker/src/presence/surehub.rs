//! SureHub pet flap client

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use ureq::Agent;

use super::{Presence, PresenceProvider};

/// `where` value SureHub reports for a pet that is indoors
const WHERE_INSIDE: i64 = 1;

#[derive(Serialize)]
struct LoginRequest<'a> {
    email_address: &'a str,
    password: &'a str,
    device_id: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Deserialize)]
struct StartData {
    #[serde(default)]
    pets: Vec<Pet>,
}

#[derive(Deserialize)]
struct Pet {
    name: String,
    position: Option<PetPosition>,
}

#[derive(Deserialize)]
struct PetPosition {
    #[serde(rename = "where")]
    location: Option<i64>,
    since: Option<DateTime<Utc>>,
}

/// SureHub API client, logging in lazily on first use
pub struct SureHubClient {
    agent: Agent,
    base_url: String,
    email: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl SureHubClient {
    pub const BASE_URL: &'static str = "https://app.api.surehub.io/api";

    const DEVICE_ID: &'static str = "catboard";

    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(15)))
            .build()
            .into();

        Self {
            agent,
            base_url: Self::BASE_URL.to_string(),
            email: email.into(),
            password: password.into(),
            token: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn token(&self) -> Result<String> {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }

        let body = LoginRequest {
            email_address: &self.email,
            password: &self.password,
            device_id: Self::DEVICE_ID,
        };
        let mut response = self
            .agent
            .post(&format!("{}/auth/login", self.base_url))
            .send_json(&body)
            .context("Failed to send SureHub login request")?;
        let login: Envelope<LoginData> = response
            .body_mut()
            .read_json()
            .context("Failed to parse SureHub login response")?;

        *token = Some(login.data.token.clone());
        Ok(login.data.token)
    }

    fn forget_token(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl PresenceProvider for SureHubClient {
    fn dashboard(&self) -> Result<HashMap<String, Presence>> {
        let token = self.token()?;

        let result = self
            .agent
            .get(&format!("{}/me/start", self.base_url))
            .header("Authorization", &format!("Bearer {token}"))
            .call();

        let mut response = match result {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(401)) => {
                self.forget_token();
                return Err(anyhow!("SureHub session expired"));
            }
            Err(e) => return Err(e).context("Failed to fetch SureHub dashboard"),
        };

        let start: Envelope<StartData> = response
            .body_mut()
            .read_json()
            .context("Failed to parse SureHub dashboard")?;

        Ok(start
            .data
            .pets
            .into_iter()
            .map(|pet| {
                let presence = match pet.position {
                    Some(position) => Presence {
                        is_inside: position.location == Some(WHERE_INSIDE),
                        since: position.since,
                    },
                    None => Presence {
                        is_inside: false,
                        since: None,
                    },
                };
                (pet.name, presence)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dashboard() {
        let json = r#"{
            "data": {
                "pets": [
                    { "name": "Bella", "position": { "where": 1, "since": "2024-01-10T07:15:00+00:00" } },
                    { "name": "Luna", "position": { "where": 2, "since": null } },
                    { "name": "Ghost" }
                ]
            }
        }"#;

        let start: Envelope<StartData> = serde_json::from_str(json).unwrap();
        assert_eq!(start.data.pets.len(), 3);

        let bella = start.data.pets[0].position.as_ref().unwrap();
        assert_eq!(bella.location, Some(WHERE_INSIDE));
        assert!(bella.since.is_some());
        assert!(start.data.pets[2].position.is_none());
    }
}
