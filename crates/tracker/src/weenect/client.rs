//! Weenect API HTTP client
//!
//! Provides login, tracker listing and position history against the
//! Weenect v4 API. Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use ureq::Agent;

use super::api::{ListTrackersResponse, LoginRequest, LoginResponse, WeenectPosition};
use super::normalize_position;
use crate::models::{Position, TrackerId};
use crate::upstream::{RemoteTracker, TelemetryProvider};

/// Weenect API client
pub struct WeenectClient {
    agent: Agent,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl WeenectClient {
    /// Weenect API base URL
    pub const BASE_URL: &'static str = "https://apiv4.weenect.com/v4";

    /// Per-request timeout
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client for the given account credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .build()
            .into();

        Self {
            agent,
            base_url: Self::BASE_URL.to_string(),
            username: username.into(),
            password: password.into(),
            token: Mutex::new(None),
        }
    }

    /// Point the client at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Check if a session token is held
    pub fn is_authenticated(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn login(&self) -> Result<String> {
        let url = format!("{}/user/login", self.base_url);
        let body = LoginRequest {
            username: &self.username,
            password: &self.password,
        };

        let mut response = self
            .agent
            .post(&url)
            .send_json(&body)
            .context("Failed to send login request")?;

        let login: LoginResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse login response")?;

        if login.access_token.is_empty() {
            return Err(anyhow!("login response carried no access token"));
        }

        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(login.access_token.clone());
        Ok(login.access_token)
    }

    fn current_token(&self) -> Result<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow!("not authenticated with Weenect"))
    }

    /// GET a JSON resource, logging in again once if the session expired
    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let token = self.current_token()?;

        let response = match self.send_get(url, &token) {
            Err(ureq::Error::StatusCode(401)) => {
                warn!("Weenect session expired, logging in again");
                let token = self.login()?;
                self.send_get(url, &token)
            }
            other => other,
        };

        let mut response = response.with_context(|| format!("Failed to send {what} request"))?;
        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {what} response"))
    }

    fn send_get(
        &self,
        url: &str,
        token: &str,
    ) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        self.agent
            .get(url)
            .header("Authorization", &format!("JWT {token}"))
            .call()
    }
}

fn format_query_time(ts: DateTime<Utc>) -> String {
    urlencoding::encode(&ts.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

impl TelemetryProvider for WeenectClient {
    fn authenticate(&self) -> Result<()> {
        self.login()?;
        debug!("Authenticated with Weenect as {}", self.username);
        Ok(())
    }

    fn list_trackers(&self) -> Result<Vec<RemoteTracker>> {
        let url = format!("{}/mytracker", self.base_url);
        let list: ListTrackersResponse = self.get_json(&url, "list trackers")?;

        Ok(list
            .items
            .into_iter()
            .map(|t| RemoteTracker {
                id: TrackerId::new(t.id),
                name: t.name,
            })
            .collect())
    }

    fn fetch_positions(
        &self,
        tracker_id: TrackerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Position>> {
        let url = format!(
            "{}/mytracker/{}/position?start={}&end={}",
            self.base_url,
            tracker_id,
            format_query_time(start),
            format_query_time(end)
        );

        let raw: Vec<WeenectPosition> = self.get_json(&url, "fetch positions")?;
        let total = raw.len();

        let positions: Vec<Position> = raw
            .into_iter()
            .filter_map(|wire| match normalize_position(wire, tracker_id) {
                Ok(position) => Some(position),
                Err(e) => {
                    warn!("Skipping position for tracker {tracker_id}: {e:#}");
                    None
                }
            })
            .collect();

        debug!(
            "Fetched {} positions for tracker {} ({} discarded)",
            positions.len(),
            tracker_id,
            total - positions.len()
        );
        Ok(positions)
    }
}
