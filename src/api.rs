//! Temperature API client
//!
//! Submits water temperature measurements via HTTP POST with
//! bearer-token authorization. The API responds with 201 on success;
//! anything else is reported as an error and not retried.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

/// Measurement payload accepted by the API.
///
/// TODO: also transmit enclosure temperature, humidity and supply
/// voltage once the API accepts those attributes. They are already
/// decoded but currently only logged to InfluxDB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ApiMeasurement {
    pub sensor_id: u32,
    pub temperature: f64,
}

/// Client for the temperature API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://watertemp-api.example.com/api")
    /// * `token` - Bearer token for authorization
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Submit one measurement to the measurements endpoint
    pub async fn submit_measurement(&self, measurement: &ApiMeasurement) -> Result<()> {
        let url = format!("{}/measurements", self.base_url);

        info!(
            sensor_id = measurement.sensor_id,
            temperature = measurement.temperature,
            "Sending temperature to API"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(measurement)
            .send()
            .await
            .context("API request failed")?;

        if response.status() == StatusCode::CREATED {
            debug!("API request succeeded");
            Ok(())
        } else {
            anyhow::bail!("API request failed: HTTP {}", response.status())
        }
    }
}
