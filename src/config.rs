//! Configuration management for the uplink relay
//!
//! Loads configuration from config.toml with environment variable
//! overrides for secrets.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

/// Complete relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub api: ApiConfig,
    pub influxdb: InfluxDbConfig,
    /// Mapping from DevEUI to the API sensor ID
    pub sensors: HashMap<String, u32>,
}

/// MQTT broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub broker_url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub channel_capacity: usize,
}

/// Temperature API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: String,
}

/// InfluxDB configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxDbConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    /// Measurement name (default: "temperature")
    pub measurement: Option<String>,
}

impl InfluxDbConfig {
    pub fn measurement(&self) -> &str {
        self.measurement.as_deref().unwrap_or("temperature")
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Environment variables override config file values:
    /// - MQTT_PASSWORD: Override MQTT broker password
    /// - API_TOKEN: Override temperature API token
    /// - INFLUXDB_TOKEN: Override InfluxDB token
    pub fn load(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            tracing::info!("Using MQTT_PASSWORD from environment");
            config.mqtt.password = password;
        }
        if let Ok(token) = std::env::var("API_TOKEN") {
            tracing::info!("Using API_TOKEN from environment");
            config.api.token = token;
        }
        if let Ok(token) = std::env::var("INFLUXDB_TOKEN") {
            tracing::info!("Using INFLUXDB_TOKEN from environment");
            config.influxdb.token = token;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !self.mqtt.broker_url.starts_with("mqtt://")
            && !self.mqtt.broker_url.starts_with("mqtts://")
        {
            anyhow::bail!(
                "Invalid MQTT broker URL: {} (must start with mqtt:// or mqtts://)",
                self.mqtt.broker_url
            );
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            anyhow::bail!(
                "Invalid API base URL: {} (must start with http:// or https://)",
                self.api.base_url
            );
        }

        if !self.influxdb.url.starts_with("http://") && !self.influxdb.url.starts_with("https://") {
            anyhow::bail!(
                "Invalid InfluxDB URL: {} (must start with http:// or https://)",
                self.influxdb.url
            );
        }

        if self.mqtt.channel_capacity == 0 {
            anyhow::bail!("MQTT channel_capacity must be greater than 0");
        }

        if self.sensors.is_empty() {
            anyhow::bail!("No sensor mappings configured");
        }

        Ok(())
    }
}
