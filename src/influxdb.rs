//! InfluxDB sink for uplink metrics
//!
//! This module provides an async InfluxDB 2.x client that:
//! - Writes one point per processed uplink
//! - Writes a one-off startup marker at process start
//! - Handles authentication with API tokens

use anyhow::{Context, Result};
use influxdb2::models::DataPoint;
use influxdb2::Client;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::pipeline::{MetricsField, MetricsRecord};

/// InfluxDB client for writing uplink metrics
pub struct InfluxDbClient {
    client: Client,
    bucket: String,
    url: String,
    measurement: String,
}

impl InfluxDbClient {
    /// Create a new InfluxDB client
    ///
    /// # Arguments
    /// * `url` - InfluxDB server URL (e.g., "https://influxdb.example.com")
    /// * `org` - Organization name
    /// * `bucket` - Bucket name for data storage
    /// * `token` - Authentication token
    /// * `measurement` - Measurement name for uplink points
    pub fn new(url: &str, org: &str, bucket: &str, token: &str, measurement: &str) -> Result<Self> {
        info!(url = url, org = org, bucket = bucket, "Creating InfluxDB client");

        let client = Client::new(url, org, token);

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            url: url.to_string(),
            measurement: measurement.to_string(),
        })
    }

    /// Test connection to InfluxDB with health check
    pub async fn health_check(&self) -> Result<()> {
        info!("Testing InfluxDB connection...");

        // The influxdb2 crate doesn't expose /health or ping endpoints,
        // so query the health endpoint directly with reqwest
        let health_url = format!("{}/health", self.url);

        let response = reqwest::get(&health_url)
            .await
            .context("Failed to connect to InfluxDB health endpoint")?;

        let status = response.status();
        if status.is_success() {
            info!(status = %status, "InfluxDB health check passed");
            Ok(())
        } else {
            anyhow::bail!("InfluxDB health check failed with status: {}", status)
        }
    }

    /// Write one uplink metrics point
    ///
    /// Tags and fields not present on the record are omitted from the
    /// point entirely.
    pub async fn write_uplink(&self, record: &MetricsRecord) -> Result<()> {
        let mut point = DataPoint::builder(self.measurement.as_str());

        for (key, value) in record.tags() {
            point = point.tag(key, value);
        }
        for (key, value) in record.fields() {
            point = match value {
                MetricsField::Float(v) => point.field(key, v),
                MetricsField::Integer(v) => point.field(key, v),
            };
        }

        let point = point.build()?;

        self.client
            .write(&self.bucket, futures::stream::iter(vec![point]))
            .await
            .context("Failed to write uplink metrics to InfluxDB")?;

        info!(
            measurement = %self.measurement,
            sensor_id = record.sensor_id,
            "Wrote uplink metrics to InfluxDB"
        );

        Ok(())
    }

    /// Write the one-off startup marker
    pub async fn write_startup(&self) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let point = DataPoint::builder("startup")
            .tag("service", "watertemp-relay")
            .field("value", now)
            .build()?;

        self.client
            .write(&self.bucket, futures::stream::iter(vec![point]))
            .await
            .context("Failed to write startup point to InfluxDB")?;

        info!("Wrote startup marker to InfluxDB");
        Ok(())
    }
}
