//! Water temperature uplink relay
//!
//! This service:
//! - Subscribes to the network server's MQTT broker
//! - Parses uplink envelopes and decodes the binary sensor payloads
//! - Submits water temperature readings to the temperature API
//! - Writes full uplink metrics to InfluxDB
//!
//! Architecture: MQTT event loop → channel → pipeline → API + InfluxDB

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use watertemp_relay::api::ApiClient;
use watertemp_relay::config::Config;
use watertemp_relay::influxdb::InfluxDbClient;
use watertemp_relay::mqtt::{InboundMessage, MqttClient};
use watertemp_relay::pipeline::{Delivery, Pipeline, Verdict};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Water temperature uplink relay starting");

    // Load configuration
    let config = Config::load("config.toml").context("Failed to load config.toml")?;
    info!("Configuration loaded successfully");
    for (dev_eui, sensor_id) in &config.sensors {
        info!("  Sensor mapping: {} → {}", dev_eui, sensor_id);
    }

    // Create sink clients
    let api_client = ApiClient::new(&config.api.base_url, &config.api.token);
    let influxdb_client = InfluxDbClient::new(
        &config.influxdb.url,
        &config.influxdb.org,
        &config.influxdb.bucket,
        &config.influxdb.token,
        config.influxdb.measurement(),
    )
    .context("Failed to create InfluxDB client")?;

    // Test InfluxDB connection and mark the start of this process
    influxdb_client
        .health_check()
        .await
        .context("InfluxDB health check failed")?;
    influxdb_client
        .write_startup()
        .await
        .context("Failed to write startup marker")?;

    // Connect to the MQTT broker
    let (mqtt_client, rx) = MqttClient::connect(
        &config.mqtt.broker_url,
        &config.mqtt.client_id,
        &config.mqtt.username,
        &config.mqtt.password,
        config.mqtt.channel_capacity,
    )
    .await
    .context("Failed to create MQTT client")?;

    // Spawn processor task
    let pipeline = Pipeline::new(config.sensors.clone());
    let processor_handle = tokio::spawn(process_messages(
        rx,
        pipeline,
        api_client,
        influxdb_client,
    ));

    // Wait for Ctrl+C
    info!("Relay running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
        }
        _ = processor_handle => {
            warn!("Processor task ended unexpectedly");
        }
    }

    mqtt_client.disconnect().await.ok();

    info!("Water temperature uplink relay stopped");
    Ok(())
}

/// Process inbound messages one at a time, in arrival order
async fn process_messages(
    mut rx: mpsc::Receiver<InboundMessage>,
    pipeline: Pipeline,
    api_client: ApiClient,
    influxdb_client: InfluxDbClient,
) {
    info!("Starting uplink processor");

    while let Some(message) = rx.recv().await {
        debug!(
            topic = %message.topic,
            payload_len = message.payload.len(),
            "Message received"
        );

        match pipeline.evaluate(&message.topic, &message.payload) {
            Ok(Verdict::Deliver(delivery)) => {
                dispatch(&delivery, &api_client, &influxdb_client).await;
            }
            Ok(Verdict::Dropped(reason)) => {
                debug!(%reason, "Message dropped");
            }
            Err(e) => {
                error!(error = %e, topic = %message.topic, "Failed to process message");
            }
        }
    }

    info!("Uplink processor stopped");
}

/// Perform the sink writes for one delivery. Sink failures are logged
/// and never affect subsequent messages.
async fn dispatch(delivery: &Delivery, api_client: &ApiClient, influxdb_client: &InfluxDbClient) {
    match &delivery.api {
        Some(measurement) => {
            if let Err(e) = api_client.submit_measurement(measurement).await {
                error!(error = %e, "Failed to submit measurement to API");
            }
        }
        None => {
            info!("No water temperature measurement, not sending to API");
        }
    }

    if let Err(e) = influxdb_client.write_uplink(&delivery.metrics).await {
        error!(error = %e, "Failed to write uplink metrics to InfluxDB");
    }
}
