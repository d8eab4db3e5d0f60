//! MQTT client subscribing to the uplink stream
//!
//! This module provides an async MQTT client that:
//! - Connects to the network-server broker (plain or TLS)
//! - Subscribes to all topics and forwards publishes into a channel
//! - Handles connection errors gracefully

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One raw message as delivered by the broker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// MQTT client feeding inbound messages into a channel
pub struct MqttClient {
    client: AsyncClient,
}

impl MqttClient {
    /// Connect to the broker and subscribe to all topics
    ///
    /// Returns the client plus the receiving end of a channel that
    /// yields inbound messages in arrival order. The channel is the
    /// only buffering point between the broker and the processor.
    ///
    /// # Arguments
    /// * `broker_url` - URL like "mqtts://eu1.cloud.thethings.network:8883"
    /// * `client_id` - Unique client identifier
    /// * `username` - Broker username (the application ID)
    /// * `password` - Broker password (the API key)
    /// * `channel_capacity` - Inbound channel capacity
    pub async fn connect(
        broker_url: &str,
        client_id: &str,
        username: &str,
        password: &str,
        channel_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>)> {
        info!(broker = broker_url, client_id = client_id, "Connecting to MQTT broker");

        let (host, port, tls) = parse_broker_url(broker_url)?;

        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_credentials(username, password);
        if tls {
            mqttoptions.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut event_loop) = AsyncClient::new(mqttoptions, 10);

        let (tx, rx) = mpsc::channel(channel_capacity);

        // Spawn event loop handler task
        tokio::spawn(async move {
            info!("MQTT event loop started");
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if tx.send(message).await.is_err() {
                            warn!("Inbound channel closed, stopping MQTT event loop");
                            break;
                        }
                    }
                    Ok(notification) => {
                        debug!("MQTT notification: {:?}", notification);
                    }
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Subscribe to all topics; the pipeline filters for uplinks
        client
            .subscribe("#", QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to uplink topics")?;

        info!("MQTT client connected and subscribed");

        Ok((Self { client }, rx))
    }

    /// Disconnect from the broker
    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .context("Failed to disconnect from MQTT broker")
    }
}

/// Parse MQTT broker URL into host, port and TLS flag
///
/// Supports:
/// - mqtt://localhost:1883
/// - mqtts://eu1.cloud.thethings.network:8883 (TLS)
fn parse_broker_url(url: &str) -> Result<(String, u16, bool)> {
    let (rest, tls, default_port) = if let Some(rest) = url.strip_prefix("mqtt://") {
        (rest, false, 1883)
    } else if let Some(rest) = url.strip_prefix("mqtts://") {
        (rest, true, 8883)
    } else {
        anyhow::bail!("Invalid MQTT URL: must start with mqtt:// or mqtts://");
    };

    if let Some((host, port_str)) = rest.split_once(':') {
        let port = port_str
            .parse::<u16>()
            .context("Invalid port number in MQTT URL")?;
        Ok((host.to_string(), port, tls))
    } else {
        // Default port if not specified
        Ok((rest.to_string(), default_port, tls))
    }
}
