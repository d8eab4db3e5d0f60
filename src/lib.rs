//! Water temperature uplink relay library
//!
//! Receives LoRaWAN uplinks from the network server over MQTT, decodes
//! the sensor payloads and fans the measurements out to the temperature
//! API and InfluxDB.

pub mod api;
pub mod config;
pub mod envelope;
pub mod influxdb;
pub mod measurement;
pub mod mqtt;
pub mod payload;
pub mod pipeline;
