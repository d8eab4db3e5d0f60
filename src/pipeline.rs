//! Per-message processing pipeline.
//!
//! Runs one inbound message through parse → direction filter → gateway
//! aggregation → FPort filter → decode → normalize → sensor mapping and
//! assembles the fan-out plan for the two sinks. No sink I/O happens
//! here; the caller performs the writes, so every stage stays pure and
//! testable.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::ApiMeasurement;
use crate::envelope::{self, EnvelopeError, ReceptionSummary, UplinkEnvelope};
use crate::measurement::Measurements;
use crate::payload::{self, DecodeError, ProtocolVersion};

/// A failure local to one message. The worker loop logs it and moves on.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Why a message was dropped before reaching the sinks. Drops are normal
/// outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    NotAnUplink,
    UnsupportedPort(u8),
    UnmappedSensor(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DropReason::NotAnUplink => write!(f, "not an uplink"),
            DropReason::UnsupportedPort(fport) => write!(f, "unsupported fport {}", fport),
            DropReason::UnmappedSensor(dev_eui) => {
                write!(f, "no sensor mapping for DevEUI {}", dev_eui)
            }
        }
    }
}

/// Outcome of evaluating one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Dropped(DropReason),
    Deliver(Delivery),
}

/// Everything the sinks need, fully assembled. The API submission is
/// only planned when a water temperature reading is present.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub api: Option<ApiMeasurement>,
    pub metrics: MetricsRecord,
}

/// One metrics point, pre-assembled so the InfluxDB write itself stays
/// trivial.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub sensor_id: u32,
    pub dev_id: String,
    pub dev_eui: String,
    pub protocol_version: ProtocolVersion,
    pub spreading_factor: Option<u32>,
    pub bandwidth_khz: Option<u32>,
    pub best_gateway: Option<String>,
    pub measurements: Measurements,
    pub max_rssi: Option<i64>,
    pub max_snr: Option<f64>,
}

/// A metrics field value. RSSI is recorded as an integer, everything
/// else as a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricsField {
    Float(f64),
    Integer(i64),
}

impl MetricsRecord {
    /// Tag set for the point; tags without a value are omitted.
    pub fn tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("sensor_id", self.sensor_id.to_string()),
            ("dev_id", self.dev_id.clone()),
            ("dev_eui", self.dev_eui.clone()),
            ("protocol_version", self.protocol_version.as_str().to_string()),
        ];
        if let Some(sf) = self.spreading_factor {
            tags.push(("sf", sf.to_string()));
        }
        if let Some(bw) = self.bandwidth_khz {
            tags.push(("bw", bw.to_string()));
        }
        if let Some(gateway) = &self.best_gateway {
            tags.push(("best_gateway", gateway.clone()));
        }
        tags
    }

    /// Field set for the point; only readings that are actually present
    /// are emitted.
    pub fn fields(&self) -> Vec<(&'static str, MetricsField)> {
        let mut fields = Vec::new();
        if let Some(v) = self.measurements.t_water {
            fields.push(("water_temp", MetricsField::Float(v)));
        }
        if let Some(v) = self.measurements.t_inside {
            fields.push(("enclosure_temp", MetricsField::Float(v)));
        }
        if let Some(v) = self.measurements.rh_inside {
            fields.push(("enclosure_humi", MetricsField::Float(v)));
        }
        if let Some(v) = self.measurements.v_supply {
            fields.push(("voltage", MetricsField::Float(v)));
        }
        if let Some(v) = self.max_rssi {
            fields.push(("max_rssi", MetricsField::Integer(v)));
        }
        if let Some(v) = self.max_snr {
            fields.push(("max_snr", MetricsField::Float(v)));
        }
        fields
    }
}

/// The message pipeline. Holds the immutable DevEUI → sensor ID mapping
/// loaded at startup; no other state survives between messages.
pub struct Pipeline {
    sensors: HashMap<String, u32>,
}

impl Pipeline {
    pub fn new(sensors: HashMap<String, u32>) -> Self {
        Self { sensors }
    }

    /// Run one inbound message through the pipeline.
    ///
    /// Returns a [`Verdict`] for every regularly handled message; an
    /// `Err` means this message was malformed (envelope or payload) and
    /// must be dropped without touching either sink.
    pub fn evaluate(&self, topic: &str, body: &[u8]) -> Result<Verdict, ProcessError> {
        if !envelope::is_uplink(topic) {
            debug!(topic, "Not an uplink, ignoring");
            return Ok(Verdict::Dropped(DropReason::NotAnUplink));
        }

        let envelope = envelope::parse_envelope(body)?;
        log_uplink(&envelope);

        let summary = ReceptionSummary::from_reports(&envelope.gateways);
        info!(
            max_rssi = ?summary.max_rssi,
            max_snr = ?summary.max_snr,
            best_gateway = ?summary.best_gateway,
            "Reception summary"
        );

        let version = match ProtocolVersion::from_fport(envelope.fport) {
            Some(version) => version,
            None => {
                info!(fport = envelope.fport, "Not an FPort we can handle, ignoring");
                return Ok(Verdict::Dropped(DropReason::UnsupportedPort(envelope.fport)));
            }
        };

        let record = payload::decode(version, &envelope.payload)?;
        let measurements = Measurements::from_raw(&record);
        info!(
            protocol_version = version.as_str(),
            decoded = %measurements.summary(),
            "Payload decoded"
        );

        let sensor_id = match self.sensors.get(&envelope.dev_eui) {
            Some(&sensor_id) => sensor_id,
            None => {
                warn!(dev_eui = %envelope.dev_eui, "No sensor mapping found, ignoring uplink");
                return Ok(Verdict::Dropped(DropReason::UnmappedSensor(envelope.dev_eui)));
            }
        };

        let api = measurements
            .t_water
            .map(|temperature| ApiMeasurement {
                sensor_id,
                temperature,
            });

        let metrics = MetricsRecord {
            sensor_id,
            dev_id: envelope.device_id,
            dev_eui: envelope.dev_eui,
            protocol_version: version,
            spreading_factor: envelope.radio.spreading_factor,
            bandwidth_khz: envelope.radio.bandwidth_khz,
            best_gateway: summary.best_gateway,
            measurements,
            max_rssi: summary.max_rssi,
            max_snr: summary.max_snr,
        };

        Ok(Verdict::Deliver(Delivery { api, metrics }))
    }
}

fn log_uplink(envelope: &UplinkEnvelope) {
    info!(
        device_id = %envelope.device_id,
        dev_eui = %envelope.dev_eui,
        dev_addr = ?envelope.dev_addr,
        application_id = ?envelope.application_id,
        fport = envelope.fport,
        payload_len = envelope.payload.len(),
        "Uplink received"
    );
    debug!(
        sf = ?envelope.radio.spreading_factor,
        bw_khz = ?envelope.radio.bandwidth_khz,
        frequency_hz = ?envelope.radio.frequency_hz,
        airtime = ?envelope.airtime,
        "Radio parameters"
    );
    for gateway in &envelope.gateways {
        debug!(
            gateway_id = %gateway.gateway_id,
            eui = ?gateway.eui,
            rssi = ?gateway.rssi,
            snr = ?gateway.snr,
            "Receiving gateway"
        );
    }
}
