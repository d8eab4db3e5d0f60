//! Inbound uplink envelope parsing and gateway reception aggregation.
//!
//! Two envelope schemas exist in the wild, with no version flag inside
//! the message itself: the current shape (nested `end_device_ids` /
//! `uplink_message` objects) and the legacy shape (flat `hardware_serial`
//! / `payload_raw` pair). The shape is resolved structurally from which
//! top-level keys are present; a message matching neither is a hard
//! parse failure.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("message does not match any known uplink schema")]
    UnknownSchema(#[source] serde_json::Error),

    #[error("invalid base64 payload encoding")]
    InvalidPayloadEncoding(#[source] base64::DecodeError),
}

/// Returns true if the topic marks a device-to-network message.
pub fn is_uplink(topic: &str) -> bool {
    topic.ends_with("/up")
}

/// One receiving gateway's report, as carried in the envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReport {
    pub gateway_id: String,
    pub eui: Option<String>,
    pub rssi: Option<i64>,
    pub snr: Option<f64>,
}

/// LoRa radio parameters, carried through as tags only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RadioParams {
    pub spreading_factor: Option<u32>,
    pub bandwidth_khz: Option<u32>,
    pub frequency_hz: Option<u64>,
}

/// Normalized uplink envelope, independent of the inbound schema shape.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkEnvelope {
    pub device_id: String,
    pub dev_eui: String,
    pub dev_addr: Option<String>,
    pub application_id: Option<String>,
    pub fport: u8,
    pub payload: Vec<u8>,
    pub radio: RadioParams,
    pub airtime: Option<String>,
    pub gateways: Vec<GatewayReport>,
}

/// Summary statistics over the receiving gateways.
///
/// All three fields are unset iff no gateway report carried both signal
/// values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceptionSummary {
    pub max_rssi: Option<i64>,
    pub max_snr: Option<f64>,
    pub best_gateway: Option<String>,
}

impl ReceptionSummary {
    /// Reduce the gateway reports to summary statistics.
    ///
    /// Reports missing either RSSI or SNR are skipped. The maxima are
    /// taken independently and need not come from the same gateway. The
    /// best gateway is the one with the highest RSSI; ties keep the
    /// first occurrence in report order.
    pub fn from_reports(reports: &[GatewayReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            let (rssi, snr) = match (report.rssi, report.snr) {
                (Some(rssi), Some(snr)) => (rssi, snr),
                _ => continue,
            };
            if summary.max_rssi.map_or(true, |max| rssi > max) {
                summary.max_rssi = Some(rssi);
                summary.best_gateway = Some(report.gateway_id.clone());
            }
            if summary.max_snr.map_or(true, |max| snr > max) {
                summary.max_snr = Some(snr);
            }
        }
        summary
    }
}

/// Parse one inbound message body into a normalized envelope.
pub fn parse_envelope(body: &[u8]) -> Result<UplinkEnvelope, EnvelopeError> {
    let wire: WireEnvelope =
        serde_json::from_slice(body).map_err(EnvelopeError::UnknownSchema)?;
    match wire {
        WireEnvelope::Current(env) => env.normalize(),
        WireEnvelope::Legacy(env) => env.normalize(),
    }
}

// Wire-level structs. Each variant declares its own required-field set;
// serde resolves the shape by trying them in order.

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireEnvelope {
    Current(CurrentEnvelope),
    Legacy(LegacyEnvelope),
}

#[derive(Debug, Deserialize)]
struct CurrentEnvelope {
    end_device_ids: EndDeviceIds,
    uplink_message: UplinkMessage,
}

#[derive(Debug, Deserialize)]
struct EndDeviceIds {
    device_id: String,
    dev_eui: String,
    #[serde(default)]
    dev_addr: Option<String>,
    #[serde(default)]
    application_ids: Option<ApplicationIds>,
}

#[derive(Debug, Deserialize)]
struct ApplicationIds {
    application_id: String,
}

#[derive(Debug, Deserialize)]
struct UplinkMessage {
    // FPort 0 is omitted from the JSON entirely
    #[serde(default)]
    f_port: u8,
    frm_payload: String,
    #[serde(default)]
    consumed_airtime: Option<String>,
    #[serde(default)]
    settings: Option<UplinkSettings>,
    #[serde(default)]
    rx_metadata: Vec<RxMetadata>,
}

#[derive(Debug, Deserialize)]
struct UplinkSettings {
    #[serde(default)]
    data_rate: Option<DataRate>,
    #[serde(default)]
    frequency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataRate {
    #[serde(default)]
    lora: Option<LoraDataRate>,
}

#[derive(Debug, Deserialize)]
struct LoraDataRate {
    spreading_factor: u32,
    /// Bandwidth in Hz
    bandwidth: u32,
}

#[derive(Debug, Deserialize)]
struct RxMetadata {
    gateway_ids: GatewayIds,
    #[serde(default)]
    rssi: Option<i64>,
    #[serde(default)]
    snr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GatewayIds {
    gateway_id: String,
    #[serde(default)]
    eui: Option<String>,
}

impl CurrentEnvelope {
    fn normalize(self) -> Result<UplinkEnvelope, EnvelopeError> {
        let payload = BASE64
            .decode(&self.uplink_message.frm_payload)
            .map_err(EnvelopeError::InvalidPayloadEncoding)?;

        let mut radio = RadioParams::default();
        if let Some(settings) = &self.uplink_message.settings {
            if let Some(lora) = settings.data_rate.as_ref().and_then(|dr| dr.lora.as_ref()) {
                radio.spreading_factor = Some(lora.spreading_factor);
                radio.bandwidth_khz = Some(lora.bandwidth / 1000);
            }
            radio.frequency_hz = settings.frequency.as_ref().and_then(|f| f.parse().ok());
        }

        let gateways = self
            .uplink_message
            .rx_metadata
            .into_iter()
            .map(|rx| GatewayReport {
                gateway_id: rx.gateway_ids.gateway_id,
                eui: rx.gateway_ids.eui,
                rssi: rx.rssi,
                snr: rx.snr,
            })
            .collect();

        Ok(UplinkEnvelope {
            device_id: self.end_device_ids.device_id,
            dev_eui: self.end_device_ids.dev_eui,
            dev_addr: self.end_device_ids.dev_addr,
            application_id: self
                .end_device_ids
                .application_ids
                .map(|ids| ids.application_id),
            fport: self.uplink_message.f_port,
            payload,
            radio,
            airtime: self.uplink_message.consumed_airtime,
            gateways,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LegacyEnvelope {
    dev_id: String,
    hardware_serial: String,
    #[serde(default)]
    port: u8,
    payload_raw: String,
    #[serde(default)]
    metadata: Option<LegacyMetadata>,
}

#[derive(Debug, Deserialize)]
struct LegacyMetadata {
    /// Compound string like "SF7BW125"
    #[serde(default)]
    data_rate: Option<String>,
    #[serde(default)]
    gateways: Vec<LegacyGateway>,
}

#[derive(Debug, Deserialize)]
struct LegacyGateway {
    gtw_id: String,
    #[serde(default)]
    rssi: Option<i64>,
    #[serde(default)]
    snr: Option<f64>,
}

impl LegacyEnvelope {
    fn normalize(self) -> Result<UplinkEnvelope, EnvelopeError> {
        let payload = BASE64
            .decode(&self.payload_raw)
            .map_err(EnvelopeError::InvalidPayloadEncoding)?;

        let mut radio = RadioParams::default();
        let mut gateways = Vec::new();
        if let Some(metadata) = self.metadata {
            if let Some((sf, bw)) = metadata.data_rate.as_deref().and_then(parse_data_rate) {
                radio.spreading_factor = Some(sf);
                radio.bandwidth_khz = Some(bw);
            }
            gateways = metadata
                .gateways
                .into_iter()
                .map(|gw| GatewayReport {
                    gateway_id: gw.gtw_id,
                    eui: None,
                    rssi: gw.rssi,
                    snr: gw.snr,
                })
                .collect();
        }

        Ok(UplinkEnvelope {
            device_id: self.dev_id,
            dev_eui: self.hardware_serial,
            dev_addr: None,
            application_id: None,
            fport: self.port,
            payload,
            radio,
            airtime: None,
            gateways,
        })
    }
}

/// Parse a legacy compound data rate ("SF7BW125") into spreading factor
/// and bandwidth in kHz.
fn parse_data_rate(data_rate: &str) -> Option<(u32, u32)> {
    let rest = data_rate.strip_prefix("SF")?;
    let bw_pos = rest.find("BW")?;
    let sf = rest[..bw_pos].parse().ok()?;
    let bw = rest[bw_pos + 2..].parse().ok()?;
    Some((sf, bw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(gateway_id: &str, rssi: Option<i64>, snr: Option<f64>) -> GatewayReport {
        GatewayReport {
            gateway_id: gateway_id.to_string(),
            eui: None,
            rssi,
            snr,
        }
    }

    #[test]
    fn test_is_uplink() {
        assert!(is_uplink("v3/app@ttn/devices/dev01/up"));
        assert!(!is_uplink("v3/app@ttn/devices/dev01/down/queued"));
        assert!(!is_uplink("v3/app@ttn/devices/dev01/join"));
    }

    #[test]
    fn test_reception_summary_independent_maxima() {
        // Max SNR and max RSSI come from different gateways; the report
        // missing SNR is excluded entirely.
        let reports = vec![
            report("gw-a", Some(-80), Some(5.0)),
            report("gw-b", Some(-60), Some(9.0)),
            report("gw-c", Some(-60), Some(3.0)),
            report("gw-d", Some(-10), None),
        ];
        let summary = ReceptionSummary::from_reports(&reports);
        assert_eq!(summary.max_rssi, Some(-60));
        assert_eq!(summary.max_snr, Some(9.0));
        assert_eq!(summary.best_gateway.as_deref(), Some("gw-b"));
    }

    #[test]
    fn test_reception_summary_tie_keeps_first() {
        let reports = vec![
            report("gw-a", Some(-60), Some(1.0)),
            report("gw-b", Some(-60), Some(9.0)),
        ];
        let summary = ReceptionSummary::from_reports(&reports);
        assert_eq!(summary.best_gateway.as_deref(), Some("gw-a"));
        assert_eq!(summary.max_snr, Some(9.0));
    }

    #[test]
    fn test_reception_summary_no_qualifying_reports() {
        let reports = vec![
            report("gw-a", Some(-60), None),
            report("gw-b", None, Some(9.0)),
            report("gw-c", None, None),
        ];
        let summary = ReceptionSummary::from_reports(&reports);
        assert_eq!(summary, ReceptionSummary::default());

        assert_eq!(
            ReceptionSummary::from_reports(&[]),
            ReceptionSummary::default()
        );
    }

    #[test]
    fn test_parse_current_shape() {
        let body = r#"{
            "end_device_ids": {
                "device_id": "water-sensor-01",
                "application_ids": {"application_id": "watertemp"},
                "dev_eui": "0004A30B001C1234",
                "dev_addr": "260B1234"
            },
            "uplink_message": {
                "f_port": 2,
                "frm_payload": "AxI0VWc=",
                "consumed_airtime": "0.061696s",
                "settings": {
                    "data_rate": {"lora": {"bandwidth": 125000, "spreading_factor": 7}},
                    "frequency": "867500000"
                },
                "rx_metadata": [
                    {"gateway_ids": {"gateway_id": "gw-01", "eui": "AA555A0000000000"}, "rssi": -70, "snr": 8.25},
                    {"gateway_ids": {"gateway_id": "gw-02"}, "rssi": -92}
                ]
            }
        }"#;
        let env = parse_envelope(body.as_bytes()).unwrap();
        assert_eq!(env.device_id, "water-sensor-01");
        assert_eq!(env.dev_eui, "0004A30B001C1234");
        assert_eq!(env.dev_addr.as_deref(), Some("260B1234"));
        assert_eq!(env.application_id.as_deref(), Some("watertemp"));
        assert_eq!(env.fport, 2);
        assert_eq!(env.payload, [0x03, 0x12, 0x34, 0x55, 0x67]);
        assert_eq!(env.radio.spreading_factor, Some(7));
        assert_eq!(env.radio.bandwidth_khz, Some(125));
        assert_eq!(env.radio.frequency_hz, Some(867_500_000));
        assert_eq!(env.airtime.as_deref(), Some("0.061696s"));
        assert_eq!(env.gateways.len(), 2);
        assert_eq!(env.gateways[0].gateway_id, "gw-01");
        assert_eq!(env.gateways[0].eui.as_deref(), Some("AA555A0000000000"));
        assert_eq!(env.gateways[0].rssi, Some(-70));
        assert_eq!(env.gateways[0].snr, Some(8.25));
        assert_eq!(env.gateways[1].snr, None);
    }

    #[test]
    fn test_parse_current_shape_minimal() {
        // Radio settings and gateways are optional; only identity and
        // payload are required.
        let body = r#"{
            "end_device_ids": {"device_id": "dev01", "dev_eui": "0004A30B001C1234"},
            "uplink_message": {"f_port": 1, "frm_payload": ""}
        }"#;
        let env = parse_envelope(body.as_bytes()).unwrap();
        assert_eq!(env.radio, RadioParams::default());
        assert!(env.gateways.is_empty());
        assert!(env.payload.is_empty());
        assert_eq!(env.application_id, None);
    }

    #[test]
    fn test_parse_legacy_shape() {
        let body = r#"{
            "dev_id": "water-sensor-01",
            "hardware_serial": "0004A30B001C1234",
            "port": 1,
            "payload_raw": "zcxIQQAAcEIAAGhCAABSQA==",
            "metadata": {
                "data_rate": "SF9BW125",
                "gateways": [
                    {"gtw_id": "eui-1234", "rssi": -55, "snr": 10.5, "latitude": 47.2, "longitude": 8.5}
                ]
            }
        }"#;
        let env = parse_envelope(body.as_bytes()).unwrap();
        assert_eq!(env.device_id, "water-sensor-01");
        assert_eq!(env.dev_eui, "0004A30B001C1234");
        assert_eq!(env.fport, 1);
        assert_eq!(env.payload.len(), 16);
        assert_eq!(env.radio.spreading_factor, Some(9));
        assert_eq!(env.radio.bandwidth_khz, Some(125));
        assert_eq!(env.gateways.len(), 1);
        assert_eq!(env.gateways[0].gateway_id, "eui-1234");
        assert_eq!(env.gateways[0].rssi, Some(-55));
    }

    #[test]
    fn test_parse_missing_identity_fails() {
        // Current shape without dev_eui matches neither variant
        let body = r#"{
            "end_device_ids": {"device_id": "dev01"},
            "uplink_message": {"f_port": 1, "frm_payload": "AA=="}
        }"#;
        let err = parse_envelope(body.as_bytes()).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownSchema(_)));
    }

    #[test]
    fn test_parse_invalid_base64_fails() {
        let body = r#"{
            "end_device_ids": {"device_id": "dev01", "dev_eui": "0004A30B001C1234"},
            "uplink_message": {"f_port": 1, "frm_payload": "not base64!!"}
        }"#;
        let err = parse_envelope(body.as_bytes()).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidPayloadEncoding(_)));
    }

    #[test]
    fn test_parse_data_rate() {
        assert_eq!(parse_data_rate("SF7BW125"), Some((7, 125)));
        assert_eq!(parse_data_rate("SF12BW500"), Some((12, 500)));
        assert_eq!(parse_data_rate("FSK50000"), None);
        assert_eq!(parse_data_rate("SF7"), None);
    }
}
