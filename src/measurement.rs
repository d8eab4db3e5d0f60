//! Physical measurement assembly.
//!
//! Converts raw decoded records into physical units. v1 payloads carry
//! ready-made floats; v2 payloads carry unsigned bitfields with fixed
//! affine scaling per field.

use crate::payload::{RawRecord, RawV1, RawV2};

/// A set of normalized sensor readings. Fields the wire format did not
/// carry stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurements {
    /// Water temperature in °C
    pub t_water: Option<f64>,
    /// Enclosure temperature in °C
    pub t_inside: Option<f64>,
    /// Enclosure relative humidity in %RH
    pub rh_inside: Option<f64>,
    /// Supply voltage in V
    pub v_supply: Option<f64>,
}

impl Measurements {
    /// Convert a raw decoded record into physical units.
    pub fn from_raw(record: &RawRecord) -> Self {
        match record {
            RawRecord::V1(raw) => Self::from_v1(raw),
            RawRecord::V2(raw) => Self::from_v2(raw),
        }
    }

    fn from_v1(raw: &RawV1) -> Self {
        Self {
            t_water: Some(f64::from(raw.t_water)),
            t_inside: Some(f64::from(raw.t_inside)),
            rh_inside: Some(f64::from(raw.rh_inside)),
            v_supply: Some(f64::from(raw.v_supply)),
        }
    }

    fn from_v2(raw: &RawV2) -> Self {
        Self {
            t_water: raw.t_water.map(|r| f64::from(r) / 16.0),
            t_inside: raw
                .t_inside
                .map(|r| -45.0 + 175.0 * (f64::from(r) / 65536.0)),
            rh_inside: raw.rh_inside.map(|r| 100.0 * (f64::from(r) / 65536.0)),
            v_supply: raw.v_supply.map(|r| (f64::from(r) + 2000.0) / 1000.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.t_water.is_none()
            && self.t_inside.is_none()
            && self.rh_inside.is_none()
            && self.v_supply.is_none()
    }

    /// One-line human-readable summary for the logs.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = self.t_water {
            parts.push(format!("Water Temp: {:.2} °C", v));
        }
        if let Some(v) = self.t_inside {
            parts.push(format!("Inside Temp: {:.2} °C", v));
        }
        if let Some(v) = self.rh_inside {
            parts.push(format!("Inside Humi: {:.2} %RH", v));
        }
        if let Some(v) = self.v_supply {
            parts.push(format!("Voltage: {:.2} V", v));
        }
        if parts.is_empty() {
            "No data".to_string()
        } else {
            parts.join(" | ")
        }
    }
}
