//! Uplink payload decoding.
//!
//! Two incompatible wire formats are in the field, selected by FPort:
//!
//! - v1 (FPort 1): exactly 16 bytes, four little-endian float32 values
//!   in fixed order (water temp, enclosure temp, enclosure humidity,
//!   supply voltage), all always present.
//! - v2 (FPort 2): one data-mask byte followed by a big-endian bitstream
//!   carrying only the masked-in fields, in the same fixed order, with
//!   per-field widths of 12/16/16/12 bits.
//!
//! Decoding produces raw integer/float records; unit conversion happens
//! separately in [`crate::measurement`].

use thiserror::Error;

/// FPort carrying the v1 fixed-layout format.
pub const FPORT_FORMAT_V1: u8 = 1;
/// FPort carrying the v2 bitmask format.
pub const FPORT_FORMAT_V2: u8 = 2;

/// Total v1 payload size: four float32 values.
const V1_PAYLOAD_LEN: usize = 16;

// v2 data mask bits, low-to-high. The high nibble is reserved and
// ignored on decode.
const DM_BIT_T_WATER: u8 = 1 << 0;
const DM_BIT_T_INSIDE: u8 = 1 << 1;
const DM_BIT_RH_INSIDE: u8 = 1 << 2;
const DM_BIT_V_SUPPLY: u8 = 1 << 3;

// v2 per-field bit widths
const WIDTH_T_WATER: usize = 12;
const WIDTH_T_INSIDE: usize = 16;
const WIDTH_RH_INSIDE: usize = 16;
const WIDTH_V_SUPPLY: usize = 12;

/// Wire format version, selected by the envelope's FPort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    /// Map an FPort value to a wire format. Returns `None` for ports we
    /// cannot handle; those uplinks are dropped, not failed.
    pub fn from_fport(fport: u8) -> Option<Self> {
        match fport {
            FPORT_FORMAT_V1 => Some(ProtocolVersion::V1),
            FPORT_FORMAT_V2 => Some(ProtocolVersion::V2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "v1",
            ProtocolVersion::V2 => "v2",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected {expected} payload bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("data mask 0x{mask:02x} implies {needed} bitfield bytes, got {actual}")]
    BitfieldUnderflow {
        mask: u8,
        needed: usize,
        actual: usize,
    },
}

/// Raw v1 record: the firmware sends ready-made float32 values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawV1 {
    pub t_water: f32,
    pub t_inside: f32,
    pub rh_inside: f32,
    pub v_supply: f32,
}

/// Raw v2 record: unsigned bitfields. Only fields selected by the data
/// mask are present; the rest stay `None`, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawV2 {
    pub t_water: Option<u16>,
    pub t_inside: Option<u16>,
    pub rh_inside: Option<u16>,
    pub v_supply: Option<u16>,
}

/// Decoded raw values, before unit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawRecord {
    V1(RawV1),
    V2(RawV2),
}

/// Decode a raw uplink payload according to its wire format version.
pub fn decode(version: ProtocolVersion, payload: &[u8]) -> Result<RawRecord, DecodeError> {
    match version {
        ProtocolVersion::V1 => decode_v1(payload).map(RawRecord::V1),
        ProtocolVersion::V2 => decode_v2(payload).map(RawRecord::V2),
    }
}

fn decode_v1(payload: &[u8]) -> Result<RawV1, DecodeError> {
    if payload.len() != V1_PAYLOAD_LEN {
        return Err(DecodeError::LengthMismatch {
            expected: V1_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }
    Ok(RawV1 {
        t_water: f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
        t_inside: f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
        rh_inside: f32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]),
        v_supply: f32::from_le_bytes([payload[12], payload[13], payload[14], payload[15]]),
    })
}

fn decode_v2(payload: &[u8]) -> Result<RawV2, DecodeError> {
    let (&mask, data) = payload.split_first().ok_or(DecodeError::LengthMismatch {
        expected: 1,
        actual: 0,
    })?;

    let mut total_bits = 0;
    for (bit, width) in [
        (DM_BIT_T_WATER, WIDTH_T_WATER),
        (DM_BIT_T_INSIDE, WIDTH_T_INSIDE),
        (DM_BIT_RH_INSIDE, WIDTH_RH_INSIDE),
        (DM_BIT_V_SUPPLY, WIDTH_V_SUPPLY),
    ] {
        if mask & bit != 0 {
            total_bits += width;
        }
    }
    let needed = (total_bits + 7) / 8;
    if data.len() < needed {
        return Err(DecodeError::BitfieldUnderflow {
            mask,
            needed,
            actual: data.len(),
        });
    }

    let mut reader = BitReader::new(data);
    let mut raw = RawV2::default();
    if mask & DM_BIT_T_WATER != 0 {
        raw.t_water = Some(reader.read(WIDTH_T_WATER));
    }
    if mask & DM_BIT_T_INSIDE != 0 {
        raw.t_inside = Some(reader.read(WIDTH_T_INSIDE));
    }
    if mask & DM_BIT_RH_INSIDE != 0 {
        raw.rh_inside = Some(reader.read(WIDTH_RH_INSIDE));
    }
    if mask & DM_BIT_V_SUPPLY != 0 {
        raw.v_supply = Some(reader.read(WIDTH_V_SUPPLY));
    }
    Ok(raw)
}

/// Big-endian bit cursor over a byte slice. The total width is
/// bounds-checked by the caller before any read.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read(&mut self, width: usize) -> u16 {
        let mut value = 0u16;
        for _ in 0..width {
            let bit = (self.data[self.pos / 8] >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | u16::from(bit);
            self.pos += 1;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_payload(values: [f32; 4]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_fport_dispatch() {
        assert_eq!(ProtocolVersion::from_fport(1), Some(ProtocolVersion::V1));
        assert_eq!(ProtocolVersion::from_fport(2), Some(ProtocolVersion::V2));
        assert_eq!(ProtocolVersion::from_fport(0), None);
        assert_eq!(ProtocolVersion::from_fport(3), None);
        assert_eq!(ProtocolVersion::from_fport(255), None);
    }

    #[test]
    fn test_decode_v1_recovers_floats_exactly() {
        let values = [12.53f32, -7.25, 58.0625, 3.301];
        let record = decode(ProtocolVersion::V1, &v1_payload(values)).unwrap();
        let raw = match record {
            RawRecord::V1(raw) => raw,
            other => panic!("expected v1 record, got {:?}", other),
        };
        assert_eq!(raw.t_water.to_bits(), values[0].to_bits());
        assert_eq!(raw.t_inside.to_bits(), values[1].to_bits());
        assert_eq!(raw.rh_inside.to_bits(), values[2].to_bits());
        assert_eq!(raw.v_supply.to_bits(), values[3].to_bits());
    }

    #[test]
    fn test_decode_v1_length_mismatch() {
        for len in [0, 1, 15, 17, 32] {
            let payload = vec![0u8; len];
            assert_eq!(
                decode_v1(&payload),
                Err(DecodeError::LengthMismatch {
                    expected: 16,
                    actual: len
                }),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_decode_v2_full_mask() {
        // 12+16+16+12 bits: 0x123, 0x4567, 0x89ab, 0xcde
        let payload = [0x0f, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde];
        let raw = decode_v2(&payload).unwrap();
        assert_eq!(raw.t_water, Some(0x123));
        assert_eq!(raw.t_inside, Some(0x4567));
        assert_eq!(raw.rh_inside, Some(0x89ab));
        assert_eq!(raw.v_supply, Some(0xcde));
    }

    #[test]
    fn test_decode_v2_partial_mask() {
        // Only humidity present: 16 bits follow the mask
        let raw = decode_v2(&[0x04, 0x80, 0x01]).unwrap();
        assert_eq!(raw.t_water, None);
        assert_eq!(raw.t_inside, None);
        assert_eq!(raw.rh_inside, Some(0x8001));
        assert_eq!(raw.v_supply, None);

        // Water temp + voltage: 12+12 bits = 3 bytes
        let raw = decode_v2(&[0x09, 0xab, 0xcd, 0xef]).unwrap();
        assert_eq!(raw.t_water, Some(0xabc));
        assert_eq!(raw.t_inside, None);
        assert_eq!(raw.rh_inside, None);
        assert_eq!(raw.v_supply, Some(0xdef));
    }

    #[test]
    fn test_decode_v2_all_masks_field_presence() {
        for mask in 0u8..16 {
            let mut bits = 0;
            for (bit, width) in [(1u8, 12), (2, 16), (4, 16), (8, 12)] {
                if mask & bit != 0 {
                    bits += width;
                }
            }
            let mut payload = vec![mask];
            payload.extend(std::iter::repeat(0u8).take((bits + 7) / 8));
            let raw = decode_v2(&payload).unwrap();
            assert_eq!(raw.t_water.is_some(), mask & 1 != 0, "mask {:#06b}", mask);
            assert_eq!(raw.t_inside.is_some(), mask & 2 != 0, "mask {:#06b}", mask);
            assert_eq!(raw.rh_inside.is_some(), mask & 4 != 0, "mask {:#06b}", mask);
            assert_eq!(raw.v_supply.is_some(), mask & 8 != 0, "mask {:#06b}", mask);
        }
    }

    #[test]
    fn test_decode_v2_reserved_mask_bits_ignored() {
        // High nibble set, no data bits required
        let raw = decode_v2(&[0xf0]).unwrap();
        assert_eq!(raw, RawV2::default());

        // High nibble set along with the water temp bit
        let raw = decode_v2(&[0xf1, 0x12, 0x30]).unwrap();
        assert_eq!(raw.t_water, Some(0x123));
    }

    #[test]
    fn test_decode_v2_underflow() {
        // Full mask needs 7 bitfield bytes
        let payload = [0x0f, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc];
        assert_eq!(
            decode_v2(&payload),
            Err(DecodeError::BitfieldUnderflow {
                mask: 0x0f,
                needed: 7,
                actual: 6
            })
        );

        // Single 12-bit field with no data bytes at all
        assert_eq!(
            decode_v2(&[0x01]),
            Err(DecodeError::BitfieldUnderflow {
                mask: 0x01,
                needed: 2,
                actual: 0
            })
        );
    }

    #[test]
    fn test_decode_v2_empty_payload() {
        assert_eq!(
            decode_v2(&[]),
            Err(DecodeError::LengthMismatch {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_decode_v2_empty_mask() {
        let raw = decode_v2(&[0x00]).unwrap();
        assert_eq!(raw, RawV2::default());
    }
}
