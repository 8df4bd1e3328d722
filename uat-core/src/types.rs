//! Shared types, error enum, and small helpers for uat-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by uat-core.
#[derive(Debug, Error)]
pub enum UatError {
    #[error("unrecognized sample format: {0}")]
    UnknownSampleFormat(String),
    #[error("invalid frame length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UatError>;

// ---------------------------------------------------------------------------
// Address qualifier
// ---------------------------------------------------------------------------

/// Who a 24-bit UAT address belongs to (HDR address qualifier field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressQualifier {
    AdsbIcao,
    AdsbOther,
    TisbIcao,
    TisbOther,
    TisbTrackfile,
    Vehicle,
    FixedBeacon,
    AdsrOther,
    Reserved,
}

impl AddressQualifier {
    /// Map the 3-bit HDR field onto a qualifier.
    pub fn from_bits(bits: u8) -> AddressQualifier {
        match bits & 0x07 {
            0 => AddressQualifier::AdsbIcao,
            1 => AddressQualifier::AdsbOther,
            2 => AddressQualifier::TisbIcao,
            3 => AddressQualifier::TisbTrackfile,
            4 => AddressQualifier::Vehicle,
            5 => AddressQualifier::FixedBeacon,
            6 => AddressQualifier::AdsrOther,
            _ => AddressQualifier::Reserved,
        }
    }

    /// True for the qualifiers that carry an ICAO-assigned address.
    pub fn is_icao(&self) -> bool {
        matches!(self, AddressQualifier::AdsbIcao | AddressQualifier::TisbIcao)
    }
}

impl std::fmt::Display for AddressQualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AddressQualifier::AdsbIcao => "adsb_icao",
            AddressQualifier::AdsbOther => "adsb_other",
            AddressQualifier::TisbIcao => "tisb_icao",
            AddressQualifier::TisbOther => "tisb_other",
            AddressQualifier::TisbTrackfile => "tisb_trackfile",
            AddressQualifier::Vehicle => "vehicle",
            AddressQualifier::FixedBeacon => "fixed_beacon",
            AddressQualifier::AdsrOther => "adsr_other",
            AddressQualifier::Reserved => "reserved",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

/// Encode bytes as lowercase hex, the way raw message lines are written.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0f) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Round to `dp` decimal places.
pub fn round_n(value: f64, dp: u32) -> f64 {
    let scale = 10f64.powi(dp as i32);
    (value * scale).round() / scale
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        assert_eq!(hex_decode("0a16f8"), Some(vec![0x0a, 0x16, 0xf8]));
        assert_eq!(hex_decode("0A16F8"), Some(vec![0x0a, 0x16, 0xf8]));
        assert_eq!(hex_encode(&[0x0a, 0x16, 0xf8]), "0a16f8");
    }

    #[test]
    fn test_hex_decode_rejects_bad_input() {
        assert_eq!(hex_decode("abc"), None); // odd length
        assert_eq!(hex_decode("zz"), None); // invalid chars
    }

    #[test]
    fn test_address_qualifier_from_bits() {
        assert_eq!(AddressQualifier::from_bits(0), AddressQualifier::AdsbIcao);
        assert_eq!(AddressQualifier::from_bits(3), AddressQualifier::TisbTrackfile);
        assert_eq!(AddressQualifier::from_bits(6), AddressQualifier::AdsrOther);
        assert_eq!(AddressQualifier::from_bits(7), AddressQualifier::Reserved);
        // only the low 3 bits matter
        assert_eq!(AddressQualifier::from_bits(0x08), AddressQualifier::AdsbIcao);
    }

    #[test]
    fn test_address_qualifier_is_icao() {
        assert!(AddressQualifier::AdsbIcao.is_icao());
        assert!(AddressQualifier::TisbIcao.is_icao());
        assert!(!AddressQualifier::Vehicle.is_icao());
    }

    #[test]
    fn test_round_n() {
        assert_eq!(round_n(37.4563837, 5), 37.45638);
        assert_eq!(round_n(-122.1735517, 5), -122.17355);
    }
}
