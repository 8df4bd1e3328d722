//! Raw UAT messages and the line-oriented text format used to exchange them.
//!
//! One message per line: `-HEX;` for downlink, `+HEX;` for uplink, followed
//! by zero or more `;`-terminated key=value pairs. Recognized keys are `rs`
//! (corrected symbol count), `rssi` (dB), and `t` (seconds since the Unix
//! epoch, stored as milliseconds). Unknown keys are ignored.

use tracing::warn;

use crate::protocol::*;
use crate::types::{hex_decode, hex_encode};

/// Frame shape, derived from the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    DownlinkShort,
    DownlinkLong,
    Uplink,
    Invalid,
}

/// An error-corrected frame with its reception metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// FEC-corrected data bytes (parity removed).
    pub payload: Vec<u8>,
    /// Milliseconds since the Unix epoch at the start of the frame.
    pub received_at: u64,
    /// Symbols corrected by the FEC.
    pub errors: usize,
    /// Received signal strength, dB. 0 when unknown.
    pub rssi: f64,
}

impl RawMessage {
    pub fn new(payload: Vec<u8>, received_at: u64, errors: usize, rssi: f64) -> Self {
        RawMessage {
            payload,
            received_at,
            errors,
            rssi,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self.payload.len() {
            DOWNLINK_SHORT_DATA_BYTES => MessageType::DownlinkShort,
            DOWNLINK_LONG_DATA_BYTES => MessageType::DownlinkLong,
            UPLINK_DATA_BYTES => MessageType::Uplink,
            _ => MessageType::Invalid,
        }
    }

    pub fn is_downlink(&self) -> bool {
        matches!(
            self.message_type(),
            MessageType::DownlinkShort | MessageType::DownlinkLong
        )
    }

    /// On-air bit length of this frame shape, sync word excluded.
    pub fn bit_length(&self) -> usize {
        match self.message_type() {
            MessageType::DownlinkShort => DOWNLINK_SHORT_BITS,
            MessageType::DownlinkLong => DOWNLINK_LONG_BITS,
            MessageType::Uplink => UPLINK_BITS,
            MessageType::Invalid => 0,
        }
    }

    /// Parse one text line. Returns None (after logging) for malformed input.
    pub fn parse_line(line: &str) -> Option<RawMessage> {
        match Self::parse_line_inner(line) {
            Some(message) => Some(message),
            None => {
                warn!("failed to parse input line: {line:?}");
                None
            }
        }
    }

    fn parse_line_inner(line: &str) -> Option<RawMessage> {
        let bytes = line.as_bytes();
        if bytes.len() < 2 || (bytes[0] != b'-' && bytes[0] != b'+') {
            return None;
        }

        let eod = line.find(';')?;
        let payload = hex_decode(&line[1..eod])?;

        let mut rs = 0usize;
        let mut rssi = 0.0f64;
        let mut t = 0u64;

        let mut rest = &line[eod + 1..];
        while let (Some(equals), Some(semicolon)) = (rest.find('='), rest.find(';')) {
            if semicolon < equals {
                break;
            }
            let key = &rest[..equals];
            let value = &rest[equals + 1..semicolon];
            match key {
                "rs" => rs = value.parse().unwrap_or(0),
                "rssi" => rssi = value.parse().unwrap_or(0.0),
                "t" => {
                    t = value
                        .parse::<f64>()
                        .map(|secs| (secs * 1000.0).round() as u64)
                        .unwrap_or(0)
                }
                _ => {} // unrecognized keys are ignored
            }
            rest = &rest[semicolon + 1..];
        }

        Some(RawMessage::new(payload, t, rs, rssi))
    }
}

impl std::fmt::Display for RawMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.message_type() {
            MessageType::DownlinkShort | MessageType::DownlinkLong => '-',
            MessageType::Uplink => '+',
            MessageType::Invalid => return Err(std::fmt::Error),
        };
        write!(f, "{}{};", prefix, hex_encode(&self.payload))?;
        if self.errors > 0 {
            write!(f, "rs={};", self.errors)?;
        }
        if self.rssi != 0.0 {
            write!(f, "rssi={:.1};", self.rssi)?;
        }
        if self.received_at > 0 {
            write!(
                f,
                "t={}.{:03};",
                self.received_at / 1000,
                self.received_at % 1000
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn short_message() -> RawMessage {
        RawMessage::new(vec![0x0b; DOWNLINK_SHORT_DATA_BYTES], 1_556_579_967_988, 2, -14.5)
    }

    #[test]
    fn test_message_type_from_length() {
        assert_eq!(
            RawMessage::new(vec![0; 18], 0, 0, 0.0).message_type(),
            MessageType::DownlinkShort
        );
        assert_eq!(
            RawMessage::new(vec![0; 34], 0, 0, 0.0).message_type(),
            MessageType::DownlinkLong
        );
        assert_eq!(
            RawMessage::new(vec![0; 432], 0, 0, 0.0).message_type(),
            MessageType::Uplink
        );
        assert_eq!(
            RawMessage::new(vec![0; 20], 0, 0, 0.0).message_type(),
            MessageType::Invalid
        );
    }

    #[test]
    fn test_bit_lengths() {
        assert_eq!(RawMessage::new(vec![0; 18], 0, 0, 0.0).bit_length(), 240);
        assert_eq!(RawMessage::new(vec![0; 34], 0, 0, 0.0).bit_length(), 384);
        assert_eq!(RawMessage::new(vec![0; 432], 0, 0, 0.0).bit_length(), 4416);
    }

    #[test]
    fn test_parse_downlink_line() {
        let line = "-0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b;rs=2;rssi=-14.5;t=1556579967.988;";
        let message = RawMessage::parse_line(line).unwrap();
        assert_eq!(message.payload, vec![0x0b; 18]);
        assert_eq!(message.errors, 2);
        assert_eq!(message.rssi, -14.5);
        assert_eq!(message.received_at, 1_556_579_967_988);
        assert_eq!(message.message_type(), MessageType::DownlinkShort);
    }

    #[test]
    fn test_parse_uplink_prefix() {
        let line = format!("+{};", "00".repeat(432));
        let message = RawMessage::parse_line(&line).unwrap();
        assert_eq!(message.message_type(), MessageType::Uplink);
        assert_eq!(message.errors, 0);
        assert_eq!(message.received_at, 0);
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let line = "-0102;mystery=42;rs=1;";
        let message = RawMessage::parse_line(line).unwrap();
        assert_eq!(message.payload, vec![0x01, 0x02]);
        assert_eq!(message.errors, 1);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(RawMessage::parse_line("").is_none());
        assert!(RawMessage::parse_line("-").is_none());
        assert!(RawMessage::parse_line("*0102;").is_none()); // wrong prefix
        assert!(RawMessage::parse_line("-0102").is_none()); // missing semicolon
        assert!(RawMessage::parse_line("-010;").is_none()); // odd hex length
        assert!(RawMessage::parse_line("-01zz;").is_none()); // bad hex
    }

    #[test]
    fn test_parse_stops_at_trailing_garbage() {
        // a key without '=' before ';' ends key-value parsing
        let line = "-0102;rs=3;garbage;rssi=-1.0;";
        let message = RawMessage::parse_line(line).unwrap();
        assert_eq!(message.errors, 3);
        assert_eq!(message.rssi, 0.0);
    }

    #[test]
    fn test_display_roundtrip() {
        let message = short_message();
        let line = message.to_string();
        assert!(line.starts_with('-'));
        assert!(line.ends_with(';'));
        let parsed = RawMessage::parse_line(&line).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_display_omits_zero_fields() {
        let message = RawMessage::new(vec![0xab; 18], 0, 0, 0.0);
        assert_eq!(message.to_string(), format!("-{};", "ab".repeat(18)));
    }

    #[test]
    fn test_t_key_rounds_to_milliseconds() {
        let message = RawMessage::parse_line("-0102;t=12.3456;").unwrap();
        assert_eq!(message.received_at, 12_346);
    }
}
