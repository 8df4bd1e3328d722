//! Decode corrected downlink payloads into typed aviation messages.
//!
//! A downlink payload is a sequence of fixed elements selected by the
//! payload type code in the header:
//!
//! - HDR (bytes 0-3):   payload type, address qualifier, 24-bit address
//! - SV (bytes 4-16):   state vector — position, altitude, velocities
//! - MS (bytes 17-28):  mode status — callsign, emergency, quality metrics
//! - AUXSV (bytes 29-33): the altitude of the type the SV did not carry
//! - TS (5 bytes):      target state — selected altitude/heading, QNH, modes
//!
//! Bit layouts follow DO-282B. Only fields consumed by the tracker and the
//! report writers are decoded.

use serde::Serialize;

use crate::message::{MessageType, RawMessage};
use crate::types::{round_n, AddressQualifier};

// ---------------------------------------------------------------------------
// Field enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirGroundState {
    AirborneSubsonic,
    AirborneSupersonic,
    OnGround,
    Reserved,
}

impl AirGroundState {
    fn from_bits(bits: u8) -> AirGroundState {
        match bits & 0x03 {
            0 => AirGroundState::AirborneSubsonic,
            1 => AirGroundState::AirborneSupersonic,
            2 => AirGroundState::OnGround,
            _ => AirGroundState::Reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyPriorityStatus {
    None,
    General,
    Medical,
    MinFuel,
    NoComm,
    Unlawful,
    Downed,
    Reserved,
}

impl EmergencyPriorityStatus {
    fn from_bits(bits: u8) -> EmergencyPriorityStatus {
        match bits & 0x07 {
            0 => EmergencyPriorityStatus::None,
            1 => EmergencyPriorityStatus::General,
            2 => EmergencyPriorityStatus::Medical,
            3 => EmergencyPriorityStatus::MinFuel,
            4 => EmergencyPriorityStatus::NoComm,
            5 => EmergencyPriorityStatus::Unlawful,
            6 => EmergencyPriorityStatus::Downed,
            _ => EmergencyPriorityStatus::Reserved,
        }
    }

    /// Lowercase name used by the TSV report.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyPriorityStatus::None => "none",
            EmergencyPriorityStatus::General => "general",
            EmergencyPriorityStatus::Medical => "medical",
            EmergencyPriorityStatus::MinFuel => "minfuel",
            EmergencyPriorityStatus::NoComm => "nordo",
            EmergencyPriorityStatus::Unlawful => "unlawful",
            EmergencyPriorityStatus::Downed => "downed",
            EmergencyPriorityStatus::Reserved => "reserved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SilSupplement {
    PerHour,
    PerSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedAltitudeType {
    Mcp,
    Fms,
}

/// Autopilot mode indicator bits from the target state element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeIndicators {
    pub autopilot: bool,
    pub vnav: bool,
    pub altitude_hold: bool,
    pub approach: bool,
    pub lnav: bool,
}

// ---------------------------------------------------------------------------
// Lookup tables
// ---------------------------------------------------------------------------

/// A/V length and width in meters by the on-ground size code (DO-282B
/// Table 2-35). Code 0 means no data.
const AIRCRAFT_SIZES: [Option<(f64, f64)>; 16] = [
    None,
    Some((15.0, 23.0)),
    Some((25.0, 28.5)),
    Some((25.0, 34.0)),
    Some((35.0, 33.0)),
    Some((35.0, 38.0)),
    Some((45.0, 39.5)),
    Some((45.0, 45.0)),
    Some((55.0, 45.0)),
    Some((55.0, 52.0)),
    Some((65.0, 59.5)),
    Some((65.0, 67.0)),
    Some((75.0, 72.5)),
    Some((75.0, 80.0)),
    Some((85.0, 80.0)),
    Some((85.0, 90.0)),
];

/// Horizontal containment radius in meters by NIC.
const CONTAINMENT_RADIUS: [Option<f64>; 16] = [
    None,
    Some(37040.0),
    Some(14816.0),
    Some(7408.0),
    Some(3704.0),
    Some(1852.0),
    Some(1111.2),
    Some(370.4),
    Some(185.2),
    Some(75.0),
    Some(25.0),
    Some(7.5),
    None,
    None,
    None,
    None,
];

/// Base-40 character set for callsign and flight plan ID fields.
const BASE40_ALPHABET: &[u8; 40] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ  ..";

// ---------------------------------------------------------------------------
// AdsbMessage
// ---------------------------------------------------------------------------

/// A decoded downlink message. Fields are None when the transmitting unit
/// did not provide them (or the payload type does not carry the element).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdsbMessage {
    pub payload_type: u8,
    pub address_qualifier: AddressQualifier,
    /// 24-bit address; meaning depends on the qualifier.
    pub address: u32,
    pub received_at: u64,
    pub errors: usize,
    #[serde(skip_serializing_if = "rssi_is_zero")]
    pub rssi: f64,

    // state vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometric_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_containment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airground_state: Option<AirGroundState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub north_velocity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub east_velocity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnetic_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_velocity_barometric: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_velocity_geometric: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_coupled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_size: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_lateral_offset: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_longitudinal_offset: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_position_offset_applied: Option<bool>,

    // mode status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emitter_category: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    /// Flight plan ID, aka the Mode 3/A squawk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flightplan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<EmergencyPriorityStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mops_version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sil: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmit_mso: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sda: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_p: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_v: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_baro: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_codes: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operational_modes: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sil_supplement: Option<SilSupplement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gva: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_antenna: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_supplement: Option<bool>,

    // target state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_altitude_type: Option<SelectedAltitudeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barometric_pressure_setting: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_indicators: Option<ModeIndicators>,
}

fn rssi_is_zero(rssi: &f64) -> bool {
    *rssi == 0.0
}

impl AdsbMessage {
    /// Decode a corrected downlink message. Returns None for uplink or
    /// invalid payload lengths.
    pub fn from_raw(raw: &RawMessage) -> Option<AdsbMessage> {
        let is_long = match raw.message_type() {
            MessageType::DownlinkShort => false,
            MessageType::DownlinkLong => true,
            _ => return None,
        };

        let payload = &raw.payload;
        let mut message = AdsbMessage::empty(raw);

        message.payload_type = (payload[0] >> 3) & 0x1f;
        message.address_qualifier = AddressQualifier::from_bits(payload[0]);
        message.address =
            ((payload[1] as u32) << 16) | ((payload[2] as u32) << 8) | payload[3] as u32;

        message.decode_sv(payload);

        if is_long {
            match message.payload_type {
                1 => {
                    message.decode_ms(payload);
                    message.decode_auxsv(payload);
                }
                2 | 5 | 6 => message.decode_auxsv(payload),
                3 => {
                    message.decode_ms(payload);
                    message.decode_ts(payload, 29);
                }
                4 => message.decode_ts(payload, 24),
                _ => {}
            }
        }

        Some(message)
    }

    fn empty(raw: &RawMessage) -> AdsbMessage {
        AdsbMessage {
            payload_type: 0,
            address_qualifier: AddressQualifier::Reserved,
            address: 0,
            received_at: raw.received_at,
            errors: raw.errors,
            rssi: raw.rssi,
            position: None,
            pressure_altitude: None,
            geometric_altitude: None,
            nic: None,
            horizontal_containment: None,
            airground_state: None,
            north_velocity: None,
            east_velocity: None,
            ground_speed: None,
            true_track: None,
            magnetic_heading: None,
            true_heading: None,
            vertical_velocity_barometric: None,
            vertical_velocity_geometric: None,
            utc_coupled: None,
            aircraft_size: None,
            gps_lateral_offset: None,
            gps_longitudinal_offset: None,
            gps_position_offset_applied: None,
            emitter_category: None,
            callsign: None,
            flightplan_id: None,
            emergency: None,
            mops_version: None,
            sil: None,
            transmit_mso: None,
            sda: None,
            nac_p: None,
            nac_v: None,
            nic_baro: None,
            capability_codes: None,
            operational_modes: None,
            sil_supplement: None,
            gva: None,
            single_antenna: None,
            nic_supplement: None,
            selected_altitude_type: None,
            selected_altitude: None,
            barometric_pressure_setting: None,
            selected_heading: None,
            mode_indicators: None,
        }
    }

    // -- state vector (bytes 4..16) ---------------------------------------

    fn decode_sv(&mut self, p: &[u8]) {
        let nic = p[11] & 0x0f;
        self.nic = Some(nic);
        self.horizontal_containment = CONTAINMENT_RADIUS[nic as usize];

        let raw_lat =
            ((p[4] as u32) << 15) | ((p[5] as u32) << 7) | ((p[6] as u32) >> 1);
        let raw_lon = (((p[6] & 1) as u32) << 23)
            | ((p[7] as u32) << 15)
            | ((p[8] as u32) << 7)
            | ((p[9] as u32) >> 1);
        if nic != 0 || raw_lat != 0 || raw_lon != 0 {
            let mut lat = raw_lat as f64 * 360.0 / 16777216.0;
            if lat > 90.0 {
                lat -= 180.0;
            }
            let mut lon = raw_lon as f64 * 360.0 / 16777216.0;
            if lon > 180.0 {
                lon -= 360.0;
            }
            self.position = Some((round_n(lat, 5), round_n(lon, 5)));
        }

        let raw_alt = ((p[10] as u32) << 4) | ((p[11] as u32 & 0xf0) >> 4);
        if raw_alt != 0 {
            let altitude = (raw_alt as i32 - 41) * 25;
            if p[9] & 1 != 0 {
                self.geometric_altitude = Some(altitude);
            } else {
                self.pressure_altitude = Some(altitude);
            }
        }

        let airground = AirGroundState::from_bits(p[12] >> 6);
        self.airground_state = Some(airground);

        match airground {
            AirGroundState::AirborneSubsonic | AirGroundState::AirborneSupersonic => {
                let supersonic = airground == AirGroundState::AirborneSupersonic;
                self.decode_airborne_velocity(p, supersonic);
                self.utc_coupled = Some(p[16] & 0x08 != 0);
            }
            AirGroundState::OnGround => self.decode_ground_movement(p),
            AirGroundState::Reserved => {}
        }
    }

    fn decode_airborne_velocity(&mut self, p: &[u8], supersonic: bool) {
        let scale: i32 = if supersonic { 4 } else { 1 };

        let raw_ns = (((p[12] & 0x1f) as u32) << 6) | (((p[13] & 0xfc) as u32) >> 2);
        if raw_ns & 0x3ff != 0 {
            let mut velocity = ((raw_ns & 0x3ff) as i32 - 1) * scale;
            if raw_ns & 0x400 != 0 {
                velocity = -velocity;
            }
            self.north_velocity = Some(velocity);
        }

        let raw_ew = (((p[13] & 0x03) as u32) << 9)
            | ((p[14] as u32) << 1)
            | (((p[15] & 0x80) as u32) >> 7);
        if raw_ew & 0x3ff != 0 {
            let mut velocity = ((raw_ew & 0x3ff) as i32 - 1) * scale;
            if raw_ew & 0x400 != 0 {
                velocity = -velocity;
            }
            self.east_velocity = Some(velocity);
        }

        if let (Some(n), Some(e)) = (self.north_velocity, self.east_velocity) {
            let (n, e) = (n as f64, e as f64);
            self.ground_speed = Some((n * n + e * e).sqrt().round() as u32);
            if n != 0.0 || e != 0.0 {
                let degrees = n.atan2(e).to_degrees().round() as i32;
                self.true_track = Some(((360 + 90 - degrees) % 360) as f64);
            }
        }

        let raw_vvel = (((p[15] & 0x7f) as u32) << 4) | (((p[16] & 0xf0) as u32) >> 4);
        if raw_vvel & 0x1ff != 0 {
            let mut velocity = ((raw_vvel & 0x1ff) as i32 - 1) * 64;
            if raw_vvel & 0x200 != 0 {
                velocity = -velocity;
            }
            if raw_vvel & 0x400 != 0 {
                self.vertical_velocity_barometric = Some(velocity);
            } else {
                self.vertical_velocity_geometric = Some(velocity);
            }
        }
    }

    fn decode_ground_movement(&mut self, p: &[u8]) {
        let raw_gs = (((p[12] & 0x1f) as u32) << 6) | (((p[13] & 0xfc) as u32) >> 2);
        if raw_gs & 0x3ff != 0 {
            self.ground_speed = Some((raw_gs & 0x3ff) - 1);
        }

        let raw_track = (((p[13] & 0x03) as u32) << 9)
            | ((p[14] as u32) << 1)
            | (((p[15] & 0x80) as u32) >> 7);
        let angle = (raw_track & 0x1ff) as f64 * 360.0 / 512.0;
        match (raw_track >> 9) & 0x03 {
            1 => self.true_track = Some(angle),
            2 => self.magnetic_heading = Some(angle),
            3 => self.true_heading = Some(angle),
            _ => {} // track/heading not available
        }

        let raw_size = ((p[15] >> 3) & 0x0f) as usize;
        self.aircraft_size = AIRCRAFT_SIZES[raw_size];

        match (p[16] >> 5) & 0x07 {
            0 => {} // no data
            4 => self.gps_lateral_offset = Some(0),
            code @ 1..=3 => self.gps_lateral_offset = Some(code as i32 * 2),
            code => self.gps_lateral_offset = Some(-((code as i32 - 4) * 2)),
        }
        match p[16] & 0x1f {
            0 => {} // no data
            1 => self.gps_position_offset_applied = Some(true),
            code => {
                self.gps_longitudinal_offset = Some((code as i32 - 1) * 2);
                self.gps_position_offset_applied = Some(false);
            }
        }
    }

    // -- mode status (bytes 17..28) ---------------------------------------

    fn decode_ms(&mut self, p: &[u8]) {
        let b1 = ((p[17] as u32) << 8) | p[18] as u32;
        let b2 = ((p[19] as u32) << 8) | p[20] as u32;
        let b3 = ((p[21] as u32) << 8) | p[22] as u32;

        self.emitter_category = Some(((b1 / 1600) % 40) as u8);

        let mut callsign = String::with_capacity(8);
        for chunk in [b1 / 40 % 40, b1 % 40, b2 / 1600 % 40, b2 / 40 % 40, b2 % 40,
            b3 / 1600 % 40, b3 / 40 % 40, b3 % 40]
        {
            callsign.push(BASE40_ALPHABET[chunk as usize] as char);
        }
        let trimmed = callsign.trim();

        let csid = (p[26] >> 1) & 1 != 0;
        if !trimmed.is_empty() {
            if csid {
                self.callsign = Some(trimmed.to_string());
            } else {
                self.flightplan_id = Some(trimmed.to_string());
            }
        }

        self.emergency = Some(EmergencyPriorityStatus::from_bits(p[23] >> 5));
        self.mops_version = Some((p[23] >> 2) & 0x07);
        self.sil = Some(p[23] & 0x03);
        self.transmit_mso = Some((p[24] >> 2) & 0x3f);
        self.sda = Some(p[24] & 0x03);
        self.nac_p = Some((p[25] >> 4) & 0x0f);
        self.nac_v = Some((p[25] >> 1) & 0x07);
        self.nic_baro = Some(p[25] & 0x01);
        self.capability_codes = Some((p[26] >> 6) & 0x03);
        self.operational_modes = Some((p[26] >> 3) & 0x07);
        self.sil_supplement = Some(if (p[26] >> 2) & 1 != 0 {
            SilSupplement::PerSample
        } else {
            SilSupplement::PerHour
        });
        self.gva = Some((p[27] >> 6) & 0x03);
        self.single_antenna = Some((p[27] >> 5) & 1 != 0);
        self.nic_supplement = Some((p[27] >> 4) & 1 != 0);
    }

    // -- auxiliary state vector (bytes 29..33) ----------------------------

    fn decode_auxsv(&mut self, p: &[u8]) {
        let raw_alt = ((p[29] as u32) << 4) | ((p[30] as u32 & 0xf0) >> 4);
        if raw_alt != 0 {
            let altitude = (raw_alt as i32 - 41) * 25;
            // the secondary altitude is of the type the SV did not carry
            if p[9] & 1 != 0 {
                self.pressure_altitude = Some(altitude);
            } else {
                self.geometric_altitude = Some(altitude);
            }
        }
    }

    // -- target state (5 bytes at `start`) --------------------------------

    fn decode_ts(&mut self, p: &[u8], start: usize) {
        let s = &p[start..start + 5];

        self.selected_altitude_type = Some(if s[0] & 0x80 != 0 {
            SelectedAltitudeType::Fms
        } else {
            SelectedAltitudeType::Mcp
        });

        let raw_alt = (((s[0] & 0x7f) as u32) << 4) | ((s[1] as u32) >> 4);
        if raw_alt != 0 {
            self.selected_altitude = Some((raw_alt as i32 - 1) * 32);
        }

        let raw_qnh = (((s[1] & 0x0f) as u32) << 5) | ((s[2] as u32) >> 3);
        if raw_qnh != 0 {
            self.barometric_pressure_setting = Some(800.0 + (raw_qnh as f64 - 1.0) * 0.8);
        }

        let raw_heading = (((s[2] & 0x07) as u32) << 6) | ((s[3] as u32) >> 2);
        if raw_heading != 0 {
            self.selected_heading = Some((raw_heading as f64 - 1.0) * 360.0 / 512.0);
        }

        self.mode_indicators = Some(ModeIndicators {
            autopilot: s[4] & 0x80 != 0,
            vnav: s[4] & 0x40 != 0,
            altitude_hold: s[4] & 0x20 != 0,
            approach: s[4] & 0x10 != 0,
            lnav: s[4] & 0x08 != 0,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
