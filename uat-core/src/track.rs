//! Per-aircraft state fused from decoded downlink messages.
//!
//! Pure logic — no I/O, no timers. The caller feeds message batches and
//! drives the periodic purge; `purge_interval()` says how often.
//!
//! Every tracked quantity is an `AgedField`: the value plus the timestamps
//! of its last restatement and its last actual change. Consumers use the
//! two timestamps to decide what is fresh enough to report.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use crate::adsb::{
    AdsbMessage, AirGroundState, EmergencyPriorityStatus, ModeIndicators, SelectedAltitudeType,
    SilSupplement,
};
use crate::message::RawMessage;
use crate::types::AddressQualifier;

// ---------------------------------------------------------------------------
// Aged fields
// ---------------------------------------------------------------------------

/// A value plus the timestamps of its last update and last change.
///
/// "Updated" means a message restated the value; "changed" means the
/// restated value differed from what was stored.
#[derive(Debug, Clone)]
pub struct AgedField<T> {
    value: Option<T>,
    updated: u64,
    changed: u64,
}

impl<T: PartialEq> AgedField<T> {
    pub fn new() -> Self {
        AgedField {
            value: None,
            updated: 0,
            changed: 0,
        }
    }

    /// Record a restatement of the field at time `at`.
    pub fn maybe_update(&mut self, at: u64, value: T) {
        if self.value.as_ref() != Some(&value) {
            self.changed = at;
        }
        self.updated = at;
        self.value = Some(value);
    }

    /// True once the field has ever been set.
    pub fn valid(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Time of the last restatement.
    pub fn updated(&self) -> u64 {
        self.updated
    }

    /// Time of the last value change.
    pub fn changed(&self) -> u64 {
        self.changed
    }

    /// Milliseconds since the last restatement. Effectively infinite for a
    /// field that has never been set.
    pub fn update_age(&self, now: u64) -> u64 {
        if self.valid() {
            now.saturating_sub(self.updated)
        } else {
            u64::MAX
        }
    }
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// Number of recent RSSI readings kept for the snapshot average.
const RSSI_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct AircraftState {
    pub address_qualifier: AddressQualifier,
    pub address: u32,

    pub position: AgedField<(f64, f64)>,
    pub pressure_altitude: AgedField<i32>,
    pub geometric_altitude: AgedField<i32>,
    pub nic: AgedField<u8>,
    pub horizontal_containment: AgedField<f64>,
    pub airground_state: AgedField<AirGroundState>,
    pub north_velocity: AgedField<i32>,
    pub east_velocity: AgedField<i32>,
    pub vertical_velocity_barometric: AgedField<i32>,
    pub vertical_velocity_geometric: AgedField<i32>,
    pub ground_speed: AgedField<u32>,
    pub magnetic_heading: AgedField<f64>,
    pub true_heading: AgedField<f64>,
    pub true_track: AgedField<f64>,
    pub aircraft_size: AgedField<(f64, f64)>,
    pub gps_lateral_offset: AgedField<i32>,
    pub gps_longitudinal_offset: AgedField<i32>,
    pub gps_position_offset_applied: AgedField<bool>,
    pub utc_coupled: AgedField<bool>,

    pub emitter_category: AgedField<u8>,
    pub callsign: AgedField<String>,
    pub flightplan_id: AgedField<String>,
    pub emergency: AgedField<EmergencyPriorityStatus>,
    pub mops_version: AgedField<u8>,
    pub sil: AgedField<u8>,
    pub transmit_mso: AgedField<u8>,
    pub sda: AgedField<u8>,
    pub nac_p: AgedField<u8>,
    pub nac_v: AgedField<u8>,
    pub nic_baro: AgedField<u8>,
    pub capability_codes: AgedField<u8>,
    pub operational_modes: AgedField<u8>,
    pub sil_supplement: AgedField<SilSupplement>,
    pub gva: AgedField<u8>,
    pub single_antenna: AgedField<bool>,
    pub nic_supplement: AgedField<bool>,

    pub selected_altitude_type: AgedField<SelectedAltitudeType>,
    pub selected_altitude: AgedField<i32>,
    pub barometric_pressure_setting: AgedField<f64>,
    pub selected_heading: AgedField<f64>,
    pub mode_indicators: AgedField<ModeIndicators>,

    pub messages: u64,
    pub last_message_time: u64,
    recent_rssi: VecDeque<f64>,
}

impl AircraftState {
    pub fn new(address_qualifier: AddressQualifier, address: u32) -> Self {
        AircraftState {
            address_qualifier,
            address,
            position: AgedField::new(),
            pressure_altitude: AgedField::new(),
            geometric_altitude: AgedField::new(),
            nic: AgedField::new(),
            horizontal_containment: AgedField::new(),
            airground_state: AgedField::new(),
            north_velocity: AgedField::new(),
            east_velocity: AgedField::new(),
            vertical_velocity_barometric: AgedField::new(),
            vertical_velocity_geometric: AgedField::new(),
            ground_speed: AgedField::new(),
            magnetic_heading: AgedField::new(),
            true_heading: AgedField::new(),
            true_track: AgedField::new(),
            aircraft_size: AgedField::new(),
            gps_lateral_offset: AgedField::new(),
            gps_longitudinal_offset: AgedField::new(),
            gps_position_offset_applied: AgedField::new(),
            utc_coupled: AgedField::new(),
            emitter_category: AgedField::new(),
            callsign: AgedField::new(),
            flightplan_id: AgedField::new(),
            emergency: AgedField::new(),
            mops_version: AgedField::new(),
            sil: AgedField::new(),
            transmit_mso: AgedField::new(),
            sda: AgedField::new(),
            nac_p: AgedField::new(),
            nac_v: AgedField::new(),
            nic_baro: AgedField::new(),
            capability_codes: AgedField::new(),
            operational_modes: AgedField::new(),
            sil_supplement: AgedField::new(),
            gva: AgedField::new(),
            single_antenna: AgedField::new(),
            nic_supplement: AgedField::new(),
            selected_altitude_type: AgedField::new(),
            selected_altitude: AgedField::new(),
            barometric_pressure_setting: AgedField::new(),
            selected_heading: AgedField::new(),
            mode_indicators: AgedField::new(),
            messages: 0,
            last_message_time: 0,
            recent_rssi: VecDeque::with_capacity(RSSI_WINDOW),
        }
    }

    /// Fold one decoded message into the state at time `at`.
    pub fn update_from_message(&mut self, at: u64, message: &AdsbMessage) {
        macro_rules! update {
            ($field:ident) => {
                if let Some(value) = message.$field.clone() {
                    self.$field.maybe_update(at, value);
                }
            };
        }

        update!(position);
        update!(pressure_altitude);
        update!(geometric_altitude);
        update!(nic);
        update!(horizontal_containment);
        update!(airground_state);
        update!(north_velocity);
        update!(east_velocity);
        update!(vertical_velocity_barometric);
        update!(vertical_velocity_geometric);
        update!(ground_speed);
        update!(magnetic_heading);
        update!(true_heading);
        update!(true_track);
        update!(aircraft_size);
        update!(gps_lateral_offset);
        update!(gps_longitudinal_offset);
        update!(gps_position_offset_applied);
        update!(utc_coupled);

        update!(emitter_category);
        update!(callsign);
        update!(flightplan_id);
        update!(emergency);
        update!(mops_version);
        update!(sil);
        update!(transmit_mso);
        update!(sda);
        update!(nac_p);
        update!(nac_v);
        update!(nic_baro);
        update!(capability_codes);
        update!(operational_modes);
        update!(sil_supplement);
        update!(gva);
        update!(single_antenna);
        update!(nic_supplement);

        update!(selected_altitude_type);
        update!(selected_altitude);
        update!(barometric_pressure_setting);
        update!(selected_heading);
        update!(mode_indicators);

        self.messages += 1;
        self.last_message_time = self.last_message_time.max(at);
        if message.rssi != 0.0 {
            if self.recent_rssi.len() == RSSI_WINDOW {
                self.recent_rssi.pop_front();
            }
            self.recent_rssi.push_back(message.rssi);
        }
    }

    /// Mean of the recent RSSI readings; 0 when none were reported.
    pub fn average_rssi(&self) -> f64 {
        if self.recent_rssi.is_empty() {
            return 0.0;
        }
        self.recent_rssi.iter().sum::<f64>() / self.recent_rssi.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub type AddressKey = (AddressQualifier, u32);

/// Address-keyed aircraft map with age-based expiry.
pub struct Tracker {
    aircraft: HashMap<AddressKey, AircraftState>,
    timeout: Duration,
    total_messages: u64,
}

impl Tracker {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(timeout: Duration) -> Self {
        Tracker {
            aircraft: HashMap::new(),
            timeout,
            total_messages: 0,
        }
    }

    pub fn aircraft(&self) -> &HashMap<AddressKey, AircraftState> {
        &self.aircraft
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    /// How often the caller should run `purge_old`.
    pub fn purge_interval(&self) -> Duration {
        self.timeout / 4
    }

    /// Fold a batch of raw messages into the map; uplink and invalid
    /// messages are ignored.
    pub fn handle_messages(&mut self, messages: &[RawMessage]) {
        for raw in messages {
            if !raw.is_downlink() {
                continue;
            }
            if let Some(message) = AdsbMessage::from_raw(raw) {
                self.handle_message(raw.received_at, &message);
            }
        }
    }

    /// Fold one decoded message into the map at time `at`.
    pub fn handle_message(&mut self, at: u64, message: &AdsbMessage) {
        let key = (message.address_qualifier, message.address);
        let state = self.aircraft.entry(key).or_insert_with(|| {
            debug!(
                "new aircraft: {}/{:06x}",
                message.address_qualifier, message.address
            );
            AircraftState::new(message.address_qualifier, message.address)
        });
        state.update_from_message(at, message);
        self.total_messages += 1;
    }

    /// Drop every aircraft whose last message is older than the timeout.
    /// Returns the number removed.
    pub fn purge_old(&mut self, now: u64) -> usize {
        let expiry = now.saturating_sub(self.timeout.as_millis() as u64);
        let before = self.aircraft.len();
        self.aircraft
            .retain(|_, state| state.last_message_time >= expiry);
        let removed = before - self.aircraft.len();
        if removed > 0 {
            debug!("expired {removed} aircraft, {} remain", self.aircraft.len());
        }
        removed
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Tracker::new(Tracker::DEFAULT_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn message(address: u32, callsign: Option<&str>) -> AdsbMessage {
        let mut payload = vec![0u8; 34];
        payload[0] = 0x08; // payload type 1, ADS-B ICAO
        payload[1] = (address >> 16) as u8;
        payload[2] = (address >> 8) as u8;
        payload[3] = address as u8;
        let raw = RawMessage::new(payload, 0, 0, 0.0);
        let mut message = AdsbMessage::from_raw(&raw).unwrap();
        message.callsign = callsign.map(str::to_string);
        message
    }

    #[test]
    fn test_aged_field_initial_set() {
        let mut field = AgedField::new();
        assert!(!field.valid());
        field.maybe_update(100, 42);
        assert!(field.valid());
        assert_eq!(field.value(), Some(&42));
        assert_eq!(field.updated(), 100);
        assert_eq!(field.changed(), 100);
    }

    #[test]
    fn test_aged_field_restatement_vs_change() {
        let mut field = AgedField::new();
        field.maybe_update(0, "N123".to_string());
        assert_eq!((field.updated(), field.changed()), (0, 0));

        // same value restated: updated moves, changed does not
        field.maybe_update(5_000, "N123".to_string());
        assert_eq!((field.updated(), field.changed()), (5_000, 0));

        // different value: both move
        field.maybe_update(10_000, "N124".to_string());
        assert_eq!((field.updated(), field.changed()), (10_000, 10_000));
    }

    #[test]
    fn test_aged_field_update_age() {
        let mut field = AgedField::new();
        assert_eq!(field.update_age(1_000), u64::MAX);
        field.maybe_update(1_000, 7u8);
        assert_eq!(field.update_age(4_500), 3_500);
    }

    #[test]
    fn test_tracker_creates_aircraft() {
        let mut tracker = Tracker::default();
        tracker.handle_message(1_000, &message(0xa6629f, Some("NDU10")));

        let key = (AddressQualifier::AdsbIcao, 0xa6629f);
        let state = &tracker.aircraft()[&key];
        assert_eq!(state.callsign.value().map(String::as_str), Some("NDU10"));
        assert_eq!(state.messages, 1);
        assert_eq!(state.last_message_time, 1_000);
        assert_eq!(tracker.total_messages(), 1);
    }

    #[test]
    fn test_tracker_distinct_qualifiers_are_distinct_aircraft() {
        let mut tracker = Tracker::default();
        let mut tisb = message(0x2b03c8, None);
        tisb.address_qualifier = AddressQualifier::TisbTrackfile;
        tracker.handle_message(1_000, &message(0x2b03c8, None));
        tracker.handle_message(1_000, &tisb);
        assert_eq!(tracker.aircraft().len(), 2);
    }

    #[test]
    fn test_last_message_time_is_monotonic() {
        let mut tracker = Tracker::default();
        tracker.handle_message(5_000, &message(0x000001, None));
        tracker.handle_message(3_000, &message(0x000001, None)); // out of order
        let state = &tracker.aircraft()[&(AddressQualifier::AdsbIcao, 1)];
        assert_eq!(state.last_message_time, 5_000);
        assert_eq!(state.messages, 2);
    }

    #[test]
    fn test_field_timestamps_bounded_by_last_message_time() {
        let mut tracker = Tracker::default();
        tracker.handle_message(2_000, &message(0x000002, Some("TEST")));
        let state = &tracker.aircraft()[&(AddressQualifier::AdsbIcao, 2)];
        assert!(state.callsign.changed() <= state.callsign.updated());
        assert!(state.callsign.updated() <= state.last_message_time);
    }

    #[test]
    fn test_purge_removes_exactly_the_stale() {
        let mut tracker = Tracker::new(Duration::from_secs(300));
        tracker.handle_message(0, &message(0x000001, None));
        tracker.handle_message(100_000, &message(0x000002, None));
        tracker.handle_message(301_000, &message(0x000003, None));

        // at t=400s: aircraft 1 (last 0) is older than 300s; aircraft 2
        // (last 100s) is exactly at the boundary and survives
        let removed = tracker.purge_old(400_000);
        assert_eq!(removed, 1);
        assert!(!tracker
            .aircraft()
            .contains_key(&(AddressQualifier::AdsbIcao, 1)));
        assert!(tracker
            .aircraft()
            .contains_key(&(AddressQualifier::AdsbIcao, 2)));
        assert!(tracker
            .aircraft()
            .contains_key(&(AddressQualifier::AdsbIcao, 3)));
    }

    #[test]
    fn test_purged_aircraft_resurrects_on_new_message() {
        let mut tracker = Tracker::new(Duration::from_secs(300));
        tracker.handle_message(0, &message(0x000001, Some("OLD")));
        tracker.purge_old(600_000);
        assert!(tracker.aircraft().is_empty());

        tracker.handle_message(700_000, &message(0x000001, None));
        let state = &tracker.aircraft()[&(AddressQualifier::AdsbIcao, 1)];
        assert_eq!(state.messages, 1); // fresh state, not the old one
        assert!(!state.callsign.valid());
    }

    #[test]
    fn test_purge_interval_is_quarter_timeout() {
        let tracker = Tracker::new(Duration::from_secs(300));
        assert_eq!(tracker.purge_interval(), Duration::from_secs(75));
    }

    #[test]
    fn test_handle_messages_skips_uplink() {
        let mut tracker = Tracker::default();
        let uplink = RawMessage::new(vec![0; 432], 1_000, 0, 0.0);
        let mut payload = vec![0u8; 18];
        payload[3] = 0x42;
        let downlink = RawMessage::new(payload, 2_000, 0, 0.0);

        tracker.handle_messages(&[uplink, downlink]);
        assert_eq!(tracker.aircraft().len(), 1);
        assert_eq!(tracker.total_messages(), 1);
    }

    #[test]
    fn test_average_rssi_window() {
        let mut state = AircraftState::new(AddressQualifier::AdsbIcao, 1);
        assert_eq!(state.average_rssi(), 0.0);

        let mut message = message(0x000001, None);
        message.rssi = -10.0;
        state.update_from_message(0, &message);
        message.rssi = -20.0;
        state.update_from_message(1, &message);
        assert_eq!(state.average_rssi(), -15.0);
    }
}
