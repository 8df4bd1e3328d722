//! Periodic TSV aircraft report.
//!
//! One tab-separated line per aircraft with something new to say. Report
//! pacing depends on what changed: navigation and identity changes go out
//! immediately, aircraft near the ground report every second, cruising
//! aircraft back off to tens of seconds, and every aircraft gets a full
//! "slow" report of its quality fields at least every five minutes.

use std::collections::HashMap;

use uat_core::adsb::AirGroundState;
use uat_core::track::{AddressKey, AgedField, AircraftState, Tracker};
use uat_core::AddressQualifier;

pub const TSV_VERSION: &str = "4U";

/// Interval between forced full reports, ms.
const SLOW_REPORT_INTERVAL: u64 = 300_000;

/// Fields older than this are not considered current, ms.
const MAX_DATA_AGE: u64 = 30_000;

pub fn start_banner() -> String {
    format!("tsv_version\t{TSV_VERSION}")
}

/// Values remembered from the last emitted report, for change detection.
#[derive(Debug, Default, Clone)]
struct LastReport {
    report_time: u64,
    slow_report_time: u64,
    pressure_altitude: Option<i32>,
    geometric_altitude: Option<i32>,
    vertical_velocity_barometric: Option<i32>,
    vertical_velocity_geometric: Option<i32>,
    true_track: Option<f64>,
    true_heading: Option<f64>,
    magnetic_heading: Option<f64>,
    ground_speed: Option<u32>,
}

pub struct Reporter {
    reported: HashMap<AddressKey, LastReport>,
}

impl Reporter {
    pub fn new() -> Self {
        Reporter {
            reported: HashMap::new(),
        }
    }

    /// Produce the report lines due at `now`, one per aircraft.
    pub fn periodic_report(&mut self, tracker: &Tracker, now: u64) -> Vec<String> {
        let mut lines = Vec::new();
        for (key, aircraft) in tracker.aircraft() {
            if let Some(line) = self.report_one_aircraft(*key, aircraft, now) {
                lines.push(line);
            }
        }

        // forget aircraft the tracker has purged
        self.reported
            .retain(|key, _| tracker.aircraft().contains_key(key));

        lines
    }

    fn report_one_aircraft(
        &mut self,
        key: AddressKey,
        aircraft: &AircraftState,
        now: u64,
    ) -> Option<String> {
        let last = self.reported.entry(key).or_default();

        let changed = changed_since(last, aircraft);
        let immediate = immediate_since(last, aircraft);

        let altitude = if aircraft.pressure_altitude.update_age(now) < MAX_DATA_AGE {
            aircraft.pressure_altitude.value().copied()
        } else if aircraft.geometric_altitude.update_age(now) < MAX_DATA_AGE {
            aircraft.geometric_altitude.value().copied()
        } else {
            None
        };
        let airground = if aircraft.airground_state.update_age(now) < MAX_DATA_AGE {
            aircraft.airground_state.value().copied()
        } else {
            None
        };
        let groundspeed = if aircraft.ground_speed.update_age(now) < MAX_DATA_AGE {
            aircraft.ground_speed.value().copied()
        } else {
            None
        };

        let min_age = if immediate {
            0
        } else if airground == Some(AirGroundState::OnGround) {
            1_000
        } else if altitude.is_some_and(|alt| alt < 500)
            && groundspeed.map_or(true, |gs| gs < 200)
        {
            1_000
        } else if groundspeed.is_some_and(|gs| gs < 100) && altitude.map_or(true, |alt| alt < 1000)
        {
            1_000
        } else if altitude.map_or(true, |alt| alt < 10_000) {
            if changed {
                5_000
            } else {
                10_000
            }
        } else if changed {
            10_000
        } else {
            30_000
        };

        let force_slow = now - last.slow_report_time > SLOW_REPORT_INTERVAL;

        if now - last.report_time < min_age {
            return None;
        }

        let source = match aircraft.address_qualifier {
            AddressQualifier::AdsbIcao | AddressQualifier::AdsbOther | AddressQualifier::AdsrOther => "A",
            AddressQualifier::TisbIcao | AddressQualifier::TisbOther => "T",
            _ => "?",
        };

        let mut kv: Vec<(String, String)> = Vec::new();
        let report_time = last.report_time;

        let slow_field = |kv: &mut Vec<(String, String)>, key: &str, text: Option<String>| {
            if let Some(text) = text {
                kv.push((key.to_string(), text));
            }
        };

        // quality fields: only on change or in the forced slow report
        if slow_due(&aircraft.mops_version, report_time, force_slow) {
            slow_field(&mut kv, "adsb_version", aircraft.mops_version.value().map(|v| v.to_string()));
        }
        if slow_due(&aircraft.emitter_category, report_time, force_slow) {
            slow_field(
                &mut kv,
                "category",
                aircraft
                    .emitter_category
                    .value()
                    .map(|v| format!("{:02X}", *v as u32 + 0xa0)),
            );
        }
        for (key_name, field) in [
            ("nac_p", &aircraft.nac_p),
            ("nac_v", &aircraft.nac_v),
            ("sil", &aircraft.sil),
            ("nic_baro", &aircraft.nic_baro),
        ] {
            if slow_due(field, report_time, force_slow) {
                let value = field.value().unwrap();
                kv.push((
                    key_name.to_string(),
                    aged_text(value.to_string(), field, now, source),
                ));
            }
        }
        if slow_due(&aircraft.sil_supplement, report_time, force_slow) {
            let text = match aircraft.sil_supplement.value().unwrap() {
                uat_core::adsb::SilSupplement::PerHour => "per_hour",
                uat_core::adsb::SilSupplement::PerSample => "per_sample",
            };
            kv.push((
                "sil_type".to_string(),
                aged_text(text.to_string(), &aircraft.sil_supplement, now, source),
            ));
        }

        // fast fields: whenever restated since the last report
        if fresh_due(&aircraft.airground_state, report_time) {
            let text = match aircraft.airground_state.value().unwrap() {
                AirGroundState::AirborneSubsonic | AirGroundState::AirborneSupersonic => "A+",
                AirGroundState::OnGround => "G+",
                AirGroundState::Reserved => "?",
            };
            kv.push((
                "airGround".to_string(),
                aged_text(text.to_string(), &aircraft.airground_state, now, source),
            ));
        }
        if fresh_due(&aircraft.flightplan_id, report_time) {
            let value = aircraft.flightplan_id.value().unwrap();
            kv.push((
                "squawk".to_string(),
                aged_text(format!("{{{value}}}"), &aircraft.flightplan_id, now, source),
            ));
        }
        if fresh_due(&aircraft.callsign, report_time) {
            let value = aircraft.callsign.value().unwrap();
            kv.push((
                "ident".to_string(),
                aged_text(format!("{{{value}}}"), &aircraft.callsign, now, source),
            ));
        }
        if fresh_due(&aircraft.pressure_altitude, report_time) {
            let value = aircraft.pressure_altitude.value().unwrap();
            kv.push((
                "alt".to_string(),
                aged_text(value.to_string(), &aircraft.pressure_altitude, now, source),
            ));
        }
        if fresh_due(&aircraft.position, report_time) {
            let (lat, lon) = aircraft.position.value().unwrap();
            // nic should always be valid when the position is
            let nic = aircraft.nic.value().copied().unwrap_or(0);
            let rc = aircraft
                .horizontal_containment
                .value()
                .copied()
                .unwrap_or(0.0);
            kv.push((
                "position".to_string(),
                aged_text(
                    format!("{{{lat:.5} {lon:.5} {nic} {:.0}}}", rc.ceil()),
                    &aircraft.position,
                    now,
                    source,
                ),
            ));
        }
        if fresh_due(&aircraft.geometric_altitude, report_time) {
            let value = aircraft.geometric_altitude.value().unwrap();
            kv.push((
                "alt_gnss".to_string(),
                aged_text(value.to_string(), &aircraft.geometric_altitude, now, source),
            ));
        }
        if fresh_due(&aircraft.vertical_velocity_barometric, report_time) {
            let value = aircraft.vertical_velocity_barometric.value().unwrap();
            kv.push((
                "vrate".to_string(),
                aged_text(
                    value.to_string(),
                    &aircraft.vertical_velocity_barometric,
                    now,
                    source,
                ),
            ));
        }
        if fresh_due(&aircraft.vertical_velocity_geometric, report_time) {
            let value = aircraft.vertical_velocity_geometric.value().unwrap();
            kv.push((
                "vrate_geom".to_string(),
                aged_text(
                    value.to_string(),
                    &aircraft.vertical_velocity_geometric,
                    now,
                    source,
                ),
            ));
        }
        if fresh_due(&aircraft.ground_speed, report_time) {
            let value = aircraft.ground_speed.value().unwrap();
            kv.push((
                "speed".to_string(),
                aged_text(value.to_string(), &aircraft.ground_speed, now, source),
            ));
        }
        for (key_name, field) in [
            ("track", &aircraft.true_track),
            ("heading_magnetic", &aircraft.magnetic_heading),
            ("heading_true", &aircraft.true_heading),
        ] {
            if fresh_due(field, report_time) {
                let value = field.value().unwrap();
                kv.push((
                    key_name.to_string(),
                    aged_text(format!("{value:.1}"), field, now, source),
                ));
            }
        }
        if fresh_due(&aircraft.selected_altitude, report_time) {
            let value = aircraft.selected_altitude.value().unwrap();
            kv.push((
                "nav_alt".to_string(),
                aged_text(value.to_string(), &aircraft.selected_altitude, now, source),
            ));
        }
        if fresh_due(&aircraft.selected_heading, report_time) {
            let value = aircraft.selected_heading.value().unwrap();
            kv.push((
                "nav_heading".to_string(),
                aged_text(format!("{value:.0}"), &aircraft.selected_heading, now, source),
            ));
        }
        if fresh_due(&aircraft.barometric_pressure_setting, report_time) {
            let value = aircraft.barometric_pressure_setting.value().unwrap();
            kv.push((
                "nav_qnh".to_string(),
                aged_text(
                    format!("{value:.1}"),
                    &aircraft.barometric_pressure_setting,
                    now,
                    source,
                ),
            ));
        }
        if fresh_due(&aircraft.emergency, report_time) {
            let value = aircraft.emergency.value().unwrap();
            kv.push((
                "emergency".to_string(),
                aged_text(value.as_str().to_string(), &aircraft.emergency, now, source),
            ));
        }

        if kv.is_empty() {
            return None;
        }

        let idtype = if aircraft.address_qualifier.is_icao() {
            "hexid"
        } else {
            "otherid"
        };

        let mut line = format!(
            "clock\t{}\t{}\t{:06X}",
            now / 1000,
            idtype,
            aircraft.address
        );
        if force_slow {
            line.push_str(&format!("\taddrtype\t{}", aircraft.address_qualifier));
        }
        for (key_name, value) in &kv {
            line.push_str(&format!("\t{key_name}\t{value}"));
        }

        if force_slow {
            last.slow_report_time = now;
        }
        last.report_time = now;
        last.pressure_altitude = aircraft.pressure_altitude.value().copied();
        last.geometric_altitude = aircraft.geometric_altitude.value().copied();
        last.vertical_velocity_barometric =
            aircraft.vertical_velocity_barometric.value().copied();
        last.vertical_velocity_geometric = aircraft.vertical_velocity_geometric.value().copied();
        last.true_track = aircraft.true_track.value().copied();
        last.true_heading = aircraft.true_heading.value().copied();
        last.magnetic_heading = aircraft.magnetic_heading.value().copied();
        last.ground_speed = aircraft.ground_speed.value().copied();

        Some(line)
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Reporter::new()
    }
}

/// True when the numeric state has moved enough to justify a faster report.
/// Each quantity is compared with its own previous value.
fn changed_since(last: &LastReport, aircraft: &AircraftState) -> bool {
    fn moved<T: Copy + Into<f64> + PartialEq>(old: Option<T>, field: &AgedField<T>, threshold: f64) -> bool {
        match (old, field.value()) {
            (Some(old), Some(new)) => (old.into() - (*new).into()).abs() >= threshold,
            _ => false,
        }
    }

    moved(last.pressure_altitude, &aircraft.pressure_altitude, 50.0)
        || moved(last.geometric_altitude, &aircraft.geometric_altitude, 50.0)
        || moved(
            last.vertical_velocity_barometric,
            &aircraft.vertical_velocity_barometric,
            500.0,
        )
        || moved(
            last.vertical_velocity_geometric,
            &aircraft.vertical_velocity_geometric,
            500.0,
        )
        || moved(last.true_track, &aircraft.true_track, 2.0)
        || moved(last.true_heading, &aircraft.true_heading, 2.0)
        || moved(last.magnetic_heading, &aircraft.magnetic_heading, 2.0)
        || match (last.ground_speed, aircraft.ground_speed.value()) {
            (Some(old), Some(new)) => (old as f64 - *new as f64).abs() >= 25.0,
            _ => false,
        }
}

/// True when a field the consumer wants right away changed since the last
/// report.
fn immediate_since(last: &LastReport, aircraft: &AircraftState) -> bool {
    let since = last.report_time;
    aircraft.selected_altitude_type.changed() > since
        || aircraft.selected_altitude.changed() > since
        || aircraft.selected_heading.changed() > since
        || aircraft.mode_indicators.changed() > since
        || aircraft.barometric_pressure_setting.changed() > since
        || aircraft.callsign.changed() > since
        || aircraft.flightplan_id.changed() > since
        || aircraft.airground_state.changed() > since
        || aircraft.emergency.changed() > since
}

fn slow_due<T: PartialEq>(field: &AgedField<T>, report_time: u64, force_slow: bool) -> bool {
    field.valid() && (force_slow || field.changed() > report_time)
}

fn fresh_due<T: PartialEq>(field: &AgedField<T>, report_time: u64) -> bool {
    field.valid() && field.updated() > report_time
}

fn aged_text<T: PartialEq>(value: String, field: &AgedField<T>, now: u64, source: &str) -> String {
    format!("{value} {} {source}", field.update_age(now) / 1000)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uat_core::{AdsbMessage, RawMessage, Tracker};

    fn tracked_message(address: u32) -> AdsbMessage {
        let mut payload = vec![0u8; 34];
        payload[0] = 0x08; // payload type 1, ADS-B ICAO
        payload[1] = (address >> 16) as u8;
        payload[2] = (address >> 8) as u8;
        payload[3] = address as u8;
        AdsbMessage::from_raw(&RawMessage::new(payload, 0, 0, 0.0)).unwrap()
    }

    #[test]
    fn test_start_banner() {
        assert_eq!(start_banner(), "tsv_version\t4U");
    }

    #[test]
    fn test_first_report_emits_identity() {
        let mut tracker = Tracker::new(Duration::from_secs(300));
        let mut message = tracked_message(0xabc123);
        message.callsign = Some("TEST12".to_string());
        message.pressure_altitude = Some(4000);
        tracker.handle_message(1_000, &message);

        let mut reporter = Reporter::new();
        let lines = reporter.periodic_report(&tracker, 2_000);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.starts_with("clock\t2\thexid\tABC123"), "line: {line}");
        assert!(line.contains("\tident\t{TEST12} 1 A"), "line: {line}");
        assert!(line.contains("\talt\t4000 1 A"), "line: {line}");
        // quality fields go out because they just changed
        assert!(line.contains("\tadsb_version\t0"), "line: {line}");
    }

    #[test]
    fn test_no_news_no_line() {
        let mut tracker = Tracker::new(Duration::from_secs(300));
        tracker.handle_message(1_000, &tracked_message(0xabc123));

        let mut reporter = Reporter::new();
        assert_eq!(reporter.periodic_report(&tracker, 2_000).len(), 1);
        // nothing new since: no line even after the pacing interval passes
        assert!(reporter.periodic_report(&tracker, 50_000).is_empty());
    }

    #[test]
    fn test_restated_field_reports_after_min_age() {
        let mut tracker = Tracker::new(Duration::from_secs(300));
        let mut message = tracked_message(0xabc123);
        message.pressure_altitude = Some(40_000);
        tracker.handle_message(1_000, &message);

        let mut reporter = Reporter::new();
        assert_eq!(reporter.periodic_report(&tracker, 1_500).len(), 1);

        // altitude restated, unchanged, cruise altitude: 30 s pacing applies
        tracker.handle_message(2_000, &message);
        assert!(reporter.periodic_report(&tracker, 3_000).is_empty());
        let lines = reporter.periodic_report(&tracker, 40_000);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\talt\t40000"), "line: {}", lines[0]);
    }

    #[test]
    fn test_emergency_change_is_immediate() {
        let mut tracker = Tracker::new(Duration::from_secs(300));
        let mut message = tracked_message(0xabc123);
        message.pressure_altitude = Some(40_000);
        tracker.handle_message(1_000, &message);

        let mut reporter = Reporter::new();
        reporter.periodic_report(&tracker, 1_500);

        // an emergency change must not wait out the cruise pacing
        message.emergency = Some(uat_core::adsb::EmergencyPriorityStatus::General);
        tracker.handle_message(2_000, &message);
        let lines = reporter.periodic_report(&tracker, 2_100);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\temergency\tgeneral"), "line: {}", lines[0]);
    }

    #[test]
    fn test_slow_report_forced_after_interval() {
        let mut tracker = Tracker::new(Duration::from_secs(3_600));
        let mut message = tracked_message(0xabc123);
        message.pressure_altitude = Some(40_000);
        tracker.handle_message(1_000, &message);

        let mut reporter = Reporter::new();
        reporter.periodic_report(&tracker, 1_500);

        // restate altitude much later; the forced slow report re-emits the
        // quality fields and the addrtype tag
        tracker.handle_message(400_000, &message);
        let lines = reporter.periodic_report(&tracker, 400_500);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\taddrtype\tadsb_icao"), "line: {}", lines[0]);
        assert!(lines[0].contains("\tadsb_version\t"), "line: {}", lines[0]);
    }

    #[test]
    fn test_purged_aircraft_forgotten() {
        let mut tracker = Tracker::new(Duration::from_secs(300));
        tracker.handle_message(1_000, &tracked_message(0xabc123));

        let mut reporter = Reporter::new();
        reporter.periodic_report(&tracker, 2_000);
        assert_eq!(reporter.reported.len(), 1);

        tracker.purge_old(600_000);
        reporter.periodic_report(&tracker, 600_000);
        assert!(reporter.reported.is_empty());
    }
}
