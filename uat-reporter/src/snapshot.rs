//! JSON aircraft snapshots for map dashboards.
//!
//! Writes `receiver.json` once at startup, then `aircraft.json` on every
//! interval plus a rotating `history_N.json` series. Files are written to a
//! temporary name and renamed so readers never see a partial document.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use uat_core::adsb::AirGroundState;
use uat_core::track::{AircraftState, Tracker};
use uat_core::types::round_n;
use uat_core::AddressQualifier;

/// Fields older than this are left out of the snapshot, ms.
const MAX_DATA_AGE: u64 = 60_000;

pub struct SnapshotWriter {
    dir: PathBuf,
    interval: Duration,
    history_count: usize,
    history_interval: Duration,
    location: Option<(f64, f64)>,
    next_history_index: usize,
    next_history_time: u64,
}

impl SnapshotWriter {
    pub fn new(
        dir: PathBuf,
        interval: Duration,
        history_count: usize,
        history_interval: Duration,
        location: Option<(f64, f64)>,
    ) -> Self {
        SnapshotWriter {
            dir,
            interval,
            history_count,
            history_interval,
            location,
            next_history_index: 0,
            next_history_time: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Write `receiver.json` describing this instance.
    pub fn write_receiver_json(&self) -> std::io::Result<()> {
        let mut receiver = json!({
            "version": concat!("uat-reporter ", env!("CARGO_PKG_VERSION")),
            "refresh": self.interval.as_millis() as u64,
            "history": self.history_count,
        });
        if let Some((lat, lon)) = self.location {
            receiver["lat"] = json!(round_n(lat, 4));
            receiver["lon"] = json!(round_n(lon, 4));
        }

        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(
            self.dir.join("receiver.json"),
            serde_json::to_string_pretty(&receiver)?,
        )
    }

    /// Write `aircraft.json` (and, when due, the next history file).
    pub fn periodic_write(&mut self, tracker: &Tracker, now: u64) -> std::io::Result<()> {
        let document = build_aircraft_json(tracker, now);
        let text = document.to_string();

        let temp_path = self.dir.join("aircraft.json.new");
        std::fs::write(&temp_path, &text)?;
        std::fs::rename(&temp_path, self.dir.join("aircraft.json"))?;

        if self.history_count > 0 && self.next_history_time <= now {
            let temp_path = self.dir.join("history.json.new");
            let history_path = self
                .dir
                .join(format!("history_{}.json", self.next_history_index));
            std::fs::write(&temp_path, &text)?;
            std::fs::rename(&temp_path, history_path)?;

            self.next_history_index = (self.next_history_index + 1) % self.history_count;
            self.next_history_time = now + self.history_interval.as_millis() as u64;
        }

        Ok(())
    }
}

fn build_aircraft_json(tracker: &Tracker, now: u64) -> serde_json::Value {
    let mut aircraft_list = Vec::new();

    for state in tracker.aircraft().values() {
        if state.messages < 2 {
            continue; // possibly noise
        }
        aircraft_list.push(aircraft_json(state, now));
    }

    json!({
        "now": now as f64 / 1000.0,
        "messages": tracker.total_messages(),
        "aircraft": aircraft_list,
    })
}

fn aircraft_json(state: &AircraftState, now: u64) -> serde_json::Value {
    let mut ac = serde_json::Map::new();

    let hex = if state.address_qualifier.is_icao() {
        format!("{:06x}", state.address)
    } else {
        format!("~{:06x}", state.address)
    };
    ac.insert("hex".to_string(), json!(hex));

    match state.address_qualifier {
        AddressQualifier::TisbIcao => {
            ac.insert("type".to_string(), json!("tisb_icao"));
            ac.insert("tisb".to_string(), json!(["lat", "lon"]));
        }
        AddressQualifier::TisbTrackfile => {
            ac.insert("type".to_string(), json!("tisb_trackfile"));
            ac.insert("tisb".to_string(), json!(["lat", "lon"]));
        }
        AddressQualifier::AdsbIcao => {
            ac.insert("type".to_string(), json!("adsb_icao"));
        }
        _ => {}
    }

    macro_rules! fresh {
        ($field:ident, $key:literal, $value:expr) => {
            if state.$field.update_age(now) < MAX_DATA_AGE {
                let value = state.$field.value().unwrap();
                ac.insert($key.to_string(), $value(value));
            }
        };
    }

    if state.position.update_age(now) < MAX_DATA_AGE {
        let (lat, lon) = state.position.value().unwrap();
        ac.insert("lat".to_string(), json!(lat));
        ac.insert("lon".to_string(), json!(lon));
        ac.insert(
            "seen_pos".to_string(),
            json!(state.position.update_age(now) as f64 / 1000.0),
        );
    }
    fresh!(pressure_altitude, "alt_baro", |v: &i32| json!(v));
    fresh!(geometric_altitude, "alt_geom", |v: &i32| json!(v));
    fresh!(nic, "nic", |v: &u8| json!(v));
    if state.airground_state.update_age(now) < MAX_DATA_AGE
        && state.airground_state.value() == Some(&AirGroundState::OnGround)
    {
        ac.insert("alt_baro".to_string(), json!("ground"));
    }
    fresh!(vertical_velocity_barometric, "baro_rate", |v: &i32| json!(v));
    fresh!(vertical_velocity_geometric, "geom_rate", |v: &i32| json!(v));
    fresh!(ground_speed, "gs", |v: &u32| json!(v));
    fresh!(magnetic_heading, "mag_heading", |v: &f64| json!(v));
    fresh!(true_heading, "true_heading", |v: &f64| json!(v));
    fresh!(true_track, "track", |v: &f64| json!(v));
    fresh!(emitter_category, "category", |v: &u8| {
        json!(format!(
            "{}{}",
            (b'A' + (v >> 3)) as char,
            (b'0' + (v & 7)) as char
        ))
    });
    fresh!(callsign, "flight", |v: &String| json!(v));
    fresh!(flightplan_id, "squawk", |v: &String| json!(v));
    fresh!(emergency, "emergency", |v: &uat_core::adsb::EmergencyPriorityStatus| {
        json!(v.as_str())
    });
    fresh!(mops_version, "uat_version", |v: &u8| json!(v));
    fresh!(sil, "sil", |v: &u8| json!(v));
    fresh!(sda, "sda", |v: &u8| json!(v));
    fresh!(nac_p, "nac_p", |v: &u8| json!(v));
    fresh!(nac_v, "nac_v", |v: &u8| json!(v));
    fresh!(nic_baro, "nic_baro", |v: &u8| json!(v));
    fresh!(sil_supplement, "sil_type", |v: &uat_core::adsb::SilSupplement| {
        json!(match v {
            uat_core::adsb::SilSupplement::PerHour => "perhour",
            uat_core::adsb::SilSupplement::PerSample => "persample",
        })
    });
    fresh!(gva, "gva", |v: &u8| json!(v));
    fresh!(barometric_pressure_setting, "nav_qnh", |v: &f64| json!(v));
    fresh!(selected_heading, "nav_heading", |v: &f64| json!(v));
    fresh!(horizontal_containment, "rc", |v: &f64| json!(v));

    if state.selected_altitude.update_age(now) < MAX_DATA_AGE {
        let altitude = state.selected_altitude.value().unwrap();
        let key = match state.selected_altitude_type.value() {
            Some(uat_core::adsb::SelectedAltitudeType::Fms) => "nav_altitude_fms",
            _ => "nav_altitude_mcp",
        };
        ac.insert(key.to_string(), json!(altitude));
    }

    if state.mode_indicators.update_age(now) < MAX_DATA_AGE {
        let modes = state.mode_indicators.value().unwrap();
        let mut names = Vec::new();
        if modes.autopilot {
            names.push("autopilot");
        }
        if modes.vnav {
            names.push("vnav");
        }
        if modes.altitude_hold {
            names.push("althold");
        }
        if modes.approach {
            names.push("approach");
        }
        if modes.lnav {
            names.push("lnav");
        }
        ac.insert("nav_modes".to_string(), json!(names));
    }

    ac.insert("messages".to_string(), json!(state.messages));
    ac.insert(
        "seen".to_string(),
        json!(now.saturating_sub(state.last_message_time) as f64 / 1000.0),
    );
    if state.average_rssi() != 0.0 {
        ac.insert("rssi".to_string(), json!(round_n(state.average_rssi(), 1)));
    }

    serde_json::Value::Object(ac)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uat_core::{AdsbMessage, RawMessage};

    fn tracked(tracker: &mut Tracker, address: u32, at: u64, times: u64) {
        let mut payload = vec![0u8; 34];
        payload[0] = 0x08;
        payload[1] = (address >> 16) as u8;
        payload[2] = (address >> 8) as u8;
        payload[3] = address as u8;
        let message = AdsbMessage::from_raw(&RawMessage::new(payload, at, 0, 0.0)).unwrap();
        for i in 0..times {
            tracker.handle_message(at + i, &message);
        }
    }

    #[test]
    fn test_single_message_aircraft_excluded() {
        let mut tracker = Tracker::default();
        tracked(&mut tracker, 0x111111, 1_000, 1);
        tracked(&mut tracker, 0x222222, 1_000, 2);

        let document = build_aircraft_json(&tracker, 2_000);
        let aircraft = document["aircraft"].as_array().unwrap();
        assert_eq!(aircraft.len(), 1);
        assert_eq!(aircraft[0]["hex"], "222222");
        assert_eq!(aircraft[0]["type"], "adsb_icao");
    }

    #[test]
    fn test_stale_fields_left_out() {
        let mut tracker = Tracker::default();
        tracked(&mut tracker, 0x111111, 1_000, 2);

        let fresh = build_aircraft_json(&tracker, 2_000);
        assert!(fresh["aircraft"][0]["nic"].is_number());

        let stale = build_aircraft_json(&tracker, 1_000 + MAX_DATA_AGE + 1);
        assert!(stale["aircraft"][0]["nic"].is_null());
        assert!(stale["aircraft"][0]["messages"].is_number());
    }

    #[test]
    fn test_document_header() {
        let tracker = Tracker::default();
        let document = build_aircraft_json(&tracker, 5_500);
        assert_eq!(document["now"], 5.5);
        assert_eq!(document["messages"], 0);
    }

    #[test]
    fn test_snapshot_files_written_and_rotated() {
        let dir = std::env::temp_dir().join("uat-reporter-snapshot-test");
        std::fs::remove_dir_all(&dir).ok();

        let mut writer = SnapshotWriter::new(
            dir.clone(),
            Duration::from_secs(1),
            2,
            Duration::from_secs(30),
            Some((37.45638, -122.17355)),
        );
        writer.write_receiver_json().unwrap();

        let mut tracker = Tracker::default();
        tracked(&mut tracker, 0x111111, 1_000, 2);

        writer.periodic_write(&tracker, 2_000).unwrap();
        writer.periodic_write(&tracker, 40_000).unwrap();

        assert!(dir.join("receiver.json").exists());
        assert!(dir.join("aircraft.json").exists());
        assert!(dir.join("history_0.json").exists());
        assert!(dir.join("history_1.json").exists());

        let receiver: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("receiver.json")).unwrap())
                .unwrap();
        assert_eq!(receiver["refresh"], 1000);
        assert_eq!(receiver["history"], 2);
        assert_eq!(receiver["lat"], 37.4564);

        std::fs::remove_dir_all(&dir).ok();
    }
}
