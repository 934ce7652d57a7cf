use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FEET_PER_METER: f64 = 3.28084;
pub const KNOTS_PER_MPS: f64 = 1.94384;
pub const MISSING_CALLSIGN: &str = "N/A";
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// ADS-B emitter category labels, indexed by code.
const CATEGORY_LABELS: [&str; 21] = [
    "No Info",
    "No Info",
    "Light",
    "Small",
    "Large",
    "High Vortex",
    "Heavy",
    "High Perf",
    "Rotorcraft",
    "Glider",
    "Lighter-than-air",
    "Parachutist",
    "Ultralight",
    "Reserved",
    "UAV",
    "Space",
    "Emergency",
    "Service",
    "Point Obstacle",
    "Cluster",
    "Line Obstacle",
];

// Positional indices into a state vector.
const IDX_ICAO24: usize = 0;
const IDX_CALLSIGN: usize = 1;
const IDX_ORIGIN_COUNTRY: usize = 2;
const IDX_LONGITUDE: usize = 5;
const IDX_LATITUDE: usize = 6;
const IDX_BARO_ALTITUDE: usize = 7;
const IDX_ON_GROUND: usize = 8;
const IDX_VELOCITY: usize = 9;
const IDX_TRUE_TRACK: usize = 10;
const IDX_CATEGORY: usize = 17;

/// One aircraft as seen in a single poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftRecord {
    pub icao24: String,
    pub callsign: String,
    pub lat: f64,
    pub lon: f64,
    pub velocity_kts: i32,
    pub heading: f64,
    pub altitude_ft: i32,
    pub on_ground: bool,
    pub origin_country: String,
    pub category: String,
}

impl AircraftRecord {
    /// Normalize one positional state-vector record.
    ///
    /// Records without a position or transponder id are dropped.
    pub fn from_state_vector(state: &[Value]) -> Option<Self> {
        let lon = state.get(IDX_LONGITUDE).and_then(Value::as_f64)?;
        let lat = state.get(IDX_LATITUDE).and_then(Value::as_f64)?;
        let icao24 = state
            .get(IDX_ICAO24)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())?
            .to_string();

        let callsign = state
            .get(IDX_CALLSIGN)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|callsign| !callsign.is_empty())
            .unwrap_or(MISSING_CALLSIGN)
            .to_string();
        let origin_country = state
            .get(IDX_ORIGIN_COUNTRY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let altitude_m = number_or_zero(state, IDX_BARO_ALTITUDE);
        let velocity_ms = number_or_zero(state, IDX_VELOCITY);
        let heading = number_or_zero(state, IDX_TRUE_TRACK);
        let on_ground = state
            .get(IDX_ON_GROUND)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let category_code = state.get(IDX_CATEGORY).and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_f64().map(|code| code as i64))
        });

        Some(Self {
            icao24,
            callsign,
            lat,
            lon,
            velocity_kts: mps_to_knots(velocity_ms),
            heading,
            altitude_ft: meters_to_feet(altitude_m),
            on_ground,
            origin_country,
            category: category_label(category_code).to_string(),
        })
    }
}

fn number_or_zero(state: &[Value], index: usize) -> f64 {
    state.get(index).and_then(Value::as_f64).unwrap_or(0.0)
}

pub fn meters_to_feet(meters: f64) -> i32 {
    (meters * FEET_PER_METER).floor() as i32
}

pub fn mps_to_knots(mps: f64) -> i32 {
    (mps * KNOTS_PER_MPS).floor() as i32
}

pub fn category_label(code: Option<i64>) -> &'static str {
    code.and_then(|code| usize::try_from(code).ok())
        .and_then(|code| CATEGORY_LABELS.get(code).copied())
        .unwrap_or(UNKNOWN_CATEGORY)
}

/// Immutable batch of aircraft captured by one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    /// Upstream observation time (unix seconds), when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_time: Option<i64>,
    pub aircraft: Vec<AircraftRecord>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            captured_at: DateTime::<Utc>::UNIX_EPOCH,
            source_time: None,
            aircraft: Vec::new(),
        }
    }

    pub fn new(aircraft: Vec<AircraftRecord>, source_time: Option<i64>) -> Self {
        Self {
            captured_at: Utc::now(),
            source_time,
            aircraft,
        }
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Latest record for a transponder id, or `None` if it has left the area.
    pub fn find(&self, icao24: &str) -> Option<&AircraftRecord> {
        self.aircraft.iter().find(|record| record.icao24 == icao24)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AircraftRecord, Snapshot, category_label, meters_to_feet, mps_to_knots};

    fn state(values: serde_json::Value) -> Vec<serde_json::Value> {
        values.as_array().cloned().expect("state vector is an array")
    }

    #[test]
    fn unit_conversions_floor_to_integers() {
        assert_eq!(meters_to_feet(0.0), 0);
        assert_eq!(meters_to_feet(1000.0), 3280);
        assert_eq!(mps_to_knots(0.0), 0);
        assert_eq!(mps_to_knots(10.0), 19);
    }

    #[test]
    fn category_table_falls_back_to_unknown() {
        assert_eq!(category_label(Some(6)), "Heavy");
        assert_eq!(category_label(Some(0)), "No Info");
        assert_eq!(category_label(Some(21)), "Unknown");
        assert_eq!(category_label(Some(-1)), "Unknown");
        assert_eq!(category_label(None), "Unknown");
    }

    #[test]
    fn full_record_is_normalized() {
        let raw = state(json!([
            "4601f5", "FIN7TV  ", "Finland", 1_700_000_000, 1_700_000_000,
            24.9, 60.3, 3000.0, false, 200.0, 271.5, 0.0, null, 3100.0, "1234",
            false, 0, 4
        ]));

        let record = AircraftRecord::from_state_vector(&raw).expect("record should parse");
        assert_eq!(record.icao24, "4601f5");
        assert_eq!(record.callsign, "FIN7TV");
        assert_eq!(record.origin_country, "Finland");
        assert_eq!(record.altitude_ft, 9842);
        assert_eq!(record.velocity_kts, 388);
        assert_eq!(record.heading, 271.5);
        assert!(!record.on_ground);
        assert_eq!(record.category, "Large");
    }

    #[test]
    fn missing_numbers_default_to_zero_and_category_to_unknown() {
        let raw = state(json!([
            "abc123", null, "Sweden", null, null, 18.0, 59.6, null, true, null, null
        ]));

        let record = AircraftRecord::from_state_vector(&raw).expect("record should parse");
        assert_eq!(record.callsign, "N/A");
        assert_eq!(record.altitude_ft, 0);
        assert_eq!(record.velocity_kts, 0);
        assert_eq!(record.heading, 0.0);
        assert!(record.on_ground);
        assert_eq!(record.category, "Unknown");
    }

    #[test]
    fn records_without_position_are_dropped() {
        let no_lon = state(json!(["abc123", "X", "Y", null, null, null, 59.6]));
        let no_lat = state(json!(["abc123", "X", "Y", null, null, 18.0, null]));
        assert!(AircraftRecord::from_state_vector(&no_lon).is_none());
        assert!(AircraftRecord::from_state_vector(&no_lat).is_none());
    }

    #[test]
    fn snapshot_lookup_by_identity() {
        let raw = state(json!(["abc123", "SAS1", "Sweden", null, null, 18.0, 59.6]));
        let record = AircraftRecord::from_state_vector(&raw).expect("record should parse");
        let snapshot = Snapshot::new(vec![record], Some(1_700_000_000));

        assert_eq!(
            snapshot.find("abc123").map(|r| r.callsign.as_str()),
            Some("SAS1")
        );
        assert!(snapshot.find("gone").is_none());
        assert!(Snapshot::empty().is_empty());
    }
}
